//! OpenTelemetry operator entry point

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;

use otel_common::crd::all_crds;
use otel_common::leader_election::{LeaderElector, LEADER_LEASE_NAME};
use otel_common::telemetry::init_logging;
use otel_operator::config::OperatorConfig;
use otel_operator::controller_runner::{build_all_controllers, ControllerSettings};
use otel_reconcile::{CapabilityRegistry, KubeCapabilityProbe};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    if config.crd {
        let docs = all_crds()
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()
            .context("failed to serialize CRDs")?;
        println!("{}", docs.join("---\n"));
        return Ok(());
    }

    init_logging(config.log_format).context("failed to initialize logging")?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let registry = Arc::new(CapabilityRegistry::new(Arc::new(KubeCapabilityProbe::new(
        client.clone(),
    ))));
    let capabilities = registry.refresh().await;
    tracing::info!(generation = capabilities.generation, "Initial capabilities probed");
    let refresher = registry.clone().spawn_refresh_loop(config.refresh_interval());

    let mut guard = if config.leader_elect {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &config.lease_namespace,
            &config.identity(),
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    let settings = ControllerSettings {
        registry,
        gates: Arc::new(config.feature_gates.clone()),
        concurrency: config.concurrency.max(1),
        watch_namespace: config.watch_namespace.clone(),
    };

    tracing::info!(
        gates = %settings.gates,
        namespace = settings.watch_namespace.as_deref().unwrap_or("<all>"),
        "Starting controllers"
    );
    let controllers = futures::future::join_all(build_all_controllers(client, &settings));

    let lost = async {
        match guard.as_mut() {
            Some(guard) => guard.lost().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = controllers => {
            tracing::info!("Controllers stopped, shutting down");
        }
        _ = lost => {
            refresher.abort();
            anyhow::bail!("leadership lost");
        }
    }

    refresher.abort();
    if let Some(guard) = guard {
        if let Err(e) = guard.release_leadership().await {
            tracing::warn!(error = %e, "Failed to release leadership");
        }
    }
    Ok(())
}
