//! Operator configuration from flags and environment

use std::time::Duration;

use clap::Parser;

use otel_common::featuregate::FeatureGates;
use otel_common::telemetry::LogFormat;

/// OpenTelemetry operator - reconciles collectors, target allocators,
/// OpAMP bridges and cluster observability
#[derive(Parser, Debug, Clone)]
#[command(name = "otel-operator", version, about, long_about = None)]
pub struct OperatorConfig {
    /// Print all CRD manifests as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Seconds between capability probes
    #[arg(long, env = "CAPABILITY_REFRESH_INTERVAL", default_value_t = 30)]
    pub capability_refresh_interval: u64,

    /// Comma-separated feature gates; `+gate` or `gate` enables, `-gate` disables
    #[arg(long, env = "FEATURE_GATES", default_value = "")]
    pub feature_gates: FeatureGates,

    /// Maximum concurrent reconciles per controller
    #[arg(long, env = "CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Run leader election so only one replica reconciles
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    /// Namespace holding the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "opentelemetry-operator-system")]
    pub lease_namespace: String,

    /// Identity used for leader election
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Log output format: json or text
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Only watch resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
}

impl OperatorConfig {
    /// Capability refresh period, never below one second
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.capability_refresh_interval.max(1))
    }

    /// Leader election identity, falling back to the host name
    pub fn identity(&self) -> String {
        self.pod_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| otel_common::OPERATOR_NAME.to_string())
    }
}
