//! Keyed collection diff
//!
//! [`maps`] compares two keyed collections by content hash. A key whose
//! content changed shows up on both sides: the new value under additions and
//! the old value under removals, so consumers can undo the old item before
//! applying the new one.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Content hash of a diffable item
pub type ItemHash = u64;

/// Items that can be compared by content.
///
/// Two items with equal hashes are treated as unchanged.
pub trait ContentHash {
    /// Hash of the item's content
    fn content_hash(&self) -> ItemHash;
}

/// Hash any `Hash` value with the standard hasher
pub fn hash_of<T: Hash + ?Sized>(value: &T) -> ItemHash {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

macro_rules! content_hash_via_hash {
    ($($t:ty),* $(,)?) => {
        $(impl ContentHash for $t {
            fn content_hash(&self) -> ItemHash {
                hash_of(self)
            }
        })*
    };
}

content_hash_via_hash!(bool, i32, i64, u32, u64, String, &str);

/// Result of [`maps`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changes<K: Ord, V> {
    additions: BTreeMap<K, V>,
    removals: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for Changes<K, V> {
    fn default() -> Self {
        Self {
            additions: BTreeMap::new(),
            removals: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> Changes<K, V> {
    /// Items that are new, or the new value of items that changed
    pub fn additions(&self) -> &BTreeMap<K, V> {
        &self.additions
    }

    /// Items that are gone, or the old value of items that changed
    pub fn removals(&self) -> &BTreeMap<K, V> {
        &self.removals
    }

    /// Whether nothing was added, removed or changed
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Split into `(additions, removals)`
    pub fn into_parts(self) -> (BTreeMap<K, V>, BTreeMap<K, V>) {
        (self.additions, self.removals)
    }
}

/// Diff `current` against `proposed`.
///
/// O(n + m); total over all inputs; `maps(x, x)` is always empty.
pub fn maps<K, V>(current: &BTreeMap<K, V>, proposed: &BTreeMap<K, V>) -> Changes<K, V>
where
    K: Ord + Clone,
    V: ContentHash + Clone,
{
    let mut changes = Changes::default();

    for (key, new) in proposed {
        match current.get(key) {
            None => {
                changes.additions.insert(key.clone(), new.clone());
            }
            Some(old) if old.content_hash() != new.content_hash() => {
                changes.additions.insert(key.clone(), new.clone());
                changes.removals.insert(key.clone(), old.clone());
            }
            Some(_) => {}
        }
    }

    for (key, old) in current {
        if !proposed.contains_key(key) {
            changes.removals.insert(key.clone(), old.clone());
        }
    }

    changes
}
