//! Consistent-hash lookup from a key to the instance that owns it.
//!
//! An [`AccessorFactory`] turns one membership snapshot into an immutable
//! [`Accessor`]. The [`ConsistentAccessor`] places `vnode_count` virtual nodes
//! per instance on a 64-bit ring so that adding or removing one instance only
//! moves the keys adjacent to its virtual nodes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::AccessorError;

/// Default number of virtual nodes per instance.
pub const DEFAULT_VNODE_COUNT: usize = 211;

/// Maps a key to the instance that owns it.
pub trait Accessor: Send + Sync {
    /// Returns the instance owning `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if no instance can be chosen for the key.
    fn get(&self, key: &[u8]) -> Result<String, AccessorError>;
}

/// Builds an [`Accessor`] from a membership snapshot.
pub trait AccessorFactory: Send + Sync {
    /// Creates an accessor over `instances`.
    fn create(&self, instances: &[String]) -> Arc<dyn Accessor>;
}

/// An accessor with no instances; every lookup fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyAccessor;

impl Accessor for EmptyAccessor {
    fn get(&self, _key: &[u8]) -> Result<String, AccessorError> {
        Err(AccessorError::NoInstances)
    }
}

fn ring_hash(data: &[u8]) -> u64 {
    let digest = blake3::hash(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(prefix)
}

/// A consistent-hash ring over a fixed set of instances.
#[derive(Clone)]
pub struct ConsistentAccessor {
    ring: BTreeMap<u64, Arc<str>>,
    instances: usize,
}

impl ConsistentAccessor {
    /// Builds a ring with `vnode_count` virtual nodes per instance.
    ///
    /// A zero `vnode_count` falls back to [`DEFAULT_VNODE_COUNT`].
    #[must_use]
    pub fn new(instances: &[String], vnode_count: usize) -> Self {
        let vnode_count = if vnode_count == 0 {
            DEFAULT_VNODE_COUNT
        } else {
            vnode_count
        };

        let mut ring = BTreeMap::new();
        for instance in instances {
            let owner: Arc<str> = Arc::from(instance.as_str());
            for vnode in 0..vnode_count {
                let point = ring_hash(format!("{instance}-{vnode}").as_bytes());
                // On a collision the lexically smaller instance wins so the ring
                // is independent of input order.
                ring.entry(point)
                    .and_modify(|existing: &mut Arc<str>| {
                        if *owner < **existing {
                            *existing = Arc::clone(&owner);
                        }
                    })
                    .or_insert_with(|| Arc::clone(&owner));
            }
        }

        let mut distinct: Vec<&String> = instances.iter().collect();
        distinct.sort();
        distinct.dedup();

        Self {
            ring,
            instances: distinct.len(),
        }
    }

    /// Returns the number of distinct instances on the ring.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances
    }
}

impl Accessor for ConsistentAccessor {
    fn get(&self, key: &[u8]) -> Result<String, AccessorError> {
        if self.ring.is_empty() {
            return Err(AccessorError::NoInstances);
        }
        if key.is_empty() {
            return Err(AccessorError::InvalidKey("empty key".to_string()));
        }

        let point = ring_hash(key);
        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, owner)| owner.to_string())
            .ok_or(AccessorError::NoInstances)
    }
}

impl fmt::Debug for ConsistentAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistentAccessor")
            .field("instances", &self.instances)
            .field("points", &self.ring.len())
            .finish()
    }
}

/// Creates [`ConsistentAccessor`]s with a fixed virtual node count.
#[derive(Debug, Clone, Copy)]
pub struct ConsistentAccessorFactory {
    vnode_count: usize,
}

impl ConsistentAccessorFactory {
    /// Creates a factory using `vnode_count` virtual nodes per instance.
    #[must_use]
    pub const fn new(vnode_count: usize) -> Self {
        Self { vnode_count }
    }

    /// Returns the configured virtual node count.
    #[must_use]
    pub const fn vnode_count(&self) -> usize {
        self.vnode_count
    }
}

impl Default for ConsistentAccessorFactory {
    fn default() -> Self {
        Self::new(DEFAULT_VNODE_COUNT)
    }
}

impl AccessorFactory for ConsistentAccessorFactory {
    fn create(&self, instances: &[String]) -> Arc<dyn Accessor> {
        if instances.is_empty() {
            return Arc::new(EmptyAccessor);
        }
        Arc::new(ConsistentAccessor::new(instances, self.vnode_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn instances(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    // ==================== EmptyAccessor Tests ====================

    #[test]
    fn test_empty_accessor_fails() {
        assert_eq!(EmptyAccessor.get(b"mac:112233445566"), Err(AccessorError::NoInstances));
    }

    #[test]
    fn test_factory_with_no_instances_fails_lookups() {
        let accessor = ConsistentAccessorFactory::default().create(&[]);
        assert_eq!(accessor.get(b"mac:112233445566"), Err(AccessorError::NoInstances));
    }

    // ==================== ConsistentAccessor Tests ====================

    #[test]
    fn test_single_instance_owns_everything() {
        let accessor = ConsistentAccessor::new(&instances(&["https://a:8080"]), 10);

        for i in 0..100 {
            let key = format!("mac:{i:012x}");
            assert_eq!(accessor.get(key.as_bytes()).unwrap(), "https://a:8080");
        }
    }

    #[test]
    fn test_empty_key_is_invalid() {
        let accessor = ConsistentAccessor::new(&instances(&["https://a:8080"]), 10);
        assert!(matches!(accessor.get(b""), Err(AccessorError::InvalidKey(_))));
    }

    #[test]
    fn test_zero_vnodes_uses_default() {
        let accessor = ConsistentAccessor::new(&instances(&["https://a:8080"]), 0);
        let debug = format!("{accessor:?}");
        assert!(debug.contains(&format!("points: {DEFAULT_VNODE_COUNT}")), "{debug}");
    }

    #[test]
    fn test_instance_count_ignores_duplicates() {
        let accessor = ConsistentAccessor::new(
            &instances(&["https://a:8080", "https://b:8080", "https://a:8080"]),
            10,
        );
        assert_eq!(accessor.instance_count(), 2);
    }

    #[test]
    fn test_keys_spread_over_instances() {
        let accessor = ConsistentAccessor::new(
            &instances(&["https://a:8080", "https://b:8080", "https://c:8080"]),
            DEFAULT_VNODE_COUNT,
        );

        let mut owners: HashMap<String, usize> = HashMap::new();
        for i in 0..3000 {
            let key = format!("mac:{i:012x}");
            *owners.entry(accessor.get(key.as_bytes()).unwrap()).or_default() += 1;
        }

        assert_eq!(owners.len(), 3);
        for count in owners.values() {
            assert!(*count > 500, "unbalanced ring: {owners:?}");
        }
    }

    #[test]
    fn test_factory_reports_vnode_count() {
        assert_eq!(ConsistentAccessorFactory::new(7).vnode_count(), 7);
        assert_eq!(
            ConsistentAccessorFactory::default().vnode_count(),
            DEFAULT_VNODE_COUNT
        );
    }

    proptest! {
        #[test]
        fn prop_lookup_is_independent_of_instance_order(key in "[a-z0-9:]{1,32}") {
            let forward = ConsistentAccessor::new(
                &instances(&["https://a:8080", "https://b:8080", "https://c:8080"]),
                50,
            );
            let reverse = ConsistentAccessor::new(
                &instances(&["https://c:8080", "https://b:8080", "https://a:8080"]),
                50,
            );
            prop_assert_eq!(forward.get(key.as_bytes()).unwrap(), reverse.get(key.as_bytes()).unwrap());
        }

        #[test]
        fn prop_removing_an_instance_only_moves_its_keys(key in "[a-z0-9:]{1,32}") {
            let before = ConsistentAccessor::new(
                &instances(&["https://a:8080", "https://b:8080", "https://c:8080"]),
                50,
            );
            let after = ConsistentAccessor::new(
                &instances(&["https://a:8080", "https://b:8080"]),
                50,
            );

            let owner = before.get(key.as_bytes()).unwrap();
            if owner != "https://c:8080" {
                prop_assert_eq!(after.get(key.as_bytes()).unwrap(), owner);
            }
        }
    }
}
