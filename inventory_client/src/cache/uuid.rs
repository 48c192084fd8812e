//! Host lookup by hardware UUID.
//!
//! Hosts are stored once under their host ID. A reverse index maps the host UUID and the IDs of
//! every sub-resource embedded in the host (instance, NICs, GPUs, USBs, storages) to that host
//! ID, so that a change to any part of the host aggregate can drop the cached host.
use std::{iter, sync::Arc, time::Duration};

use dashmap::DashMap;
use inventory_time::TimeProvider;
use inventory_types::{Host, Resource, ResourceKind};
use observability_deps::tracing::{debug, warn};
use parking_lot::RwLock;

use super::{CacheKey, CacheValue, Lookup, ResourceCache};
use crate::error::{InternalSnafu, NotFoundSnafu, Result};

/// Host ID of the host aggregate `resource` belongs to.
///
/// That is the resource's own ID for hosts and the ID of the embedded host for host
/// sub-resources. `None` if the resource carries no (non-empty) host ID.
pub fn host_resource_id(resource: &Resource) -> Option<&str> {
    let host = match resource {
        Resource::Host(h) => h,
        other => other.host()?,
    };
    (!host.resource_id.is_empty()).then_some(host.resource_id.as_str())
}

/// Hosts keyed by host ID plus a reverse index from UUID and sub-resource IDs to host ID.
///
/// Readers observe store and invalidation as atomic: a reverse entry is never visible without
/// the host it points to having been stored, and never outlives an invalidated host.
#[derive(Debug)]
pub struct UuidCache {
    hosts: ResourceCache,

    /// `(tenant, uuid or sub-resource ID)` to host ID.
    reverse: DashMap<CacheKey, String>,

    /// `(tenant, host ID)` to the reverse keys written for that host.
    indexed: DashMap<CacheKey, Vec<String>>,

    lock: RwLock<()>,
}

impl UuidCache {
    /// Create empty cache.
    pub fn new(base_ttl: Duration, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            hosts: ResourceCache::new(base_ttl, time_provider),
            reverse: DashMap::new(),
            indexed: DashMap::new(),
            lock: RwLock::new(()),
        }
    }

    /// Cache `host` and index it under `uuid` and its sub-resource IDs.
    ///
    /// Index entries of a previously cached version of the same host are replaced.
    pub fn store_host_by_uuid(&self, uuid: &str, host: &Host) {
        if host.resource_id.is_empty() || uuid.is_empty() {
            warn!(
                host_id = %host.resource_id,
                uuid,
                "not caching host without host ID or UUID"
            );
            return;
        }
        let tenant_id = host.tenant_id.as_str();
        let host_id = host.resource_id.as_str();
        let keys: Vec<String> = iter::once(uuid)
            .chain(host.sub_resource_ids())
            .map(ToOwned::to_owned)
            .collect();

        let _guard = self.lock.write();
        self.remove_host_locked(tenant_id, host_id);

        self.hosts
            .store(tenant_id, host_id, Resource::Host(host.clone()));
        for key in &keys {
            self.reverse
                .insert(CacheKey::new(tenant_id, key.as_str()), host_id.to_owned());
        }
        debug!(tenant_id, host_id, uuid, n_keys = keys.len(), "indexed host");
        self.indexed.insert(CacheKey::new(tenant_id, host_id), keys);
    }

    /// Cached host with hardware UUID `uuid`.
    ///
    /// Fails with `NotFound` if the UUID is not indexed or the host entry is gone or stale. In
    /// the latter case the dangling index entries are removed.
    pub fn get_host_by_uuid(&self, tenant_id: &str, uuid: &str) -> Result<Host> {
        let host_id = {
            let _guard = self.lock.read();
            let Some(host_id) = self
                .reverse
                .get(&CacheKey::new(tenant_id, uuid))
                .map(|r| r.value().clone())
            else {
                return NotFoundSnafu {
                    descr: format!("host with uuid {uuid}"),
                }
                .fail();
            };

            match self.hosts.lookup(&CacheKey::new(tenant_id, host_id.as_str())) {
                Lookup::Hit(value) => return into_host(value),
                Lookup::Expired(_) | Lookup::Missing => host_id,
            }
        };

        let _guard = self.lock.write();
        // re-check, the host may have been stored again between the two critical sections
        if let Lookup::Hit(value) = self.hosts.lookup(&CacheKey::new(tenant_id, host_id.as_str())) {
            return into_host(value);
        }
        self.remove_host_locked(tenant_id, &host_id);

        NotFoundSnafu {
            descr: format!("host with uuid {uuid}"),
        }
        .fail()
    }

    /// Drop the host `host_id` and all its index entries.
    ///
    /// Returns whether a cached host was dropped.
    pub fn invalidate_host_by_host_id(&self, tenant_id: &str, host_id: &str) -> bool {
        let _guard = self.lock.write();
        self.remove_host_locked(tenant_id, host_id)
    }

    /// Drop the host aggregate `resource_id` belongs to, found via the reverse index.
    ///
    /// Hosts are dropped directly. Host sub-resources are resolved to their host through the
    /// index; unindexed sub-resources and all other kinds are ignored. Fails with
    /// `InvalidArgument` if no kind can be derived from `resource_id`.
    pub fn invalidate_by_resource_id(&self, tenant_id: &str, resource_id: &str) -> Result<bool> {
        let kind = ResourceKind::from_resource_id(resource_id)?;
        if kind == ResourceKind::Host {
            return Ok(self.invalidate_host_by_host_id(tenant_id, resource_id));
        }
        if !kind.is_host_sub_resource() {
            return Ok(false);
        }

        let _guard = self.lock.write();
        let Some(host_id) = self
            .reverse
            .get(&CacheKey::new(tenant_id, resource_id))
            .map(|r| r.value().clone())
        else {
            debug!(tenant_id, resource_id, "sub-resource not indexed");
            return Ok(false);
        };

        Ok(self.remove_host_locked(tenant_id, &host_id))
    }

    /// Drop everything.
    pub fn flush(&self) {
        let _guard = self.lock.write();
        self.hosts.flush();
        self.reverse.clear();
        self.indexed.clear();
    }

    /// Change the base TTL for future stores.
    pub fn update_ttl(&self, base_ttl: Duration) {
        self.hosts.update_ttl(base_ttl);
    }

    /// Number of cached hosts, including stale ones not yet evicted.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Number of reverse index entries.
    pub fn index_count(&self) -> usize {
        self.reverse.len()
    }

    /// Caller must hold the write lock.
    fn remove_host_locked(&self, tenant_id: &str, host_id: &str) -> bool {
        let host_key = CacheKey::new(tenant_id, host_id);
        let removed = self.hosts.load_and_delete(tenant_id, host_id).is_some();

        if let Some((_, keys)) = self.indexed.remove(&host_key) {
            for key in &keys {
                // keys re-indexed to another host since are left alone
                self.reverse
                    .remove_if(&CacheKey::new(tenant_id, key.as_str()), |_, v| v == host_id);
            }
            debug!(
                tenant_id,
                host_id,
                removed,
                n_keys = keys.len(),
                "invalidated host"
            );
        }

        removed
    }
}

fn into_host(value: CacheValue) -> Result<Host> {
    match value {
        CacheValue::Resource(Resource::Host(host)) => Ok(host),
        CacheValue::Resource(other) => InternalSnafu {
            descr: format!("uuid cache holds {} instead of a host", other.kind()),
        }
        .fail(),
        CacheValue::List(_) => InternalSnafu {
            descr: "uuid cache holds a list instead of a host",
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use assert_matches::assert_matches;
    use inventory_time::{MockProvider, Time};
    use inventory_types::{HostGpu, HostNic, Instance};

    use crate::error::Error;

    const TTL: Duration = Duration::from_secs(30);
    const TENANT: &str = "tenant-a";
    const UUID: &str = "57ed598c-4b94-11ee-806c-3a7c7693aac3";

    fn uuid_cache() -> (UuidCache, Arc<MockProvider>) {
        let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
        let cache = UuidCache::new(TTL, Arc::clone(&time_provider) as _);
        (cache, time_provider)
    }

    fn host() -> Host {
        Host {
            resource_id: "host-00000001".to_owned(),
            tenant_id: TENANT.to_owned(),
            name: "edge-1".to_owned(),
            uuid: UUID.to_owned(),
            host_nics: vec![HostNic {
                resource_id: "hostnic-00000001".to_owned(),
                ..Default::default()
            }],
            host_gpus: vec![HostGpu {
                resource_id: "hostgpu-00000001".to_owned(),
                ..Default::default()
            }],
            instance: Some(Box::new(Instance {
                resource_id: "inst-00000001".to_owned(),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    #[test]
    fn test_host_resource_id() {
        let h = host();
        assert_eq!(
            host_resource_id(&Resource::Host(h.clone())),
            Some("host-00000001")
        );

        let nic = Resource::HostNic(HostNic {
            resource_id: "hostnic-00000001".to_owned(),
            host: Some(Box::new(h)),
            ..Default::default()
        });
        assert_eq!(host_resource_id(&nic), Some("host-00000001"));

        let orphan = Resource::HostNic(HostNic {
            resource_id: "hostnic-00000002".to_owned(),
            ..Default::default()
        });
        assert_eq!(host_resource_id(&orphan), None);

        let empty_host = Resource::HostNic(HostNic {
            host: Some(Box::default()),
            ..Default::default()
        });
        assert_eq!(host_resource_id(&empty_host), None);
    }

    #[test]
    fn test_store_get() {
        let (cache, _) = uuid_cache();
        assert_matches!(
            cache.get_host_by_uuid(TENANT, UUID),
            Err(Error::NotFound { .. })
        );

        cache.store_host_by_uuid(UUID, &host());
        assert_eq!(cache.get_host_by_uuid(TENANT, UUID).unwrap(), host());
        assert_eq!(cache.host_count(), 1);
        // uuid, instance, nic, gpu
        assert_eq!(cache.index_count(), 4);

        assert_matches!(
            cache.get_host_by_uuid("tenant-b", UUID),
            Err(Error::NotFound { .. })
        );
    }

    #[test]
    fn test_invalidate_via_sub_resource() {
        let (cache, _) = uuid_cache();
        cache.store_host_by_uuid(UUID, &host());

        assert!(cache
            .invalidate_by_resource_id(TENANT, "hostnic-00000001")
            .unwrap());

        assert_matches!(
            cache.get_host_by_uuid(TENANT, UUID),
            Err(Error::NotFound { .. })
        );
        assert_eq!(cache.host_count(), 0);
        assert_eq!(cache.index_count(), 0);
    }

    #[test]
    fn test_invalidate_by_host_id() {
        let (cache, _) = uuid_cache();
        cache.store_host_by_uuid(UUID, &host());

        assert!(cache.invalidate_host_by_host_id(TENANT, "host-00000001"));
        assert!(!cache.invalidate_host_by_host_id(TENANT, "host-00000001"));
        assert_eq!(cache.index_count(), 0);
    }

    #[test]
    fn test_invalidate_by_resource_id_kinds() {
        let (cache, _) = uuid_cache();
        cache.store_host_by_uuid(UUID, &host());

        assert_matches!(
            cache.invalidate_by_resource_id(TENANT, "not-an-id"),
            Err(Error::InvalidArgument { .. })
        );
        assert!(!cache.invalidate_by_resource_id(TENANT, "site-00000001").unwrap());
        assert!(!cache.invalidate_by_resource_id(TENANT, "hostusb-00000009").unwrap());
        assert!(!cache
            .invalidate_by_resource_id("tenant-b", "hostnic-00000001")
            .unwrap());
        assert_eq!(cache.host_count(), 1);

        assert!(cache.invalidate_by_resource_id(TENANT, "host-00000001").unwrap());
        assert_eq!(cache.index_count(), 0);
    }

    #[test]
    fn test_shared_nic_id_across_tenants() {
        const UUID_B: &str = "8c0e1a2b-4b94-11ee-806c-3a7c7693aac3";
        let (cache, _) = uuid_cache();

        let nic = || {
            vec![HostNic {
                resource_id: "hostnic-0000abcd".to_owned(),
                ..Default::default()
            }]
        };
        let host_a = Host {
            host_nics: nic(),
            ..host()
        };
        let host_b = Host {
            resource_id: "host-00000002".to_owned(),
            tenant_id: "tenant-b".to_owned(),
            uuid: UUID_B.to_owned(),
            host_nics: nic(),
            ..host()
        };
        cache.store_host_by_uuid(UUID, &host_a);
        cache.store_host_by_uuid(UUID_B, &host_b);
        assert_eq!(cache.host_count(), 2);

        assert!(cache.invalidate_by_resource_id(TENANT, "hostnic-0000abcd").unwrap());

        assert_eq!(cache.host_count(), 1);
        assert_matches!(
            cache.get_host_by_uuid(TENANT, UUID),
            Err(Error::NotFound { .. })
        );
        assert_eq!(cache.get_host_by_uuid("tenant-b", UUID_B).unwrap(), host_b);

        // tenant-b's index is untouched
        assert!(cache.invalidate_by_resource_id("tenant-b", "hostnic-0000abcd").unwrap());
        assert_eq!(cache.host_count(), 0);
        assert_eq!(cache.index_count(), 0);
    }

    #[test]
    fn test_restore_replaces_index() {
        let (cache, _) = uuid_cache();
        cache.store_host_by_uuid(UUID, &host());

        let mut updated = host();
        updated.host_nics.clear();
        cache.store_host_by_uuid(UUID, &updated);
        assert_eq!(cache.index_count(), 3);

        // the removed nic no longer points at the host
        assert!(!cache
            .invalidate_by_resource_id(TENANT, "hostnic-00000001")
            .unwrap());
        assert_eq!(cache.get_host_by_uuid(TENANT, UUID).unwrap(), updated);
    }

    #[test]
    fn test_reindexed_key_survives_old_host_invalidation() {
        let (cache, _) = uuid_cache();
        cache.store_host_by_uuid(UUID, &host());

        let other_uuid = "4c4c4544-0035-3010-8030-c2c04f4a4633";
        let other = Host {
            resource_id: "host-00000002".to_owned(),
            tenant_id: TENANT.to_owned(),
            uuid: other_uuid.to_owned(),
            host_nics: host().host_nics,
            ..Default::default()
        };
        cache.store_host_by_uuid(other_uuid, &other);

        assert!(cache.invalidate_host_by_host_id(TENANT, "host-00000001"));
        assert!(cache
            .invalidate_by_resource_id(TENANT, "hostnic-00000001")
            .unwrap());
        assert_matches!(
            cache.get_host_by_uuid(TENANT, other_uuid),
            Err(Error::NotFound { .. })
        );
    }

    #[test]
    fn test_stale_host_cleans_index() {
        let (cache, time_provider) = uuid_cache();
        cache.store_host_by_uuid(UUID, &host());

        time_provider.inc(TTL * 2);
        assert_matches!(
            cache.get_host_by_uuid(TENANT, UUID),
            Err(Error::NotFound { .. })
        );
        assert_eq!(cache.host_count(), 0);
        assert_eq!(cache.index_count(), 0);
    }

    #[test]
    fn test_not_indexed_without_ids() {
        let (cache, _) = uuid_cache();
        cache.store_host_by_uuid("", &host());
        cache.store_host_by_uuid(UUID, &Host::default());

        assert_eq!(cache.host_count(), 0);
        assert_eq!(cache.index_count(), 0);
    }

    #[test]
    fn test_flush() {
        let (cache, _) = uuid_cache();
        cache.store_host_by_uuid(UUID, &host());
        cache.flush();

        assert_eq!(cache.host_count(), 0);
        assert_eq!(cache.index_count(), 0);
    }

    #[test]
    fn test_readers_never_see_dangling_index() {
        let (cache, _) = uuid_cache();
        let cache = Arc::new(cache);

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    cache.store_host_by_uuid(UUID, &host());
                    cache.invalidate_by_resource_id(TENANT, "inst-00000001").unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        match cache.get_host_by_uuid(TENANT, UUID) {
                            Ok(h) => assert_eq!(h, host()),
                            Err(e) => assert!(e.is_not_found(), "{e}"),
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(cache.host_count(), 0);
        assert_eq!(cache.index_count(), 0);
    }
}
