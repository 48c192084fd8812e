//! Client-side caches of inventory resources.
//!
//! All caches share the same expiry model: an entry is fresh until `store time + base TTL +
//! jitter` and stale afterwards. Stale entries are never returned and are evicted lazily on
//! their next lookup.
use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use inventory_time::{Time, TimeProvider};
use inventory_types::{ListResourcesResponse, Resource};
use observability_deps::tracing::debug;

use crate::error::{InternalSnafu, NotFoundSnafu, Result};

pub mod filter;
pub mod stale;
pub mod uuid;

pub use self::filter::FilterCache;
pub use self::stale::StaleClock;
pub use self::uuid::UuidCache;

/// Key of a [`ResourceCache`] entry. Entries of different tenants never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant_id: String,
    key: String,
}

impl CacheKey {
    /// Create new key.
    pub fn new(tenant_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            key: key.into(),
        }
    }

    /// Tenant partition.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Key within the tenant partition.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Value stored in a [`ResourceCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// Single resource, keyed by resource ID.
    Resource(Resource),

    /// Result of a list request, keyed by filter hash.
    List(ListResourcesResponse),
}

impl CacheValue {
    fn variant(&self) -> &'static str {
        match self {
            Self::Resource(_) => "resource",
            Self::List(_) => "list",
        }
    }
}

impl From<Resource> for CacheValue {
    fn from(r: Resource) -> Self {
        Self::Resource(r)
    }
}

impl From<ListResourcesResponse> for CacheValue {
    fn from(l: ListResourcesResponse) -> Self {
        Self::List(l)
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: CacheValue,
    expiry: Time,
}

/// Outcome of [`ResourceCache::lookup`].
#[derive(Debug)]
pub(crate) enum Lookup {
    /// Fresh entry.
    Hit(CacheValue),

    /// Entry was stale and has been evicted.
    Expired(CacheValue),

    /// No entry.
    Missing,
}

/// Tenant-partitioned TTL cache.
///
/// Values are cloned on the way in and on the way out, so callers never share state with the
/// cache.
#[derive(Debug)]
pub struct ResourceCache {
    entries: DashMap<CacheKey, CacheEntry>,
    clock: StaleClock,
}

impl ResourceCache {
    /// Create empty cache.
    pub fn new(base_ttl: Duration, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            entries: DashMap::new(),
            clock: StaleClock::new(base_ttl, time_provider),
        }
    }

    /// Insert or replace an entry, stamping a fresh expiry.
    pub fn store(&self, tenant_id: &str, key: &str, value: impl Into<CacheValue>) {
        let value = value.into();
        let expiry = self.clock.expiry();
        debug!(
            tenant_id,
            key,
            variant = value.variant(),
            %expiry,
            "cache store"
        );
        self.entries
            .insert(CacheKey::new(tenant_id, key), CacheEntry { value, expiry });
    }

    /// Fresh value under `(tenant_id, key)`.
    ///
    /// A stale entry is evicted and reported as absent.
    pub fn get(&self, tenant_id: &str, key: &str) -> Option<CacheValue> {
        match self.lookup(&CacheKey::new(tenant_id, key)) {
            Lookup::Hit(value) => Some(value),
            Lookup::Expired(_) | Lookup::Missing => None,
        }
    }

    /// Fresh resource under `(tenant_id, key)`.
    ///
    /// Fails with `NotFound` on a miss and `Internal` if the slot holds a list result.
    pub fn get_resource(&self, tenant_id: &str, key: &str) -> Result<Resource> {
        match self.get(tenant_id, key) {
            Some(CacheValue::Resource(r)) => Ok(r),
            Some(other) => InternalSnafu {
                descr: format!(
                    "cache entry {tenant_id}/{key} holds a {} instead of a resource",
                    other.variant()
                ),
            }
            .fail(),
            None => NotFoundSnafu {
                descr: format!("cache entry {tenant_id}/{key}"),
            }
            .fail(),
        }
    }

    /// Fresh list result under `(tenant_id, key)`, see [`get_resource`](Self::get_resource).
    pub fn get_list(&self, tenant_id: &str, key: &str) -> Result<ListResourcesResponse> {
        match self.get(tenant_id, key) {
            Some(CacheValue::List(l)) => Ok(l),
            Some(other) => InternalSnafu {
                descr: format!(
                    "cache entry {tenant_id}/{key} holds a {} instead of a list",
                    other.variant()
                ),
            }
            .fail(),
            None => NotFoundSnafu {
                descr: format!("cache entry {tenant_id}/{key}"),
            }
            .fail(),
        }
    }

    /// Remove an entry. Removing an absent key is a no-op.
    pub fn delete(&self, tenant_id: &str, key: &str) {
        if self.entries.remove(&CacheKey::new(tenant_id, key)).is_some() {
            debug!(tenant_id, key, "cache delete");
        }
    }

    /// Atomically remove an entry and return its value, whether fresh or stale.
    pub fn load_and_delete(&self, tenant_id: &str, key: &str) -> Option<CacheValue> {
        self.entries
            .remove(&CacheKey::new(tenant_id, key))
            .map(|(_, entry)| entry.value)
    }

    /// Remove all entries of all tenants.
    pub fn flush(&self) {
        let n = self.entries.len();
        self.entries.clear();
        debug!(n, "cache flush");
    }

    /// Change the base TTL for future stores. Existing expiry instants are kept.
    pub fn update_ttl(&self, base_ttl: Duration) {
        self.clock.set_base_ttl(base_ttl);
    }

    /// Base TTL for future stores.
    pub fn ttl(&self) -> Duration {
        self.clock.base_ttl()
    }

    /// Number of physically present entries, including stale ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are physically present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn lookup(&self, key: &CacheKey) -> Lookup {
        let now = self.clock.now();
        {
            let Some(entry) = self.entries.get(key) else {
                return Lookup::Missing;
            };
            if now < entry.expiry {
                return Lookup::Hit(entry.value.clone());
            }
        }

        // a concurrent store may have refreshed the entry since the guard was dropped
        match self.entries.remove_if(key, |_, entry| now >= entry.expiry) {
            Some((key, entry)) => {
                debug!(
                    tenant_id = key.tenant_id(),
                    key = key.key(),
                    expiry = %entry.expiry,
                    "evicted stale cache entry"
                );
                Lookup::Expired(entry.value)
            }
            None => match self.entries.get(key) {
                Some(entry) if now < entry.expiry => Lookup::Hit(entry.value.clone()),
                _ => Lookup::Missing,
            },
        }
    }
}
