//! Cache invalidation on change events and on the client's own mutations.

use std::{collections::BTreeSet, sync::Arc};

use inventory_types::{EventKind, ResourceKind, SubscribeEventsResponse};
use observability_deps::tracing::{debug, warn};

use crate::cache::{uuid::host_resource_id, ResourceCache, UuidCache};

/// How the UUID cache was invalidated for a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UuidInvalidation {
    /// Host ID taken from the event payload; the host was dropped without consulting the
    /// reverse index.
    Smart {
        /// Host the changed resource belongs to.
        host_id: String,
    },

    /// Host resolved from the resource ID via the reverse index.
    Fallback {
        /// ID of the changed resource.
        resource_id: String,
    },

    /// The whole UUID cache was flushed because the event could not be attributed.
    Flushed,

    /// UUID cache disabled or the change does not concern it.
    Skipped,
}

/// Applies invalidation rules to the enabled caches.
#[derive(Debug)]
pub struct Invalidator {
    cache: Option<Arc<ResourceCache>>,
    cached_kinds: BTreeSet<ResourceKind>,
    uuid_cache: Option<Arc<UuidCache>>,
}

impl Invalidator {
    /// Create invalidator. `cached_kinds` are the kinds the resource cache holds entries for.
    pub fn new(
        cache: Option<Arc<ResourceCache>>,
        cached_kinds: impl IntoIterator<Item = ResourceKind>,
        uuid_cache: Option<Arc<UuidCache>>,
    ) -> Self {
        Self {
            cache,
            cached_kinds: cached_kinds.into_iter().collect(),
            uuid_cache,
        }
    }

    /// Invalidate for a change event received from the inventory.
    pub fn on_event(&self, event: &SubscribeEventsResponse) -> UuidInvalidation {
        let Some(resource) = event.resource.as_ref() else {
            warn!(
                resource_id = %event.resource_id,
                event_kind = ?event.event_kind,
                "change event without resource, flushing caches"
            );
            if let Some(cache) = &self.cache {
                cache.flush();
            }
            return match &self.uuid_cache {
                Some(uuid_cache) => {
                    uuid_cache.flush();
                    UuidInvalidation::Flushed
                }
                None => UuidInvalidation::Skipped,
            };
        };

        let tenant_id = resource.tenant_id();
        let resource_id = if event.resource_id.is_empty() {
            resource.resource_id()
        } else {
            event.resource_id.as_str()
        };

        self.invalidate_resource_cache(tenant_id, resource_id, resource.kind());

        let Some(uuid_cache) = &self.uuid_cache else {
            return UuidInvalidation::Skipped;
        };

        // deletes are resolved through the index only
        if matches!(event.event_kind, EventKind::Created | EventKind::Updated) {
            if let Some(host_id) = host_resource_id(resource) {
                uuid_cache.invalidate_host_by_host_id(tenant_id, host_id);
                return UuidInvalidation::Smart {
                    host_id: host_id.to_owned(),
                };
            }
        }

        self.fallback(uuid_cache, tenant_id, resource_id)
    }

    /// Invalidate after this client created, updated or deleted `resource_id`.
    ///
    /// The resource cache is flushed whatever the kind of the resource, since cached list
    /// results of other kinds may embed it.
    pub fn on_own_mutation(&self, tenant_id: &str, resource_id: &str) -> UuidInvalidation {
        if let Some(cache) = &self.cache {
            match ResourceKind::from_resource_id(resource_id) {
                Ok(kind) if self.cached_kinds.contains(&kind) => {
                    cache.delete(tenant_id, resource_id);
                }
                Ok(_) => {}
                Err(e) => warn!(%e, resource_id, "cannot derive kind of mutated resource"),
            }
            cache.flush();
            debug!(tenant_id, resource_id, "flushed resource cache after own mutation");
        }

        match &self.uuid_cache {
            Some(uuid_cache) => self.fallback(uuid_cache, tenant_id, resource_id),
            None => UuidInvalidation::Skipped,
        }
    }

    /// Drop the resource entry and every filter result, which may embed the resource.
    fn invalidate_resource_cache(&self, tenant_id: &str, resource_id: &str, kind: ResourceKind) {
        let Some(cache) = &self.cache else { return };
        if !self.cached_kinds.contains(&kind) {
            return;
        }

        cache.delete(tenant_id, resource_id);
        cache.flush();
        debug!(tenant_id, resource_id, %kind, "invalidated resource cache");
    }

    fn fallback(
        &self,
        uuid_cache: &UuidCache,
        tenant_id: &str,
        resource_id: &str,
    ) -> UuidInvalidation {
        match uuid_cache.invalidate_by_resource_id(tenant_id, resource_id) {
            Ok(_) => UuidInvalidation::Fallback {
                resource_id: resource_id.to_owned(),
            },
            Err(e) => {
                warn!(%e, tenant_id, resource_id, "cannot invalidate uuid cache");
                UuidInvalidation::Skipped
            }
        }
    }
}
