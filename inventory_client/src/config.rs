//! Client configuration.

use std::time::Duration;

use inventory_types::{ClientKind, ResourceKind};

use crate::{
    cache::filter::DEFAULT_FILTER_CACHE_KINDS,
    error::{InvalidConfigSnafu, Result},
};

/// Default base TTL of cache entries.
pub const DEFAULT_CACHE_STALE_TIME: Duration = Duration::from_secs(30);

/// Default time budget for re-registering after the event stream went down.
pub const DEFAULT_REGISTER_RETRY_MAX_ELAPSED: Duration = Duration::from_secs(300);

/// Default first backoff when re-registering.
pub const DEFAULT_REGISTER_RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Host aggregate kinds whose changes invalidate the UUID cache.
pub const UUID_CACHE_KINDS: [ResourceKind; 6] = [
    ResourceKind::Host,
    ResourceKind::Instance,
    ResourceKind::HostNic,
    ResourceKind::HostGpu,
    ResourceKind::HostUsb,
    ResourceKind::HostStorage,
];

/// Configuration of an [`InventoryClient`](crate::InventoryClient).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Name the client registers under.
    pub name: String,

    /// Role of the client.
    pub kind: ClientKind,

    /// Kinds whose change events are forwarded to the application.
    pub resource_kinds: Vec<ResourceKind>,

    /// Cache `get` and filtered `list` results.
    pub enable_cache: bool,

    /// Cache hosts looked up by UUID.
    pub enable_uuid_cache: bool,

    /// Base TTL of cache entries.
    pub cache_stale_time: Duration,

    /// Kinds cached by the resource and filter caches.
    pub cache_kinds: Vec<ResourceKind>,

    /// Register again when the event stream goes down.
    pub enable_register_retry: bool,

    /// Give up re-registering after this long.
    pub register_retry_max_elapsed: Duration,

    /// First backoff when re-registering.
    pub register_retry_initial_backoff: Duration,

    /// Abort the process when the inventory no longer knows this client.
    pub abort_on_unknown_client: bool,
}

impl ClientConfig {
    /// Configuration with caches and retries disabled.
    pub fn new(name: impl Into<String>, kind: ClientKind) -> Self {
        Self {
            name: name.into(),
            kind,
            resource_kinds: vec![],
            enable_cache: false,
            enable_uuid_cache: false,
            cache_stale_time: DEFAULT_CACHE_STALE_TIME,
            cache_kinds: DEFAULT_FILTER_CACHE_KINDS.to_vec(),
            enable_register_retry: false,
            register_retry_max_elapsed: DEFAULT_REGISTER_RETRY_MAX_ELAPSED,
            register_retry_initial_backoff: DEFAULT_REGISTER_RETRY_INITIAL_BACKOFF,
            abort_on_unknown_client: false,
        }
    }

    /// Set kinds forwarded to the application.
    pub fn with_resource_kinds(
        self,
        resource_kinds: impl IntoIterator<Item = ResourceKind>,
    ) -> Self {
        Self {
            resource_kinds: resource_kinds.into_iter().collect(),
            ..self
        }
    }

    /// Enable the resource and filter caches.
    pub fn with_cache(self, enable_cache: bool) -> Self {
        Self {
            enable_cache,
            ..self
        }
    }

    /// Enable the UUID cache.
    pub fn with_uuid_cache(self, enable_uuid_cache: bool) -> Self {
        Self {
            enable_uuid_cache,
            ..self
        }
    }

    /// Set base TTL of cache entries.
    pub fn with_cache_stale_time(self, cache_stale_time: Duration) -> Self {
        Self {
            cache_stale_time,
            ..self
        }
    }

    /// Set kinds cached by the resource and filter caches.
    pub fn with_cache_kinds(self, cache_kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            cache_kinds: cache_kinds.into_iter().collect(),
            ..self
        }
    }

    /// Enable re-registration with the given time budget and first backoff.
    pub fn with_register_retry(self, max_elapsed: Duration, initial_backoff: Duration) -> Self {
        Self {
            enable_register_retry: true,
            register_retry_max_elapsed: max_elapsed,
            register_retry_initial_backoff: initial_backoff,
            ..self
        }
    }

    /// Abort the process when the inventory no longer knows this client.
    pub fn with_abort_on_unknown_client(self, abort_on_unknown_client: bool) -> Self {
        Self {
            abort_on_unknown_client,
            ..self
        }
    }

    /// Kinds the caches need change events for.
    pub fn cache_event_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = vec![];
        if self.enable_cache {
            kinds.extend(self.cache_kinds.iter().copied());
        }
        if self.enable_uuid_cache {
            kinds.extend(UUID_CACHE_KINDS);
        }
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return InvalidConfigSnafu {
                descr: "client name must not be empty",
            }
            .fail();
        }
        if self.abort_on_unknown_client && self.enable_register_retry {
            return InvalidConfigSnafu {
                descr: "abort on unknown client and register retry are mutually exclusive",
            }
            .fail();
        }
        if (self.enable_cache || self.enable_uuid_cache) && self.cache_stale_time.is_zero() {
            return InvalidConfigSnafu {
                descr: "cache stale time must be positive",
            }
            .fail();
        }
        if self.enable_register_retry
            && (self.register_retry_initial_backoff.is_zero()
                || self.register_retry_max_elapsed.is_zero())
        {
            return InvalidConfigSnafu {
                descr: "register retry backoff and time budget must be positive",
            }
            .fail();
        }
        Ok(())
    }
}
