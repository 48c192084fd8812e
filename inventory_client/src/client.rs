//! Caching, event-driven inventory client.

use std::{sync::Arc, time::Duration};

use backoff::BackoffConfig;
use futures::StreamExt;
use inventory_time::{SystemProvider, TimeProvider};
use inventory_types::{
    ChangeSubscribeEventsRequest, CreateResourceRequest, DeleteResourceRequest,
    FindResourcesRequest, FindResourcesResponse, GetResourceRequest, Host, ListResourcesRequest,
    ListResourcesResponse, Resource, ResourceFilter, ResourceKind, ResourceTenantId,
    SubscribeEventsResponse, UpdateResourceRequest,
};
use observability_deps::tracing::{debug, error, info, info_span, warn, Instrument, Span};
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::{
    cache::{FilterCache, ResourceCache, UuidCache},
    config::ClientConfig,
    error::{Error, InternalSnafu, InvalidConfigSnafu, NotFoundSnafu, Result},
    interface::{is_retryable_stream_error, is_unknown_client, EventStream, InventoryService},
    invalidation::Invalidator,
    registration::{merge_kinds, register_backoff_config, Registrar, Registration},
};

/// Page size of [`InventoryClient::list_all`] and [`InventoryClient::find_all`] when the filter
/// sets none.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Number of entries held by the client caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resources and filter results, including stale entries not yet evicted.
    pub resources: usize,

    /// Hosts in the UUID cache.
    pub uuid_hosts: usize,

    /// Reverse index entries of the UUID cache.
    pub uuid_index: usize,
}

/// Builder for [`InventoryClient`].
#[derive(Debug)]
pub struct InventoryClientBuilder {
    service: Arc<dyn InventoryService>,
    config: ClientConfig,
    time_provider: Arc<dyn TimeProvider>,
    events: Option<mpsc::Sender<SubscribeEventsResponse>>,
    shutdown: CancellationToken,
    span: Option<Span>,
}

impl InventoryClientBuilder {
    /// Time provider for cache expiry.
    pub fn time_provider(self, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            ..self
        }
    }

    /// Forward change events of the configured resource kinds to `events`.
    ///
    /// Events are dropped if the channel is full. The channel is closed once the client stops
    /// receiving events.
    pub fn events(self, events: mpsc::Sender<SubscribeEventsResponse>) -> Self {
        Self {
            events: Some(events),
            ..self
        }
    }

    /// Shut the client down when `shutdown` is cancelled.
    pub fn shutdown(self, shutdown: CancellationToken) -> Self {
        Self { shutdown, ..self }
    }

    /// Span the background tasks run in.
    pub fn span(self, span: Span) -> Self {
        Self {
            span: Some(span),
            ..self
        }
    }

    /// Register with the inventory and start receiving events.
    pub async fn build(self) -> Result<InventoryClient> {
        let Self {
            service,
            config,
            time_provider,
            events,
            shutdown,
            span,
        } = self;
        config.validate()?;

        let span = span.unwrap_or_else(|| info_span!("inventory_client", name = %config.name));
        let cache = config.enable_cache.then(|| {
            Arc::new(ResourceCache::new(
                config.cache_stale_time,
                Arc::clone(&time_provider),
            ))
        });
        let filter_cache = cache
            .as_ref()
            .map(|cache| FilterCache::new(Arc::clone(cache), config.cache_kinds.iter().copied()));
        let uuid_cache = config.enable_uuid_cache.then(|| {
            Arc::new(UuidCache::new(
                config.cache_stale_time,
                Arc::clone(&time_provider),
            ))
        });
        let invalidator = Invalidator::new(
            cache.as_ref().map(Arc::clone),
            config.cache_kinds.iter().copied(),
            uuid_cache.as_ref().map(Arc::clone),
        );

        let registrar = Registrar {
            service: Arc::clone(&service),
            client_name: config.name.clone(),
            client_kind: config.kind,
        };
        let app_kinds = config.resource_kinds.clone();
        let cache_kinds = config.cache_event_kinds();
        let (client_uuid, stream) = registrar
            .register(merge_kinds(&app_kinds, &cache_kinds))
            .instrument(span.clone())
            .await?;

        let retry = config.enable_register_retry.then(|| {
            register_backoff_config(
                config.register_retry_initial_backoff,
                config.register_retry_max_elapsed,
            )
        });
        let inner = Arc::new(ClientInner {
            service,
            config,
            registrar,
            registration: Registration::default(),
            retry,
            app_kinds: RwLock::new(app_kinds),
            cache_kinds,
            cache,
            filter_cache,
            uuid_cache,
            invalidator,
            shutdown: shutdown.child_token(),
            span,
        });
        inner.registration.set(&client_uuid);

        let event_loop = tokio::spawn(
            Arc::clone(&inner)
                .run_events(stream, events)
                .instrument(inner.span.clone()),
        );
        let watcher = tokio::spawn(
            Arc::clone(&inner)
                .watch_shutdown()
                .instrument(inner.span.clone()),
        );

        Ok(InventoryClient {
            inner,
            event_loop: Mutex::new(Some(event_loop)),
            watcher: Mutex::new(Some(watcher)),
        })
    }
}

#[derive(Debug)]
struct ClientInner {
    service: Arc<dyn InventoryService>,
    config: ClientConfig,
    registrar: Registrar,
    registration: Registration,
    retry: Option<BackoffConfig>,

    /// Kinds forwarded to the application.
    app_kinds: RwLock<Vec<ResourceKind>>,

    /// Kinds the caches need events for.
    cache_kinds: Vec<ResourceKind>,

    cache: Option<Arc<ResourceCache>>,
    filter_cache: Option<FilterCache>,
    uuid_cache: Option<Arc<UuidCache>>,
    invalidator: Invalidator,
    shutdown: CancellationToken,
    span: Span,
}

impl ClientInner {
    fn subscription_kinds(&self) -> Vec<ResourceKind> {
        merge_kinds(&self.app_kinds.read(), &self.cache_kinds)
    }

    /// Resource cache, if `resource_id` is of a cached kind.
    fn cache_for(&self, resource_id: &str) -> Option<&ResourceCache> {
        let cache = self.cache.as_deref()?;
        let kind = ResourceKind::from_resource_id(resource_id).ok()?;
        self.config.cache_kinds.contains(&kind).then_some(cache)
    }

    fn flush_caches(&self) {
        if let Some(cache) = &self.cache {
            cache.flush();
        }
        if let Some(uuid_cache) = &self.uuid_cache {
            uuid_cache.flush();
        }
    }

    fn rpc_error(&self, status: Status) -> Error {
        if is_unknown_client(&status) {
            if self.config.abort_on_unknown_client {
                error!(
                    %status,
                    client_name = %self.config.name,
                    "inventory does not know this client, aborting"
                );
                std::process::abort();
            }
            warn!(%status, client_name = %self.config.name, "inventory does not know this client");
            return Error::Unavailable {
                descr: status.message().to_owned(),
            };
        }
        Error::Rpc { source: status }
    }

    async fn run_events(
        self: Arc<Self>,
        mut stream: EventStream,
        events: Option<mpsc::Sender<SubscribeEventsResponse>>,
    ) -> Result<()> {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.registration.clear();
                    debug!("event loop stopped");
                    return Ok(());
                }
                msg = stream.next() => msg,
            };

            let status = match msg {
                Some(Ok(event)) => {
                    self.handle_event(event, events.as_ref());
                    continue;
                }
                Some(Err(status)) => Some(status),
                None => None,
            };
            self.registration.clear();

            let retry = match &self.retry {
                Some(retry) if is_retryable_stream_error(status.as_ref()) => retry,
                _ => return Err(self.stream_error(status)),
            };
            warn!(?status, "event stream interrupted, registering again");

            let registered = self
                .registrar
                .register_with_retry(|| self.subscription_kinds(), retry, &self.shutdown)
                .await;
            let (client_uuid, new_stream) = match registered {
                Ok(registered) => registered,
                Err(_) if self.shutdown.is_cancelled() => return Ok(()),
                Err(e) => {
                    error!(%e, "giving up on event stream");
                    return Err(e);
                }
            };

            // events were missed while the stream was down
            self.flush_caches();
            self.registration.set(&client_uuid);
            stream = new_stream;
        }
    }

    fn stream_error(&self, status: Option<Status>) -> Error {
        match status {
            None => {
                warn!("event stream closed by inventory");
                Error::Canceled {
                    descr: "event stream closed by inventory".to_owned(),
                }
            }
            Some(status) => {
                error!(%status, "event stream failed");
                self.rpc_error(status)
            }
        }
    }

    fn handle_event(
        &self,
        event: SubscribeEventsResponse,
        events: Option<&mpsc::Sender<SubscribeEventsResponse>>,
    ) {
        let invalidation = self.invalidator.on_event(&event);
        debug!(
            resource_id = %event.resource_id,
            event_kind = ?event.event_kind,
            ?invalidation,
            "change event"
        );

        let Some(events) = events else { return };
        let kind = match &event.resource {
            Some(resource) => Some(resource.kind()),
            None => ResourceKind::from_resource_id(&event.resource_id).ok(),
        };
        if !kind.is_some_and(|kind| self.app_kinds.read().contains(&kind)) {
            return;
        }

        match events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(resource_id = %event.resource_id, "event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("event receiver gone");
            }
        }
    }

    async fn watch_shutdown(self: Arc<Self>) {
        self.shutdown.cancelled().await;
        self.registration.clear();
        self.service.close().await;
        info!("inventory client shut down");
    }
}

/// Client of the inventory service.
///
/// Registers on creation and keeps the registration's event stream open in a background task.
/// Events invalidate the optional caches and, for the configured kinds, are forwarded to the
/// application. While the stream is down every request fails fast with `Unavailable`.
#[derive(Debug)]
pub struct InventoryClient {
    inner: Arc<ClientInner>,
    event_loop: Mutex<Option<JoinHandle<Result<()>>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl InventoryClient {
    /// Start building a client on top of `service`.
    pub fn builder(
        service: Arc<dyn InventoryService>,
        config: ClientConfig,
    ) -> InventoryClientBuilder {
        InventoryClientBuilder {
            service,
            config,
            time_provider: Arc::new(SystemProvider::new()),
            events: None,
            shutdown: CancellationToken::new(),
            span: None,
        }
    }

    /// Client UUID of the current registration.
    pub fn client_uuid(&self) -> Option<String> {
        self.inner
            .registration
            .client_uuid()
            .ok()
            .map(|uuid| uuid.to_string())
    }

    /// Whether the client is registered with the inventory.
    pub fn is_registered(&self) -> bool {
        self.inner.registration.is_registered()
    }

    /// Resource cache, if enabled.
    pub fn resource_cache(&self) -> Option<&ResourceCache> {
        self.inner.cache.as_deref()
    }

    /// Filter cache, if enabled.
    pub fn filter_cache(&self) -> Option<&FilterCache> {
        self.inner.filter_cache.as_ref()
    }

    /// UUID cache, if enabled.
    pub fn uuid_cache(&self) -> Option<&UuidCache> {
        self.inner.uuid_cache.as_deref()
    }

    /// Number of entries held by the caches.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            resources: self.inner.cache.as_ref().map_or(0, |c| c.len()),
            uuid_hosts: self.inner.uuid_cache.as_ref().map_or(0, |c| c.host_count()),
            uuid_index: self.inner.uuid_cache.as_ref().map_or(0, |c| c.index_count()),
        }
    }

    /// Change the base TTL for entries cached from now on.
    ///
    /// Fails with `InvalidConfig` for a zero TTL.
    pub fn set_cache_stale_time(&self, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return InvalidConfigSnafu {
                descr: "cache stale time must be positive",
            }
            .fail();
        }

        if let Some(cache) = &self.inner.cache {
            cache.update_ttl(ttl);
        }
        if let Some(uuid_cache) = &self.inner.uuid_cache {
            uuid_cache.update_ttl(ttl);
        }
        info!(?ttl, "changed cache stale time");
        Ok(())
    }

    /// Fetch a resource, from the cache if its kind is cached.
    pub async fn get(&self, tenant_id: &str, resource_id: &str) -> Result<Resource> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        let cache = inner.cache_for(resource_id);
        if let Some(cache) = cache {
            match cache.get_resource(tenant_id, resource_id) {
                Ok(resource) => {
                    debug!(tenant_id, resource_id, "cache hit");
                    return Ok(resource);
                }
                Err(e) => debug!(tenant_id, resource_id, %e, "cache miss"),
            }
        }

        let resource = inner
            .service
            .get(GetResourceRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                resource_id: resource_id.to_owned(),
            })
            .await
            .map_err(|status| inner.rpc_error(status))?;

        if let Some(cache) = cache {
            cache.store(tenant_id, resource_id, resource.clone());
        }
        Ok(resource)
    }

    /// One page of resources matching `filter`.
    ///
    /// Results of filters with a predicate over a cached kind are served from the filter cache.
    pub async fn list(
        &self,
        tenant_id: &str,
        filter: &ResourceFilter,
    ) -> Result<ListResourcesResponse> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        let filter_cache = inner
            .filter_cache
            .as_ref()
            .filter(|c| c.is_cacheable(filter));
        if let Some(filter_cache) = filter_cache {
            match filter_cache.get_by_filter(tenant_id, filter) {
                Ok(res) => {
                    debug!(tenant_id, kind = %filter.kind, "filter cache hit");
                    return Ok(res);
                }
                Err(e) => debug!(tenant_id, kind = %filter.kind, %e, "filter cache miss"),
            }
        }

        let res = inner
            .service
            .list(ListResourcesRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                filter: filter.clone(),
            })
            .await
            .map_err(|status| inner.rpc_error(status))?;

        if let Some(filter_cache) = filter_cache {
            filter_cache.store_by_filter(tenant_id, filter, &res);
        }
        Ok(res)
    }

    /// All resources matching `filter`, fetched page by page starting at its offset.
    pub async fn list_all(
        &self,
        tenant_id: &str,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        let mut page = paged(filter);
        let mut resources = vec![];
        loop {
            let res = self.list(tenant_id, &page).await?;
            let n = res.resources.len();
            resources.extend(res.resources);
            if !res.has_next || n == 0 {
                return Ok(resources);
            }
            page.offset = page.offset.saturating_add(u32::try_from(n).unwrap_or(u32::MAX));
        }
    }

    /// One page of IDs of resources matching `filter`.
    pub async fn find(
        &self,
        tenant_id: &str,
        filter: &ResourceFilter,
    ) -> Result<FindResourcesResponse> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        inner
            .service
            .find(FindResourcesRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                filter: filter.clone(),
            })
            .await
            .map_err(|status| inner.rpc_error(status))
    }

    /// IDs of all resources matching `filter`, see [`list_all`](Self::list_all).
    pub async fn find_all(
        &self,
        tenant_id: &str,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceTenantId>> {
        let mut page = paged(filter);
        let mut ids = vec![];
        loop {
            let res = self.find(tenant_id, &page).await?;
            let n = res.resources.len();
            ids.extend(res.resources);
            if !res.has_next || n == 0 {
                return Ok(ids);
            }
            page.offset = page.offset.saturating_add(u32::try_from(n).unwrap_or(u32::MAX));
        }
    }

    /// Create a resource, returning it with its assigned ID.
    pub async fn create(&self, tenant_id: &str, resource: Resource) -> Result<Resource> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        let created = inner
            .service
            .create(CreateResourceRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                resource,
            })
            .await
            .map_err(|status| inner.rpc_error(status))?;

        inner
            .invalidator
            .on_own_mutation(tenant_id, created.resource_id());
        Ok(created)
    }

    /// Update the fields named in `field_mask` (all if empty) of a resource.
    pub async fn update(
        &self,
        tenant_id: &str,
        resource_id: &str,
        field_mask: Vec<String>,
        resource: Resource,
    ) -> Result<Resource> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        let updated = inner
            .service
            .update(UpdateResourceRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                resource_id: resource_id.to_owned(),
                field_mask,
                resource,
            })
            .await
            .map_err(|status| inner.rpc_error(status))?;

        inner.invalidator.on_own_mutation(tenant_id, resource_id);
        Ok(updated)
    }

    /// Delete a resource.
    pub async fn delete(&self, tenant_id: &str, resource_id: &str) -> Result<()> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        inner
            .service
            .delete(DeleteResourceRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                resource_id: resource_id.to_owned(),
            })
            .await
            .map_err(|status| inner.rpc_error(status))?;

        inner.invalidator.on_own_mutation(tenant_id, resource_id);
        Ok(())
    }

    /// Host with hardware UUID `uuid`.
    ///
    /// Served from the UUID cache if enabled; otherwise the hosts are listed by UUID, which must
    /// match exactly one host.
    pub async fn get_host_by_uuid(&self, tenant_id: &str, uuid: &str) -> Result<Host> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        if let Some(uuid_cache) = &inner.uuid_cache {
            match uuid_cache.get_host_by_uuid(tenant_id, uuid) {
                Ok(host) => {
                    debug!(tenant_id, uuid, "uuid cache hit");
                    return Ok(host);
                }
                Err(e) => debug!(tenant_id, uuid, %e, "uuid cache miss"),
            }
        }

        let res = inner
            .service
            .list(ListResourcesRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                filter: ResourceFilter::new(ResourceKind::Host)
                    .with_filter(format!("uuid = {uuid:?}")),
            })
            .await
            .map_err(|status| inner.rpc_error(status))?;

        let mut hosts = res.resources.into_iter();
        let host = match (hosts.next(), hosts.next()) {
            (Some(Resource::Host(host)), None) => host,
            (None, _) => {
                return NotFoundSnafu {
                    descr: format!("host with uuid {uuid}"),
                }
                .fail()
            }
            (Some(other), None) => {
                return InternalSnafu {
                    descr: format!("host query returned a {}", other.kind()),
                }
                .fail()
            }
            (Some(_), Some(_)) => {
                return InternalSnafu {
                    descr: format!("more than one host with uuid {uuid}"),
                }
                .fail()
            }
        };

        if let Some(uuid_cache) = &inner.uuid_cache {
            uuid_cache.store_host_by_uuid(uuid, &host);
        }
        Ok(host)
    }

    /// Replace the kinds forwarded to the application.
    ///
    /// The subscription keeps covering the kinds the caches need.
    pub async fn update_subscriptions(
        &self,
        tenant_id: &str,
        kinds: Vec<ResourceKind>,
    ) -> Result<()> {
        let inner = &self.inner;
        let client_uuid = inner.registration.client_uuid()?;

        inner
            .service
            .change_subscribe_events(ChangeSubscribeEventsRequest {
                client_uuid: client_uuid.to_string(),
                tenant_id: tenant_id.to_owned(),
                subscribed_resource_kinds: merge_kinds(&kinds, &inner.cache_kinds),
            })
            .await
            .map_err(|status| inner.rpc_error(status))?;

        info!(tenant_id, ?kinds, "updated subscriptions");
        *inner.app_kinds.write() = kinds;
        Ok(())
    }

    /// Wait for the event loop to end and return how it ended.
    ///
    /// The loop ends on shutdown, on a terminal stream error, and when re-registration is
    /// disabled or gives up. Only the first call observes the outcome.
    pub async fn join(&self) -> Result<()> {
        let Some(event_loop) = self.event_loop.lock().take() else {
            return Ok(());
        };

        match event_loop.await {
            Ok(res) => res,
            Err(e) => InternalSnafu {
                descr: format!("event loop failed: {e}"),
            }
            .fail(),
        }
    }

    /// Shut down: stop the event loop, drop the registration, and close the connection.
    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        let res = self.join().await;

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                warn!(%e, "shutdown watcher failed");
            }
        }
        res
    }
}

impl Drop for InventoryClient {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

fn paged(filter: &ResourceFilter) -> ResourceFilter {
    match filter.limit {
        0 => filter.clone().with_limit(DEFAULT_PAGE_SIZE),
        _ => filter.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use inventory_time::{MockProvider, Time};
    use inventory_types::{ClientKind, EventKind, HostNic, Region, Site};
    use pretty_assertions::assert_eq;
    use test_helpers::{
        assert_contains, assert_not_contains, maybe_start_logging, tracing::TracingCapture,
    };

    use crate::{config::DEFAULT_CACHE_STALE_TIME, mem::MemInventory};

    const TENANT: &str = "tenant-a";
    const UUID: &str = "57ed598c-4b94-11ee-806c-3a7c7693aac3";

    fn config() -> ClientConfig {
        ClientConfig::new("test-rm", ClientKind::ResourceManager)
    }

    async fn client(service: &Arc<MemInventory>, config: ClientConfig) -> InventoryClient {
        InventoryClient::builder(Arc::clone(service) as _, config)
            .build()
            .await
            .unwrap()
    }

    fn host(name: &str, uuid: &str) -> Resource {
        Resource::Host(Host {
            name: name.to_owned(),
            uuid: uuid.to_owned(),
            ..Default::default()
        })
    }

    fn site(name: &str) -> Resource {
        Resource::Site(Site {
            name: name.to_owned(),
            ..Default::default()
        })
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test]
    async fn test_get_is_cached() {
        maybe_start_logging();
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let client = client(&service, config().with_cache(true)).await;

        for _ in 0..2 {
            assert_eq!(
                client.get(TENANT, created.resource_id()).await.unwrap(),
                created
            );
        }
        assert_eq!(service.call_count("get"), 1);
        assert_eq!(client.cache_stats().resources, 1);
    }

    #[tokio::test]
    async fn test_get_uncached() {
        let service = Arc::new(MemInventory::new());
        let created_site = service.insert(TENANT, site("s"));
        let created_host = service.insert(TENANT, host("a", UUID));

        let client_with_cache = client(&service, config().with_cache(true)).await;
        for _ in 0..2 {
            client_with_cache
                .get(TENANT, created_site.resource_id())
                .await
                .unwrap();
        }
        assert_eq!(service.call_count("get"), 2);

        let client_without_cache = client(&service, config()).await;
        for _ in 0..2 {
            client_without_cache
                .get(TENANT, created_host.resource_id())
                .await
                .unwrap();
        }
        assert_eq!(service.call_count("get"), 4);
        assert!(client_without_cache.resource_cache().is_none());
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let service = Arc::new(MemInventory::new());
        let client = client(&service, config().with_cache(true)).await;

        let err = client.get(TENANT, "host-0000ffff").await.unwrap_err();
        assert_matches!(&err, Error::Rpc { source } if source.code() == tonic::Code::NotFound);
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
        let client = InventoryClient::builder(Arc::clone(&service) as _, config().with_cache(true))
            .time_provider(Arc::clone(&time_provider) as _)
            .build()
            .await
            .unwrap();

        client.get(TENANT, created.resource_id()).await.unwrap();
        time_provider.inc(Duration::from_secs(29));
        client.get(TENANT, created.resource_id()).await.unwrap();
        assert_eq!(service.call_count("get"), 1);

        time_provider.inc(Duration::from_secs(5));
        client.get(TENANT, created.resource_id()).await.unwrap();
        assert_eq!(service.call_count("get"), 2);
    }

    #[tokio::test]
    async fn test_filter_cache() {
        let service = Arc::new(MemInventory::new());
        service.insert(TENANT, host("a", UUID));
        service.insert(TENANT, host("b", "other"));
        let client = client(&service, config().with_cache(true)).await;

        let by_name = ResourceFilter::new(ResourceKind::Host).with_filter(r#"name = "a""#);
        for _ in 0..2 {
            let res = client.list(TENANT, &by_name).await.unwrap();
            assert_eq!(res.total_elements, 1);
        }
        assert_eq!(service.call_count("list"), 1);

        let unfiltered = ResourceFilter::new(ResourceKind::Host);
        for _ in 0..2 {
            let res = client.list(TENANT, &unfiltered).await.unwrap();
            assert_eq!(res.total_elements, 2);
        }
        assert_eq!(service.call_count("list"), 3);
    }

    #[tokio::test]
    async fn test_filter_cache_is_per_tenant() {
        let service = Arc::new(MemInventory::new());
        service.insert(TENANT, host("a", UUID));
        let client = client(&service, config().with_cache(true)).await;

        let by_name = ResourceFilter::new(ResourceKind::Host).with_filter(r#"name = "a""#);
        let res = client.list(TENANT, &by_name).await.unwrap();
        assert_eq!(res.total_elements, 1);

        let res = client.list("tenant-b", &by_name).await.unwrap();
        assert_eq!(res.total_elements, 0);
        assert!(res.resources.is_empty());
        assert_eq!(service.call_count("list"), 2);

        // both results are cached in their own tenant
        client.list(TENANT, &by_name).await.unwrap();
        client.list("tenant-b", &by_name).await.unwrap();
        assert_eq!(service.call_count("list"), 2);
    }

    #[tokio::test]
    async fn test_own_mutation_of_uncached_kind_flushes() {
        let service = Arc::new(MemInventory::new());
        service.insert(TENANT, host("a", UUID));
        let created_site = service.insert(TENANT, site("s"));
        let client = client(&service, config().with_cache(true)).await;

        let by_name = ResourceFilter::new(ResourceKind::Host).with_filter(r#"name = "a""#);
        client.list(TENANT, &by_name).await.unwrap();
        assert_eq!(client.cache_stats().resources, 1);

        client
            .update(TENANT, created_site.resource_id(), vec![], site("t"))
            .await
            .unwrap();
        assert_eq!(client.cache_stats().resources, 0);
    }

    #[tokio::test]
    async fn test_set_cache_stale_time() {
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
        let client = InventoryClient::builder(Arc::clone(&service) as _, config().with_cache(true))
            .time_provider(Arc::clone(&time_provider) as _)
            .build()
            .await
            .unwrap();

        assert_matches!(
            client.set_cache_stale_time(Duration::ZERO),
            Err(Error::InvalidConfig { .. })
        );
        assert_eq!(client.resource_cache().unwrap().ttl(), DEFAULT_CACHE_STALE_TIME);

        client.set_cache_stale_time(Duration::from_secs(1)).unwrap();
        client.get(TENANT, created.resource_id()).await.unwrap();
        time_provider.inc(Duration::from_secs(2));
        client.get(TENANT, created.resource_id()).await.unwrap();
        assert_eq!(service.call_count("get"), 2);
    }

    #[tokio::test]
    async fn test_own_mutations_invalidate() {
        let service = Arc::new(MemInventory::new());
        let client = client(&service, config().with_cache(true)).await;

        let created = client.create(TENANT, host("a", UUID)).await.unwrap();
        let id = created.resource_id().to_owned();
        client.get(TENANT, &id).await.unwrap();
        let by_name = ResourceFilter::new(ResourceKind::Host).with_filter(r#"name = "a""#);
        client.list(TENANT, &by_name).await.unwrap();
        assert_eq!(client.cache_stats().resources, 2);

        let updated = client
            .update(TENANT, &id, vec!["name".to_owned()], host("b", UUID))
            .await
            .unwrap();
        assert_eq!(client.cache_stats().resources, 0);
        assert_eq!(client.get(TENANT, &id).await.unwrap(), updated);
        assert_eq!(client.list(TENANT, &by_name).await.unwrap().total_elements, 0);

        client.delete(TENANT, &id).await.unwrap();
        assert_eq!(client.cache_stats().resources, 0);
        assert!(client.get(TENANT, &id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_events_invalidate() {
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let id = created.resource_id();
        let reader = client(&service, config().with_cache(true)).await;
        let writer = client(&service, config()).await;

        reader.get(TENANT, id).await.unwrap();
        assert_eq!(reader.cache_stats().resources, 1);

        let updated = writer
            .update(TENANT, id, vec![], host("b", UUID))
            .await
            .unwrap();
        wait_for(|| reader.cache_stats().resources == 0).await;
        assert_eq!(reader.get(TENANT, id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_get_host_by_uuid() {
        let service = Arc::new(MemInventory::new());
        let nic = service.insert(
            TENANT,
            Resource::HostNic(HostNic {
                name: "eth0".to_owned(),
                ..Default::default()
            }),
        );
        let Resource::Host(created) = service.insert(
            TENANT,
            Resource::Host(Host {
                name: "a".to_owned(),
                uuid: UUID.to_owned(),
                host_nics: vec![HostNic {
                    resource_id: nic.resource_id().to_owned(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        ) else {
            unreachable!()
        };

        let reader = client(&service, config().with_uuid_cache(true)).await;
        let writer = client(&service, config()).await;

        for _ in 0..2 {
            assert_eq!(reader.get_host_by_uuid(TENANT, UUID).await.unwrap(), created);
        }
        assert_eq!(service.call_count("list"), 1);
        assert_eq!(
            reader.cache_stats(),
            CacheStats {
                resources: 0,
                uuid_hosts: 1,
                uuid_index: 2,
            }
        );

        // the nic payload carries no host, so the reverse index resolves it
        writer
            .update(
                TENANT,
                nic.resource_id(),
                vec![],
                Resource::HostNic(HostNic {
                    name: "eth1".to_owned(),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        wait_for(|| reader.cache_stats().uuid_hosts == 0).await;
        assert_eq!(reader.cache_stats().uuid_index, 0);

        reader.get_host_by_uuid(TENANT, UUID).await.unwrap();
        assert_eq!(service.call_count("list"), 2);
    }

    #[tokio::test]
    async fn test_get_host_by_uuid_smart_invalidation() {
        let service = Arc::new(MemInventory::new());
        let Resource::Host(created) = service.insert(TENANT, host("a", UUID)) else {
            unreachable!()
        };
        let reader = client(&service, config().with_uuid_cache(true)).await;
        reader.get_host_by_uuid(TENANT, UUID).await.unwrap();

        // a gpu the cached host does not know about yet
        service.publish(SubscribeEventsResponse {
            client_uuid: String::new(),
            resource_id: "hostgpu-0000abcd".to_owned(),
            event_kind: EventKind::Created,
            resource: Some(Resource::HostGpu(inventory_types::HostGpu {
                resource_id: "hostgpu-0000abcd".to_owned(),
                tenant_id: TENANT.to_owned(),
                host: Some(Box::new(created)),
                ..Default::default()
            })),
        });
        wait_for(|| reader.cache_stats().uuid_hosts == 0).await;
    }

    #[tokio::test]
    async fn test_get_host_by_uuid_errors() {
        let service = Arc::new(MemInventory::new());
        let client = client(&service, config().with_uuid_cache(true)).await;

        assert_matches!(
            client.get_host_by_uuid(TENANT, UUID).await,
            Err(Error::NotFound { .. })
        );

        service.insert(TENANT, host("a", UUID));
        service.insert(TENANT, host("b", UUID));
        assert_matches!(
            client.get_host_by_uuid(TENANT, UUID).await,
            Err(Error::Internal { .. })
        );
        assert_eq!(client.cache_stats().uuid_hosts, 0);
    }

    #[tokio::test]
    async fn test_event_forwarding() {
        let service = Arc::new(MemInventory::new());
        let (tx, mut rx) = mpsc::channel(10);
        let _client = InventoryClient::builder(
            Arc::clone(&service) as _,
            config()
                .with_cache(true)
                .with_resource_kinds([ResourceKind::Site]),
        )
        .events(tx)
        .build()
        .await
        .unwrap();
        let writer = client(&service, config()).await;

        writer.create(TENANT, host("a", UUID)).await.unwrap();
        let created = writer.create(TENANT, site("s")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_kind, EventKind::Created);
        assert_eq!(event.resource, Some(created));
    }

    #[tokio::test]
    async fn test_full_event_channel_drops_events() {
        let capture = TracingCapture::new();
        let service = Arc::new(MemInventory::new());
        let (tx, mut rx) = mpsc::channel(1);
        let client = InventoryClient::builder(
            Arc::clone(&service) as _,
            config()
                .with_cache(true)
                .with_resource_kinds([ResourceKind::Site]),
        )
        .events(tx)
        .build()
        .await
        .unwrap();
        let writer = InventoryClient::builder(Arc::clone(&service) as _, config())
            .build()
            .await
            .unwrap();

        for name in ["a", "b", "c"] {
            writer.create(TENANT, site(name)).await.unwrap();
        }
        wait_for(|| capture.to_string().matches("dropping event").count() == 2).await;
        assert_contains!(capture.to_string(), "event channel full");

        // the event loop is not blocked by the full channel
        let created = writer.create(TENANT, host("a", UUID)).await.unwrap();
        client.get(TENANT, created.resource_id()).await.unwrap();
        writer
            .update(TENANT, created.resource_id(), vec![], host("b", UUID))
            .await
            .unwrap();
        wait_for(|| client.cache_stats().resources == 0).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.resource.unwrap().name(), "a");
    }

    #[tokio::test]
    async fn test_stream_closed_without_retry() {
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let (tx, mut rx) = mpsc::channel(10);
        let client = InventoryClient::builder(Arc::clone(&service) as _, config().with_cache(true))
            .events(tx)
            .build()
            .await
            .unwrap();
        client.get(TENANT, created.resource_id()).await.unwrap();

        service.close_streams();

        assert_matches!(client.join().await, Err(Error::Canceled { .. }));
        assert!(!client.is_registered());
        assert_matches!(
            client.get(TENANT, created.resource_id()).await,
            Err(Error::Unavailable { .. })
        );
        assert!(rx.recv().await.is_none());
        assert_eq!(service.subscription_attempts(), 1);
    }

    #[tokio::test]
    async fn test_terminal_stream_error_is_not_retried() {
        let service = Arc::new(MemInventory::new());
        let client = client(
            &service,
            config().with_register_retry(Duration::from_secs(5), Duration::from_millis(100)),
        )
        .await;

        service.fail_streams(Status::internal("boom"));

        assert_matches!(
            client.join().await,
            Err(Error::Rpc { source }) if source.code() == tonic::Code::Internal
        );
        assert_eq!(service.subscription_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_again_after_stream_closed() {
        maybe_start_logging();
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let client = client(
            &service,
            config()
                .with_cache(true)
                .with_register_retry(Duration::from_secs(5), Duration::from_millis(100)),
        )
        .await;
        let first_uuid = client.client_uuid().unwrap();
        client.get(TENANT, created.resource_id()).await.unwrap();

        service.fail_next_subscriptions(2);
        service.close_streams();

        wait_for(|| client.client_uuid().is_some_and(|uuid| uuid != first_uuid)).await;
        assert_eq!(service.subscription_attempts(), 4);
        assert_eq!(client.cache_stats().resources, 0);
        assert_eq!(
            client.get(TENANT, created.resource_id()).await.unwrap(),
            created
        );
        assert_eq!(service.call_count("get"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_again_gives_up() {
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let client = client(
            &service,
            config().with_register_retry(Duration::from_secs(5), Duration::from_millis(100)),
        )
        .await;

        service.fail_next_subscriptions(usize::MAX);
        service.fail_streams(Status::unavailable("restarting"));

        assert_matches!(client.join().await, Err(Error::DeadlineExceeded { .. }));
        assert!(!client.is_registered());
        assert_matches!(
            client.get(TENANT, created.resource_id()).await,
            Err(Error::Unavailable { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_again_stalls() {
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let client = client(
            &service,
            config().with_register_retry(Duration::from_secs(5), Duration::from_millis(100)),
        )
        .await;

        // the inventory accepts the stream but never assigns a client UUID
        service.stall_next_subscriptions(usize::MAX);
        let start = tokio::time::Instant::now();
        service.close_streams();

        assert_matches!(client.join().await, Err(Error::DeadlineExceeded { .. }));
        assert!(start.elapsed() < Duration::from_secs(6));
        assert_eq!(service.subscription_attempts(), 2);
        assert!(!client.is_registered());
        assert_matches!(
            client.get(TENANT, created.resource_id()).await,
            Err(Error::Unavailable { .. })
        );
    }

    #[tokio::test]
    async fn test_unknown_client() {
        let capture = TracingCapture::new();
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let client = client(&service, config()).await;

        service.forget_clients();

        assert_matches!(
            client.get(TENANT, created.resource_id()).await,
            Err(Error::Unavailable { descr }) if descr.contains("unknown client")
        );
        assert_contains!(capture.to_string(), "inventory does not know this client");
        assert_not_contains!(capture.to_string(), "aborting");
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let service = Arc::new(MemInventory::new());
        let err = InventoryClient::builder(
            Arc::clone(&service) as _,
            config()
                .with_register_retry(Duration::from_secs(5), Duration::from_millis(100))
                .with_abort_on_unknown_client(true),
        )
        .build()
        .await
        .unwrap_err();

        assert_matches!(err, Error::InvalidConfig { .. });
        assert_eq!(service.subscription_attempts(), 0);
    }

    #[tokio::test]
    async fn test_initial_registration_failure() {
        let service = Arc::new(MemInventory::new());
        service.fail_next_subscriptions(1);

        let err = InventoryClient::builder(Arc::clone(&service) as _, config())
            .build()
            .await
            .unwrap_err();
        assert_matches!(err, Error::Rpc { source } if source.code() == tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_update_subscriptions() {
        let service = Arc::new(MemInventory::new());
        let (tx, mut rx) = mpsc::channel(10);
        let reader = InventoryClient::builder(
            Arc::clone(&service) as _,
            config()
                .with_cache(true)
                .with_resource_kinds([ResourceKind::Site]),
        )
        .events(tx)
        .build()
        .await
        .unwrap();
        let client_uuid = reader.client_uuid().unwrap();
        assert_eq!(
            service.subscribed_kinds(&client_uuid).unwrap(),
            vec![ResourceKind::Site, ResourceKind::Host, ResourceKind::Instance]
        );

        reader
            .update_subscriptions(TENANT, vec![ResourceKind::Region])
            .await
            .unwrap();
        assert_eq!(
            service.subscribed_kinds(&client_uuid).unwrap(),
            vec![ResourceKind::Region, ResourceKind::Host, ResourceKind::Instance]
        );

        let writer = client(&service, config()).await;
        writer.create(TENANT, site("s")).await.unwrap();
        let region = writer
            .create(
                TENANT,
                Resource::Region(Region {
                    name: "r".to_owned(),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.resource, Some(region));
    }

    #[tokio::test]
    async fn test_list_all_and_find_all() {
        let service = Arc::new(MemInventory::new());
        for i in 0..5 {
            service.insert(TENANT, host(&format!("h{i}"), &format!("uuid-{i}")));
        }
        service.insert(TENANT, site("s"));
        let client = client(&service, config()).await;

        let filter = ResourceFilter::new(ResourceKind::Host).with_limit(2);
        let hosts = client.list_all(TENANT, &filter).await.unwrap();
        assert_eq!(hosts.len(), 5);
        assert_eq!(service.call_count("list"), 3);

        let ids = client
            .find_all(TENANT, &ResourceFilter::new(ResourceKind::Host))
            .await
            .unwrap();
        assert_eq!(
            ids.iter().map(|id| id.resource_id.as_str()).collect::<Vec<_>>(),
            hosts.iter().map(|h| h.resource_id()).collect::<Vec<_>>()
        );
        assert_eq!(service.call_count("find"), 1);
    }

    #[tokio::test]
    async fn test_close() {
        let service = Arc::new(MemInventory::new());
        let created = service.insert(TENANT, host("a", UUID));
        let (tx, mut rx) = mpsc::channel(10);
        let client = InventoryClient::builder(Arc::clone(&service) as _, config())
            .events(tx)
            .build()
            .await
            .unwrap();

        client.close().await.unwrap();

        assert!(service.is_closed());
        assert!(rx.recv().await.is_none());
        assert_matches!(
            client.get(TENANT, created.resource_id()).await,
            Err(Error::Unavailable { .. })
        );
    }

    #[tokio::test]
    async fn test_external_shutdown() {
        let service = Arc::new(MemInventory::new());
        let shutdown = CancellationToken::new();
        let client = InventoryClient::builder(Arc::clone(&service) as _, config())
            .shutdown(shutdown.clone())
            .build()
            .await
            .unwrap();

        shutdown.cancel();
        wait_for(|| service.is_closed()).await;
        assert!(!client.is_registered());
        client.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_does_not_cancel_parent_token() {
        let service = Arc::new(MemInventory::new());
        let shutdown = CancellationToken::new();
        let client = InventoryClient::builder(Arc::clone(&service) as _, config())
            .shutdown(shutdown.clone())
            .build()
            .await
            .unwrap();

        drop(client);
        wait_for(|| service.is_closed()).await;
        assert!(!shutdown.is_cancelled());
    }
}
