//! In-memory inventory service, used for tests and local development.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use futures::StreamExt;
use inventory_types::{
    ChangeSubscribeEventsRequest, CreateResourceRequest, DeleteResourceRequest, EventKind,
    FindResourcesRequest, FindResourcesResponse, GetResourceRequest, ListResourcesRequest,
    ListResourcesResponse, Resource, ResourceFilter, ResourceKind, ResourceTenantId,
    SubscribeEventsRequest, SubscribeEventsResponse, UpdateResourceRequest,
};
use observability_deps::tracing::debug;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::Status;
use uuid::Uuid;

use crate::interface::{EventStream, InventoryService, UNKNOWN_CLIENT_MESSAGE};

type EventSender = mpsc::UnboundedSender<Result<SubscribeEventsResponse, Status>>;

/// In-memory [`InventoryService`].
///
/// Resources are kept per tenant and ordered by resource ID. Filter predicates support
/// `field = "value"` clauses joined by `AND` over the fields of [`Resource::field`]. Every
/// mutation is published to the subscribers of the resource's kind, including the client that
/// made it.
#[derive(Debug, Default)]
pub struct MemInventory {
    state: Mutex<MemState>,
}

#[derive(Debug, Default)]
struct MemState {
    next_id: u32,
    resources: BTreeMap<(String, String), Resource>,
    subscribers: HashMap<String, Subscriber>,

    /// Subscribers whose UUID was forgotten; their streams stay open.
    orphans: Vec<Subscriber>,

    fail_subscriptions: usize,
    stall_subscriptions: usize,
    subscription_attempts: usize,
    calls: HashMap<&'static str, usize>,
    closed: bool,
}

#[derive(Debug)]
struct Subscriber {
    kinds: BTreeSet<ResourceKind>,
    tx: EventSender,
}

impl MemState {
    fn call(&mut self, op: &'static str) -> Result<(), Status> {
        *self.calls.entry(op).or_default() += 1;
        if self.closed {
            return Err(Status::unavailable("connection closed"));
        }
        Ok(())
    }

    fn check_client(&self, client_uuid: &str) -> Result<(), Status> {
        if self.subscribers.contains_key(client_uuid) {
            Ok(())
        } else {
            Err(Status::unauthenticated(format!(
                "{UNKNOWN_CLIENT_MESSAGE} {client_uuid:?}"
            )))
        }
    }

    fn publish(&mut self, event: SubscribeEventsResponse) {
        let kind = match &event.resource {
            Some(r) => Some(r.kind()),
            None => ResourceKind::from_resource_id(&event.resource_id).ok(),
        };
        let Some(kind) = kind else { return };

        self.subscribers.retain(|client_uuid, subscriber| {
            if !subscriber.kinds.contains(&kind) {
                return true;
            }
            let delivered = subscriber.tx.send(Ok(event.clone())).is_ok();
            if !delivered {
                debug!(%client_uuid, "dropping subscriber with closed stream");
            }
            delivered
        });
    }

    fn matching(&self, tenant_id: &str, filter: &ResourceFilter) -> Result<Vec<&Resource>, Status> {
        let clauses = parse_predicate(&filter.filter)?;
        Ok(self
            .resources
            .range((tenant_id.to_owned(), String::new())..)
            .take_while(|((t, _), _)| t == tenant_id)
            .map(|(_, r)| r)
            .filter(|r| r.kind() == filter.kind)
            .filter(|r| {
                clauses
                    .iter()
                    .all(|(field, value)| r.field(field) == Some(value.as_str()))
            })
            .collect())
    }
}

impl MemInventory {
    /// Create empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a resource without publishing an event, assigning an ID if it has none.
    pub fn insert(&self, tenant_id: &str, mut resource: Resource) -> Resource {
        let mut state = self.state.lock();
        if resource.resource_id().is_empty() {
            state.next_id += 1;
            resource.set_resource_id(resource.kind().resource_id(state.next_id));
        }
        resource.set_tenant_id(tenant_id);
        state.resources.insert(
            (tenant_id.to_owned(), resource.resource_id().to_owned()),
            resource.clone(),
        );
        resource
    }

    /// Send a change event to the subscribers of its kind.
    pub fn publish(&self, event: SubscribeEventsResponse) {
        self.state.lock().publish(event);
    }

    /// Fail the next `n` subscription attempts with `Unavailable`.
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.state.lock().fail_subscriptions = n;
    }

    /// Accept the next `n` subscriptions without ever sending them a client UUID.
    pub fn stall_next_subscriptions(&self, n: usize) {
        self.state.lock().stall_subscriptions = n;
    }

    /// End all event streams gracefully. The clients become unknown.
    pub fn close_streams(&self) {
        self.state.lock().subscribers.clear();
    }

    /// End all event streams with `status`. The clients become unknown.
    pub fn fail_streams(&self, status: Status) {
        let subscribers = std::mem::take(&mut self.state.lock().subscribers);
        for subscriber in subscribers.into_values() {
            subscriber.tx.send(Err(status.clone())).ok();
        }
    }

    /// Forget all client UUIDs while keeping their event streams open.
    pub fn forget_clients(&self) {
        let mut state = self.state.lock();
        let forgotten = std::mem::take(&mut state.subscribers);
        state.orphans.extend(forgotten.into_values());
    }

    /// Kinds the client is subscribed to, `None` for unknown clients.
    pub fn subscribed_kinds(&self, client_uuid: &str) -> Option<Vec<ResourceKind>> {
        self.state
            .lock()
            .subscribers
            .get(client_uuid)
            .map(|s| s.kinds.iter().copied().collect())
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Number of `subscribe_events` calls, failed ones included.
    pub fn subscription_attempts(&self) -> usize {
        self.state.lock().subscription_attempts
    }

    /// Number of calls of the operation named `op` (e.g. `"get"`).
    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or_default()
    }

    /// Whether [`InventoryService::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl InventoryService for MemInventory {
    async fn subscribe_events(&self, req: SubscribeEventsRequest) -> Result<EventStream, Status> {
        let mut state = self.state.lock();
        state.call("subscribe_events")?;
        state.subscription_attempts += 1;
        if state.fail_subscriptions > 0 {
            state.fail_subscriptions -= 1;
            return Err(Status::unavailable("inventory not ready"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if state.stall_subscriptions > 0 {
            state.stall_subscriptions -= 1;
            debug!(client_name = %req.client_name, "stalling subscription");
            state.orphans.push(Subscriber {
                kinds: BTreeSet::new(),
                tx,
            });
            return Ok(UnboundedReceiverStream::new(rx).boxed());
        }

        let client_uuid = Uuid::new_v4().to_string();
        tx.send(Ok(SubscribeEventsResponse {
            client_uuid: client_uuid.clone(),
            ..Default::default()
        }))
        .map_err(|_| Status::internal("event stream closed"))?;

        debug!(
            client_name = %req.client_name,
            %client_uuid,
            kinds = ?req.subscribed_resource_kinds,
            "client subscribed"
        );
        state.subscribers.insert(
            client_uuid,
            Subscriber {
                kinds: req.subscribed_resource_kinds.into_iter().collect(),
                tx,
            },
        );

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn change_subscribe_events(
        &self,
        req: ChangeSubscribeEventsRequest,
    ) -> Result<(), Status> {
        let mut state = self.state.lock();
        state.call("change_subscribe_events")?;
        state.check_client(&req.client_uuid)?;

        if let Some(subscriber) = state.subscribers.get_mut(&req.client_uuid) {
            subscriber.kinds = req.subscribed_resource_kinds.into_iter().collect();
        }
        Ok(())
    }

    async fn create(&self, req: CreateResourceRequest) -> Result<Resource, Status> {
        let mut state = self.state.lock();
        state.call("create")?;
        state.check_client(&req.client_uuid)?;

        let mut resource = req.resource;
        if resource.resource_id().is_empty() {
            state.next_id += 1;
            resource.set_resource_id(resource.kind().resource_id(state.next_id));
        }
        resource.set_tenant_id(req.tenant_id.as_str());

        let key = (req.tenant_id, resource.resource_id().to_owned());
        if state.resources.contains_key(&key) {
            return Err(Status::already_exists(format!("resource {}", key.1)));
        }
        state.resources.insert(key, resource.clone());

        state.publish(SubscribeEventsResponse {
            client_uuid: String::new(),
            resource_id: resource.resource_id().to_owned(),
            event_kind: EventKind::Created,
            resource: Some(resource.clone()),
        });
        Ok(resource)
    }

    async fn get(&self, req: GetResourceRequest) -> Result<Resource, Status> {
        let mut state = self.state.lock();
        state.call("get")?;
        state.check_client(&req.client_uuid)?;

        state
            .resources
            .get(&(req.tenant_id, req.resource_id.clone()))
            .cloned()
            .ok_or_else(|| Status::not_found(format!("resource {}", req.resource_id)))
    }

    /// The field mask is not evaluated; the stored resource is replaced as a whole.
    async fn update(&self, req: UpdateResourceRequest) -> Result<Resource, Status> {
        let mut state = self.state.lock();
        state.call("update")?;
        state.check_client(&req.client_uuid)?;

        let key = (req.tenant_id, req.resource_id);
        if !state.resources.contains_key(&key) {
            return Err(Status::not_found(format!("resource {}", key.1)));
        }
        let kind = ResourceKind::from_resource_id(&key.1)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let mut resource = req.resource;
        if resource.kind() != kind {
            return Err(Status::invalid_argument(format!(
                "resource {} cannot be updated to a {}",
                key.1,
                resource.kind()
            )));
        }
        resource.set_resource_id(key.1.as_str());
        resource.set_tenant_id(key.0.as_str());
        state.resources.insert(key, resource.clone());

        state.publish(SubscribeEventsResponse {
            client_uuid: String::new(),
            resource_id: resource.resource_id().to_owned(),
            event_kind: EventKind::Updated,
            resource: Some(resource.clone()),
        });
        Ok(resource)
    }

    async fn delete(&self, req: DeleteResourceRequest) -> Result<(), Status> {
        let mut state = self.state.lock();
        state.call("delete")?;
        state.check_client(&req.client_uuid)?;

        let resource = state
            .resources
            .remove(&(req.tenant_id, req.resource_id.clone()))
            .ok_or_else(|| Status::not_found(format!("resource {}", req.resource_id)))?;

        state.publish(SubscribeEventsResponse {
            client_uuid: String::new(),
            resource_id: req.resource_id,
            event_kind: EventKind::Deleted,
            resource: Some(resource),
        });
        Ok(())
    }

    async fn list(&self, req: ListResourcesRequest) -> Result<ListResourcesResponse, Status> {
        let mut state = self.state.lock();
        state.call("list")?;
        state.check_client(&req.client_uuid)?;

        let matching = state.matching(&req.tenant_id, &req.filter)?;
        let (page, total_elements, has_next) = paginate(&matching, &req.filter);
        Ok(ListResourcesResponse {
            resources: page.iter().map(|r| (*r).clone()).collect(),
            total_elements,
            has_next,
        })
    }

    async fn find(&self, req: FindResourcesRequest) -> Result<FindResourcesResponse, Status> {
        let mut state = self.state.lock();
        state.call("find")?;
        state.check_client(&req.client_uuid)?;

        let matching = state.matching(&req.tenant_id, &req.filter)?;
        let (page, total_elements, has_next) = paginate(&matching, &req.filter);
        Ok(FindResourcesResponse {
            resources: page
                .iter()
                .map(|r| ResourceTenantId {
                    resource_id: r.resource_id().to_owned(),
                    tenant_id: r.tenant_id().to_owned(),
                })
                .collect(),
            total_elements,
            has_next,
        })
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
        state.orphans.clear();
    }
}

/// Parse `field = "value" AND ...` into `(field, value)` pairs.
fn parse_predicate(predicate: &str) -> Result<Vec<(String, String)>, Status> {
    if predicate.trim().is_empty() {
        return Ok(vec![]);
    }

    predicate
        .split(" AND ")
        .map(|clause| {
            let invalid =
                || Status::invalid_argument(format!("unsupported filter clause {clause:?}"));
            let (field, value) = clause.split_once('=').ok_or_else(invalid)?;
            let value = value
                .trim()
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(invalid)?;
            Ok((field.trim().to_owned(), value.to_owned()))
        })
        .collect()
}

fn paginate<'a, T>(items: &'a [T], filter: &ResourceFilter) -> (&'a [T], u32, bool) {
    let total = items.len();
    let start = (filter.offset as usize).min(total);
    let end = match filter.limit {
        0 => total,
        limit => start.saturating_add(limit as usize).min(total),
    };
    (
        &items[start..end],
        u32::try_from(total).unwrap_or(u32::MAX),
        end < total,
    )
}
