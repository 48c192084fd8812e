//! Request and response messages of the inventory RPC service.

use crate::{Resource, ResourceFilter, ResourceKind};

/// Role of a client towards the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Northbound API gateway.
    Api,
    /// Resource manager reconciling a subset of resource kinds.
    ResourceManager,
    /// Controller provisioning and deprovisioning tenants.
    TenantController,
}

/// What happened to the resource carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventKind {
    /// Not a change event, e.g. the registration message.
    #[default]
    Unspecified,
    /// Resource was created.
    Created,
    /// Resource was updated.
    Updated,
    /// Resource was deleted.
    Deleted,
}

/// Opens the event subscription stream. This is the only message sent on that stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeEventsRequest {
    /// Human readable client name.
    pub client_name: String,
    /// Role of the client.
    pub client_kind: ClientKind,
    /// Kinds the client wants to receive change events for.
    pub subscribed_resource_kinds: Vec<ResourceKind>,
}

/// Message received on the event subscription stream.
///
/// The first message carries the assigned `client_uuid`; all following messages are change
/// events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeEventsResponse {
    /// Client UUID assigned by the inventory.
    pub client_uuid: String,
    /// ID of the changed resource.
    pub resource_id: String,
    /// Kind of change.
    pub event_kind: EventKind,
    /// Resource state after the change; state before deletion for deletes.
    pub resource: Option<Resource>,
}

/// Replaces the subscribed kinds of a registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct ChangeSubscribeEventsRequest {
    pub client_uuid: String,
    pub tenant_id: String,
    /// New, complete set of subscribed kinds.
    pub subscribed_resource_kinds: Vec<ResourceKind>,
}

/// Create a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct CreateResourceRequest {
    pub client_uuid: String,
    pub tenant_id: String,
    pub resource: Resource,
}

/// Fetch a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct GetResourceRequest {
    pub client_uuid: String,
    pub tenant_id: String,
    pub resource_id: String,
}

/// Update fields of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct UpdateResourceRequest {
    pub client_uuid: String,
    pub tenant_id: String,
    pub resource_id: String,
    /// Names of the fields to take from `resource`; empty means all.
    pub field_mask: Vec<String>,
    pub resource: Resource,
}

/// Delete a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct DeleteResourceRequest {
    pub client_uuid: String,
    pub tenant_id: String,
    pub resource_id: String,
}

/// List full resources matching a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct ListResourcesRequest {
    pub client_uuid: String,
    pub tenant_id: String,
    pub filter: ResourceFilter,
}

/// One page of [`ListResourcesRequest`] results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResourcesResponse {
    #[expect(missing_docs)]
    pub resources: Vec<Resource>,
    /// Number of matches across all pages.
    pub total_elements: u32,
    /// More pages follow.
    pub has_next: bool,
}

/// Find IDs of resources matching a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[expect(missing_docs)]
pub struct FindResourcesRequest {
    pub client_uuid: String,
    pub tenant_id: String,
    pub filter: ResourceFilter,
}

/// Identity of a resource returned by [`FindResourcesRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[expect(missing_docs)]
pub struct ResourceTenantId {
    pub resource_id: String,
    pub tenant_id: String,
}

/// One page of [`FindResourcesRequest`] results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindResourcesResponse {
    #[expect(missing_docs)]
    pub resources: Vec<ResourceTenantId>,
    /// Number of matches across all pages.
    pub total_elements: u32,
    /// More pages follow.
    pub has_next: bool,
}
