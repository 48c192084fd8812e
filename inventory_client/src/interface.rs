//! The RPC surface the client is built on.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use inventory_types::{
    ChangeSubscribeEventsRequest, CreateResourceRequest, DeleteResourceRequest,
    FindResourcesRequest, FindResourcesResponse, GetResourceRequest, ListResourcesRequest,
    ListResourcesResponse, Resource, SubscribeEventsRequest, SubscribeEventsResponse,
    UpdateResourceRequest,
};
use tonic::{Code, Status};

/// Receive half of the event subscription stream.
///
/// `None` is a graceful close by the inventory.
pub type EventStream = BoxStream<'static, Result<SubscribeEventsResponse, Status>>;

/// Message fragment the inventory uses to reject requests from clients it does not know.
pub const UNKNOWN_CLIENT_MESSAGE: &str = "unknown client";

/// Unary and streaming calls offered by the inventory service.
///
/// Implementations wrap the transport (e.g. a gRPC channel);
/// [`MemInventory`](crate::mem::MemInventory) is an in-process implementation.
#[async_trait]
pub trait InventoryService: Debug + Send + Sync {
    /// Open the event subscription stream.
    ///
    /// The first message carries the client UUID assigned to this subscription.
    async fn subscribe_events(&self, req: SubscribeEventsRequest) -> Result<EventStream, Status>;

    /// Replace the kinds an already registered client is subscribed to.
    async fn change_subscribe_events(&self, req: ChangeSubscribeEventsRequest)
        -> Result<(), Status>;

    /// Create a resource, returning it with its assigned ID.
    async fn create(&self, req: CreateResourceRequest) -> Result<Resource, Status>;

    /// Fetch a resource by ID.
    async fn get(&self, req: GetResourceRequest) -> Result<Resource, Status>;

    /// Update a resource, returning its new state.
    async fn update(&self, req: UpdateResourceRequest) -> Result<Resource, Status>;

    /// Delete a resource.
    async fn delete(&self, req: DeleteResourceRequest) -> Result<(), Status>;

    /// List resources matching a filter.
    async fn list(&self, req: ListResourcesRequest) -> Result<ListResourcesResponse, Status>;

    /// Find IDs of resources matching a filter.
    async fn find(&self, req: FindResourcesRequest) -> Result<FindResourcesResponse, Status>;

    /// Tear down the underlying connection.
    async fn close(&self) {}
}

/// Whether a failed event stream may be re-established by registering again.
///
/// `None` (clean EOF) and `Unavailable` are transient; everything else is terminal.
pub(crate) fn is_retryable_stream_error(status: Option<&Status>) -> bool {
    match status {
        None => true,
        Some(status) => status.code() == Code::Unavailable,
    }
}

/// Whether the inventory rejected a request because it does not know the client UUID.
pub(crate) fn is_unknown_client(status: &Status) -> bool {
    status.code() == Code::Unauthenticated && status.message().contains(UNKNOWN_CLIENT_MESSAGE)
}
