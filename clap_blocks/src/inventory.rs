//! Config for the inventory client.

use std::time::Duration;

use inventory_client::ClientConfig;
use inventory_types::{ClientKind, ResourceKind};
use snafu::{OptionExt, Snafu};

#[derive(Debug, Snafu)]
#[expect(missing_docs)]
pub enum Error {
    #[snafu(display("unknown resource kind '{kind}'"))]
    UnknownResourceKind { kind: String },

    #[snafu(display(
        "unknown client kind '{kind}', expected one of: api, resource-manager, tenant-controller"
    ))]
    UnknownClientKind { kind: String },
}

/// Parse a resource kind from its resource ID prefix, e.g. `host` or `inst`.
fn parse_resource_kind(s: &str) -> Result<ResourceKind, Error> {
    ResourceKind::from_prefix(s.trim()).context(UnknownResourceKindSnafu { kind: s })
}

fn parse_client_kind(s: &str) -> Result<ClientKind, Error> {
    match s.trim() {
        "api" => Ok(ClientKind::Api),
        "resource-manager" | "rm" => Ok(ClientKind::ResourceManager),
        "tenant-controller" | "tc" => Ok(ClientKind::TenantController),
        _ => UnknownClientKindSnafu { kind: s }.fail(),
    }
}

/// CLI config for the inventory client
#[derive(Debug, Clone, PartialEq, clap::Parser)]
pub struct InventoryClientConfig {
    /// Name the client registers with at the inventory.
    #[clap(
        long = "inventory-client-name",
        env = "INVENTORY_CLIENT_NAME",
        default_value = "inventory-client"
    )]
    pub client_name: String,

    /// Role of the client: `api`, `resource-manager`, or `tenant-controller`.
    #[clap(
        long = "inventory-client-kind",
        env = "INVENTORY_CLIENT_KIND",
        default_value = "resource-manager",
        value_parser = parse_client_kind,
    )]
    pub client_kind: ClientKind,

    /// Resource kinds whose change events are handed to the application.
    ///
    /// Given as resource ID prefixes, e.g. `host,inst`. Can be provided as a comma-separated
    /// list, or on the command line multiple times.
    #[clap(
        long = "inventory-resource-kinds",
        env = "INVENTORY_RESOURCE_KINDS",
        required = false,
        num_args = 1..,
        value_delimiter = ',',
        value_parser = parse_resource_kind,
    )]
    pub resource_kinds: Vec<ResourceKind>,

    /// Cache `get` results and filtered `list` results.
    #[clap(long = "inventory-cache", env = "INVENTORY_CACHE")]
    pub enable_cache: bool,

    /// Resource kinds held by the cache, given as resource ID prefixes.
    #[clap(
        long = "inventory-cache-kinds",
        env = "INVENTORY_CACHE_KINDS",
        num_args = 1..,
        value_delimiter = ',',
        default_value = "host,inst",
        value_parser = parse_resource_kind,
    )]
    pub cache_kinds: Vec<ResourceKind>,

    /// Cache hosts looked up by hardware UUID.
    #[clap(long = "inventory-uuid-cache", env = "INVENTORY_UUID_CACHE")]
    pub enable_uuid_cache: bool,

    /// Base time-to-live of cache entries.
    ///
    /// Each entry lives up to 10% longer so that entries cached together do not expire together.
    #[clap(
        long = "inventory-cache-stale-time",
        env = "INVENTORY_CACHE_STALE_TIME",
        default_value = "30s",
        value_parser = humantime::parse_duration,
    )]
    pub cache_stale_time: Duration,

    /// Register again when the event stream is closed or becomes unavailable.
    #[clap(long = "inventory-register-retry", env = "INVENTORY_REGISTER_RETRY")]
    pub enable_register_retry: bool,

    /// Give up registering again after this long.
    #[clap(
        long = "inventory-register-retry-max-elapsed",
        env = "INVENTORY_REGISTER_RETRY_MAX_ELAPSED",
        default_value = "5m",
        value_parser = humantime::parse_duration,
    )]
    pub register_retry_max_elapsed: Duration,

    /// First backoff when registering again; doubles on every failed attempt.
    #[clap(
        long = "inventory-register-retry-initial-backoff",
        env = "INVENTORY_REGISTER_RETRY_INITIAL_BACKOFF",
        default_value = "100ms",
        value_parser = humantime::parse_duration,
    )]
    pub register_retry_initial_backoff: Duration,

    /// Abort the process when the inventory reports this client as unknown.
    ///
    /// Meant for deployments where a supervisor restarts the process; cannot be combined with
    /// `--inventory-register-retry`.
    #[clap(
        long = "inventory-abort-on-unknown-client",
        env = "INVENTORY_ABORT_ON_UNKNOWN_CLIENT",
        conflicts_with = "enable_register_retry"
    )]
    pub abort_on_unknown_client: bool,
}

impl InventoryClientConfig {
    /// Client configuration described by these flags.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            name: self.client_name.clone(),
            kind: self.client_kind,
            resource_kinds: self.resource_kinds.clone(),
            enable_cache: self.enable_cache,
            enable_uuid_cache: self.enable_uuid_cache,
            cache_stale_time: self.cache_stale_time,
            cache_kinds: self.cache_kinds.clone(),
            enable_register_retry: self.enable_register_retry,
            register_retry_max_elapsed: self.register_retry_max_elapsed,
            register_retry_initial_backoff: self.register_retry_initial_backoff,
            abort_on_unknown_client: self.abort_on_unknown_client,
        }
    }
}

impl From<&InventoryClientConfig> for ClientConfig {
    fn from(config: &InventoryClientConfig) -> Self {
        config.client_config()
    }
}
