//! Client-side access layer for the edge inventory.
//!
//! [`InventoryClient`] registers with the inventory, keeps the event subscription stream open,
//! and offers CRUD and query operations on top of an [`InventoryService`]. It optionally caches
//! resources, filtered list results, and hosts by hardware UUID; change events received on the
//! subscription stream keep those caches coherent.
#![warn(missing_docs)]

pub mod cache;
mod client;
pub mod config;
pub mod error;
pub mod interface;
pub mod invalidation;
pub mod mem;
mod registration;

pub use cache::{CacheKey, CacheValue, FilterCache, ResourceCache, StaleClock, UuidCache};
pub use client::{CacheStats, InventoryClient, InventoryClientBuilder, DEFAULT_PAGE_SIZE};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use interface::{EventStream, InventoryService};
pub use mem::MemInventory;
pub use registration::REGISTER_MAX_BACKOFF;
