//! This crate exists to coordinate versions of `tracing` and friends so that
//! every crate in the inventory workspace logs through the same facade.
//!
//! Crates should depend on this crate instead of `tracing` directly and write
//! `use observability_deps::tracing::{debug, info, warn};`.
#![warn(missing_docs)]

// Export these crates publicly so we can have a single reference
pub use tracing;
pub use tracing::instrument;
