//! Cache of list results keyed by filter.

use std::{collections::BTreeSet, sync::Arc};

use inventory_types::{ListResourcesResponse, ResourceFilter, ResourceKind};
use observability_deps::tracing::debug;
use ring::digest::{digest, SHA256};

use super::ResourceCache;
use crate::error::{InvalidArgumentSnafu, NotFoundSnafu, Result};

/// Kinds whose list results are cached unless configured otherwise.
pub const DEFAULT_FILTER_CACHE_KINDS: [ResourceKind; 2] =
    [ResourceKind::Host, ResourceKind::Instance];

/// Hex encoded SHA-256 of the canonical form of `filter`.
pub fn filter_hash(filter: &ResourceFilter) -> String {
    hex::encode(digest(&SHA256, filter.canonical().as_bytes()))
}

/// List results of allow-listed kinds, keyed by tenant and [`filter_hash`].
///
/// Results share the tenant partitions of the underlying [`ResourceCache`]; a filter hash never
/// collides with a resource ID.
#[derive(Debug)]
pub struct FilterCache {
    cache: Arc<ResourceCache>,
    kinds: BTreeSet<ResourceKind>,
}

impl FilterCache {
    /// Create filter cache on top of `cache` for the given kinds.
    pub fn new(cache: Arc<ResourceCache>, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            cache,
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Kinds whose list results are cached.
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.kinds.iter().copied()
    }

    /// Whether results for `filter` would be cached.
    pub fn is_cacheable(&self, filter: &ResourceFilter) -> bool {
        filter.has_predicate() && self.kinds.contains(&filter.kind)
    }

    /// Cache `result` of listing `filter` within `tenant_id`.
    ///
    /// Filters without a predicate and kinds outside the allow-list are not cached.
    pub fn store_by_filter(
        &self,
        tenant_id: &str,
        filter: &ResourceFilter,
        result: &ListResourcesResponse,
    ) {
        if !self.is_cacheable(filter) {
            debug!(kind = %filter.kind, "filter not cacheable");
            return;
        }

        self.cache.store(tenant_id, &filter_hash(filter), result.clone());
    }

    /// Cached result of listing `filter` within `tenant_id`.
    ///
    /// Fails with `InvalidArgument` if the filter has no predicate and `NotFound` on a miss or for
    /// kinds outside the allow-list.
    pub fn get_by_filter(
        &self,
        tenant_id: &str,
        filter: &ResourceFilter,
    ) -> Result<ListResourcesResponse> {
        if !filter.has_predicate() {
            return InvalidArgumentSnafu {
                descr: "empty filter predicate",
            }
            .fail();
        }
        if !self.kinds.contains(&filter.kind) {
            return NotFoundSnafu {
                descr: format!("list results of {} are not cached", filter.kind),
            }
            .fail();
        }

        self.cache.get_list(tenant_id, &filter_hash(filter))
    }

    /// Drop the cached result for `filter` within `tenant_id`.
    pub fn delete_by_filter(&self, tenant_id: &str, filter: &ResourceFilter) {
        self.cache.delete(tenant_id, &filter_hash(filter));
    }
}
