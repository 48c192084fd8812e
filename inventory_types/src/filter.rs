//! List/find query filters.

use crate::ResourceKind;

/// Query filter for `list` and `find` requests.
///
/// The predicate (`filter`) is an opaque expression evaluated by the inventory. Two filters are
/// equivalent for caching purposes iff their [canonical form](Self::canonical) is identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceFilter {
    /// Kind of resource to query.
    pub kind: ResourceKind,
    /// Page size; `0` lets the inventory pick.
    pub limit: u32,
    /// Page offset.
    pub offset: u32,
    /// Ordering expression, e.g. `name asc`.
    pub order_by: String,
    /// Predicate expression, e.g. `uuid = "..."`.
    pub filter: String,
}

impl ResourceFilter {
    /// Unconstrained filter over all resources of `kind`.
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            limit: 0,
            offset: 0,
            order_by: String::new(),
            filter: String::new(),
        }
    }

    /// Set predicate.
    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..self
        }
    }

    /// Set page size.
    pub fn with_limit(self, limit: u32) -> Self {
        Self { limit, ..self }
    }

    /// Set page offset.
    pub fn with_offset(self, offset: u32) -> Self {
        Self { offset, ..self }
    }

    /// Set ordering.
    pub fn with_order_by(self, order_by: impl Into<String>) -> Self {
        Self {
            order_by: order_by.into(),
            ..self
        }
    }

    /// Whether a non-blank predicate is set.
    pub fn has_predicate(&self) -> bool {
        !self.filter.trim().is_empty()
    }

    /// Canonical string form: kind, limit, offset, ordering and predicate.
    pub fn canonical(&self) -> String {
        format!(
            "resource:{} limit:{} offset:{} order_by:{:?} filter:{:?}",
            self.kind.prefix(),
            self.limit,
            self.offset,
            self.order_by,
            self.filter,
        )
    }
}
