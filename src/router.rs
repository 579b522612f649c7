//! Route resolution.
//!
//! Routes are matched by literal byte-wise prefix in declaration order: the
//! first group, then the first detail within it, whose path is a prefix of
//! the request path wins. Order decides, not specificity, so `/api` declared
//! before `/api/v2` shadows it.

use crate::config::{RouteConfig, RouteDetail};

/// The immutable, ordered route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    groups: Vec<RouteConfig>,
}

/// Result of a successful resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRoute<'a> {
    pub detail: &'a RouteDetail,
    pub group: &'a RouteConfig,
}

impl RouteTable {
    pub fn new(groups: Vec<RouteConfig>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[RouteConfig] {
        &self.groups
    }

    /// All route details in matching order.
    pub fn details(&self) -> impl Iterator<Item = (&RouteConfig, &RouteDetail)> {
        self.groups
            .iter()
            .flat_map(|group| group.routes.iter().map(move |detail| (group, detail)))
    }
}

/// Resolves request paths against the route table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    table: RouteTable,
}

impl Router {
    pub fn new(table: RouteTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Find the first route whose prefix starts `path`.
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute<'_>> {
        self.table
            .details()
            .find(|(_, detail)| path.starts_with(detail.path.as_str()))
            .map(|(group, detail)| ResolvedRoute { detail, group })
    }
}
