//! Role hierarchy
//!
//! [`InheritanceGraph`] is the pure adjacency structure; [`RoleGraph`] is the
//! service that reads and writes it through an [`RbacStore`] so edge
//! mutations share the store's transactional boundary.

mod graph;


pub use graph::{render_path, GraphError, InheritanceGraph};

use crate::error::{AuthzError, Result};
use crate::store::RbacStore;
use crate::types::RoleId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

impl From<GraphError> for AuthzError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Cycle { path } => AuthzError::Cycle {
                path: render_path(&path),
            },
        }
    }
}

/// Role inheritance service
#[derive(Clone)]
pub struct RoleGraph {
    store: Arc<dyn RbacStore>,
}

impl RoleGraph {
    /// Create a role graph over a store
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    /// Make `descendant` inherit every permission of `ancestor`
    ///
    /// Idempotent: an existing edge is a no-op returning `Ok(false)`.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::Cycle`] if `ancestor` already inherits from
    ///   `descendant`; the graph is left unchanged
    /// - [`AuthzError::NotFound`] if either role is unknown
    pub async fn add_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool> {
        match self.store.add_inheritance(descendant, ancestor).await {
            Ok(added) => {
                if added {
                    info!(descendant, ancestor, "Inheritance edge added");
                }
                Ok(added)
            }
            Err(err @ AuthzError::Cycle { .. }) => {
                warn!(descendant, ancestor, error = %err, "Inheritance edge rejected");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Remove an inheritance edge; removing a missing edge is a no-op
    pub async fn remove_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool> {
        let removed = self.store.remove_inheritance(descendant, ancestor).await?;
        if removed {
            info!(descendant, ancestor, "Inheritance edge removed");
        }
        Ok(removed)
    }

    /// Delete a role with its edges and bindings in one atomic step
    pub async fn remove_role(&self, role: RoleId) -> Result<bool> {
        let removed = self.store.remove_role(role).await?;
        if removed {
            info!(role, "Role removed");
        }
        Ok(removed)
    }

    /// Transitive ancestors of a role
    pub async fn ancestors(&self, role: RoleId) -> Result<BTreeSet<RoleId>> {
        Ok(self.store.load_graph().await?.ancestors(role))
    }

    /// Transitive descendants of a role
    pub async fn descendants(&self, role: RoleId) -> Result<BTreeSet<RoleId>> {
        Ok(self.store.load_graph().await?.descendants(role))
    }

    /// Direct ancestors of a role
    pub async fn parents(&self, role: RoleId) -> Result<BTreeSet<RoleId>> {
        Ok(self.store.load_graph().await?.parents(role))
    }

    /// Direct descendants of a role
    pub async fn children(&self, role: RoleId) -> Result<BTreeSet<RoleId>> {
        Ok(self.store.load_graph().await?.children(role))
    }

    /// Given roles plus every ancestor of each
    pub async fn expand(&self, roles: &BTreeSet<RoleId>) -> Result<BTreeSet<RoleId>> {
        Ok(self.store.load_graph().await?.expand(roles.iter().copied()))
    }

    /// Audit stored edges for cycles
    ///
    /// Returns each cycle as a closed path. Meant for data migrated from
    /// systems that never checked edges on write.
    pub async fn find_cycles(&self) -> Result<Vec<Vec<RoleId>>> {
        let cycles = self.store.load_graph().await?.find_cycles();
        for cycle in &cycles {
            warn!(path = %render_path(cycle), "Stored inheritance cycle");
        }
        Ok(cycles)
    }
}
