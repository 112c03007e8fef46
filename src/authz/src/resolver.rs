//! Effective permission resolution

use crate::error::Result;
use crate::hierarchy::RoleGraph;
use crate::store::RbacStore;
use crate::types::{RoleId, UserId};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Aggregates a user's permission keys from direct and inherited roles
#[derive(Clone)]
pub struct PermissionResolver {
    graph: RoleGraph,
    store: Arc<dyn RbacStore>,
}

impl PermissionResolver {
    /// Create a new resolver
    pub fn new(graph: RoleGraph, store: Arc<dyn RbacStore>) -> Self {
        Self { graph, store }
    }

    /// Resolve the permission keys granted by `direct_roles`
    ///
    /// The result covers every role in `direct_roles` plus all of their
    /// ancestors. Disabled roles and disabled permissions contribute
    /// nothing, though inheritance still passes through a disabled role.
    /// Returns an empty set when nothing is granted.
    pub async fn resolve(
        &self,
        user_id: UserId,
        direct_roles: &BTreeSet<RoleId>,
    ) -> Result<HashSet<String>> {
        if direct_roles.is_empty() {
            return Ok(HashSet::new());
        }

        let all_roles = self.graph.expand(direct_roles).await?;
        let keys = self.store.permission_keys_for_roles(&all_roles).await?;

        debug!(
            user_id,
            direct = direct_roles.len(),
            effective_roles = all_roles.len(),
            permissions = keys.len(),
            "Resolved permissions"
        );
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRbacStore;
    use crate::types::{Permission, Role, Status};

    async fn fixture() -> (PermissionResolver, Arc<InMemoryRbacStore>) {
        let store = Arc::new(InMemoryRbacStore::new());
        for (id, key) in [(1, "ADMIN"), (2, "EDITOR"), (3, "VIEWER")] {
            store.put_role(Role::new(id, key, key)).await.unwrap();
        }
        store.put_permission(Permission::new(10, "user:delete")).await.unwrap();
        store.put_permission(Permission::new(11, "post:edit")).await.unwrap();
        store.put_permission(Permission::new(12, "post:read")).await.unwrap();
        store.set_role_permissions(1, &BTreeSet::from([10])).await.unwrap();
        store.set_role_permissions(2, &BTreeSet::from([11])).await.unwrap();
        store.set_role_permissions(3, &BTreeSet::from([12])).await.unwrap();

        let dyn_store: Arc<dyn RbacStore> = store.clone();
        let resolver = PermissionResolver::new(RoleGraph::new(dyn_store.clone()), dyn_store);
        (resolver, store)
    }

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_no_roles_resolves_to_empty_set() {
        let (resolver, _) = fixture().await;
        assert!(resolver.resolve(1, &BTreeSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_union_of_direct_bindings() {
        let (resolver, _) = fixture().await;
        let result = resolver.resolve(1, &BTreeSet::from([2, 3])).await.unwrap();
        assert_eq!(result, keys(&["post:edit", "post:read"]));
    }

    #[tokio::test]
    async fn test_editor_inherits_admin() {
        let (resolver, store) = fixture().await;
        store.add_inheritance(2, 1).await.unwrap();

        let result = resolver.resolve(7, &BTreeSet::from([2])).await.unwrap();
        assert!(result.contains("user:delete"));
        assert!(result.contains("post:edit"));
    }

    #[tokio::test]
    async fn test_inheritance_passes_through_disabled_role() {
        let (resolver, store) = fixture().await;
        // VIEWER -> EDITOR -> ADMIN with EDITOR disabled
        store.add_inheritance(3, 2).await.unwrap();
        store.add_inheritance(2, 1).await.unwrap();
        store.set_role_status(2, Status::Disabled).await.unwrap();

        let result = resolver.resolve(7, &BTreeSet::from([3])).await.unwrap();
        assert_eq!(result, keys(&["post:read", "user:delete"]));
    }
}
