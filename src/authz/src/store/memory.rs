//! In-memory RBAC store
//!
//! The whole model sits behind one `RwLock`, so every mutation is a single
//! critical section and readers never observe a half-applied change.

use super::RbacStore;
use crate::error::{AuthzError, Result};
use crate::hierarchy::InheritanceGraph;
use crate::sod::SodEnforcer;
use crate::types::{
    ConstraintId, Permission, PermissionId, Role, RoleId, SodConstraint, Status, UserId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    bindings: HashMap<RoleId, BTreeSet<PermissionId>>,
    graph: InheritanceGraph,
    user_roles: HashMap<UserId, BTreeSet<RoleId>>,
    constraints: BTreeMap<ConstraintId, SodConstraint>,
}

impl State {
    fn require_role(&self, id: RoleId) -> Result<()> {
        if self.roles.contains_key(&id) {
            Ok(())
        } else {
            Err(AuthzError::role_not_found(id))
        }
    }

    fn require_roles<'a>(&self, ids: impl IntoIterator<Item = &'a RoleId>) -> Result<()> {
        ids.into_iter().try_for_each(|id| self.require_role(*id))
    }
}

/// In-memory RBAC store implementation
#[derive(Debug, Clone, Default)]
pub struct InMemoryRbacStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryRbacStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RbacStore for InMemoryRbacStore {
    async fn put_role(&self, role: Role) -> Result<()> {
        role.validate()?;
        let mut state = self.state.write().await;
        state.roles.insert(role.id, role);
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.get(&id).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    async fn set_role_status(&self, id: RoleId, status: Status) -> Result<()> {
        let mut state = self.state.write().await;
        let role = state
            .roles
            .get_mut(&id)
            .ok_or_else(|| AuthzError::role_not_found(id))?;
        role.status = status;
        Ok(())
    }

    async fn put_permission(&self, permission: Permission) -> Result<()> {
        permission.validate()?;
        let mut state = self.state.write().await;
        state.permissions.insert(permission.id, permission);
        Ok(())
    }

    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state.permissions.get(&id).cloned())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state.permissions.values().cloned().collect();
        permissions.sort_by_key(|p| p.id);
        Ok(permissions)
    }

    async fn set_role_permissions(
        &self,
        role: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.require_role(role)?;
        if let Some(missing) = permissions
            .iter()
            .find(|p| !state.permissions.contains_key(*p))
        {
            return Err(AuthzError::NotFound(format!("permission {}", missing)));
        }

        if permissions.is_empty() {
            state.bindings.remove(&role);
        } else {
            state.bindings.insert(role, permissions.clone());
        }
        Ok(())
    }

    async fn role_permission_ids(&self, role: RoleId) -> Result<BTreeSet<PermissionId>> {
        let state = self.state.read().await;
        Ok(state.bindings.get(&role).cloned().unwrap_or_default())
    }

    async fn permission_keys_for_roles(&self, roles: &BTreeSet<RoleId>) -> Result<HashSet<String>> {
        let state = self.state.read().await;

        let keys = roles
            .iter()
            .filter(|id| {
                state
                    .roles
                    .get(*id)
                    .map_or(false, |role| role.status.is_enabled())
            })
            .filter_map(|id| state.bindings.get(id))
            .flatten()
            .filter_map(|pid| state.permissions.get(pid))
            .filter(|p| p.status.is_enabled())
            .map(|p| p.key.clone())
            .collect();

        Ok(keys)
    }

    async fn load_graph(&self) -> Result<InheritanceGraph> {
        let state = self.state.read().await;
        Ok(state.graph.clone())
    }

    async fn add_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.require_roles([&descendant, &ancestor])?;
        Ok(state.graph.add_edge(descendant, ancestor)?)
    }

    async fn remove_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.graph.remove_edge(descendant, ancestor))
    }

    async fn remove_role(&self, id: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.roles.remove(&id).is_none() {
            return Ok(false);
        }

        state.graph.remove_node(id);
        state.bindings.remove(&id);
        state.user_roles.retain(|_, roles| {
            roles.remove(&id);
            !roles.is_empty()
        });
        Ok(true)
    }

    async fn user_role_ids(&self, user: UserId) -> Result<BTreeSet<RoleId>> {
        let state = self.state.read().await;
        Ok(state.user_roles.get(&user).cloned().unwrap_or_default())
    }

    async fn assign_user_roles(&self, user: UserId, roles: &BTreeSet<RoleId>) -> Result<()> {
        let mut state = self.state.write().await;
        state.require_roles(roles)?;

        SodEnforcer::new(state.constraints.values().cloned()).check_assignment(roles)?;

        if roles.is_empty() {
            state.user_roles.remove(&user);
        } else {
            state.user_roles.insert(user, roles.clone());
        }
        Ok(())
    }

    async fn users_with_any_role(&self, roles: &BTreeSet<RoleId>) -> Result<BTreeSet<UserId>> {
        let state = self.state.read().await;
        Ok(state
            .user_roles
            .iter()
            .filter(|(_, held)| !held.is_disjoint(roles))
            .map(|(user, _)| *user)
            .collect())
    }

    async fn put_sod_constraint(&self, constraint: SodConstraint) -> Result<()> {
        constraint.validate()?;
        let mut state = self.state.write().await;
        state.require_roles(&constraint.role_set)?;
        state.constraints.insert(constraint.id, constraint);
        Ok(())
    }

    async fn list_sod_constraints(&self) -> Result<Vec<SodConstraint>> {
        let state = self.state.read().await;
        Ok(state.constraints.values().cloned().collect())
    }

    async fn delete_sod_constraint(&self, id: ConstraintId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.constraints.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> InMemoryRbacStore {
        let store = InMemoryRbacStore::new();
        store.put_role(Role::new(1, "ADMIN", "Administrator")).await.unwrap();
        store.put_role(Role::new(2, "EDITOR", "Editor")).await.unwrap();
        store.put_role(Role::new(3, "VIEWER", "Viewer")).await.unwrap();
        store.put_permission(Permission::new(100, "user:delete")).await.unwrap();
        store.put_permission(Permission::new(101, "post:edit")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_role_roundtrip() {
        let store = seeded().await;
        let role = store.get_role(2).await.unwrap().unwrap();
        assert_eq!(role.key, "EDITOR");
        assert_eq!(store.list_roles().await.unwrap().len(), 3);
        assert!(store.get_role(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bindings_replace() {
        let store = seeded().await;
        store
            .set_role_permissions(1, &BTreeSet::from([100, 101]))
            .await
            .unwrap();
        store
            .set_role_permissions(1, &BTreeSet::from([101]))
            .await
            .unwrap();
        assert_eq!(store.role_permission_ids(1).await.unwrap(), BTreeSet::from([101]));
    }

    #[tokio::test]
    async fn test_unknown_ids_rejected() {
        let store = seeded().await;
        assert!(matches!(
            store.set_role_permissions(1, &BTreeSet::from([999])).await,
            Err(AuthzError::NotFound(_))
        ));
        assert!(matches!(
            store.add_inheritance(1, 42).await,
            Err(AuthzError::NotFound(_))
        ));
        assert!(matches!(
            store.assign_user_roles(7, &BTreeSet::from([42])).await,
            Err(AuthzError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_keys_skip_disabled_roles_and_permissions() {
        let store = seeded().await;
        store.set_role_permissions(1, &BTreeSet::from([100])).await.unwrap();
        store.set_role_permissions(2, &BTreeSet::from([101])).await.unwrap();

        let all = BTreeSet::from([1, 2]);
        assert_eq!(store.permission_keys_for_roles(&all).await.unwrap().len(), 2);

        store.set_role_status(1, Status::Disabled).await.unwrap();
        let keys = store.permission_keys_for_roles(&all).await.unwrap();
        assert_eq!(keys, HashSet::from(["post:edit".to_string()]));

        store
            .put_permission(Permission::new(101, "post:edit").with_status(Status::Disabled))
            .await
            .unwrap();
        assert!(store.permission_keys_for_roles(&all).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_role_cascades() {
        let store = seeded().await;
        store.add_inheritance(2, 1).await.unwrap();
        store.add_inheritance(3, 2).await.unwrap();
        store.set_role_permissions(2, &BTreeSet::from([101])).await.unwrap();
        store.assign_user_roles(5, &BTreeSet::from([2, 3])).await.unwrap();

        assert!(store.remove_role(2).await.unwrap());
        assert!(!store.remove_role(2).await.unwrap());

        assert!(store.load_graph().await.unwrap().is_empty());
        assert!(store.role_permission_ids(2).await.unwrap().is_empty());
        assert_eq!(store.user_role_ids(5).await.unwrap(), BTreeSet::from([3]));
    }

    #[tokio::test]
    async fn test_users_with_any_role() {
        let store = seeded().await;
        store.assign_user_roles(1, &BTreeSet::from([1])).await.unwrap();
        store.assign_user_roles(2, &BTreeSet::from([2, 3])).await.unwrap();
        store.assign_user_roles(3, &BTreeSet::from([3])).await.unwrap();

        let users = store.users_with_any_role(&BTreeSet::from([1, 2])).await.unwrap();
        assert_eq!(users, BTreeSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_sod_constraint_admin() {
        let store = seeded().await;
        assert!(store
            .put_sod_constraint(SodConstraint::new_static(1, "bad", vec![1, 77]))
            .await
            .is_err());

        store
            .put_sod_constraint(SodConstraint::new_static(1, "admin-viewer", vec![1, 3]))
            .await
            .unwrap();
        assert_eq!(store.list_sod_constraints().await.unwrap().len(), 1);

        assert!(store.assign_user_roles(9, &BTreeSet::from([1, 3])).await.is_err());
        assert!(store.user_role_ids(9).await.unwrap().is_empty());

        assert!(store.delete_sod_constraint(1).await.unwrap());
        store.assign_user_roles(9, &BTreeSet::from([1, 3])).await.unwrap();
    }
}
