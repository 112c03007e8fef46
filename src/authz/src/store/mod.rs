//! Role, permission, assignment and constraint storage

use crate::error::Result;
use crate::hierarchy::InheritanceGraph;
use crate::types::{
    ConstraintId, Permission, PermissionId, Role, RoleId, SodConstraint, Status, UserId,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};

mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryRbacStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresRbacStore;

/// Storage for the RBAC model
///
/// Mutations that must be all-or-nothing (cascading role removal, edge
/// insertion with its cycle check, SoD check plus assignment replacement)
/// are single trait calls so each implementation can wrap them in one
/// critical section or transaction.
#[async_trait]
pub trait RbacStore: Send + Sync {
    /// Insert or replace a role
    async fn put_role(&self, role: Role) -> Result<()>;

    /// Get a role by ID
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>>;

    /// List all roles
    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// Enable or disable a role
    async fn set_role_status(&self, id: RoleId, status: Status) -> Result<()>;

    /// Insert or replace a permission
    async fn put_permission(&self, permission: Permission) -> Result<()>;

    /// Get a permission by ID
    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>>;

    /// List all permissions
    async fn list_permissions(&self) -> Result<Vec<Permission>>;

    /// Replace the permissions bound to a role
    async fn set_role_permissions(
        &self,
        role: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> Result<()>;

    /// Permissions directly bound to a role
    async fn role_permission_ids(&self, role: RoleId) -> Result<BTreeSet<PermissionId>>;

    /// Keys of enabled permissions bound to the enabled roles among `roles`
    async fn permission_keys_for_roles(&self, roles: &BTreeSet<RoleId>) -> Result<HashSet<String>>;

    /// Snapshot of the inheritance graph
    async fn load_graph(&self) -> Result<InheritanceGraph>;

    /// Add an inheritance edge, rejecting cycles atomically
    ///
    /// Returns `false` when the edge already existed.
    async fn add_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool>;

    /// Remove an inheritance edge, returning whether it existed
    async fn remove_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool>;

    /// Delete a role together with its edges, bindings and assignments
    ///
    /// Returns `false` when the role did not exist.
    async fn remove_role(&self, id: RoleId) -> Result<bool>;

    /// Roles directly assigned to a user
    async fn user_role_ids(&self, user: UserId) -> Result<BTreeSet<RoleId>>;

    /// Check the role set against static SoD constraints and, if it passes,
    /// replace the user's assignments with it
    async fn assign_user_roles(&self, user: UserId, roles: &BTreeSet<RoleId>) -> Result<()>;

    /// Users directly holding any of the given roles
    async fn users_with_any_role(&self, roles: &BTreeSet<RoleId>) -> Result<BTreeSet<UserId>>;

    /// Insert or replace a SoD constraint
    async fn put_sod_constraint(&self, constraint: SodConstraint) -> Result<()>;

    /// List all SoD constraints
    async fn list_sod_constraints(&self) -> Result<Vec<SodConstraint>>;

    /// Delete a SoD constraint, returning whether it existed
    async fn delete_sod_constraint(&self, id: ConstraintId) -> Result<bool>;
}
