//! Call interception around service operations
//!
//! Interceptors are registered on the service builder and run around every
//! authorization and administration call, in registration order for
//! `before` and reverse order for `after`.

use crate::types::{PermissionId, RoleId, Status, UserId};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Operation being invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AuthorizeCheck { user_id: UserId, permission: String },
    AssignRoles { user_id: UserId, roles: Vec<RoleId> },
    SetInheritance { descendant: RoleId, ancestor: RoleId },
    RemoveInheritance { descendant: RoleId, ancestor: RoleId },
    RemoveRole { role_id: RoleId },
    SetRolePermissions { role_id: RoleId, count: usize },
    SetRoleStatus { role_id: RoleId, status: Status },
    PutPermission { permission_id: PermissionId },
    Login { user_id: UserId },
    Logout { user_id: UserId },
    Refresh,
}

impl Call {
    /// Short operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Call::AuthorizeCheck { .. } => "authorize_check",
            Call::AssignRoles { .. } => "assign_roles",
            Call::SetInheritance { .. } => "set_inheritance",
            Call::RemoveInheritance { .. } => "remove_inheritance",
            Call::RemoveRole { .. } => "remove_role",
            Call::SetRolePermissions { .. } => "set_role_permissions",
            Call::SetRoleStatus { .. } => "set_role_status",
            Call::PutPermission { .. } => "put_permission",
            Call::Login { .. } => "login",
            Call::Logout { .. } => "logout",
            Call::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Result of an intercepted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// `None` on success, otherwise the rendered error
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Hook pair run around each service call
#[async_trait]
pub trait CallInterceptor: Send + Sync {
    async fn before(&self, call: &Call);

    async fn after(&self, call: &Call, outcome: &Outcome);
}

/// Logs every call and its outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

#[async_trait]
impl CallInterceptor for TracingInterceptor {
    async fn before(&self, call: &Call) {
        tracing::debug!(operation = call.name(), call = %call, "Call started");
    }

    async fn after(&self, call: &Call, outcome: &Outcome) {
        let elapsed_us = outcome.elapsed.as_micros() as u64;
        match &outcome.error {
            None => info!(operation = call.name(), elapsed_us, "Call succeeded"),
            Some(error) => warn!(operation = call.name(), elapsed_us, error = %error, "Call failed"),
        }
    }
}
