//! Core RBAC entity types

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique role identifier
pub type RoleId = i64;

/// Unique permission identifier
pub type PermissionId = i64;

/// Unique user identifier
pub type UserId = i64;

/// Unique SoD constraint identifier
pub type ConstraintId = i64;

/// Enabled/disabled lifecycle flag shared by roles, permissions and constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Participates in resolution and enforcement
    #[default]
    Enabled,
    /// Kept for administration, ignored at decision time
    Disabled,
}

impl Status {
    pub fn is_enabled(self) -> bool {
        self == Status::Enabled
    }
}

/// Role definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role identifier
    pub id: RoleId,

    /// Stable machine key (e.g., "ADMIN", "EDITOR")
    pub key: String,

    /// Display name
    pub name: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: Status,
}

impl Role {
    /// Create a new enabled role
    pub fn new(id: RoleId, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            name: name.into(),
            status: Status::Enabled,
        }
    }

    /// Validate the role definition
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(AuthzError::Validation(format!(
                "Role {} must have a non-empty key",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(AuthzError::Validation(format!(
                "Role '{}' must have a non-empty name",
                self.key
            )));
        }
        Ok(())
    }
}

/// Kind of resource a permission guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Navigation entry
    Menu,
    /// UI control
    Button,
    /// Backend endpoint
    #[default]
    Api,
}

/// Permission definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Unique permission identifier
    pub id: PermissionId,

    /// String identifier consumed by callers (e.g., "user:delete")
    pub key: String,

    /// Guarded resource kind
    #[serde(default)]
    pub resource_type: ResourceType,

    /// Lifecycle status
    #[serde(default)]
    pub status: Status,
}

impl Permission {
    /// Create a new enabled API permission
    pub fn new(id: PermissionId, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            resource_type: ResourceType::Api,
            status: Status::Enabled,
        }
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Validate the permission definition
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(AuthzError::Validation(format!(
                "Permission {} must have a non-empty key",
                self.id
            )));
        }
        if self.key.chars().any(char::is_whitespace) {
            return Err(AuthzError::Validation(format!(
                "Permission key '{}' must not contain whitespace",
                self.key
            )));
        }
        Ok(())
    }
}

/// Separation-of-duty constraint flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SodType {
    /// Enforced when roles are assigned
    Static,
    /// Session-time exclusion; stored but not enforced here
    Dynamic,
}

/// Mutual-exclusion constraint over a set of roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SodConstraint {
    /// Unique constraint identifier
    pub id: ConstraintId,

    /// Name reported in conflict errors
    pub name: String,

    /// Constraint flavour
    #[serde(rename = "type")]
    pub sod_type: SodType,

    /// Mutually exclusive roles
    pub role_set: BTreeSet<RoleId>,

    /// Lifecycle status
    #[serde(default)]
    pub status: Status,
}

impl SodConstraint {
    /// Create a new enabled static constraint
    pub fn new_static(
        id: ConstraintId,
        name: impl Into<String>,
        roles: impl IntoIterator<Item = RoleId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            sod_type: SodType::Static,
            role_set: roles.into_iter().collect(),
            status: Status::Enabled,
        }
    }

    /// Whether the constraint applies at assignment time
    pub fn is_enforced(&self) -> bool {
        self.sod_type == SodType::Static && self.status.is_enabled()
    }

    /// Validate the constraint definition
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AuthzError::Validation(
                "SoD constraint name cannot be empty".to_string(),
            ));
        }
        if self.role_set.len() < 2 {
            return Err(AuthzError::Validation(format!(
                "SoD constraint '{}' needs at least two distinct roles",
                self.name
            )));
        }
        Ok(())
    }
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        self == AccessDecision::Allow
    }
}

impl From<bool> for AccessDecision {
    fn from(allowed: bool) -> Self {
        if allowed {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny
        }
    }
}
