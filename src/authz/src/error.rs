//! Error types for the authorization core

use crate::types::{RoleId, UserId};
use thiserror::Error;

/// Authorization core errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Inheritance edge would close a cycle in the role graph
    #[error("Inheritance cycle: {path}")]
    Cycle {
        /// Role path that the new edge would close, rendered as `a -> b -> a`
        path: String,
    },

    /// Static separation-of-duty violation
    #[error("Separation of duty conflict: constraint '{constraint}'")]
    Conflict {
        /// Name of the violated constraint
        constraint: String,
    },

    /// Unknown role, permission, constraint or user
    #[error("Not found: {0}")]
    NotFound(String),

    /// Session epoch no longer matches the stored one
    #[error("Stale session token for user {user_id}")]
    StaleToken {
        /// Owner of the revoked session
        user_id: UserId,
    },

    /// Shared cache tier unreachable; callers fall back
    #[error("Cache degraded: {0}")]
    CacheDegraded(String),

    /// Token could not be decoded, verified or is of the wrong kind
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Credentials rejected
    #[error("Authentication failed")]
    AuthFailed,

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Shorthand for an unknown role
    pub fn role_not_found(role_id: RoleId) -> Self {
        AuthzError::NotFound(format!("role {}", role_id))
    }

    /// Informational errors that must never fail an authorization decision
    pub fn is_degraded(&self) -> bool {
        matches!(self, AuthzError::CacheDegraded(_))
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
