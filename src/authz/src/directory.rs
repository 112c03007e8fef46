//! Boundary interfaces to the user directory and credential checking

use crate::error::Result;
use crate::store::RbacStore;
use crate::types::{RoleId, UserId};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Source of a user's directly assigned roles
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Roles assigned directly to the user (no inheritance)
    async fn get_direct_role_ids(&self, user_id: UserId) -> Result<BTreeSet<RoleId>>;

    /// Login name embedded in session tokens
    async fn get_username(&self, user_id: UserId) -> Result<Option<String>> {
        let _ = user_id;
        Ok(None)
    }
}

/// Verifies login credentials
///
/// Password hashing lives behind this trait.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Return the user id for valid credentials, or [`AuthzError::AuthFailed`]
    ///
    /// [`AuthzError::AuthFailed`]: crate::error::AuthzError::AuthFailed
    async fn authenticate(&self, username: &str, secret: &str) -> Result<UserId>;
}

/// Directory reading assignments straight from the RBAC store
#[derive(Clone)]
pub struct StoreUserDirectory {
    store: Arc<dyn RbacStore>,
}

impl StoreUserDirectory {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserDirectory for StoreUserDirectory {
    async fn get_direct_role_ids(&self, user_id: UserId) -> Result<BTreeSet<RoleId>> {
        self.store.user_role_ids(user_id).await
    }
}
