//! Per-user session epochs
//!
//! A session token is only honoured while its embedded epoch equals the one
//! stored for the user. Revoking the stored epoch logs the user out
//! everywhere at once; rotating it supersedes every older token.

use crate::cache::SharedCache;
use crate::config::MissingEpochPolicy;
use crate::error::{AuthzError, Result};
use crate::types::UserId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key prefix of stored epochs
pub const EPOCH_KEY_PREFIX: &str = "jwt:version:user:";

const REVOKED_PREFIX: &str = "revoked:";

/// Outcome of an epoch comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochStatus {
    /// Epoch matches the stored one
    Valid,
    /// No epoch is stored and the policy lets the token through
    ValidMissing,
    /// Epoch differs from the stored one, or is missing under fail-closed
    Stale,
}

impl EpochStatus {
    pub fn is_valid(self) -> bool {
        !matches!(self, EpochStatus::Stale)
    }

    /// Convert into a `Result`, mapping `Stale` to [`AuthzError::StaleToken`]
    pub fn into_result(self, user_id: UserId) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AuthzError::StaleToken { user_id })
        }
    }
}

/// Epoch storage on the shared tier
#[derive(Clone)]
pub struct SessionEpochStore {
    shared: Arc<dyn SharedCache>,
    ttl: Duration,
    revocation_ttl: Duration,
    policy: MissingEpochPolicy,
}

impl SessionEpochStore {
    /// Create an epoch store; `ttl` should equal the access-token lifetime
    pub fn new(shared: Arc<dyn SharedCache>, ttl: Duration, policy: MissingEpochPolicy) -> Self {
        Self {
            shared,
            ttl,
            revocation_ttl: ttl,
            policy,
        }
    }

    /// Keep revocation tombstones for `ttl`, never less than the epoch TTL
    ///
    /// Set this to the longest lifetime of any token carrying an epoch,
    /// usually the refresh-token lifetime.
    pub fn with_revocation_ttl(mut self, ttl: Duration) -> Self {
        self.revocation_ttl = ttl.max(self.ttl);
        self
    }

    /// Treatment of users without a stored epoch
    pub fn policy(&self) -> MissingEpochPolicy {
        self.policy
    }

    /// How long a revocation stays in force
    pub fn revocation_ttl(&self) -> Duration {
        self.revocation_ttl
    }

    fn key(user_id: UserId) -> String {
        format!("{}{}", EPOCH_KEY_PREFIX, user_id)
    }

    /// Mint and store a fresh epoch for the user
    ///
    /// If the shared tier is down the epoch is still returned under
    /// fail-open, since validation would accept it anyway; under fail-closed
    /// the failure is returned.
    pub async fn issue(&self, user_id: UserId) -> Result<String> {
        let epoch = Uuid::new_v4().to_string();
        self.store(user_id, &epoch).await?;
        debug!(user_id, "Session epoch issued");
        Ok(epoch)
    }

    /// Replace the stored epoch, superseding every earlier token
    pub async fn rotate(&self, user_id: UserId) -> Result<String> {
        let epoch = Uuid::new_v4().to_string();
        self.store(user_id, &epoch).await?;
        info!(user_id, "Session epoch rotated");
        Ok(epoch)
    }

    /// Compare a token's epoch with the stored one
    pub async fn validate(&self, user_id: UserId, epoch: &str) -> EpochStatus {
        match self.shared.get(&Self::key(user_id)).await {
            Ok(Some(current)) if current == epoch => EpochStatus::Valid,
            Ok(Some(_)) => {
                warn!(user_id, "Stale session epoch");
                EpochStatus::Stale
            }
            Ok(None) => self.missing(user_id, "no stored epoch"),
            Err(e) => {
                warn!(user_id, error = %e, "Epoch lookup failed");
                self.missing(user_id, "epoch tier unreachable")
            }
        }
    }

    /// Invalidate every outstanding token of the user
    ///
    /// The stored epoch is replaced by a tombstone no token carries. It is
    /// kept for the revocation TTL so revoked refresh tokens stay stale even
    /// under fail-open. A storage failure is always returned.
    pub async fn revoke(&self, user_id: UserId) -> Result<()> {
        let tombstone = format!("{}{}", REVOKED_PREFIX, Uuid::new_v4());
        self.shared
            .set(&Self::key(user_id), &tombstone, self.revocation_ttl)
            .await
            .map_err(|e| {
                warn!(user_id, error = %e, "Epoch revocation failed");
                e
            })?;
        info!(user_id, "Session epoch revoked");
        Ok(())
    }

    async fn store(&self, user_id: UserId, epoch: &str) -> Result<()> {
        match self.shared.set(&Self::key(user_id), epoch, self.ttl).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_degraded() && self.policy == MissingEpochPolicy::FailOpen => {
                warn!(user_id, error = %e, "Epoch not stored, continuing under fail-open");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn missing(&self, user_id: UserId, reason: &str) -> EpochStatus {
        match self.policy {
            MissingEpochPolicy::FailOpen => {
                debug!(user_id, reason, "Accepting session without epoch");
                EpochStatus::ValidMissing
            }
            MissingEpochPolicy::FailClosed => {
                warn!(user_id, reason, "Rejecting session without epoch");
                EpochStatus::Stale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemorySharedCache;

    fn store(shared: &InMemorySharedCache, policy: MissingEpochPolicy) -> SessionEpochStore {
        SessionEpochStore::new(Arc::new(shared.clone()), Duration::from_secs(60), policy)
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let shared = InMemorySharedCache::new();
        let epochs = store(&shared, MissingEpochPolicy::FailOpen);

        let epoch = epochs.issue(1).await.unwrap();
        assert_eq!(epochs.validate(1, &epoch).await, EpochStatus::Valid);
        assert_eq!(epochs.validate(1, "other").await, EpochStatus::Stale);
    }

    #[tokio::test]
    async fn test_rotate_supersedes() {
        let shared = InMemorySharedCache::new();
        let epochs = store(&shared, MissingEpochPolicy::FailOpen);

        let old = epochs.issue(1).await.unwrap();
        let new = epochs.rotate(1).await.unwrap();
        assert_ne!(old, new);
        assert_eq!(epochs.validate(1, &old).await, EpochStatus::Stale);
        assert_eq!(epochs.validate(1, &new).await, EpochStatus::Valid);
    }

    #[tokio::test]
    async fn test_missing_epoch_policy() {
        let shared = InMemorySharedCache::new();

        let open = store(&shared, MissingEpochPolicy::FailOpen);
        assert_eq!(open.validate(9, "x").await, EpochStatus::ValidMissing);

        let closed = store(&shared, MissingEpochPolicy::FailClosed);
        assert_eq!(closed.validate(9, "x").await, EpochStatus::Stale);
        assert!(matches!(
            closed.validate(9, "x").await.into_result(9),
            Err(AuthzError::StaleToken { user_id: 9 })
        ));
    }

    #[tokio::test]
    async fn test_revoke_rejects_old_tokens_under_fail_open() {
        let shared = InMemorySharedCache::new();
        let epochs = store(&shared, MissingEpochPolicy::FailOpen);

        let epoch = epochs.issue(1).await.unwrap();
        epochs.revoke(1).await.unwrap();
        assert_eq!(epochs.validate(1, &epoch).await, EpochStatus::Stale);

        // A fresh login works again
        let fresh = epochs.issue(1).await.unwrap();
        assert_eq!(epochs.validate(1, &fresh).await, EpochStatus::Valid);
    }

    #[tokio::test]
    async fn test_expired_epoch_follows_policy() {
        let shared = InMemorySharedCache::new();
        let epochs = SessionEpochStore::new(
            Arc::new(shared.clone()),
            Duration::from_millis(20),
            MissingEpochPolicy::FailOpen,
        );

        let epoch = epochs.issue(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(epochs.validate(1, &epoch).await, EpochStatus::ValidMissing);
    }

    #[tokio::test]
    async fn test_revocation_outlives_epoch_ttl() {
        let shared = InMemorySharedCache::new();
        let epochs = SessionEpochStore::new(
            Arc::new(shared.clone()),
            Duration::from_millis(20),
            MissingEpochPolicy::FailOpen,
        )
        .with_revocation_ttl(Duration::from_secs(60));

        let epoch = epochs.issue(1).await.unwrap();
        epochs.revoke(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(epochs.validate(1, &epoch).await, EpochStatus::Stale);
    }

    #[test]
    fn test_revocation_ttl_never_below_epoch_ttl() {
        let epochs = SessionEpochStore::new(
            Arc::new(InMemorySharedCache::new()),
            Duration::from_secs(60),
            MissingEpochPolicy::FailOpen,
        )
        .with_revocation_ttl(Duration::from_secs(1));

        assert_eq!(epochs.revocation_ttl(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_outage_behaviour() {
        let shared = InMemorySharedCache::new();
        shared.set_available(false);

        let open = store(&shared, MissingEpochPolicy::FailOpen);
        assert!(open.issue(1).await.is_ok());
        assert!(open.validate(1, "x").await.is_valid());
        assert!(open.revoke(1).await.is_err());

        let closed = store(&shared, MissingEpochPolicy::FailClosed);
        assert!(closed.issue(1).await.is_err());
        assert!(!closed.validate(1, "x").await.is_valid());
    }
}
