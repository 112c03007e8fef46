//! Session lifecycle tests: login, validation, refresh and logout

use async_trait::async_trait;
use permacore_authz::{
    AuthzConfig, AuthzError, AuthzService, CredentialVerifier, InMemorySharedCache,
    MissingEpochPolicy, Result, SharedCache, TokenType, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

struct StaticCredentials;

#[async_trait]
impl CredentialVerifier for StaticCredentials {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<UserId> {
        match (username, secret) {
            ("alice", "correct horse") => Ok(1),
            _ => Err(AuthzError::AuthFailed),
        }
    }
}

async fn service_with(config: AuthzConfig, shared: Arc<InMemorySharedCache>) -> AuthzService {
    AuthzService::builder(config)
        .shared_cache(shared)
        .credentials(Arc::new(StaticCredentials))
        .build()
        .await
        .unwrap()
}

async fn service() -> AuthzService {
    service_with(AuthzConfig::default(), Arc::new(InMemorySharedCache::new())).await
}

#[tokio::test]
async fn test_login_then_validate() {
    let service = service().await;
    let pair = service.login(7).await.unwrap();

    let claims = service.validate_session(&pair.access_token).await.unwrap();
    assert_eq!(claims.user_id().unwrap(), 7);
    assert_eq!(claims.typ, TokenType::Access);
    assert_eq!(pair.token_type, "Bearer");
}

#[tokio::test]
async fn test_authenticate_with_credentials() {
    let service = service().await;

    let pair = service.authenticate("alice", "correct horse").await.unwrap();
    let claims = service.validate_session(&pair.access_token).await.unwrap();
    assert_eq!(claims.username, "alice");

    assert!(matches!(
        service.authenticate("alice", "wrong").await,
        Err(AuthzError::AuthFailed)
    ));
}

#[tokio::test]
async fn test_logout_makes_earlier_tokens_stale() {
    let service = service().await;
    let first = service.login(7).await.unwrap();
    let second = service.login(7).await.unwrap();

    service.logout(7).await.unwrap();

    for pair in [&first, &second] {
        assert!(matches!(
            service.validate_session(&pair.access_token).await,
            Err(AuthzError::StaleToken { user_id: 7 })
        ));
    }
    assert!(service.refresh(&second.refresh_token).await.is_err());
    assert_eq!(service.metrics().await.stale_tokens, 3);
}

#[tokio::test]
async fn test_new_login_supersedes_previous_session() {
    let service = service().await;
    let old = service.login(7).await.unwrap();
    let new = service.login(7).await.unwrap();

    assert_err!(service.validate_session(&old.access_token).await);
    assert_ok!(service.validate_session(&new.access_token).await);
}

#[tokio::test]
async fn test_logout_does_not_touch_other_users() {
    let service = service().await;
    let alice = service.login(1).await.unwrap();
    let bob = service.login(2).await.unwrap();

    service.logout(1).await.unwrap();

    assert_err!(service.validate_session(&alice.access_token).await);
    assert_ok!(service.validate_session(&bob.access_token).await);
}

#[tokio::test]
async fn test_refresh_rotates_epoch() {
    let service = service().await;
    let pair = service.login(7).await.unwrap();

    let refreshed = service.refresh(&pair.refresh_token).await.unwrap();

    assert!(matches!(
        service.validate_session(&pair.access_token).await,
        Err(AuthzError::StaleToken { .. })
    ));
    assert_ok!(service.validate_session(&refreshed.access_token).await);

    // the old refresh token carries the old epoch too
    assert!(service.refresh(&pair.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_token_types_are_not_interchangeable() {
    let service = service().await;
    let pair = service.login(7).await.unwrap();

    assert!(matches!(
        service.validate_session(&pair.refresh_token).await,
        Err(AuthzError::InvalidToken(_))
    ));
    assert!(matches!(
        service.refresh(&pair.access_token).await,
        Err(AuthzError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let service = service().await;
    let pair = service.login(7).await.unwrap();
    let tampered = format!("{}x", pair.access_token);

    assert!(matches!(
        service.validate_session(&tampered).await,
        Err(AuthzError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_missing_epoch_fail_open_accepts() {
    let shared = Arc::new(InMemorySharedCache::new());
    let service = service_with(AuthzConfig::default(), shared.clone()).await;
    let pair = service.login(7).await.unwrap();

    shared.delete("jwt:version:user:7").await.unwrap();

    assert!(service.validate_session(&pair.access_token).await.is_ok());
}

#[tokio::test]
async fn test_missing_epoch_fail_closed_rejects() {
    let shared = Arc::new(InMemorySharedCache::new());
    let config = AuthzConfig {
        missing_epoch_policy: MissingEpochPolicy::FailClosed,
        ..AuthzConfig::default()
    };
    let service = service_with(config, shared.clone()).await;
    let pair = service.login(7).await.unwrap();

    shared.delete("jwt:version:user:7").await.unwrap();

    assert!(matches!(
        service.validate_session(&pair.access_token).await,
        Err(AuthzError::StaleToken { .. })
    ));
}

#[tokio::test]
async fn test_fail_closed_login_errors_when_epoch_tier_down() {
    let shared = Arc::new(InMemorySharedCache::new());
    let config = AuthzConfig {
        missing_epoch_policy: MissingEpochPolicy::FailClosed,
        ..AuthzConfig::default()
    };
    let service = service_with(config, shared.clone()).await;
    shared.set_available(false);

    assert!(matches!(
        service.login(7).await,
        Err(AuthzError::CacheDegraded(_))
    ));
}

#[tokio::test]
async fn test_fail_open_login_survives_epoch_tier_outage() {
    let shared = Arc::new(InMemorySharedCache::new());
    let service = service_with(AuthzConfig::default(), shared.clone()).await;
    shared.set_available(false);

    let pair = assert_ok!(service.login(7).await);
    assert_ok!(service.validate_session(&pair.access_token).await);

    // a logout that cannot be recorded must not pretend to succeed
    assert_err!(service.logout(7).await);
}

#[tokio::test]
async fn test_expired_access_token_is_rejected() {
    let config = AuthzConfig {
        access_token_ttl: Duration::from_secs(1),
        ..AuthzConfig::default()
    };
    let service = service_with(config, Arc::new(InMemorySharedCache::new())).await;
    let pair = service.login(7).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(matches!(
        service.validate_session(&pair.access_token).await,
        Err(AuthzError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_logout_outlives_access_token_lifetime() {
    let config = AuthzConfig {
        access_token_ttl: Duration::from_secs(1),
        refresh_token_ttl: Duration::from_secs(3600),
        ..AuthzConfig::default()
    };
    let service = service_with(config, Arc::new(InMemorySharedCache::new())).await;
    let pair = service.login(7).await.unwrap();

    service.logout(7).await.unwrap();
    assert_err!(service.refresh(&pair.refresh_token).await);

    // past the access lifetime the refresh token is still signed and unexpired
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(matches!(
        service.refresh(&pair.refresh_token).await,
        Err(AuthzError::StaleToken { user_id: 7 })
    ));
}

#[tokio::test]
async fn test_logout_survives_global_cache_invalidation() {
    let service = service().await;
    let pair = service.login(7).await.unwrap();
    service.logout(7).await.unwrap();

    service.cache().invalidate_all().await;

    assert!(matches!(
        service.validate_session(&pair.access_token).await,
        Err(AuthzError::StaleToken { .. })
    ));
}
