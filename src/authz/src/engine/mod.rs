//! Authorization service
//!
//! Wires the role graph, SoD enforcement, permission resolution, the
//! two-tier permission cache and session epochs into the operations callers
//! use.
//!
//! ```text
//! AuthorizeCheck → PermissionCache ──miss──→ PermissionResolver → RoleGraph
//!                        ↑                              ↓
//! AssignRoles ─[user lock]→ RbacStore (SoD + replace) → invalidate → bus
//!
//! ValidateSession → SessionTokenCodec → SessionEpochStore
//! ```

pub mod interceptor;
pub mod locks;
pub mod metrics;

pub use interceptor::{Call, CallInterceptor, Outcome, TracingInterceptor};
pub use locks::KeyedLocks;
pub use metrics::{CacheOutcome, EngineMetrics, MetricsCollector};

use crate::cache::{
    CacheConfig, CacheLookup, CacheStats, InMemoryInvalidationBus, InMemorySharedCache,
    InvalidationBus, PermissionCache, SharedCache,
};
use crate::config::AuthzConfig;
use crate::directory::{CredentialVerifier, StoreUserDirectory, UserDirectory};
use crate::error::{AuthzError, Result};
use crate::hierarchy::RoleGraph;
use crate::resolver::PermissionResolver;
use crate::session::{Claims, SessionEpochStore, SessionTokenCodec, TokenPair, TokenType};
use crate::store::{InMemoryRbacStore, RbacStore};
use crate::types::{AccessDecision, Permission, PermissionId, RoleId, Status, UserId};

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for [`AuthzService`]
///
/// Every collaborator is optional. Unset ones are connected from
/// `database_url` / `redis_url` when those are configured, and otherwise
/// fall back to the in-memory implementations, which suit single-process
/// deployments and tests.
pub struct AuthzServiceBuilder {
    config: AuthzConfig,
    store: Option<Arc<dyn RbacStore>>,
    directory: Option<Arc<dyn UserDirectory>>,
    credentials: Option<Arc<dyn CredentialVerifier>>,
    shared: Option<Arc<dyn SharedCache>>,
    bus: Option<Arc<dyn InvalidationBus>>,
    interceptors: Vec<Arc<dyn CallInterceptor>>,
}

impl AuthzServiceBuilder {
    /// Start from a configuration with no collaborators set
    pub fn new(config: AuthzConfig) -> Self {
        Self {
            config,
            store: None,
            directory: None,
            credentials: None,
            shared: None,
            bus: None,
            interceptors: Vec::new(),
        }
    }

    /// Role storage backend
    pub fn store(mut self, store: Arc<dyn RbacStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Source of direct role assignments; defaults to the store itself
    pub fn directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Credential check used by [`AuthzService::authenticate`]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialVerifier>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Shared tier for cached permissions and session epochs
    pub fn shared_cache(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Invalidation broadcast channel
    pub fn invalidation_bus(mut self, bus: Arc<dyn InvalidationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Append an interceptor; they run in registration order
    pub fn interceptor(mut self, interceptor: Arc<dyn CallInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Validate configuration, wire components and start the invalidation
    /// listener
    pub async fn build(self) -> Result<AuthzService> {
        self.config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => default_store(&self.config).await?,
        };
        let directory: Arc<dyn UserDirectory> = self
            .directory
            .unwrap_or_else(|| Arc::new(StoreUserDirectory::new(store.clone())));
        let shared = match self.shared {
            Some(shared) => shared,
            None => default_shared_cache(&self.config).await?,
        };
        let bus = match self.bus {
            Some(bus) => bus,
            None => default_bus(&self.config).await?,
        };

        let graph = RoleGraph::new(store.clone());
        let resolver = PermissionResolver::new(graph.clone(), store.clone());
        let cache = Arc::new(PermissionCache::new(
            CacheConfig::from(&self.config),
            shared.clone(),
            bus,
        ));
        let listener = cache.spawn_invalidation_listener().await?;
        let epochs = SessionEpochStore::new(
            shared,
            self.config.access_token_ttl,
            self.config.missing_epoch_policy,
        )
        .with_revocation_ttl(self.config.refresh_token_ttl);
        let tokens = SessionTokenCodec::from_config(&self.config);

        info!(
            l1_capacity = self.config.l1_capacity,
            missing_epoch_policy = ?self.config.missing_epoch_policy,
            invalidation_topic = %self.config.invalidation_topic,
            interceptors = self.interceptors.len(),
            "AuthzService initialized"
        );

        Ok(AuthzService {
            config: self.config,
            store,
            graph,
            resolver,
            cache,
            epochs,
            tokens,
            directory,
            credentials: self.credentials,
            interceptors: self.interceptors,
            metrics: Arc::new(MetricsCollector::new()),
            user_locks: KeyedLocks::new(),
            listener: Some(listener),
        })
    }
}

async fn default_store(config: &AuthzConfig) -> Result<Arc<dyn RbacStore>> {
    match config.database_url.as_deref() {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let store = crate::store::PostgresRbacStore::new(url).await?;
            store.run_migrations().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => Err(AuthzError::Validation(
            "database_url is set but the `postgres` feature is disabled".to_string(),
        )),
        None => Ok(Arc::new(InMemoryRbacStore::new())),
    }
}

async fn default_shared_cache(config: &AuthzConfig) -> Result<Arc<dyn SharedCache>> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => Ok(Arc::new(
            crate::cache::RedisSharedCache::connect(url, &config.key_prefix).await?,
        )),
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(redis_disabled()),
        None => Ok(Arc::new(InMemorySharedCache::new())),
    }
}

async fn default_bus(config: &AuthzConfig) -> Result<Arc<dyn InvalidationBus>> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => Ok(Arc::new(
            crate::cache::RedisInvalidationBus::connect(url, &config.invalidation_topic).await?,
        )),
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(redis_disabled()),
        None => Ok(Arc::new(InMemoryInvalidationBus::default())),
    }
}

#[cfg(not(feature = "redis"))]
fn redis_disabled() -> AuthzError {
    AuthzError::Validation("redis_url is set but the `redis` feature is disabled".to_string())
}

/// Authorization core service
pub struct AuthzService {
    config: AuthzConfig,
    store: Arc<dyn RbacStore>,
    graph: RoleGraph,
    resolver: PermissionResolver,
    cache: Arc<PermissionCache>,
    epochs: SessionEpochStore,
    tokens: SessionTokenCodec,
    directory: Arc<dyn UserDirectory>,
    credentials: Option<Arc<dyn CredentialVerifier>>,
    interceptors: Vec<Arc<dyn CallInterceptor>>,
    metrics: Arc<MetricsCollector>,
    user_locks: KeyedLocks<UserId>,
    listener: Option<JoinHandle<()>>,
}

impl AuthzService {
    /// Start building a service
    pub fn builder(config: AuthzConfig) -> AuthzServiceBuilder {
        AuthzServiceBuilder::new(config)
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Whether the user holds `permission` directly or through inheritance
    pub async fn authorize_check(&self, user_id: UserId, permission: &str) -> Result<AccessDecision> {
        let call = Call::AuthorizeCheck {
            user_id,
            permission: permission.to_string(),
        };
        self.intercept(call, async {
            if permission.trim().is_empty() {
                return Err(AuthzError::Validation(
                    "permission key cannot be empty".to_string(),
                ));
            }

            let start = Instant::now();
            let permissions = self.permissions_for(user_id).await?;
            let decision = AccessDecision::from(permissions.contains(permission));

            self.metrics.record_decision(decision.is_allowed()).await;
            self.metrics.record_latency(start.elapsed()).await;
            debug!(user_id, permission, decision = ?decision, "Authorization check");
            Ok(decision)
        })
        .await
    }

    /// The user's full effective permission set
    pub async fn effective_permissions(&self, user_id: UserId) -> Result<HashSet<String>> {
        Ok(self.permissions_for(user_id).await?.as_ref().clone())
    }

    async fn permissions_for(&self, user_id: UserId) -> Result<Arc<HashSet<String>>> {
        match self.cache.lookup(user_id).await {
            CacheLookup::Local(permissions) => {
                self.metrics.record_cache(CacheOutcome::L1Hit).await;
                Ok(permissions)
            }
            CacheLookup::Shared(permissions) => {
                self.metrics.record_cache(CacheOutcome::L2Hit).await;
                Ok(permissions)
            }
            CacheLookup::Miss { degraded } => {
                self.metrics.record_cache(CacheOutcome::Miss { degraded }).await;
                let roles = self.directory.get_direct_role_ids(user_id).await?;
                let permissions = self.resolver.resolve(user_id, &roles).await?;
                Ok(self.cache.put(user_id, &permissions).await)
            }
        }
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Replace the user's role assignments
    ///
    /// The candidate set is checked against static SoD constraints and
    /// written in one store operation, with concurrent assignments for the
    /// same user serialized. On conflict nothing changes.
    pub async fn assign_roles(
        &self,
        user_id: UserId,
        roles: impl IntoIterator<Item = RoleId>,
    ) -> Result<()> {
        let roles: BTreeSet<RoleId> = roles.into_iter().collect();
        let call = Call::AssignRoles {
            user_id,
            roles: roles.iter().copied().collect(),
        };

        self.intercept(call, async {
            let _guard = self.user_locks.lock(&user_id).await;

            if let Err(err) = self.store.assign_user_roles(user_id, &roles).await {
                if matches!(err, AuthzError::Conflict { .. }) {
                    self.metrics.record_sod_rejection().await;
                }
                return Err(err);
            }

            self.cache.invalidate(user_id).await;
            info!(user_id, roles = ?roles, "Roles assigned");
            Ok(())
        })
        .await
    }

    /// Make `descendant` inherit `ancestor`'s permissions
    pub async fn set_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool> {
        self.intercept(Call::SetInheritance { descendant, ancestor }, async {
            let added = self.graph.add_inheritance(descendant, ancestor).await?;
            if added {
                self.cache.invalidate_all().await;
            }
            Ok(added)
        })
        .await
    }

    /// Remove an inheritance edge
    pub async fn remove_inheritance(&self, descendant: RoleId, ancestor: RoleId) -> Result<bool> {
        self.intercept(Call::RemoveInheritance { descendant, ancestor }, async {
            let removed = self.graph.remove_inheritance(descendant, ancestor).await?;
            if removed {
                self.cache.invalidate_all().await;
            }
            Ok(removed)
        })
        .await
    }

    /// Delete a role with its edges, bindings and assignments
    pub async fn remove_role(&self, role_id: RoleId) -> Result<bool> {
        self.intercept(Call::RemoveRole { role_id }, async {
            let removed = self.graph.remove_role(role_id).await?;
            if removed {
                self.cache.invalidate_all().await;
            }
            Ok(removed)
        })
        .await
    }

    /// Replace a role's permission bindings
    ///
    /// Invalidates every user holding the role or one of its descendants.
    pub async fn set_role_permissions(
        &self,
        role_id: RoleId,
        permissions: impl IntoIterator<Item = PermissionId>,
    ) -> Result<()> {
        let permissions: BTreeSet<PermissionId> = permissions.into_iter().collect();
        let call = Call::SetRolePermissions {
            role_id,
            count: permissions.len(),
        };

        self.intercept(call, async {
            self.store.set_role_permissions(role_id, &permissions).await?;

            let mut affected = self.graph.descendants(role_id).await?;
            affected.insert(role_id);
            let users = self.store.users_with_any_role(&affected).await?;
            for user_id in &users {
                self.cache.invalidate(*user_id).await;
            }
            info!(role_id, users = users.len(), "Role permissions replaced");
            Ok(())
        })
        .await
    }

    /// Enable or disable a role
    pub async fn set_role_status(&self, role_id: RoleId, status: Status) -> Result<()> {
        self.intercept(Call::SetRoleStatus { role_id, status }, async {
            self.store.set_role_status(role_id, status).await?;
            self.cache.invalidate_all().await;
            info!(role_id, status = ?status, "Role status changed");
            Ok(())
        })
        .await
    }

    /// Insert or replace a permission; replacing one clears cached sets
    pub async fn put_permission(&self, permission: Permission) -> Result<()> {
        let call = Call::PutPermission {
            permission_id: permission.id,
        };
        self.intercept(call, async {
            let existed = self.store.get_permission(permission.id).await?.is_some();
            self.store.put_permission(permission).await?;
            if existed {
                self.cache.invalidate_all().await;
            }
            Ok(())
        })
        .await
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Start a session for a user already authenticated elsewhere
    pub async fn login(&self, user_id: UserId) -> Result<TokenPair> {
        self.intercept(Call::Login { user_id }, async {
            let username = self
                .directory
                .get_username(user_id)
                .await?
                .unwrap_or_else(|| user_id.to_string());
            self.start_session(user_id, &username).await
        })
        .await
    }

    /// Verify credentials and start a session
    pub async fn authenticate(&self, username: &str, secret: &str) -> Result<TokenPair> {
        let verifier = self.credentials.as_ref().ok_or_else(|| {
            AuthzError::Internal("no credential verifier configured".to_string())
        })?;

        let user_id = verifier.authenticate(username, secret).await.map_err(|e| {
            warn!(username, "Authentication failed");
            e
        })?;

        self.intercept(Call::Login { user_id }, self.start_session(user_id, username))
            .await
    }

    async fn start_session(&self, user_id: UserId, username: &str) -> Result<TokenPair> {
        let epoch = self.epochs.issue(user_id).await?;
        let pair = self.tokens.issue_pair(user_id, username, &epoch)?;
        info!(user_id, "Session started");
        Ok(pair)
    }

    /// Verify an access token and its epoch
    ///
    /// # Errors
    ///
    /// - [`AuthzError::InvalidToken`] for bad signatures, expired tokens and
    ///   refresh tokens
    /// - [`AuthzError::StaleToken`] when the session was revoked or rotated
    pub async fn validate_session(&self, token: &str) -> Result<Claims> {
        let claims = self.tokens.verify(token, TokenType::Access)?;
        self.check_epoch(&claims).await?;
        Ok(claims)
    }

    /// End every session of the user and drop their cached permissions
    pub async fn logout(&self, user_id: UserId) -> Result<()> {
        self.intercept(Call::Logout { user_id }, async {
            self.epochs.revoke(user_id).await?;
            self.cache.invalidate(user_id).await;
            Ok(())
        })
        .await
    }

    /// Exchange a refresh token for a new pair, rotating the epoch so the
    /// previous access token goes stale
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.intercept(Call::Refresh, async {
            let claims = self.tokens.verify(refresh_token, TokenType::Refresh)?;
            let user_id = self.check_epoch(&claims).await?;

            let epoch = self.epochs.rotate(user_id).await?;
            self.tokens.issue_pair(user_id, &claims.username, &epoch)
        })
        .await
    }

    async fn check_epoch(&self, claims: &Claims) -> Result<UserId> {
        let user_id = claims.user_id()?;
        let status = self.epochs.validate(user_id, claims.epoch()).await;
        if !status.is_valid() {
            self.metrics.record_stale_token().await;
        }
        status.into_result(user_id)?;
        Ok(user_id)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Configuration the service was built with
    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    /// Underlying store, for administration not covered above
    pub fn store(&self) -> &Arc<dyn RbacStore> {
        &self.store
    }

    /// Role hierarchy queries
    pub fn graph(&self) -> &RoleGraph {
        &self.graph
    }

    /// Uncached permission resolution
    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Two-tier permission cache
    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    /// Session epoch storage
    pub fn epochs(&self) -> &SessionEpochStore {
        &self.epochs
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Service metrics snapshot
    pub async fn metrics(&self) -> EngineMetrics {
        self.metrics.get_metrics().await
    }

    async fn intercept<T, F>(&self, call: Call, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        for interceptor in &self.interceptors {
            interceptor.before(&call).await;
        }

        let start = Instant::now();
        let result = operation.await;
        if result.is_err() {
            self.metrics.record_error().await;
        }

        if !self.interceptors.is_empty() {
            let outcome = Outcome {
                error: result.as_ref().err().map(|e| e.to_string()),
                elapsed: start.elapsed(),
            };
            for interceptor in self.interceptors.iter().rev() {
                interceptor.after(&call, &outcome).await;
            }
        }

        result
    }
}

impl Drop for AuthzService {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
