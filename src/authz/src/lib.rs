//! # Permacore Authorization Core
//!
//! Role-based access control with role hierarchies, static separation of
//! duty, a two-tier permission cache and epoch-versioned sessions.
//!
//! ## Features
//!
//! - **Role hierarchy** kept acyclic on every write
//! - **Static SoD** checked atomically with role assignment
//! - **Permission resolution** over a role and all of its ancestors
//! - **Two-tier cache** (local LRU + shared store) with cross-node invalidation
//! - **Session epochs** so logout and refresh revoke outstanding tokens
//! - **Async-first design** using Tokio runtime
//!
//! ## Example
//!
//! ```rust
//! use permacore_authz::{AuthzConfig, AuthzService, Permission, RbacStore, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = AuthzService::builder(AuthzConfig::default()).build().await?;
//!
//!     let store = service.store();
//!     store.put_role(Role::new(1, "ADMIN", "Administrator")).await?;
//!     store.put_role(Role::new(2, "EDITOR", "Editor")).await?;
//!     store.put_permission(Permission::new(10, "user:delete")).await?;
//!
//!     service.set_role_permissions(1, [10]).await?;
//!     service.set_inheritance(2, 1).await?;
//!     service.assign_roles(42, [2]).await?;
//!
//!     let decision = service.authorize_check(42, "user:delete").await?;
//!     assert!(decision.is_allowed());
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod resolver;
pub mod session;
pub mod sod;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheStats, InMemoryInvalidationBus, InMemorySharedCache, InvalidationBus,
    InvalidationMessage, PermissionCache, SharedCache,
};
pub use config::{AuthzConfig, MissingEpochPolicy};
pub use directory::{CredentialVerifier, StoreUserDirectory, UserDirectory};
pub use engine::{AuthzService, AuthzServiceBuilder, EngineMetrics};
pub use error::{AuthzError, Result};
pub use hierarchy::RoleGraph;
pub use resolver::PermissionResolver;
pub use session::{Claims, EpochStatus, SessionEpochStore, SessionTokenCodec, TokenPair, TokenType};
pub use sod::SodEnforcer;
pub use store::{InMemoryRbacStore, RbacStore};
pub use types::{
    AccessDecision, ConstraintId, Permission, PermissionId, ResourceType, Role, RoleId,
    SodConstraint, SodType, Status, UserId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
