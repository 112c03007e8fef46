//! Service configuration
//!
//! Defaults mirror a single-node deployment. Every field can be overridden
//! through `AUTHZ_*` environment variables via [`AuthzConfig::from_env`].

use crate::error::{AuthzError, Result};
use crate::session::EPOCH_KEY_PREFIX;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How a session whose epoch record is absent is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingEpochPolicy {
    /// Absent epoch means valid; favours availability over strict revocation
    #[default]
    FailOpen,
    /// Absent epoch means stale
    FailClosed,
}

impl FromStr for MissingEpochPolicy {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_open" | "open" => Ok(MissingEpochPolicy::FailOpen),
            "fail_closed" | "closed" => Ok(MissingEpochPolicy::FailClosed),
            other => Err(AuthzError::Validation(format!(
                "Unknown missing epoch policy '{}'",
                other
            ))),
        }
    }
}

/// Authorization core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Maximum entries held by the local permission tier
    pub l1_capacity: usize,

    /// Lifetime of a local permission entry
    pub l1_ttl: Duration,

    /// Lifetime of a shared permission entry
    pub l2_ttl: Duration,

    /// Access token lifetime; also the TTL of the stored session epoch
    pub access_token_ttl: Duration,

    /// Refresh token lifetime; logout revocations are kept at least this long
    pub refresh_token_ttl: Duration,

    /// HMAC secret for session tokens
    pub token_secret: String,

    /// `iss` claim of issued tokens
    pub token_issuer: String,

    /// Treatment of sessions without a stored epoch
    pub missing_epoch_policy: MissingEpochPolicy,

    /// Broadcast topic for cache invalidation messages
    pub invalidation_topic: String,

    /// Prefix of shared permission cache keys; must not overlap the session
    /// epoch keys, which share the same tier
    pub key_prefix: String,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,

    /// PostgreSQL connection string; the builder connects a Postgres store
    /// from it when no store is supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Redis connection string for the shared tier and invalidation bus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            l1_ttl: Duration::from_secs(5 * 60),
            l2_ttl: Duration::from_secs(30 * 60),
            access_token_ttl: Duration::from_secs(2 * 60 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            token_secret: "permacore-dev-secret".to_string(),
            token_issuer: "permacore".to_string(),
            missing_epoch_policy: MissingEpochPolicy::FailOpen,
            invalidation_topic: "cache-invalidation".to_string(),
            key_prefix: "permission:user:".to_string(),
            log_level: "info".to_string(),
            database_url: None,
            redis_url: None,
        }
    }
}

impl AuthzConfig {
    /// Build a configuration from defaults overlaid with environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("AUTHZ_L1_CAPACITY")? {
            config.l1_capacity = v;
        }
        if let Some(v) = env_parse::<u64>("AUTHZ_L1_TTL_SECS")? {
            config.l1_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("AUTHZ_L2_TTL_SECS")? {
            config.l2_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("AUTHZ_ACCESS_TTL_SECS")? {
            config.access_token_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("AUTHZ_REFRESH_TTL_SECS")? {
            config.refresh_token_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_string("AUTHZ_TOKEN_SECRET") {
            config.token_secret = v;
        }
        if let Some(v) = env_string("AUTHZ_TOKEN_ISSUER") {
            config.token_issuer = v;
        }
        if let Some(v) = env_string("AUTHZ_MISSING_EPOCH_POLICY") {
            config.missing_epoch_policy = v.parse()?;
        }
        if let Some(v) = env_string("AUTHZ_INVALIDATION_TOPIC") {
            config.invalidation_topic = v;
        }
        if let Some(v) = env_string("AUTHZ_KEY_PREFIX") {
            config.key_prefix = v;
        }
        if let Some(v) = env_string("AUTHZ_LOG_LEVEL") {
            config.log_level = v;
        }
        config.database_url = env_string("DATABASE_URL");
        config.redis_url = env_string("REDIS_URL");

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.l1_capacity == 0 {
            return Err(AuthzError::Validation(
                "l1_capacity must be greater than zero".to_string(),
            ));
        }

        let ttls = [
            ("l1_ttl", self.l1_ttl),
            ("l2_ttl", self.l2_ttl),
            ("access_token_ttl", self.access_token_ttl),
            ("refresh_token_ttl", self.refresh_token_ttl),
        ];
        for (name, ttl) in ttls {
            if ttl.is_zero() {
                return Err(AuthzError::Validation(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.token_secret.is_empty() {
            return Err(AuthzError::Validation(
                "token_secret cannot be empty".to_string(),
            ));
        }
        if self.invalidation_topic.trim().is_empty() {
            return Err(AuthzError::Validation(
                "invalidation_topic cannot be empty".to_string(),
            ));
        }

        if self.key_prefix.is_empty() {
            return Err(AuthzError::Validation(
                "key_prefix cannot be empty".to_string(),
            ));
        }
        // clearing the permission prefix must never reach session epochs
        if self.key_prefix.starts_with(EPOCH_KEY_PREFIX)
            || EPOCH_KEY_PREFIX.starts_with(self.key_prefix.as_str())
        {
            return Err(AuthzError::Validation(format!(
                "key_prefix '{}' overlaps session epoch keys '{}'",
                self.key_prefix, EPOCH_KEY_PREFIX
            )));
        }

        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AuthzError::Validation(format!("{} has invalid value '{}'", name, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthzConfig::default();
        assert_eq!(config.l1_capacity, 10_000);
        assert_eq!(config.l1_ttl, Duration::from_secs(300));
        assert_eq!(config.l2_ttl, Duration::from_secs(1800));
        assert_eq!(config.missing_epoch_policy, MissingEpochPolicy::FailOpen);
        assert_eq!(config.invalidation_topic, "cache-invalidation");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = AuthzConfig {
            l1_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AuthzConfig {
            l2_ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AuthzConfig {
            token_secret: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_key_prefix_overlapping_epochs() {
        for prefix in ["", "jwt:", "jwt:version:user:", "jwt:version:user:perm:"] {
            let config = AuthzConfig {
                key_prefix: prefix.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(AuthzError::Validation(_))),
                "prefix {:?} should be rejected",
                prefix
            );
        }

        let config = AuthzConfig {
            key_prefix: "perm:".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "fail_closed".parse::<MissingEpochPolicy>().unwrap(),
            MissingEpochPolicy::FailClosed
        );
        assert_eq!(
            "FAIL_OPEN".parse::<MissingEpochPolicy>().unwrap(),
            MissingEpochPolicy::FailOpen
        );
        assert!("sometimes".parse::<MissingEpochPolicy>().is_err());
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&MissingEpochPolicy::FailClosed).unwrap();
        assert_eq!(json, "\"fail_closed\"");
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: AuthzConfig =
            serde_json::from_str(r#"{"l1_capacity": 42, "missing_epoch_policy": "fail_closed"}"#)
                .unwrap();
        assert_eq!(config.l1_capacity, 42);
        assert_eq!(config.missing_epoch_policy, MissingEpochPolicy::FailClosed);
        assert_eq!(config.key_prefix, "permission:user:");
    }
}
