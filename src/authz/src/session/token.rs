//! Signed session tokens
//!
//! HS256 JWTs carrying the user id, username and the session epoch (`jti`).
//! Access and refresh tokens share the claim layout and differ in `typ` and
//! lifetime.

use crate::config::AuthzConfig;
use crate::error::{AuthzError, Result};
use crate::types::UserId;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Token type discriminator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived access token
    Access,
    /// Long-lived refresh token
    Refresh,
}

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user id as decimal string)
    pub sub: String,
    /// Login name
    pub username: String,
    /// Session epoch the token was issued under
    pub jti: String,
    /// Token type
    pub typ: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Parse the subject back into a user id
    pub fn user_id(&self) -> Result<UserId> {
        self.sub
            .parse()
            .map_err(|_| AuthzError::InvalidToken(format!("subject '{}' is not a user id", self.sub)))
    }

    /// Session epoch carried by the token
    pub fn epoch(&self) -> &str {
        &self.jti
    }
}

/// Token pair returned by login and refresh
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Encodes and verifies session tokens
#[derive(Clone)]
pub struct SessionTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionTokenCodec {
    /// Create a codec from an HMAC secret
    pub fn new(secret: &[u8], issuer: impl Into<String>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Create a codec from service configuration
    pub fn from_config(config: &AuthzConfig) -> Self {
        Self::new(
            config.token_secret.as_bytes(),
            config.token_issuer.clone(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    /// Issue an access/refresh pair bound to `epoch`
    pub fn issue_pair(&self, user_id: UserId, username: &str, epoch: &str) -> Result<TokenPair> {
        let access_token = self.issue(user_id, username, epoch, TokenType::Access)?;
        let refresh_token = self.issue(user_id, username, epoch, TokenType::Refresh)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs() as i64,
        })
    }

    /// Issue a single token
    pub fn issue(&self, user_id: UserId, username: &str, epoch: &str, typ: TokenType) -> Result<String> {
        let ttl = match typ {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            jti: epoch.to_string(),
            typ,
            iat: now.timestamp(),
            exp: (now + ChronoDuration::seconds(ttl.as_secs() as i64)).timestamp(),
            iss: self.issuer.clone(),
        };
        self.encode_claims(&claims)
    }

    /// Verify signature, issuer, expiry and type, returning the claims
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthzError::InvalidToken("token expired".to_string()),
                ErrorKind::InvalidIssuer => AuthzError::InvalidToken("unexpected issuer".to_string()),
                _ => AuthzError::InvalidToken(e.to_string()),
            }
        })?;

        if data.claims.typ != expected {
            return Err(AuthzError::InvalidToken(format!(
                "expected {:?} token, got {:?}",
                expected, data.claims.typ
            )));
        }

        Ok(data.claims)
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthzError::Internal(format!("Failed to sign token: {}", e)))
    }
}
