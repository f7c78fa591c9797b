//! Server-side sessions behind a signed `pollagent` cookie.
//!
//! The cookie value is `<token>.<signature>`: a random 32-byte token and an
//! HMAC-SHA256 over it keyed with the configured cookie secret. Only the
//! SHA-256 hash of the token is stored, so a database dump cannot be replayed
//! as cookies. The stored session carries the identity claim the agent
//! authenticated with.

use super::{state::AuthConfig, AuthError};
use crate::{
    clock::Clock,
    store::{AgentId, NewSession, SessionClaim, SessionRecord, Store},
};
use anyhow::{anyhow, Context, Result};
use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::TimeDelta;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc};
use tracing::{debug, instrument};

pub const SESSION_COOKIE_NAME: &str = "pollagent";

type HmacSha256 = Hmac<Sha256>;

/// Create a new session token. The raw value only ever goes into the cookie.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn mac(secret: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret).map_err(|e| anyhow!("invalid cookie secret: {e}"))
}

/// `token.signature`
///
/// # Errors
/// Returns an error if the secret cannot key the MAC.
pub fn sign_token(secret: &[u8], token: &str) -> Result<String> {
    let mut mac = mac(secret)?;
    mac.update(token.as_bytes());
    let signature = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());
    Ok(format!("{token}.{signature}"))
}

/// Check the signature and return the raw token.
#[must_use]
pub fn verify_signed_token(secret: &[u8], value: &str) -> Option<String> {
    let (token, signature) = value.rsplit_once('.')?;
    let signature = Base64UrlUnpadded::decode_vec(signature).ok()?;
    let mut mac = mac(secret).ok()?;
    mac.update(token.as_bytes());
    mac.verify_slice(&signature).ok()?;
    Some(token.to_string())
}

/// Build the `HttpOnly` session cookie.
///
/// # Errors
/// Returns an error if the value is not a valid header.
pub fn session_cookie(config: &AuthConfig, value: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// # Errors
/// Returns an error if the value is not a valid header.
pub fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Session cookie value from `Cookie`, or a bearer token carrying the same value.
#[must_use]
pub fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Issues, resolves and revokes sessions.
#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn Store>,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Sessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sessions")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Sessions {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    fn secret(&self) -> &[u8] {
        self.config.cookie_secret().expose_secret().as_bytes()
    }

    /// Store a session for `claim` and return the signed cookie value.
    ///
    /// # Errors
    /// Returns `Storage` if the token cannot be generated or stored.
    #[instrument(skip(self, claim))]
    pub async fn issue(&self, agent_id: AgentId, claim: SessionClaim) -> Result<String, AuthError> {
        let token = generate_session_token()?;
        let session = NewSession {
            session_hash: hash_session_token(&token),
            agent_id,
            claim,
            expires_at: self.clock.now() + TimeDelta::seconds(self.config.session_ttl_seconds()),
        };
        self.store.insert_session(&session).await?;
        debug!("Session issued");
        Ok(sign_token(self.secret(), &token)?)
    }

    /// Resolve a cookie value. Bad signatures, unknown and expired sessions are `None`.
    ///
    /// # Errors
    /// Returns `Storage` if the lookup fails.
    pub async fn resolve(&self, cookie_value: &str) -> Result<Option<SessionRecord>, AuthError> {
        let Some(token) = verify_signed_token(self.secret(), cookie_value) else {
            debug!("Rejected session cookie with a bad signature");
            return Ok(None);
        };
        let hash = hash_session_token(&token);
        Ok(self.store.lookup_session(&hash, self.clock.now()).await?)
    }

    /// Delete the session behind `cookie_value`. Idempotent.
    ///
    /// # Errors
    /// Returns `Storage` if the delete fails.
    pub async fn revoke(&self, cookie_value: &str) -> Result<(), AuthError> {
        if let Some(token) = verify_signed_token(self.secret(), cookie_value) {
            self.store
                .delete_session(&hash_session_token(&token))
                .await?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Storage` if the delete fails.
    pub async fn revoke_all(&self, agent_id: AgentId) -> Result<u64, AuthError> {
        let removed = self.store.delete_agent_sessions(agent_id).await?;
        debug!(%agent_id, removed, "Revoked agent sessions");
        Ok(removed)
    }
}
