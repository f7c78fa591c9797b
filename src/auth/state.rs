//! Auth configuration and the shared engine state handed to handlers.

use super::{session::Sessions, AuthError};
use crate::{
    clock::{Clock, SystemClock},
    hierarchy::HierarchyCache,
    notify::Notifier,
    otp::{OtpManager, OtpPolicy},
    store::Store,
    supervisor::SupervisorGraph,
};
use anyhow::{bail, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::Arc};

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 183 * 24 * 60 * 60;
pub const MIN_COOKIE_SECRET_BYTES: usize = 32;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    cookie_secret: SecretString,
    cookie_secure: bool,
    session_ttl_seconds: i64,
    otp_policy: OtpPolicy,
}

impl AuthConfig {
    /// # Errors
    /// Returns an error if the secret is shorter than [`MIN_COOKIE_SECRET_BYTES`].
    pub fn new(cookie_secret: SecretString) -> Result<Self> {
        if cookie_secret.expose_secret().len() < MIN_COOKIE_SECRET_BYTES {
            bail!("cookie secret must be at least {MIN_COOKIE_SECRET_BYTES} bytes");
        }
        Ok(Self {
            cookie_secret,
            cookie_secure: false,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            otp_policy: OtpPolicy::new(),
        })
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_otp_policy(mut self, policy: OtpPolicy) -> Self {
        self.otp_policy = policy;
        self
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn otp_policy(&self) -> OtpPolicy {
        self.otp_policy
    }

    pub(crate) fn cookie_secret(&self) -> &SecretString {
        &self.cookie_secret
    }
}

/// Everything a request needs: storage, the hierarchy snapshot, OTP issuance,
/// delivery and sessions.
pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn Store>,
    hierarchy: Arc<HierarchyCache>,
    notifier: Arc<dyn Notifier>,
    otp: OtpManager,
    sessions: Sessions,
    supervisors: SupervisorGraph,
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn Store>,
        hierarchy: Arc<HierarchyCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_clock(config, store, hierarchy, notifier, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        config: AuthConfig,
        store: Arc<dyn Store>,
        hierarchy: Arc<HierarchyCache>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let otp = OtpManager::new(store.clone(), config.otp_policy(), clock.clone());
        let sessions = Sessions::new(store.clone(), config.clone(), clock);
        let supervisors = SupervisorGraph::new(store.clone(), hierarchy.clone(), otp.clone());
        Self {
            config,
            store,
            hierarchy,
            notifier,
            otp,
            sessions,
            supervisors,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn hierarchy(&self) -> &Arc<HierarchyCache> {
        &self.hierarchy
    }

    #[must_use]
    pub fn otp(&self) -> &OtpManager {
        &self.otp
    }

    #[must_use]
    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    #[must_use]
    pub fn supervisors(&self) -> &SupervisorGraph {
        &self.supervisors
    }

    pub(crate) fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Re-read the level list from the store.
    ///
    /// # Errors
    /// Returns `Storage` if the store query fails.
    pub async fn reload_hierarchy(&self) -> Result<(), AuthError> {
        self.hierarchy.reload(self.store.as_ref()).await?;
        Ok(())
    }
}
