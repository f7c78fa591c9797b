//! Role-scoped authentication strategies.
//!
//! Flow Overview: read the session cookie, resolve the session, look the
//! stored claim up in the directory, then apply the role predicate for the
//! route. Every failure happens before the handler runs.

use super::{session::extract_session_cookie, state::AuthState, AuthError};
use crate::{
    hierarchy::ElectoralHierarchy,
    store::{AgentRecord, SessionClaim},
};
use axum::http::HeaderMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Any confirmed agent.
    AnyAgent,
    /// Confirmed agent above the bottom rank.
    Supervisor,
    /// Confirmed agent at the bottom rank.
    SubAgent,
}

impl Strategy {
    /// Apply the role predicate to a looked-up record.
    ///
    /// # Errors
    /// `AccountNotFound` for a missing or unconfirmed record,
    /// `InsufficientElectoralLevel` when the rank does not fit.
    pub fn admit(
        self,
        record: Option<AgentRecord>,
        hierarchy: &ElectoralHierarchy,
    ) -> Result<AgentRecord, AuthError> {
        let record = record
            .filter(AgentRecord::is_confirmed)
            .ok_or(AuthError::AccountNotFound)?;
        let level = record.electoral_level.as_deref().unwrap_or_default();
        let allowed = match self {
            Self::AnyAgent => true,
            Self::Supervisor => hierarchy.is_supervisor_level(level),
            Self::SubAgent => hierarchy.is_bottom_rank(level),
        };
        if allowed {
            Ok(record)
        } else {
            debug!(strategy = ?self, level, "Electoral level rejected");
            Err(AuthError::InsufficientElectoralLevel)
        }
    }
}

/// Authenticated agent behind the current request.
#[derive(Clone, Debug)]
pub struct Principal {
    pub agent: AgentRecord,
    pub claim: SessionClaim,
}

impl AuthState {
    /// Resolve the request's session and admit it under `strategy`.
    ///
    /// # Errors
    /// `Unauthenticated` without a live session, otherwise whatever
    /// [`Strategy::admit`] returns. Store failures are `Storage`.
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        strategy: Strategy,
    ) -> Result<Principal, AuthError> {
        let cookie_value = extract_session_cookie(headers).ok_or(AuthError::Unauthenticated)?;
        let session = self
            .sessions()
            .resolve(&cookie_value)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        let key = session.claim.key().ok_or(AuthError::Unauthenticated)?;

        let record = self
            .store()
            .find_one(&key)
            .await?
            .filter(|record| record.id == session.agent_id);
        let agent = strategy.admit(record, &self.hierarchy().snapshot())?;

        Ok(Principal {
            agent,
            claim: session.claim,
        })
    }
}
