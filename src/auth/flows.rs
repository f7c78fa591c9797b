//! Signup, login, password reset and resend.
//!
//! All flows share the agent's single OTP history. A confirmation call looks
//! the record up again by the identity in the request, so a code is only ever
//! checked against the record it was issued for.

use super::{
    password::{hash_password_blocking, verify_password_blocking},
    state::AuthState,
    types::{
        CodeConfirmation, Credentials, Identity, IdentityInput, PasswordResetConfirmation,
        ProfileUpdate,
    },
    AuthError,
};
use crate::{
    notify::{deliver, otp_message, OtpPurpose},
    store::{
        AccountState, AgentPatch, AgentRecord, Channel, IdentityDirectory, IdentityKey,
        SessionClaim,
    },
};
use tracing::{info, instrument};

/// Result of a successful code confirmation.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    /// Signed value for the session cookie.
    pub cookie_value: String,
    pub agent: AgentRecord,
}

/// Claim and confirmed channels: the request fields that actually match the record.
fn claim_for(record: &AgentRecord, identity: &Identity) -> (SessionClaim, Vec<Channel>) {
    let email = identity
        .email
        .clone()
        .filter(|email| record.email.as_ref() == Some(email));
    let phone = identity
        .phone
        .clone()
        .filter(|phone| record.phone.as_ref() == Some(phone));
    let mut channels = Vec::new();
    if email.is_some() {
        channels.push(Channel::Email);
    }
    if phone.is_some() {
        channels.push(Channel::Phone);
    }
    (SessionClaim { email, phone }, channels)
}

impl AuthState {
    async fn lookup(&self, identity: &Identity) -> Result<Option<AgentRecord>, AuthError> {
        Ok(self.store().find_one(identity.key()).await?)
    }

    async fn lookup_confirmed(&self, identity: &Identity) -> Result<AgentRecord, AuthError> {
        self.lookup(identity)
            .await?
            .filter(AgentRecord::is_confirmed)
            .ok_or(AuthError::AccountNotFound)
    }

    /// Deliver `code` to the agent, or to its supervisor for phone-only subagents.
    async fn send_code(
        &self,
        record: &AgentRecord,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<(), AuthError> {
        if let Some(email) = &record.email {
            return deliver(self.notifier(), &otp_message(email, code, purpose, None)).await;
        }
        let Some(supervisor_id) = record.supervisor_id else {
            return Err(AuthError::DeliveryFailure(
                "agent has no email and no supervisor".to_string(),
            ));
        };
        let relay_to = self
            .store()
            .find_by_id(supervisor_id)
            .await?
            .and_then(|supervisor| supervisor.email)
            .ok_or_else(|| AuthError::DeliveryFailure("supervisor has no email".to_string()))?;
        let relay_for = record.phone.as_deref().unwrap_or("subagent");
        deliver(
            self.notifier(),
            &otp_message(&relay_to, code, purpose, Some(relay_for)),
        )
        .await
    }

    async fn issue_and_send(
        &self,
        record: &AgentRecord,
        purpose: OtpPurpose,
    ) -> Result<(), AuthError> {
        let code = self.otp().issue(record).await?;
        self.send_code(record, &code, purpose).await
    }

    /// Set the password of a pre-approved agent and send the signup code.
    ///
    /// # Errors
    /// `NotApprovedSignup` when nobody pre-approved the identity,
    /// `AccountExists` when signup already completed.
    #[instrument(skip(self, request))]
    pub async fn signup(&self, request: &Credentials) -> Result<(), AuthError> {
        let identity = request.validate()?;
        let record = self
            .lookup(&identity)
            .await?
            .ok_or(AuthError::NotApprovedSignup)?;
        if record.is_confirmed() {
            return Err(AuthError::AccountExists);
        }

        let hierarchy = self.hierarchy().snapshot();
        let level = record.electoral_level.as_deref().unwrap_or_default();
        if hierarchy.is_top_tier(level) && identity.email.is_none() {
            return Err(AuthError::validation(
                "email is required at this electoral level",
            ));
        }

        let password_hash = hash_password_blocking(request.password.clone()).await?;
        let patch = record.begin_signup(
            password_hash,
            identity.email.as_deref(),
            identity.phone.as_deref(),
        );
        let updated = self
            .store()
            .find_one_and_update(&IdentityKey::ById(record.id), &patch)
            .await?
            .ok_or(AuthError::AccountNotFound)?;

        self.issue_and_send(&updated, OtpPurpose::Signup).await?;
        info!(agent_id = %updated.id, "Signup started");
        Ok(())
    }

    /// # Errors
    /// `AccountNotFound` unless signup is pending, `AccountExists` once
    /// confirmed, `WrongCode`/`ExpiredCode` on a bad code.
    #[instrument(skip(self, request))]
    pub async fn signup_confirm(
        &self,
        request: &CodeConfirmation,
    ) -> Result<IssuedSession, AuthError> {
        let (identity, code) = request.validate()?;
        let record = self
            .lookup(&identity)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        match record.state() {
            AccountState::Confirmed => return Err(AuthError::AccountExists),
            AccountState::PreApproved => return Err(AuthError::AccountNotFound),
            AccountState::PendingConfirm => {}
        }
        self.otp().check(&record, &code).await?;

        let (claim, channels) = claim_for(&record, &identity);
        let agent = self
            .store()
            .find_one_and_update(&IdentityKey::ById(record.id), &record.confirm(&channels))
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        let cookie_value = self.sessions().issue(agent.id, claim).await?;
        info!(agent_id = %agent.id, "Signup confirmed");
        Ok(IssuedSession {
            cookie_value,
            agent,
        })
    }

    /// Check the password and send a login code.
    ///
    /// # Errors
    /// `AccountNotFound` for unknown or unconfirmed agents, `WrongCredentials`
    /// on a password mismatch.
    #[instrument(skip(self, request))]
    pub async fn login(&self, request: &Credentials) -> Result<(), AuthError> {
        let identity = request.validate()?;
        let record = self.lookup_confirmed(&identity).await?;
        let password_hash = record
            .password_hash
            .clone()
            .ok_or(AuthError::WrongCredentials)?;
        if !verify_password_blocking(request.password.clone(), password_hash).await? {
            return Err(AuthError::WrongCredentials);
        }
        self.issue_and_send(&record, OtpPurpose::Login).await
    }

    /// # Errors
    /// `AccountNotFound` for unknown or unconfirmed agents,
    /// `WrongCode`/`ExpiredCode` on a bad code.
    #[instrument(skip(self, request))]
    pub async fn login_confirm(
        &self,
        request: &CodeConfirmation,
    ) -> Result<IssuedSession, AuthError> {
        let (identity, code) = request.validate()?;
        let agent = self.lookup_confirmed(&identity).await?;
        self.otp().check(&agent, &code).await?;

        let (claim, _) = claim_for(&agent, &identity);
        let cookie_value = self.sessions().issue(agent.id, claim).await?;
        info!(agent_id = %agent.id, "Login confirmed");
        Ok(IssuedSession {
            cookie_value,
            agent,
        })
    }

    /// Issue a fresh code for whatever challenge is pending.
    ///
    /// # Errors
    /// `AccountNotFound` for unknown agents and agents that never started signup.
    #[instrument(skip(self, request))]
    pub async fn resend_code(&self, request: &IdentityInput) -> Result<(), AuthError> {
        let identity = request.validate()?;
        let record = self
            .lookup(&identity)
            .await?
            .filter(|record| record.state() != AccountState::PreApproved)
            .ok_or(AuthError::AccountNotFound)?;
        self.issue_and_send(&record, OtpPurpose::Resend).await
    }

    /// # Errors
    /// `AccountNotFound` for unknown or unconfirmed agents.
    #[instrument(skip(self, request))]
    pub async fn password_reset(&self, request: &IdentityInput) -> Result<(), AuthError> {
        let identity = request.validate()?;
        let record = self.lookup_confirmed(&identity).await?;
        self.issue_and_send(&record, OtpPurpose::PasswordReset).await
    }

    /// Replace the password and revoke every session of the agent.
    ///
    /// # Errors
    /// `AccountNotFound` for unknown or unconfirmed agents,
    /// `WrongCode`/`ExpiredCode` on a bad code.
    #[instrument(skip(self, request))]
    pub async fn password_reset_confirm(
        &self,
        request: &PasswordResetConfirmation,
    ) -> Result<(), AuthError> {
        let (identity, code) = request.validate()?;
        let record = self.lookup_confirmed(&identity).await?;
        self.otp().check(&record, &code).await?;

        let password_hash = hash_password_blocking(request.password.clone()).await?;
        let updated = self
            .store()
            .update_one(
                &IdentityKey::ById(record.id),
                &record.reset_password(password_hash),
            )
            .await?;
        if !updated {
            return Err(AuthError::AccountNotFound);
        }
        let revoked = self.sessions().revoke_all(record.id).await?;
        info!(agent_id = %record.id, revoked, "Password reset");
        Ok(())
    }

    /// # Errors
    /// `Validation` on bad names, `AccountNotFound` if the record is gone.
    #[instrument(skip(self, agent, update), fields(agent_id = %agent.id))]
    pub async fn update_profile(
        &self,
        agent: &AgentRecord,
        update: &ProfileUpdate,
    ) -> Result<AgentRecord, AuthError> {
        let (surname, other_names) = update.validate()?;
        let patch = AgentPatch {
            surname,
            other_names,
            ..AgentPatch::default()
        };
        self.store()
            .find_one_and_update(&IdentityKey::ById(agent.id), &patch)
            .await?
            .ok_or(AuthError::AccountNotFound)
    }
}
