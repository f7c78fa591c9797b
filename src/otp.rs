//! One-time codes.
//!
//! Every agent record carries a short history of `{code, created_at}` entries.
//! Signup, login, reset and resend all append to the same list, and each entry
//! is validated on its own by exact code match plus age.

use crate::{
    auth::AuthError,
    clock::Clock,
    store::{AgentRecord, OtpEntry, Store},
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use rand::{rngs::OsRng, RngCore};
use std::{fmt, sync::Arc};
use tracing::{debug, instrument};

pub const DEFAULT_VERIFY_WINDOW_SECONDS: i64 = 30 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    verify_window_seconds: i64,
    single_use: bool,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            verify_window_seconds: DEFAULT_VERIFY_WINDOW_SECONDS,
            single_use: false,
        }
    }

    #[must_use]
    pub fn with_verify_window_seconds(mut self, seconds: i64) -> Self {
        self.verify_window_seconds = seconds.max(1);
        self
    }

    /// Remove a code from the history once it has been accepted.
    #[must_use]
    pub fn with_single_use(mut self, single_use: bool) -> Self {
        self.single_use = single_use;
        self
    }

    #[must_use]
    pub fn verify_window(&self) -> TimeDelta {
        TimeDelta::seconds(self.verify_window_seconds)
    }

    /// Entries older than this are pruned whenever a new code is issued.
    #[must_use]
    pub fn retention(&self) -> TimeDelta {
        self.verify_window() * 2
    }

    #[must_use]
    pub fn single_use(&self) -> bool {
        self.single_use
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpVerdict {
    Valid,
    NotFound,
    Expired,
}

/// Generate a code: 4 digits for subordinates, 6 lowercase hex characters otherwise.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_code(subordinate: bool) -> Result<String> {
    let mut bytes = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate otp code")?;
    if subordinate {
        Ok(format!("{:04}", u32::from_le_bytes(bytes) % 10_000))
    } else {
        Ok(format!("{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2]))
    }
}

/// Check `code` against an entry list at `now`.
#[must_use]
pub fn verify_code(
    entries: &[OtpEntry],
    code: &str,
    now: DateTime<Utc>,
    window: TimeDelta,
) -> OtpVerdict {
    let code = code.trim();
    let mut verdict = OtpVerdict::NotFound;
    for entry in entries.iter().filter(|entry| entry.code == code) {
        if now - entry.created_at <= window {
            return OtpVerdict::Valid;
        }
        verdict = OtpVerdict::Expired;
    }
    verdict
}

/// Issues and checks codes against the store.
#[derive(Clone)]
pub struct OtpManager {
    store: Arc<dyn Store>,
    policy: OtpPolicy,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for OtpManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpManager")
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl OtpManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policy: OtpPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Append a fresh code to the agent's history and return it.
    ///
    /// The append and the prune happen in one store operation.
    ///
    /// # Errors
    /// `AccountNotFound` if the record disappeared, `Storage` on query failure.
    #[instrument(skip(self, record), fields(agent_id = %record.id))]
    pub async fn issue(&self, record: &AgentRecord) -> Result<String, AuthError> {
        let code = generate_code(record.is_subordinate())?;
        let now = self.clock.now();
        let entry = OtpEntry {
            code: code.clone(),
            created_at: now,
        };
        let retained = self
            .store
            .push_otp(record.id, &entry, now - self.policy.retention())
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        debug!(retained = retained.len(), "Issued otp code");
        Ok(code)
    }

    #[must_use]
    pub fn verify(&self, record: &AgentRecord, code: &str) -> OtpVerdict {
        verify_code(
            &record.otp_codes,
            code,
            self.clock.now(),
            self.policy.verify_window(),
        )
    }

    /// Verify and map the verdict to an error. Consumes the code when the
    /// policy is single use.
    ///
    /// # Errors
    /// `WrongCode`, `ExpiredCode`, or `Storage` if consuming the code fails.
    pub async fn check(&self, record: &AgentRecord, code: &str) -> Result<(), AuthError> {
        match self.verify(record, code) {
            OtpVerdict::Valid => {
                if self.policy.single_use() {
                    self.store.remove_otp(record.id, code.trim()).await?;
                }
                Ok(())
            }
            OtpVerdict::NotFound => Err(AuthError::WrongCode),
            OtpVerdict::Expired => Err(AuthError::ExpiredCode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        store::{CreateOutcome, IdentityDirectory, MemoryStore, NewAgent},
    };
    use uuid::Uuid;

    fn entry(code: &str, created_at: DateTime<Utc>) -> OtpEntry {
        OtpEntry {
            code: code.to_string(),
            created_at,
        }
    }

    #[test]
    fn code_shapes() -> Result<()> {
        for _ in 0..32 {
            let numeric = generate_code(true)?;
            assert_eq!(numeric.len(), 4);
            assert!(numeric.chars().all(|c| c.is_ascii_digit()));

            let hex = generate_code(false)?;
            assert_eq!(hex.len(), 6);
            assert!(hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
        Ok(())
    }

    #[test]
    fn acceptance_window_boundaries() {
        let now = Utc::now();
        let window = TimeDelta::minutes(30);
        let entries = vec![
            entry("aaaaaa", now - TimeDelta::minutes(30)),
            entry("bbbbbb", now - TimeDelta::minutes(31)),
        ];
        assert_eq!(
            verify_code(&entries, "aaaaaa", now, window),
            OtpVerdict::Valid
        );
        assert_eq!(
            verify_code(&entries, "bbbbbb", now, window),
            OtpVerdict::Expired
        );
        assert_eq!(
            verify_code(&entries, "cccccc", now, window),
            OtpVerdict::NotFound
        );
    }

    #[test]
    fn any_fresh_duplicate_wins() {
        let now = Utc::now();
        let entries = vec![
            entry("1234", now - TimeDelta::hours(1)),
            entry("1234", now - TimeDelta::minutes(1)),
        ];
        assert_eq!(
            verify_code(&entries, " 1234 ", now, TimeDelta::minutes(30)),
            OtpVerdict::Valid
        );
    }

    #[test]
    fn policy_builder() {
        let policy = OtpPolicy::new()
            .with_verify_window_seconds(60)
            .with_single_use(true);
        assert_eq!(policy.verify_window(), TimeDelta::seconds(60));
        assert_eq!(policy.retention(), TimeDelta::seconds(120));
        assert!(policy.single_use());
        assert_eq!(
            OtpPolicy::default().verify_window(),
            TimeDelta::minutes(30)
        );
    }

    async fn manager_with_agent(
        policy: OtpPolicy,
        supervisor: Option<Uuid>,
    ) -> anyhow::Result<(Arc<MemoryStore>, Arc<ManualClock>, OtpManager, AgentRecord)> {
        let store = Arc::new(MemoryStore::new());
        let CreateOutcome::Created(agent) = store
            .create(&NewAgent {
                phone: Some("0201234567".to_string()),
                supervisor_id: supervisor,
                ..NewAgent::default()
            })
            .await?
        else {
            anyhow::bail!("expected a new record");
        };
        let clock = Arc::new(ManualClock::default());
        let manager = OtpManager::new(store.clone(), policy, clock.clone());
        Ok((store, clock, manager, agent))
    }

    #[tokio::test]
    async fn issue_then_expire() -> anyhow::Result<()> {
        let (store, clock, manager, agent) =
            manager_with_agent(OtpPolicy::new(), Some(Uuid::now_v7())).await?;
        let code = manager.issue(&agent).await?;
        assert_eq!(code.len(), 4);

        let record = store.find_by_id(agent.id).await?.unwrap_or_default();
        assert_eq!(manager.verify(&record, &code), OtpVerdict::Valid);

        clock.advance(TimeDelta::minutes(31));
        assert!(matches!(
            manager.check(&record, &code).await,
            Err(AuthError::ExpiredCode)
        ));
        assert!(matches!(
            manager.check(&record, "0000x").await,
            Err(AuthError::WrongCode)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn retention_prunes_old_entries() -> anyhow::Result<()> {
        let (store, clock, manager, agent) = manager_with_agent(OtpPolicy::new(), None).await?;
        manager.issue(&agent).await?;
        clock.advance(TimeDelta::minutes(61));
        let fresh = manager.issue(&agent).await?;

        let record = store.find_by_id(agent.id).await?.unwrap_or_default();
        assert_eq!(record.otp_codes.len(), 1);
        assert_eq!(record.otp_codes[0].code, fresh);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_issues_are_not_lost() -> anyhow::Result<()> {
        let (store, _clock, manager, agent) = manager_with_agent(OtpPolicy::new(), None).await?;
        let (first, second) = tokio::join!(manager.issue(&agent), manager.issue(&agent));
        let first = first?;
        let second = second?;

        let record = store.find_by_id(agent.id).await?.unwrap_or_default();
        assert!(record.otp_codes.len() >= 2);
        assert_eq!(manager.verify(&record, &first), OtpVerdict::Valid);
        assert_eq!(manager.verify(&record, &second), OtpVerdict::Valid);
        Ok(())
    }

    #[tokio::test]
    async fn single_use_consumes_code() -> anyhow::Result<()> {
        let (store, _clock, manager, agent) =
            manager_with_agent(OtpPolicy::new().with_single_use(true), None).await?;
        let code = manager.issue(&agent).await?;
        let record = store.find_by_id(agent.id).await?.unwrap_or_default();
        manager.check(&record, &code).await?;

        let record = store.find_by_id(agent.id).await?.unwrap_or_default();
        assert!(matches!(
            manager.check(&record, &code).await,
            Err(AuthError::WrongCode)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn issue_for_missing_agent() -> anyhow::Result<()> {
        let (_store, _clock, manager, _agent) = manager_with_agent(OtpPolicy::new(), None).await?;
        let ghost = AgentRecord {
            id: Uuid::now_v7(),
            ..AgentRecord::default()
        };
        assert!(matches!(
            manager.issue(&ghost).await,
            Err(AuthError::AccountNotFound)
        ));
        Ok(())
    }
}
