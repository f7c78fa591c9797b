//! In-memory store used by tests and `--memory-store` development runs.
//!
//! A single async mutex guards all state, so every trait operation is one
//! critical section. That is what makes `push_otp` atomic here.

use super::{
    AgentId, AgentPatch, AgentRecord, AreaDirectory, AreaFilter, CreateOutcome, ElectoralArea,
    IdentityDirectory, IdentityKey, LevelSource, NewAgent, NewSession, OtpEntry, Ping,
    SessionRecord, SessionStore, SupervisorStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    agents: HashMap<AgentId, AgentRecord>,
    supervisors: HashMap<AgentId, BTreeSet<AgentId>>,
    sessions: HashMap<Vec<u8>, (SessionRecord, DateTime<Utc>)>,
    levels: Vec<String>,
    areas: HashMap<String, ElectoralArea>,
}

impl State {
    fn find(&self, key: &IdentityKey) -> Option<AgentId> {
        self.agents
            .values()
            .filter_map(|record| key.match_rank(record).map(|rank| (rank, record.id)))
            .min()
            .map(|(_, id)| id)
    }

    /// Whether `email` or `phone` is already held by a record other than `except`.
    fn conflicts(&self, email: Option<&str>, phone: Option<&str>, except: Option<AgentId>) -> bool {
        self.agents.values().any(|record| {
            Some(record.id) != except
                && ((email.is_some() && record.email.as_deref() == email)
                    || (phone.is_some() && record.phone.as_deref() == phone))
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an electoral level list.
    #[must_use]
    pub fn with_levels<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = State {
            levels: levels.into_iter().map(Into::into).collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Insert a fully formed record, as an administrative import would.
    ///
    /// # Errors
    /// Returns an error if the email or phone is already taken.
    pub async fn insert_record(&self, record: AgentRecord) -> Result<AgentId> {
        let mut state = self.state.lock().await;
        if state.conflicts(record.email.as_deref(), record.phone.as_deref(), None) {
            anyhow::bail!("agent identity already exists");
        }
        let id = record.id;
        state.agents.insert(id, record);
        Ok(id)
    }
}

#[async_trait]
impl IdentityDirectory for MemoryStore {
    async fn find_one(&self, key: &IdentityKey) -> Result<Option<AgentRecord>> {
        let state = self.state.lock().await;
        Ok(state.find(key).and_then(|id| state.agents.get(&id).cloned()))
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<AgentRecord>> {
        Ok(self.state.lock().await.agents.get(&id).cloned())
    }

    async fn update_one(&self, key: &IdentityKey, patch: &AgentPatch) -> Result<bool> {
        Ok(self.find_one_and_update(key, patch).await?.is_some())
    }

    async fn find_one_and_update(
        &self,
        key: &IdentityKey,
        patch: &AgentPatch,
    ) -> Result<Option<AgentRecord>> {
        let mut state = self.state.lock().await;
        let Some(id) = state.find(key) else {
            return Ok(None);
        };
        if state.conflicts(patch.email.as_deref(), patch.phone.as_deref(), Some(id)) {
            anyhow::bail!("agent identity already exists");
        }
        let Some(record) = state.agents.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply(record);
        Ok(Some(record.clone()))
    }

    async fn create(&self, agent: &NewAgent) -> Result<CreateOutcome> {
        let mut state = self.state.lock().await;
        if state.conflicts(agent.email.as_deref(), agent.phone.as_deref(), None) {
            return Ok(CreateOutcome::Conflict);
        }
        if agent.email.is_none() && agent.phone.is_none() {
            anyhow::bail!("agent requires an email or a phone");
        }
        let record = AgentRecord {
            id: Uuid::now_v7(),
            email: agent.email.clone(),
            phone: agent.phone.clone(),
            surname: agent.surname.clone(),
            other_names: agent.other_names.clone(),
            electoral_level: agent.electoral_level.clone(),
            supervisor_id: agent.supervisor_id,
            ..AgentRecord::default()
        };
        state.agents.insert(record.id, record.clone());
        Ok(CreateOutcome::Created(record))
    }

    async fn delete_one(&self, key: &IdentityKey) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(id) = state.find(key) else {
            return Ok(false);
        };
        state.agents.remove(&id);
        state.supervisors.remove(&id);
        for members in state.supervisors.values_mut() {
            members.remove(&id);
        }
        state.sessions.retain(|_, (session, _)| session.agent_id != id);
        Ok(true)
    }

    async fn push_otp(
        &self,
        id: AgentId,
        entry: &OtpEntry,
        retain_after: DateTime<Utc>,
    ) -> Result<Option<Vec<OtpEntry>>> {
        let mut state = self.state.lock().await;
        let Some(record) = state.agents.get_mut(&id) else {
            return Ok(None);
        };
        record.otp_codes.push(entry.clone());
        record
            .otp_codes
            .retain(|existing| existing.created_at >= retain_after);
        Ok(Some(record.otp_codes.clone()))
    }

    async fn remove_otp(&self, id: AgentId, code: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.agents.get_mut(&id) {
            record.otp_codes.retain(|entry| entry.code != code);
        }
        Ok(())
    }
}

#[async_trait]
impl SupervisorStore for MemoryStore {
    async fn add_members(&self, supervisor: AgentId, members: &[AgentId]) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .supervisors
            .entry(supervisor)
            .or_default()
            .extend(members.iter().copied());
        Ok(())
    }

    async fn members(&self, supervisor: AgentId) -> Result<Vec<AgentId>> {
        let state = self.state.lock().await;
        Ok(state
            .supervisors
            .get(&supervisor)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn is_member(&self, supervisor: AgentId, member: AgentId) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .supervisors
            .get(&supervisor)
            .is_some_and(|members| members.contains(&member)))
    }

    async fn remove_member(&self, supervisor: AgentId, member: AgentId) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(members) = state.supervisors.get_mut(&supervisor) {
            members.remove(&member);
        }
        Ok(())
    }

    async fn count_supervised(&self, supervisor: AgentId) -> Result<u64> {
        let state = self.state.lock().await;
        let count = state
            .agents
            .values()
            .filter(|record| record.supervisor_id == Some(supervisor))
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &NewSession) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = SessionRecord {
            agent_id: session.agent_id,
            claim: session.claim.clone(),
            created_at: Utc::now(),
            expires_at: session.expires_at,
        };
        state
            .sessions
            .insert(session.session_hash.clone(), (record, session.expires_at));
        Ok(())
    }

    async fn lookup_session(
        &self,
        session_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let mut state = self.state.lock().await;
        state.sessions.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(state
            .sessions
            .get(session_hash)
            .map(|(record, _)| record.clone()))
    }

    async fn delete_session(&self, session_hash: &[u8]) -> Result<()> {
        self.state.lock().await.sessions.remove(session_hash);
        Ok(())
    }

    async fn delete_agent_sessions(&self, agent: AgentId) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state
            .sessions
            .retain(|_, (session, _)| session.agent_id != agent);
        Ok(u64::try_from(before - state.sessions.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl LevelSource for MemoryStore {
    async fn load_levels(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.levels.clone())
    }

    async fn save_levels(&self, levels: &[String]) -> Result<()> {
        self.state.lock().await.levels = levels.to_vec();
        Ok(())
    }
}

#[async_trait]
impl AreaDirectory for MemoryStore {
    async fn find_area(&self, id: &str) -> Result<Option<ElectoralArea>> {
        Ok(self.state.lock().await.areas.get(id).cloned())
    }

    async fn list_areas(&self, filter: &AreaFilter) -> Result<Vec<ElectoralArea>> {
        let state = self.state.lock().await;
        let mut areas: Vec<ElectoralArea> = state
            .areas
            .values()
            .filter(|area| filter.matches(area))
            .cloned()
            .collect();
        areas.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(areas)
    }

    async fn upsert_area(&self, area: &ElectoralArea) -> Result<()> {
        self.state
            .lock()
            .await
            .areas
            .insert(area.id.clone(), area.clone());
        Ok(())
    }
}

#[async_trait]
impl Ping for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
