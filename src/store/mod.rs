//! Storage contracts and the agent data model.
//!
//! The engine never talks to a database directly. It goes through the traits
//! below, implemented by [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for tests and local development.
//!
//! "Not found" is always `Ok(None)` / `Ok(false)`. An `Err` means the query
//! itself failed and callers treat it as a hard failure.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type AgentId = Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpEntry {
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PollStation {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ElectoralArea {
    pub id: String,
    pub name: String,
    pub level: String,
    pub parent_id: Option<String>,
}

/// Which electoral areas to list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AreaFilter {
    /// Every area at a level.
    Level(String),
    /// Every area directly under a parent area.
    Parent(String),
}

impl AreaFilter {
    #[must_use]
    pub fn matches(&self, area: &ElectoralArea) -> bool {
        match self {
            Self::Level(level) => area.level == *level,
            Self::Parent(parent) => area.parent_id.as_deref() == Some(parent.as_str()),
        }
    }
}

/// Where an agent is in the signup lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountState {
    /// Created by an administrator or supervisor; no password yet.
    PreApproved,
    /// Password set, waiting for the signup code.
    PendingConfirm,
    Confirmed,
}

/// Which identity channel a confirmation arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Email,
    Phone,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: AgentId,
    pub surname: Option<String>,
    pub other_names: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub email_confirmed: bool,
    pub phone_confirmed: bool,
    pub otp_codes: Vec<OtpEntry>,
    pub electoral_level: Option<String>,
    pub supervisor_id: Option<AgentId>,
    pub electoral_area_id: Option<String>,
    pub electoral_area_name: Option<String>,
    pub poll_stations: BTreeMap<String, PollStation>,
}

impl AgentRecord {
    #[must_use]
    pub fn state(&self) -> AccountState {
        if self.email_confirmed || self.phone_confirmed {
            AccountState::Confirmed
        } else if self.password_hash.is_some() {
            AccountState::PendingConfirm
        } else {
            AccountState::PreApproved
        }
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.state() == AccountState::Confirmed
    }

    #[must_use]
    pub fn is_subordinate(&self) -> bool {
        self.supervisor_id.is_some()
    }

    /// Patch that moves a pre-approved or pending record to `PendingConfirm`.
    ///
    /// Identity fields are only filled in when the record does not have them yet.
    #[must_use]
    pub fn begin_signup(
        &self,
        password_hash: String,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> AgentPatch {
        AgentPatch {
            password_hash: Some(password_hash),
            email: email
                .filter(|_| self.email.is_none())
                .map(str::to_string),
            phone: phone
                .filter(|_| self.phone.is_none())
                .map(str::to_string),
            ..AgentPatch::default()
        }
    }

    /// Patch that marks the given channels confirmed.
    #[must_use]
    pub fn confirm(&self, channels: &[Channel]) -> AgentPatch {
        let mut patch = AgentPatch::default();
        for channel in channels {
            match channel {
                Channel::Email => patch.email_confirmed = Some(true),
                Channel::Phone => patch.phone_confirmed = Some(true),
            }
        }
        patch
    }

    /// Patch that replaces the password of a confirmed record.
    #[must_use]
    pub fn reset_password(&self, password_hash: String) -> AgentPatch {
        AgentPatch {
            password_hash: Some(password_hash),
            ..AgentPatch::default()
        }
    }
}

/// Partial update. `None` fields are left untouched, so a patch can never
/// clear an identity key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentPatch {
    pub surname: Option<String>,
    pub other_names: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub email_confirmed: Option<bool>,
    pub phone_confirmed: Option<bool>,
    pub electoral_level: Option<String>,
    pub supervisor_id: Option<AgentId>,
    pub electoral_area_id: Option<String>,
    pub electoral_area_name: Option<String>,
    pub poll_station: Option<PollStation>,
}

impl AgentPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, record: &mut AgentRecord) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_some<T: Clone>(target: &mut Option<T>, value: Option<&T>) {
            if let Some(value) = value {
                *target = Some(value.clone());
            }
        }

        set_some(&mut record.surname, self.surname.as_ref());
        set_some(&mut record.other_names, self.other_names.as_ref());
        set_some(&mut record.email, self.email.as_ref());
        set_some(&mut record.phone, self.phone.as_ref());
        set_some(&mut record.password_hash, self.password_hash.as_ref());
        set(&mut record.email_confirmed, self.email_confirmed.as_ref());
        set(&mut record.phone_confirmed, self.phone_confirmed.as_ref());
        set_some(&mut record.electoral_level, self.electoral_level.as_ref());
        set_some(&mut record.supervisor_id, self.supervisor_id.as_ref());
        set_some(&mut record.electoral_area_id, self.electoral_area_id.as_ref());
        set_some(
            &mut record.electoral_area_name,
            self.electoral_area_name.as_ref(),
        );
        if let Some(station) = &self.poll_station {
            record
                .poll_stations
                .insert(station.id.clone(), station.clone());
        }
    }
}

/// Fields for a brand new agent record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewAgent {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub surname: Option<String>,
    pub other_names: Option<String>,
    pub electoral_level: Option<String>,
    pub supervisor_id: Option<AgentId>,
}

#[derive(Clone, Debug)]
pub enum CreateOutcome {
    Created(AgentRecord),
    /// Email or phone already belongs to another record.
    Conflict,
}

/// Typed lookup key. Every variant carries at least one populated field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityKey {
    ById(AgentId),
    ByEmail(String),
    ByPhone(String),
    ByEmailOrPhone { email: String, phone: String },
}

impl IdentityKey {
    /// Build a key from optional request fields. Blank values are ignored.
    #[must_use]
    pub fn from_parts(email: Option<&str>, phone: Option<&str>) -> Option<Self> {
        let email = email.map(str::trim).filter(|value| !value.is_empty());
        let phone = phone.map(str::trim).filter(|value| !value.is_empty());
        match (email, phone) {
            (Some(email), Some(phone)) => Some(Self::ByEmailOrPhone {
                email: email.to_string(),
                phone: phone.to_string(),
            }),
            (Some(email), None) => Some(Self::ByEmail(email.to_string())),
            (None, Some(phone)) => Some(Self::ByPhone(phone.to_string())),
            (None, None) => None,
        }
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::ByEmail(email) | Self::ByEmailOrPhone { email, .. } => Some(email),
            _ => None,
        }
    }

    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        match self {
            Self::ByPhone(phone) | Self::ByEmailOrPhone { phone, .. } => Some(phone),
            _ => None,
        }
    }

    /// Match priority for a record: id and email matches rank ahead of phone.
    #[must_use]
    pub fn match_rank(&self, record: &AgentRecord) -> Option<u8> {
        let email_hit = self
            .email()
            .is_some_and(|email| record.email.as_deref() == Some(email));
        let phone_hit = self
            .phone()
            .is_some_and(|phone| record.phone.as_deref() == Some(phone));
        match self {
            Self::ById(id) => (record.id == *id).then_some(0),
            _ if email_hit => Some(0),
            _ if phone_hit => Some(1),
            _ => None,
        }
    }
}

/// Identity claim stored in a session: the fields the agent authenticated with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionClaim {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl SessionClaim {
    #[must_use]
    pub fn key(&self) -> Option<IdentityKey> {
        IdentityKey::from_parts(self.email.as_deref(), self.phone.as_deref())
    }
}

#[derive(Clone, Debug)]
pub struct NewSession {
    pub session_hash: Vec<u8>,
    pub agent_id: AgentId,
    pub claim: SessionClaim,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub agent_id: AgentId,
    pub claim: SessionClaim,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_one(&self, key: &IdentityKey) -> Result<Option<AgentRecord>>;

    async fn find_by_id(&self, id: AgentId) -> Result<Option<AgentRecord>>;

    /// Apply `patch` to the record matching `key`. Returns whether a record matched.
    async fn update_one(&self, key: &IdentityKey, patch: &AgentPatch) -> Result<bool>;

    /// Apply `patch` and return the updated record.
    async fn find_one_and_update(
        &self,
        key: &IdentityKey,
        patch: &AgentPatch,
    ) -> Result<Option<AgentRecord>>;

    async fn create(&self, agent: &NewAgent) -> Result<CreateOutcome>;

    async fn delete_one(&self, key: &IdentityKey) -> Result<bool>;

    /// Append `entry` and drop every entry created before `retain_after`, as one
    /// atomic step. Returns the retained list, or `None` if the agent is gone.
    async fn push_otp(
        &self,
        id: AgentId,
        entry: &OtpEntry,
        retain_after: DateTime<Utc>,
    ) -> Result<Option<Vec<OtpEntry>>>;

    async fn remove_otp(&self, id: AgentId, code: &str) -> Result<()>;
}

#[async_trait]
pub trait SupervisorStore: Send + Sync {
    async fn add_members(&self, supervisor: AgentId, members: &[AgentId]) -> Result<()>;

    async fn members(&self, supervisor: AgentId) -> Result<Vec<AgentId>>;

    async fn is_member(&self, supervisor: AgentId, member: AgentId) -> Result<bool>;

    async fn remove_member(&self, supervisor: AgentId, member: AgentId) -> Result<()>;

    /// Number of agent records whose `supervisor_id` is `supervisor`,
    /// whether or not they are in its member set.
    async fn count_supervised(&self, supervisor: AgentId) -> Result<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &NewSession) -> Result<()>;

    /// Unexpired session for `session_hash` at `now`. Sessions found expired
    /// are deleted.
    async fn lookup_session(
        &self,
        session_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>>;

    async fn delete_session(&self, session_hash: &[u8]) -> Result<()>;

    /// Returns the number of sessions removed.
    async fn delete_agent_sessions(&self, agent: AgentId) -> Result<u64>;
}

#[async_trait]
pub trait LevelSource: Send + Sync {
    async fn load_levels(&self) -> Result<Vec<String>>;

    async fn save_levels(&self, levels: &[String]) -> Result<()>;
}

#[async_trait]
pub trait AreaDirectory: Send + Sync {
    async fn find_area(&self, id: &str) -> Result<Option<ElectoralArea>>;

    /// Areas matching `filter`, ordered by name.
    async fn list_areas(&self, filter: &AreaFilter) -> Result<Vec<ElectoralArea>>;

    async fn upsert_area(&self, area: &ElectoralArea) -> Result<()>;
}

#[async_trait]
pub trait Ping: Send + Sync {
    /// Round trip to the backing store, used by `/health`.
    async fn ping(&self) -> Result<()>;
}

/// Everything the engine needs from persistence.
pub trait Store:
    IdentityDirectory + SupervisorStore + SessionStore + LevelSource + AreaDirectory + Ping
{
}

impl<T> Store for T where
    T: IdentityDirectory + SupervisorStore + SessionStore + LevelSource + AreaDirectory + Ping
{
}
