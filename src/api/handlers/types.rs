//! Response and request bodies that only exist at the HTTP boundary.

use crate::{
    auth::types::SubAgentInput,
    hierarchy::ElectoralHierarchy,
    store::{AgentRecord, PollStation, SessionClaim},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supervisor,
    SubAgent,
    /// Level unknown to the current hierarchy.
    Unassigned,
}

impl Role {
    #[must_use]
    pub fn of(record: &AgentRecord, hierarchy: &ElectoralHierarchy) -> Self {
        let level = record.electoral_level.as_deref().unwrap_or_default();
        if hierarchy.is_supervisor_level(level) {
            Self::Supervisor
        } else if hierarchy.is_bottom_rank(level) {
            Self::SubAgent
        } else {
            Self::Unassigned
        }
    }
}

/// Public view of an agent. Never carries the password hash or OTP history.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct AgentResponse {
    pub id: Uuid,
    pub surname: Option<String>,
    pub other_names: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_confirmed: bool,
    pub phone_confirmed: bool,
    pub electoral_level: Option<String>,
    pub role: Role,
    pub supervisor_id: Option<Uuid>,
    pub electoral_area_id: Option<String>,
    pub electoral_area_name: Option<String>,
    pub poll_stations: Vec<PollStation>,
}

impl AgentResponse {
    #[must_use]
    pub fn new(record: AgentRecord, hierarchy: &ElectoralHierarchy) -> Self {
        let role = Role::of(&record, hierarchy);
        Self {
            id: record.id,
            surname: record.surname,
            other_names: record.other_names,
            email: record.email,
            phone: record.phone,
            email_confirmed: record.email_confirmed,
            phone_confirmed: record.phone_confirmed,
            electoral_level: record.electoral_level,
            role,
            supervisor_id: record.supervisor_id,
            electoral_area_id: record.electoral_area_id,
            electoral_area_name: record.electoral_area_name,
            poll_stations: record.poll_stations.into_values().collect(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub agent: AgentResponse,
    pub claim: SessionClaim,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AreaAssignment {
    pub area_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SubAgentsRequest {
    pub agents: Vec<SubAgentInput>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SubAgentsCreated {
    pub ids: Vec<Uuid>,
}

/// Code handed to a supervisor for out-of-band relay.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CodeResponse {
    pub code: String,
}
