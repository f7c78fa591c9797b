//! Supervisor to subagent relationships.
//!
//! A supervisor owns a set of agent ids one electoral level below its own.
//! [`SupervisorGraph::add_sub_agents`] checks the whole request before it
//! writes, then adds each member to the set as soon as its `supervisor_id`
//! is written. [`SupervisorGraph::deactivate`] refuses while either side
//! still names the agent, so no `supervisor_id` outlives its supervisor.

use crate::{
    auth::{types::SubAgentInput, AuthError},
    hierarchy::{ElectoralHierarchy, HierarchyCache},
    otp::OtpManager,
    store::{
        AgentId, AgentPatch, AgentRecord, AreaFilter, CreateOutcome, ElectoralArea, IdentityKey,
        NewAgent, PollStation, Store,
    },
};
use std::{collections::HashSet, fmt, sync::Arc};
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct SupervisorGraph {
    store: Arc<dyn Store>,
    hierarchy: Arc<HierarchyCache>,
    otp: OtpManager,
}

impl fmt::Debug for SupervisorGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorGraph")
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

/// Fields to set on an existing record so it joins `supervisor` at `level`.
/// Empty request values and values the record already has are skipped, and
/// existing identity keys are never replaced.
fn capture_patch(
    existing: &AgentRecord,
    supervisor: AgentId,
    level: &str,
    person: &NewAgent,
) -> AgentPatch {
    fn changed(current: Option<&String>, wanted: Option<&String>) -> Option<String> {
        wanted.filter(|value| Some(*value) != current).cloned()
    }

    AgentPatch {
        surname: changed(existing.surname.as_ref(), person.surname.as_ref()),
        other_names: changed(existing.other_names.as_ref(), person.other_names.as_ref()),
        email: person.email.clone().filter(|_| existing.email.is_none()),
        phone: person.phone.clone().filter(|_| existing.phone.is_none()),
        electoral_level: (existing.electoral_level.as_deref() != Some(level))
            .then(|| level.to_string()),
        supervisor_id: (existing.supervisor_id != Some(supervisor)).then_some(supervisor),
        ..AgentPatch::default()
    }
}

/// How one requested person joins the supervisor.
enum Placement {
    Create(NewAgent),
    Capture(AgentRecord, NewAgent),
}

impl SupervisorGraph {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, hierarchy: Arc<HierarchyCache>, otp: OtpManager) -> Self {
        Self {
            store,
            hierarchy,
            otp,
        }
    }

    /// Create or capture agents one level below `supervisor` and register them.
    ///
    /// Every entry is looked up and checked before anything is written, and
    /// each member joins the supervisor's set right after its record is
    /// written. Adding the same email or phone twice yields the same record.
    ///
    /// # Errors
    /// `InsufficientElectoralLevel` if the supervisor is at the bottom rank,
    /// has an unknown level, or a person already ranks at or above it.
    /// `OutsideSupervisorArea` if a person already belongs to another
    /// supervisor.
    #[instrument(skip(self, supervisor, people), fields(supervisor_id = %supervisor.id, count = people.len()))]
    pub async fn add_sub_agents(
        &self,
        supervisor: &AgentRecord,
        people: &[SubAgentInput],
    ) -> Result<Vec<AgentId>, AuthError> {
        let hierarchy = self.hierarchy.snapshot();
        let level = supervisor.electoral_level.as_deref().unwrap_or_default();
        let child_level = hierarchy
            .child_of(level)
            .ok_or(AuthError::InsufficientElectoralLevel)?
            .to_string();
        if people.is_empty() {
            return Err(AuthError::validation("at least one agent is required"));
        }

        let mut placements = Vec::with_capacity(people.len());
        for person in people {
            let (identity, surname, other_names) = person.validate()?;
            let person = NewAgent {
                email: identity.email,
                phone: identity.phone,
                surname,
                other_names,
                electoral_level: Some(child_level.clone()),
                supervisor_id: Some(supervisor.id),
            };
            match self.resolve(&hierarchy, supervisor, &person).await? {
                Some(existing) => placements.push(Placement::Capture(existing, person)),
                None => placements.push(Placement::Create(person)),
            }
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(placements.len());
        for placement in placements {
            let id = match placement {
                Placement::Create(person) => match self.store.create(&person).await? {
                    CreateOutcome::Created(record) => record.id,
                    // Repeated within this request or created concurrently.
                    CreateOutcome::Conflict => {
                        let existing = self
                            .resolve(&hierarchy, supervisor, &person)
                            .await?
                            .ok_or(AuthError::AccountNotFound)?;
                        self.capture(supervisor, &child_level, &existing, &person)
                            .await?
                    }
                },
                Placement::Capture(existing, person) => {
                    self.capture(supervisor, &child_level, &existing, &person)
                        .await?
                }
            };
            self.store.add_members(supervisor.id, &[id]).await?;
            if seen.insert(id) {
                ids.push(id);
            }
        }

        info!(added = ids.len(), "Subagents registered");
        Ok(ids)
    }

    /// The record `person` names, if any, checked for capture by `supervisor`.
    async fn resolve(
        &self,
        hierarchy: &ElectoralHierarchy,
        supervisor: &AgentRecord,
        person: &NewAgent,
    ) -> Result<Option<AgentRecord>, AuthError> {
        let by_email = match person.email.as_deref() {
            Some(email) => self.store.find_one(&IdentityKey::ByEmail(email.to_string())).await?,
            None => None,
        };
        let by_phone = match person.phone.as_deref() {
            Some(phone) => self.store.find_one(&IdentityKey::ByPhone(phone.to_string())).await?,
            None => None,
        };
        let existing = match (by_email, by_phone) {
            (Some(email), Some(phone)) if email.id != phone.id => {
                return Err(AuthError::validation(
                    "email and phone belong to different agents",
                ));
            }
            (Some(record), _) | (None, Some(record)) => record,
            (None, None) => return Ok(None),
        };

        if existing.id == supervisor.id {
            return Err(AuthError::validation("a supervisor cannot supervise itself"));
        }
        if existing
            .supervisor_id
            .is_some_and(|owner| owner != supervisor.id)
        {
            return Err(AuthError::OutsideSupervisorArea);
        }
        let supervisor_rank = supervisor
            .electoral_level
            .as_deref()
            .and_then(|level| hierarchy.rank_of(level));
        let existing_rank = existing
            .electoral_level
            .as_deref()
            .and_then(|level| hierarchy.rank_of(level));
        if let (Some(existing_rank), Some(supervisor_rank)) = (existing_rank, supervisor_rank) {
            if existing_rank <= supervisor_rank {
                return Err(AuthError::InsufficientElectoralLevel);
            }
        }
        if self.supervises_anyone(existing.id).await? {
            return Err(AuthError::validation(
                "agent already supervises other agents",
            ));
        }
        Ok(Some(existing))
    }

    async fn capture(
        &self,
        supervisor: &AgentRecord,
        child_level: &str,
        existing: &AgentRecord,
        person: &NewAgent,
    ) -> Result<AgentId, AuthError> {
        let patch = capture_patch(existing, supervisor.id, child_level, person);
        if !patch.is_empty() {
            self.store
                .update_one(&IdentityKey::ById(existing.id), &patch)
                .await?;
        }
        Ok(existing.id)
    }

    /// Whether any record is in the agent's member set or points at it.
    async fn supervises_anyone(&self, id: AgentId) -> Result<bool, AuthError> {
        Ok(!self.store.members(id).await?.is_empty()
            || self.store.count_supervised(id).await? > 0)
    }

    /// Records of every member. Stale ids are skipped.
    ///
    /// # Errors
    /// `Storage` on query failure.
    pub async fn list_sub_agents(
        &self,
        supervisor: &AgentRecord,
    ) -> Result<Vec<AgentRecord>, AuthError> {
        let mut records = Vec::new();
        for id in self.store.members(supervisor.id).await? {
            match self.store.find_by_id(id).await? {
                Some(record) if record.supervisor_id == Some(supervisor.id) => records.push(record),
                _ => warn!(supervisor_id = %supervisor.id, member = %id, "Skipping stale subagent"),
            }
        }
        Ok(records)
    }

    /// # Errors
    /// `OutsideSupervisorArea` unless `id` is one of the supervisor's members,
    /// `AccountNotFound` if the record is gone.
    pub async fn get_one_sub_agent(
        &self,
        supervisor: &AgentRecord,
        id: AgentId,
    ) -> Result<AgentRecord, AuthError> {
        if !self.store.is_member(supervisor.id, id).await? {
            return Err(AuthError::OutsideSupervisorArea);
        }
        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if record.supervisor_id != Some(supervisor.id) {
            return Err(AuthError::OutsideSupervisorArea);
        }
        Ok(record)
    }

    /// Issue a code on the subagent's record and hand it to the supervisor.
    ///
    /// # Errors
    /// Same as [`Self::get_one_sub_agent`].
    #[instrument(skip(self, supervisor), fields(supervisor_id = %supervisor.id))]
    pub async fn issue_sub_agent_code(
        &self,
        supervisor: &AgentRecord,
        id: AgentId,
    ) -> Result<String, AuthError> {
        let record = self.get_one_sub_agent(supervisor, id).await?;
        self.otp.issue(&record).await
    }

    /// Areas the agent may pick with [`Self::assign_electoral_area`].
    ///
    /// An agent without a supervisor chooses among every area at its own
    /// level. A subordinate chooses among the areas at its level directly
    /// under its supervisor's area.
    ///
    /// # Errors
    /// `Validation` if the supervisor has not picked an area yet.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn electoral_area_choices(
        &self,
        agent: &AgentRecord,
    ) -> Result<Vec<ElectoralArea>, AuthError> {
        let Some(level) = agent.electoral_level.as_deref() else {
            return Ok(Vec::new());
        };
        let Some(supervisor_id) = agent.supervisor_id else {
            return Ok(self
                .store
                .list_areas(&AreaFilter::Level(level.to_string()))
                .await?);
        };

        let parent = self
            .store
            .find_by_id(supervisor_id)
            .await?
            .and_then(|supervisor| supervisor.electoral_area_id)
            .ok_or_else(|| AuthError::validation("supervisor has not picked an electoral area"))?;
        let mut areas = self.store.list_areas(&AreaFilter::Parent(parent)).await?;
        areas.retain(|area| area.level == level);
        Ok(areas)
    }

    /// Areas the agent currently holds: its polling stations at the bottom
    /// rank, otherwise its electoral area. Ids with no area are skipped.
    ///
    /// # Errors
    /// `Storage` on query failure.
    pub async fn agent_electoral_areas(
        &self,
        agent: &AgentRecord,
    ) -> Result<Vec<ElectoralArea>, AuthError> {
        let ids: Vec<&String> = if agent.poll_stations.is_empty() {
            agent.electoral_area_id.iter().collect()
        } else {
            agent.poll_stations.keys().collect()
        };
        let mut areas = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.find_area(id).await? {
                Some(area) => areas.push(area),
                None => warn!(agent_id = %agent.id, area = %id, "Skipping unknown electoral area"),
            }
        }
        Ok(areas)
    }

    /// Record the agent's electoral area. Bottom-rank agents also get it as a
    /// polling station assignment.
    ///
    /// # Errors
    /// `Validation` for unknown areas or a level mismatch,
    /// `OutsideSupervisorArea` if a subordinate picks an area outside its
    /// supervisor's area.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn assign_electoral_area(
        &self,
        agent: &AgentRecord,
        area_id: &str,
    ) -> Result<AgentRecord, AuthError> {
        let area = self
            .store
            .find_area(area_id.trim())
            .await?
            .ok_or_else(|| AuthError::validation("unknown electoral area"))?;
        let level = agent.electoral_level.as_deref().unwrap_or_default();
        if area.level != level {
            return Err(AuthError::validation(
                "electoral area does not match the agent's level",
            ));
        }

        if let Some(supervisor_id) = agent.supervisor_id {
            let supervisor_area = self
                .store
                .find_by_id(supervisor_id)
                .await?
                .and_then(|supervisor| supervisor.electoral_area_id);
            if supervisor_area.is_none() || supervisor_area != area.parent_id {
                return Err(AuthError::OutsideSupervisorArea);
            }
        }

        let poll_station = self
            .hierarchy
            .snapshot()
            .is_bottom_rank(level)
            .then(|| PollStation {
                id: area.id.clone(),
                name: area.name.clone(),
            });
        let patch = AgentPatch {
            electoral_area_id: Some(area.id),
            electoral_area_name: Some(area.name),
            poll_station,
            ..AgentPatch::default()
        };
        self.store
            .find_one_and_update(&IdentityKey::ById(agent.id), &patch)
            .await?
            .ok_or(AuthError::AccountNotFound)
    }

    /// Deactivate one of the supervisor's members.
    ///
    /// # Errors
    /// Same as [`Self::get_one_sub_agent`] and [`Self::deactivate`].
    pub async fn deactivate_sub_agent(
        &self,
        supervisor: &AgentRecord,
        id: AgentId,
    ) -> Result<(), AuthError> {
        let record = self.get_one_sub_agent(supervisor, id).await?;
        self.deactivate(&record).await
    }

    /// Remove an agent: membership first, then sessions, then the record.
    ///
    /// # Errors
    /// `SubordinatesAssigned` while any record is in the agent's member set
    /// or names it as supervisor.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn deactivate(&self, agent: &AgentRecord) -> Result<(), AuthError> {
        if self.supervises_anyone(agent.id).await? {
            return Err(AuthError::SubordinatesAssigned);
        }
        if let Some(supervisor_id) = agent.supervisor_id {
            self.store.remove_member(supervisor_id, agent.id).await?;
        }
        let revoked = self.store.delete_agent_sessions(agent.id).await?;
        if !self.store.delete_one(&IdentityKey::ById(agent.id)).await? {
            return Err(AuthError::AccountNotFound);
        }
        info!(revoked, "Agent deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        hierarchy::ElectoralHierarchy,
        otp::OtpPolicy,
        store::{AreaDirectory, IdentityDirectory, MemoryStore, SupervisorStore},
    };
    use anyhow::Result;

    struct Fixture {
        store: Arc<MemoryStore>,
        graph: SupervisorGraph,
        region: AgentRecord,
    }

    async fn fixture() -> Result<Fixture> {
        let store = Arc::new(MemoryStore::new());
        let hierarchy = Arc::new(HierarchyCache::new(ElectoralHierarchy::new([
            "country",
            "region",
            "constituency",
            "pollingStation",
        ])?));
        let otp = OtpManager::new(
            store.clone(),
            OtpPolicy::new(),
            Arc::new(ManualClock::default()),
        );
        let graph = SupervisorGraph::new(store.clone(), hierarchy, otp);
        let region = AgentRecord {
            id: uuid::Uuid::now_v7(),
            email: Some("region@example.com".to_string()),
            email_confirmed: true,
            electoral_level: Some("region".to_string()),
            electoral_area_id: Some("r-1".to_string()),
            ..AgentRecord::default()
        };
        store.insert_record(region.clone()).await?;
        Ok(Fixture {
            store,
            graph,
            region,
        })
    }

    fn person(email: Option<&str>, phone: Option<&str>) -> SubAgentInput {
        SubAgentInput {
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            ..SubAgentInput::default()
        }
    }

    #[tokio::test]
    async fn adds_members_one_level_down() -> Result<()> {
        let f = fixture().await?;
        let ids = f
            .graph
            .add_sub_agents(
                &f.region,
                &[person(Some("c1@example.com"), None), person(None, Some("0201111111"))],
            )
            .await?;
        assert_eq!(ids.len(), 2);

        for id in &ids {
            let record = f.store.find_by_id(*id).await?.unwrap_or_default();
            assert_eq!(record.electoral_level.as_deref(), Some("constituency"));
            assert_eq!(record.supervisor_id, Some(f.region.id));
            assert!(f.store.is_member(f.region.id, *id).await?);
        }
        assert_eq!(f.graph.list_sub_agents(&f.region).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn same_identity_twice_is_one_record() -> Result<()> {
        let f = fixture().await?;
        let first = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0201111111"))])
            .await?;
        let second = f
            .graph
            .add_sub_agents(
                &f.region,
                &[SubAgentInput {
                    surname: Some("Mensah".to_string()),
                    ..person(None, Some("0201111111"))
                }],
            )
            .await?;
        assert_eq!(first, second);
        assert_eq!(f.store.members(f.region.id).await?.len(), 1);
        let record = f.store.find_by_id(first[0]).await?.unwrap_or_default();
        assert_eq!(record.surname.as_deref(), Some("Mensah"));
        Ok(())
    }

    #[tokio::test]
    async fn bottom_rank_cannot_supervise() -> Result<()> {
        let f = fixture().await?;
        let station = AgentRecord {
            id: uuid::Uuid::now_v7(),
            electoral_level: Some("pollingStation".to_string()),
            ..f.region.clone()
        };
        assert!(matches!(
            f.graph
                .add_sub_agents(&station, &[person(None, Some("0202222222"))])
                .await,
            Err(AuthError::InsufficientElectoralLevel)
        ));
        let unknown = AgentRecord {
            electoral_level: Some("district".to_string()),
            ..f.region.clone()
        };
        assert!(matches!(
            f.graph
                .add_sub_agents(&unknown, &[person(None, Some("0202222222"))])
                .await,
            Err(AuthError::InsufficientElectoralLevel)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn foreign_members_are_refused() -> Result<()> {
        let f = fixture().await?;
        let ids = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0203333333"))])
            .await?;

        let other = AgentRecord {
            id: uuid::Uuid::now_v7(),
            email: Some("other@example.com".to_string()),
            ..f.region.clone()
        };
        f.store.insert_record(other.clone()).await?;
        assert!(matches!(
            f.graph
                .add_sub_agents(&other, &[person(None, Some("0203333333"))])
                .await,
            Err(AuthError::OutsideSupervisorArea)
        ));
        assert!(matches!(
            f.graph.get_one_sub_agent(&other, ids[0]).await,
            Err(AuthError::OutsideSupervisorArea)
        ));
        assert!(matches!(
            f.graph.issue_sub_agent_code(&other, ids[0]).await,
            Err(AuthError::OutsideSupervisorArea)
        ));
        let code = f.graph.issue_sub_agent_code(&f.region, ids[0]).await?;
        assert_eq!(code.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_batch_writes_nothing() -> Result<()> {
        let f = fixture().await?;
        let owner = AgentRecord {
            id: uuid::Uuid::now_v7(),
            email: Some("owner@example.com".to_string()),
            ..f.region.clone()
        };
        f.store.insert_record(owner.clone()).await?;
        let owned = f
            .graph
            .add_sub_agents(&owner, &[person(None, Some("0209999999"))])
            .await?;

        assert!(matches!(
            f.graph
                .add_sub_agents(
                    &f.region,
                    &[person(None, Some("0201000000")), person(None, Some("0209999999"))],
                )
                .await,
            Err(AuthError::OutsideSupervisorArea)
        ));
        assert!(f
            .store
            .find_one(&IdentityKey::ByPhone("0201000000".to_string()))
            .await?
            .is_none());
        assert!(f.store.members(f.region.id).await?.is_empty());
        assert_eq!(f.store.count_supervised(f.region.id).await?, 0);
        let kept = f.store.find_by_id(owned[0]).await?.unwrap_or_default();
        assert_eq!(kept.supervisor_id, Some(owner.id));

        // The same request without the foreign member goes through.
        let ids = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0201000000"))])
            .await?;
        assert_eq!(f.graph.list_sub_agents(&f.region).await?.len(), 1);
        assert_eq!(f.graph.get_one_sub_agent(&f.region, ids[0]).await?.id, ids[0]);
        Ok(())
    }

    #[tokio::test]
    async fn higher_ranked_agents_are_not_captured() -> Result<()> {
        let f = fixture().await?;
        let boss = AgentRecord {
            id: uuid::Uuid::now_v7(),
            email: Some("boss@example.com".to_string()),
            electoral_level: Some("country".to_string()),
            ..AgentRecord::default()
        };
        let peer = AgentRecord {
            id: uuid::Uuid::now_v7(),
            email: Some("peer@example.com".to_string()),
            electoral_level: Some("region".to_string()),
            ..AgentRecord::default()
        };
        f.store.insert_record(boss.clone()).await?;
        f.store.insert_record(peer.clone()).await?;

        for email in ["boss@example.com", "peer@example.com"] {
            assert!(matches!(
                f.graph
                    .add_sub_agents(&f.region, &[person(Some(email), None)])
                    .await,
                Err(AuthError::InsufficientElectoralLevel)
            ));
        }
        assert_eq!(f.store.find_by_id(boss.id).await?, Some(boss));
        assert_eq!(f.store.find_by_id(peer.id).await?, Some(peer));

        // A pre-approved record below the supervisor is captured.
        let station = AgentRecord {
            id: uuid::Uuid::now_v7(),
            phone: Some("0207777777".to_string()),
            electoral_level: Some("pollingStation".to_string()),
            ..AgentRecord::default()
        };
        f.store.insert_record(station.clone()).await?;
        let ids = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0207777777"))])
            .await?;
        assert_eq!(ids, vec![station.id]);
        let captured = f.store.find_by_id(station.id).await?.unwrap_or_default();
        assert_eq!(captured.electoral_level.as_deref(), Some("constituency"));
        Ok(())
    }

    #[tokio::test]
    async fn split_identity_is_refused() -> Result<()> {
        let f = fixture().await?;
        f.graph
            .add_sub_agents(
                &f.region,
                &[person(Some("c1@example.com"), None), person(None, Some("0208888888"))],
            )
            .await?;
        assert!(matches!(
            f.graph
                .add_sub_agents(&f.region, &[person(Some("c1@example.com"), Some("0208888888"))])
                .await,
            Err(AuthError::Validation(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn deactivation_waits_for_records_naming_the_agent() -> Result<()> {
        let f = fixture().await?;
        let stray = AgentRecord {
            id: uuid::Uuid::now_v7(),
            phone: Some("0206060606".to_string()),
            supervisor_id: Some(f.region.id),
            electoral_level: Some("constituency".to_string()),
            ..AgentRecord::default()
        };
        f.store.insert_record(stray.clone()).await?;
        assert!(f.store.members(f.region.id).await?.is_empty());

        assert!(matches!(
            f.graph.deactivate(&f.region).await,
            Err(AuthError::SubordinatesAssigned)
        ));
        assert!(f.store.find_by_id(f.region.id).await?.is_some());

        // Re-adding the record repairs the member set.
        let ids = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0206060606"))])
            .await?;
        assert_eq!(ids, vec![stray.id]);
        assert!(f.store.is_member(f.region.id, stray.id).await?);
        Ok(())
    }

    async fn seed_areas(store: &MemoryStore) -> Result<()> {
        for (id, name, level, parent) in [
            ("r-1", "Greater Accra", "region", None),
            ("r-2", "Ashanti", "region", None),
            ("c-2", "Okaikwei", "constituency", Some("r-1")),
            ("c-1", "Ablekuma", "constituency", Some("r-1")),
            ("c-9", "Elsewhere", "constituency", Some("r-2")),
        ] {
            store
                .upsert_area(&ElectoralArea {
                    id: id.to_string(),
                    name: name.to_string(),
                    level: level.to_string(),
                    parent_id: parent.map(str::to_string),
                })
                .await?;
        }
        Ok(())
    }

    fn area_ids(areas: &[ElectoralArea]) -> Vec<&str> {
        areas.iter().map(|area| area.id.as_str()).collect()
    }

    #[tokio::test]
    async fn area_choices_follow_the_supervisor() -> Result<()> {
        let f = fixture().await?;
        seed_areas(&f.store).await?;

        let own = f.graph.electoral_area_choices(&f.region).await?;
        assert_eq!(area_ids(&own), vec!["r-2", "r-1"]);

        let ids = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0204040404"))])
            .await?;
        let member = f.store.find_by_id(ids[0]).await?.unwrap_or_default();
        let choices = f.graph.electoral_area_choices(&member).await?;
        assert_eq!(area_ids(&choices), vec!["c-1", "c-2"]);

        let unplaced = AgentRecord {
            id: uuid::Uuid::now_v7(),
            email: Some("unplaced@example.com".to_string()),
            electoral_level: Some("region".to_string()),
            ..AgentRecord::default()
        };
        f.store.insert_record(unplaced.clone()).await?;
        let ids = f
            .graph
            .add_sub_agents(&unplaced, &[person(None, Some("0205050505"))])
            .await?;
        let orphan = f.store.find_by_id(ids[0]).await?.unwrap_or_default();
        assert!(matches!(
            f.graph.electoral_area_choices(&orphan).await,
            Err(AuthError::Validation(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn agent_areas_come_from_assignments() -> Result<()> {
        let f = fixture().await?;
        seed_areas(&f.store).await?;
        assert_eq!(area_ids(&f.graph.agent_electoral_areas(&f.region).await?), vec!["r-1"]);

        let unassigned = AgentRecord {
            electoral_area_id: None,
            ..f.region.clone()
        };
        assert!(f.graph.agent_electoral_areas(&unassigned).await?.is_empty());

        let station = AgentRecord {
            poll_stations: [
                ("c-1", "Ablekuma"),
                ("gone", "Demolished"),
            ]
            .into_iter()
            .map(|(id, name)| {
                (
                    id.to_string(),
                    PollStation {
                        id: id.to_string(),
                        name: name.to_string(),
                    },
                )
            })
            .collect(),
            ..f.region.clone()
        };
        assert_eq!(area_ids(&f.graph.agent_electoral_areas(&station).await?), vec!["c-1"]);
        Ok(())
    }

    #[tokio::test]
    async fn area_must_sit_under_supervisor_area() -> Result<()> {
        let f = fixture().await?;
        f.store
            .upsert_area(&ElectoralArea {
                id: "c-1".to_string(),
                name: "Ablekuma".to_string(),
                level: "constituency".to_string(),
                parent_id: Some("r-1".to_string()),
            })
            .await?;
        f.store
            .upsert_area(&ElectoralArea {
                id: "c-9".to_string(),
                name: "Elsewhere".to_string(),
                level: "constituency".to_string(),
                parent_id: Some("r-9".to_string()),
            })
            .await?;
        let ids = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0204444444"))])
            .await?;
        let member = f.store.find_by_id(ids[0]).await?.unwrap_or_default();

        assert!(matches!(
            f.graph.assign_electoral_area(&member, "c-9").await,
            Err(AuthError::OutsideSupervisorArea)
        ));
        assert!(matches!(
            f.graph.assign_electoral_area(&member, "nowhere").await,
            Err(AuthError::Validation(_))
        ));
        let updated = f.graph.assign_electoral_area(&member, "c-1").await?;
        assert_eq!(updated.electoral_area_name.as_deref(), Some("Ablekuma"));
        assert!(updated.poll_stations.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn deactivation_cleans_up() -> Result<()> {
        let f = fixture().await?;
        let ids = f
            .graph
            .add_sub_agents(&f.region, &[person(None, Some("0205555555"))])
            .await?;
        let member = f.store.find_by_id(ids[0]).await?.unwrap_or_default();
        let grandchild = AgentRecord {
            id: uuid::Uuid::now_v7(),
            phone: Some("0206666666".to_string()),
            supervisor_id: Some(member.id),
            electoral_level: Some("pollingStation".to_string()),
            ..AgentRecord::default()
        };
        f.store.insert_record(grandchild.clone()).await?;
        f.store.add_members(member.id, &[grandchild.id]).await?;

        assert!(matches!(
            f.graph.deactivate_sub_agent(&f.region, member.id).await,
            Err(AuthError::SubordinatesAssigned)
        ));

        f.graph.deactivate(&grandchild).await?;
        f.graph.deactivate_sub_agent(&f.region, member.id).await?;
        assert!(f.store.find_by_id(member.id).await?.is_none());
        assert!(f.store.members(f.region.id).await?.is_empty());
        Ok(())
    }
}
