//! PostgreSQL store.
//!
//! Every statement runs inside a `db.query` span so traces show the SQL that
//! was executed. Identity lookups share one `target` CTE that resolves an
//! [`IdentityKey`] to a single row, preferring an email match over a phone
//! match when both are supplied.

use super::{
    AgentId, AgentPatch, AgentRecord, AreaDirectory, AreaFilter, CreateOutcome, ElectoralArea,
    IdentityDirectory, IdentityKey, LevelSource, NewAgent, NewSession, OtpEntry, Ping,
    PollStation, SessionClaim, SessionRecord, SessionStore, SupervisorStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Row,
};
use std::{collections::BTreeMap, time::Duration};
use tracing::{info, Instrument};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

/// Positional bind values for the shared `target` CTE.
struct KeyBinds<'a> {
    id: Option<Uuid>,
    email: Option<&'a str>,
    phone: Option<&'a str>,
}

impl<'a> From<&'a IdentityKey> for KeyBinds<'a> {
    fn from(key: &'a IdentityKey) -> Self {
        Self {
            id: match key {
                IdentityKey::ById(id) => Some(*id),
                _ => None,
            },
            email: key.email(),
            phone: key.phone(),
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn agent_from_row(row: &PgRow, otp_codes: Vec<OtpEntry>) -> Result<AgentRecord> {
    let stations: Json<BTreeMap<String, PollStation>> = row
        .try_get("poll_stations")
        .context("failed to decode poll_stations")?;
    Ok(AgentRecord {
        id: row.try_get("id")?,
        surname: row.try_get("surname")?,
        other_names: row.try_get("other_names")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password_hash")?,
        email_confirmed: row.try_get("email_confirmed")?,
        phone_confirmed: row.try_get("phone_confirmed")?,
        otp_codes,
        electoral_level: row.try_get("electoral_level")?,
        supervisor_id: row.try_get("supervisor_id")?,
        electoral_area_id: row.try_get("electoral_area_id")?,
        electoral_area_name: row.try_get("electoral_area_name")?,
        poll_stations: stations.0,
    })
}

fn area_from_row(row: &PgRow) -> Result<ElectoralArea> {
    Ok(ElectoralArea {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        level: row.try_get("level")?,
        parent_id: row.try_get("parent_id")?,
    })
}

fn otp_from_row(row: &PgRow) -> Result<OtpEntry> {
    Ok(OtpEntry {
        code: row.try_get("code")?,
        created_at: row.try_get("created_at")?,
    })
}

impl PgStore {
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the service's pool settings.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    /// Apply `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DDL",
            db.statement = "sql/schema.sql"
        );
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply schema")?;
        info!("Database schema is up to date");
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn otp_codes(&self, id: AgentId) -> Result<Vec<OtpEntry>> {
        let query = r"
            SELECT code, created_at
            FROM agent_otp_codes
            WHERE agent_id = $1
            ORDER BY created_at, id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load otp codes")?;
        rows.iter().map(otp_from_row).collect()
    }

    async fn hydrate(&self, row: Option<PgRow>) -> Result<Option<AgentRecord>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id: Uuid = row.try_get("id")?;
        let codes = self.otp_codes(id).await?;
        agent_from_row(&row, codes).map(Some)
    }

    async fn patch_agent(&self, key: &IdentityKey, patch: &AgentPatch) -> Result<Option<Uuid>> {
        let query = r"
            WITH target AS (
                SELECT id FROM poll_agents
                WHERE ($1::uuid IS NOT NULL AND id = $1)
                   OR ($2::text IS NOT NULL AND email = $2)
                   OR ($3::text IS NOT NULL AND phone = $3)
                ORDER BY (email = $2) IS TRUE DESC
                LIMIT 1
            )
            UPDATE poll_agents SET
                surname = COALESCE($4, surname),
                other_names = COALESCE($5, other_names),
                email = COALESCE($6, email),
                phone = COALESCE($7, phone),
                password_hash = COALESCE($8, password_hash),
                email_confirmed = COALESCE($9, email_confirmed),
                phone_confirmed = COALESCE($10, phone_confirmed),
                electoral_level = COALESCE($11, electoral_level),
                supervisor_id = COALESCE($12, supervisor_id),
                electoral_area_id = COALESCE($13, electoral_area_id),
                electoral_area_name = COALESCE($14, electoral_area_name),
                poll_stations = CASE
                    WHEN $15::jsonb IS NULL THEN poll_stations
                    ELSE poll_stations || $15::jsonb
                END,
                updated_at = NOW()
            FROM target
            WHERE poll_agents.id = target.id
            RETURNING poll_agents.id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let binds = KeyBinds::from(key);
        let station = match &patch.poll_station {
            Some(station) => {
                let mut entry = serde_json::Map::new();
                entry.insert(
                    station.id.clone(),
                    serde_json::to_value(station).context("failed to encode poll station")?,
                );
                Some(Json(serde_json::Value::Object(entry)))
            }
            None => None,
        };
        let row = sqlx::query(query)
            .bind(binds.id)
            .bind(binds.email)
            .bind(binds.phone)
            .bind(patch.surname.as_deref())
            .bind(patch.other_names.as_deref())
            .bind(patch.email.as_deref())
            .bind(patch.phone.as_deref())
            .bind(patch.password_hash.as_deref())
            .bind(patch.email_confirmed)
            .bind(patch.phone_confirmed)
            .bind(patch.electoral_level.as_deref())
            .bind(patch.supervisor_id)
            .bind(patch.electoral_area_id.as_deref())
            .bind(patch.electoral_area_name.as_deref())
            .bind(station)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to update agent")?;
        row.map(|row| row.try_get("id").context("failed to decode agent id"))
            .transpose()
    }
}

#[async_trait]
impl IdentityDirectory for PgStore {
    async fn find_one(&self, key: &IdentityKey) -> Result<Option<AgentRecord>> {
        let query = r"
            SELECT id, surname, other_names, email, phone, password_hash,
                   email_confirmed, phone_confirmed, electoral_level, supervisor_id,
                   electoral_area_id, electoral_area_name, poll_stations
            FROM poll_agents
            WHERE ($1::uuid IS NOT NULL AND id = $1)
               OR ($2::text IS NOT NULL AND email = $2)
               OR ($3::text IS NOT NULL AND phone = $3)
            ORDER BY (email = $2) IS TRUE DESC
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let binds = KeyBinds::from(key);
        let row = sqlx::query(query)
            .bind(binds.id)
            .bind(binds.email)
            .bind(binds.phone)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup agent")?;
        self.hydrate(row).await
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<AgentRecord>> {
        self.find_one(&IdentityKey::ById(id)).await
    }

    async fn update_one(&self, key: &IdentityKey, patch: &AgentPatch) -> Result<bool> {
        Ok(self.patch_agent(key, patch).await?.is_some())
    }

    async fn find_one_and_update(
        &self,
        key: &IdentityKey,
        patch: &AgentPatch,
    ) -> Result<Option<AgentRecord>> {
        match self.patch_agent(key, patch).await? {
            Some(id) => self.find_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn create(&self, agent: &NewAgent) -> Result<CreateOutcome> {
        let query = r"
            INSERT INTO poll_agents
                (id, email, phone, surname, other_names, electoral_level, supervisor_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, surname, other_names, email, phone, password_hash,
                      email_confirmed, phone_confirmed, electoral_level, supervisor_id,
                      electoral_area_id, electoral_area_name, poll_stations
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(agent.email.as_deref())
            .bind(agent.phone.as_deref())
            .bind(agent.surname.as_deref())
            .bind(agent.other_names.as_deref())
            .bind(agent.electoral_level.as_deref())
            .bind(agent.supervisor_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(row) => Ok(CreateOutcome::Created(agent_from_row(&row, Vec::new())?)),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert agent"),
        }
    }

    async fn delete_one(&self, key: &IdentityKey) -> Result<bool> {
        let query = r"
            WITH target AS (
                SELECT id FROM poll_agents
                WHERE ($1::uuid IS NOT NULL AND id = $1)
                   OR ($2::text IS NOT NULL AND email = $2)
                   OR ($3::text IS NOT NULL AND phone = $3)
                ORDER BY (email = $2) IS TRUE DESC
                LIMIT 1
            )
            DELETE FROM poll_agents
            USING target
            WHERE poll_agents.id = target.id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let binds = KeyBinds::from(key);
        let result = sqlx::query(query)
            .bind(binds.id)
            .bind(binds.email)
            .bind(binds.phone)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete agent")?;
        Ok(result.rows_affected() > 0)
    }

    async fn push_otp(
        &self,
        id: AgentId,
        entry: &OtpEntry,
        retain_after: DateTime<Utc>,
    ) -> Result<Option<Vec<OtpEntry>>> {
        // The row lock serializes concurrent issues for the same agent.
        let mut tx = self.pool.begin().await.context("begin otp transaction")?;

        let query = "SELECT id FROM poll_agents WHERE id = $1 FOR UPDATE";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let locked = sqlx::query(query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock agent")?;
        if locked.is_none() {
            // Dropping the transaction rolls it back.
            return Ok(None);
        }

        let query = "INSERT INTO agent_otp_codes (agent_id, code, created_at) VALUES ($1, $2, $3)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(&entry.code)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert otp code")?;

        let query = "DELETE FROM agent_otp_codes WHERE agent_id = $1 AND created_at < $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(retain_after)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to prune otp codes")?;

        let query = r"
            SELECT code, created_at
            FROM agent_otp_codes
            WHERE agent_id = $1
            ORDER BY created_at, id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(id)
            .fetch_all(&mut *tx)
            .instrument(span)
            .await
            .context("failed to load otp codes")?;

        tx.commit().await.context("commit otp transaction")?;

        rows.iter()
            .map(otp_from_row)
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    async fn remove_otp(&self, id: AgentId, code: &str) -> Result<()> {
        let query = "DELETE FROM agent_otp_codes WHERE agent_id = $1 AND code = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(code)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to remove otp code")?;
        Ok(())
    }
}

#[async_trait]
impl SupervisorStore for PgStore {
    async fn add_members(&self, supervisor: AgentId, members: &[AgentId]) -> Result<()> {
        let query = r"
            INSERT INTO supervisor_subagents (supervisor_id, subagent_id)
            SELECT $1, member FROM UNNEST($2::uuid[]) AS member
            ON CONFLICT DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(supervisor)
            .bind(members)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to add subagents")?;
        Ok(())
    }

    async fn members(&self, supervisor: AgentId) -> Result<Vec<AgentId>> {
        let query = r"
            SELECT subagent_id
            FROM supervisor_subagents
            WHERE supervisor_id = $1
            ORDER BY added_at, subagent_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(supervisor)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list subagents")?;
        rows.iter()
            .map(|row| row.try_get("subagent_id").context("failed to decode subagent id"))
            .collect()
    }

    async fn is_member(&self, supervisor: AgentId, member: AgentId) -> Result<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM supervisor_subagents
                WHERE supervisor_id = $1 AND subagent_id = $2
            ) AS member
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(supervisor)
            .bind(member)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check subagent membership")?;
        row.try_get("member").context("failed to decode membership")
    }

    async fn remove_member(&self, supervisor: AgentId, member: AgentId) -> Result<()> {
        let query = "DELETE FROM supervisor_subagents WHERE supervisor_id = $1 AND subagent_id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(supervisor)
            .bind(member)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to remove subagent")?;
        Ok(())
    }

    async fn count_supervised(&self, supervisor: AgentId) -> Result<u64> {
        let query = "SELECT COUNT(*) AS supervised FROM poll_agents WHERE supervisor_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(supervisor)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count supervised agents")?;
        let count: i64 = row
            .try_get("supervised")
            .context("failed to decode supervised count")?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &NewSession) -> Result<()> {
        let query = "DELETE FROM agent_sessions WHERE expires_at <= NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to prune expired sessions")?;

        let query = r"
            INSERT INTO agent_sessions (session_hash, agent_id, email, phone, expires_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&session.session_hash)
            .bind(session.agent_id)
            .bind(session.claim.email.as_deref())
            .bind(session.claim.phone.as_deref())
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn lookup_session(
        &self,
        session_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT agent_id, email, phone, created_at, expires_at
            FROM agent_sessions
            WHERE session_hash = $1
              AND expires_at > $2
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            let query = "DELETE FROM agent_sessions WHERE session_hash = $1 AND expires_at <= $2";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(session_hash)
                .bind(now)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to delete expired session")?;
            return Ok(None);
        };

        // Activity only; the expiry is never extended.
        let query = "UPDATE agent_sessions SET last_seen_at = $2 WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update session last_seen_at")?;

        Ok(Some(SessionRecord {
            agent_id: row.try_get("agent_id")?,
            claim: SessionClaim {
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
            },
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn delete_session(&self, session_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM agent_sessions WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn delete_agent_sessions(&self, agent: AgentId) -> Result<u64> {
        let query = "DELETE FROM agent_sessions WHERE agent_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(agent)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete agent sessions")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LevelSource for PgStore {
    async fn load_levels(&self) -> Result<Vec<String>> {
        let query = "SELECT name FROM electoral_levels ORDER BY rank";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load electoral levels")?;
        rows.iter()
            .map(|row| row.try_get("name").context("failed to decode level name"))
            .collect()
    }

    async fn save_levels(&self, levels: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin levels transaction")?;

        let query = "DELETE FROM electoral_levels";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to clear electoral levels")?;

        let query = "INSERT INTO electoral_levels (rank, name) VALUES ($1, $2)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        for (rank, name) in levels.iter().enumerate() {
            let rank = i32::try_from(rank).context("too many electoral levels")?;
            sqlx::query(query)
                .bind(rank)
                .bind(name)
                .execute(&mut *tx)
                .instrument(span.clone())
                .await
                .context("failed to insert electoral level")?;
        }

        tx.commit().await.context("commit levels transaction")?;
        Ok(())
    }
}

#[async_trait]
impl AreaDirectory for PgStore {
    async fn find_area(&self, id: &str) -> Result<Option<ElectoralArea>> {
        let query = "SELECT id, name, level, parent_id FROM electoral_areas WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup electoral area")?;
        row.as_ref().map(area_from_row).transpose()
    }

    async fn list_areas(&self, filter: &AreaFilter) -> Result<Vec<ElectoralArea>> {
        let (level, parent) = match filter {
            AreaFilter::Level(level) => (Some(level.as_str()), None),
            AreaFilter::Parent(parent) => (None, Some(parent.as_str())),
        };
        let query = r"
            SELECT id, name, level, parent_id
            FROM electoral_areas
            WHERE ($1::text IS NULL OR level = $1)
              AND ($2::text IS NULL OR parent_id = $2)
            ORDER BY name, id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(level)
            .bind(parent)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list electoral areas")?;
        rows.iter().map(area_from_row).collect()
    }

    async fn upsert_area(&self, area: &ElectoralArea) -> Result<()> {
        let query = r"
            INSERT INTO electoral_areas (id, name, level, parent_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                level = EXCLUDED.level,
                parent_id = EXCLUDED.parent_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&area.id)
            .bind(&area.name)
            .bind(&area.level)
            .bind(area.parent_id.as_deref())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert electoral area")?;
        Ok(())
    }
}

#[async_trait]
impl Ping for PgStore {
    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}
