//! End-to-end flows through the HTTP router against the in-memory store.
//!
//! Codes are read back from a `MemoryNotifier`; time is driven by a
//! `ManualClock` so expiry can be tested without sleeping.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::TimeDelta;
use http_body_util::BodyExt;
use pollgate::{
    api,
    auth::{AuthConfig, AuthState},
    clock::ManualClock,
    hierarchy::{ElectoralHierarchy, HierarchyCache},
    notify::MemoryNotifier,
    otp::OtpPolicy,
    store::{
        AgentRecord, AreaDirectory, ElectoralArea, IdentityDirectory, IdentityKey, MemoryStore,
    },
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const LEVELS: [&str; 4] = ["country", "region", "constituency", "pollingStation"];
const WINDOW_SECONDS: i64 = 600;

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    notifier: Arc<MemoryNotifier>,
    clock: Arc<ManualClock>,
}

struct Reply {
    status: StatusCode,
    cookie: Option<String>,
    body: Value,
}

impl Harness {
    fn new() -> Result<Self> {
        let store = Arc::new(MemoryStore::with_levels(LEVELS));
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::default());
        let hierarchy = Arc::new(HierarchyCache::new(ElectoralHierarchy::new(LEVELS)?));
        let config = AuthConfig::new(SecretString::from("k".repeat(48)))?.with_otp_policy(
            OtpPolicy::new().with_verify_window_seconds(WINDOW_SECONDS),
        );
        let state = Arc::new(AuthState::with_clock(
            config,
            store.clone(),
            hierarchy,
            notifier.clone(),
            clock.clone(),
        ));
        Ok(Self {
            app: api::router(state),
            store,
            notifier,
            clock,
        })
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Result<Reply> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_string);
        let bytes = response.into_body().collect().await?.to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(Reply {
            status,
            cookie,
            body,
        })
    }

    async fn post(&self, uri: &str, body: Value) -> Result<Reply> {
        self.call(Method::POST, uri, None, Some(body)).await
    }

    async fn get(&self, uri: &str, cookie: &str) -> Result<Reply> {
        self.call(Method::GET, uri, Some(cookie), None).await
    }

    /// Last code sent to `recipient`. Codes are the final word of the message.
    fn code_for(&self, recipient: &str) -> Result<String> {
        let message = self
            .notifier
            .last_to(recipient)
            .with_context(|| format!("no message sent to {recipient}"))?;
        message
            .text
            .split_whitespace()
            .last()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("empty message"))
    }

    /// Pre-approve an agent by email, then sign up and confirm over HTTP.
    async fn confirmed_agent(&self, email: &str, level: &str, area: &str) -> Result<String> {
        self.store
            .insert_record(AgentRecord {
                id: Uuid::now_v7(),
                email: Some(email.to_string()),
                electoral_level: Some(level.to_string()),
                electoral_area_id: Some(area.to_string()),
                ..AgentRecord::default()
            })
            .await?;

        let reply = self
            .post(
                "/v1/auth/signup",
                json!({"email": email, "password": "s3cret-pass"}),
            )
            .await?;
        assert_eq!(reply.status, StatusCode::ACCEPTED);

        let code = self.code_for(email)?;
        let reply = self
            .post(
                "/v1/auth/signup/confirm",
                json!({"email": email, "code": code}),
            )
            .await?;
        assert_eq!(reply.status, StatusCode::OK);
        reply.cookie.context("signup confirm did not set a cookie")
    }
}

#[tokio::test]
async fn phone_subagent_signup_is_relayed_through_supervisor() -> Result<()> {
    let h = Harness::new()?;
    let supervisor_cookie = h
        .confirmed_agent("const@example.com", "constituency", "c-1")
        .await?;
    let supervisor = h
        .store
        .find_one(&IdentityKey::ByEmail("const@example.com".to_string()))
        .await?
        .context("supervisor missing")?;

    h.store
        .insert_record(AgentRecord {
            id: Uuid::now_v7(),
            phone: Some("2335551234".to_string()),
            supervisor_id: Some(supervisor.id),
            electoral_level: Some("pollingStation".to_string()),
            ..AgentRecord::default()
        })
        .await?;

    let reply = h
        .post(
            "/v1/auth/signup",
            json!({"phone": "2335551234", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);

    let record = h
        .store
        .find_one(&IdentityKey::ByPhone("2335551234".to_string()))
        .await?
        .context("subagent missing")?;
    assert_eq!(record.otp_codes.len(), 1);

    // Phone-only subagents get the code through their supervisor's inbox.
    let code = h.code_for("const@example.com")?;
    assert_eq!(code.len(), 4);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    let reply = h
        .post(
            "/v1/auth/signup/confirm",
            json!({"phone": "2335551234", "code": code}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["phone_confirmed"], json!(true));
    assert_eq!(reply.body["role"], json!("sub_agent"));
    let subagent_cookie = reply.cookie.context("no session cookie")?;

    let reply = h.get("/v1/auth/session", &subagent_cookie).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["claim"], json!({"email": null, "phone": "2335551234"}));

    let reply = h.get("/v1/subagent/me", &subagent_cookie).await?;
    assert_eq!(reply.status, StatusCode::OK);

    // Bottom rank never passes the supervisor gate.
    let reply = h.get("/v1/supervisor/subagents", &subagent_cookie).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], json!("insufficient_electoral_level"));

    let reply = h.get("/v1/subagent/me", &supervisor_cookie).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn signup_code_expires_after_window() -> Result<()> {
    let h = Harness::new()?;
    h.store
        .insert_record(AgentRecord {
            id: Uuid::now_v7(),
            email: Some("late@example.com".to_string()),
            electoral_level: Some("region".to_string()),
            ..AgentRecord::default()
        })
        .await?;

    let reply = h
        .post(
            "/v1/auth/signup",
            json!({"email": "late@example.com", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    let code = h.code_for("late@example.com")?;
    assert_eq!(code.len(), 6);

    h.clock.advance(TimeDelta::seconds(WINDOW_SECONDS + 1));

    let reply = h
        .post(
            "/v1/auth/signup/confirm",
            json!({"email": "late@example.com", "code": code}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], json!("expired_code"));
    assert!(reply.cookie.is_none());

    let reply = h
        .post(
            "/v1/auth/signup/confirm",
            json!({"email": "late@example.com", "code": "abcdef"}),
        )
        .await?;
    assert_eq!(reply.body["error"], json!("wrong_code"));
    Ok(())
}

#[tokio::test]
async fn signup_requires_pre_approval() -> Result<()> {
    let h = Harness::new()?;
    let reply = h
        .post(
            "/v1/auth/signup",
            json!({"email": "stranger@example.com", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], json!("not_approved_signup"));

    let reply = h
        .post("/v1/auth/signup", json!({"password": "s3cret-pass"}))
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn top_supervisor_adds_members_one_level_down() -> Result<()> {
    let h = Harness::new()?;
    let cookie = h
        .confirmed_agent("chief@example.com", "country", "gh")
        .await?;

    let body = json!({"agents": [
        {"email": "north@example.com", "surname": "Mensah"},
        {"phone": "0244000001"},
    ]});
    let reply = h
        .call(
            Method::POST,
            "/v1/supervisor/subagents",
            Some(&cookie),
            Some(body.clone()),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    let ids = reply.body["ids"].as_array().cloned().unwrap_or_default();
    assert_eq!(ids.len(), 2);

    // Adding the same people again captures the existing records.
    let reply = h
        .call(
            Method::POST,
            "/v1/supervisor/subagents",
            Some(&cookie),
            Some(body),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["ids"].as_array().cloned().unwrap_or_default(), ids);

    let reply = h.get("/v1/supervisor/subagents", &cookie).await?;
    assert_eq!(reply.status, StatusCode::OK);
    let members = reply.body.as_array().cloned().unwrap_or_default();
    assert_eq!(members.len(), 2);
    for member in &members {
        assert_eq!(member["electoral_level"], json!("region"));
        assert_eq!(member["role"], json!("supervisor"));
        assert!(member.get("password_hash").is_none());
    }

    let id = ids[0].as_str().context("id is not a string")?;
    let reply = h
        .call(
            Method::POST,
            &format!("/v1/supervisor/subagents/{id}/code"),
            Some(&cookie),
            None,
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    let code = reply.body["code"].as_str().unwrap_or_default();
    assert_eq!(code.len(), 4);

    let reply = h
        .call(
            Method::DELETE,
            &format!("/v1/supervisor/subagents/{id}"),
            Some(&cookie),
            None,
        )
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reply = h
        .get(&format!("/v1/supervisor/subagents/{id}"), &cookie)
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], json!("outside_supervisor_area"));
    Ok(())
}

#[tokio::test]
async fn foreign_subagent_is_outside_area() -> Result<()> {
    let h = Harness::new()?;
    let first = h.confirmed_agent("r1@example.com", "region", "r-1").await?;
    let second = h.confirmed_agent("r2@example.com", "region", "r-2").await?;

    let reply = h
        .call(
            Method::POST,
            "/v1/supervisor/subagents",
            Some(&first),
            Some(json!({"agents": [{"phone": "0244000002"}]})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    let id = reply.body["ids"][0].as_str().unwrap_or_default().to_string();

    let reply = h
        .get(&format!("/v1/supervisor/subagents/{id}"), &second)
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = h
        .call(
            Method::POST,
            "/v1/supervisor/subagents",
            Some(&second),
            Some(json!({"agents": [{"phone": "0244000003"}, {"phone": "0244000002"}]})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], json!("outside_supervisor_area"));

    // The refused request left no half-registered member behind.
    assert!(h
        .store
        .find_one(&IdentityKey::ByPhone("0244000003".to_string()))
        .await?
        .is_none());
    let reply = h.get("/v1/supervisor/subagents", &second).await?;
    assert_eq!(reply.body, json!([]));
    Ok(())
}

#[tokio::test]
async fn login_reset_and_logout() -> Result<()> {
    let h = Harness::new()?;
    let signup_cookie = h
        .confirmed_agent("agent@example.com", "region", "r-1")
        .await?;

    let reply = h
        .post(
            "/v1/auth/login",
            json!({"email": "agent@example.com", "password": "wrong-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], json!("wrong_credentials"));

    let reply = h
        .post(
            "/v1/auth/login",
            json!({"email": "agent@example.com", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    let code = h.code_for("agent@example.com")?;
    let reply = h
        .post(
            "/v1/auth/login/confirm",
            json!({"email": "agent@example.com", "code": code}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    let login_cookie = reply.cookie.context("no session cookie")?;

    let reply = h
        .call(Method::POST, "/v1/auth/logout", Some(&login_cookie), None)
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(
        h.get("/v1/auth/session", &login_cookie).await?.status,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        h.get("/v1/agent/me", &signup_cookie).await?.status,
        StatusCode::OK
    );

    let reply = h
        .post(
            "/v1/auth/password/reset",
            json!({"email": "agent@example.com"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    let code = h.code_for("agent@example.com")?;
    let reply = h
        .post(
            "/v1/auth/password/reset/confirm",
            json!({"email": "agent@example.com", "code": code, "password": "n3w-secret"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    // Reset revokes every session.
    let reply = h.get("/v1/agent/me", &signup_cookie).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = h
        .post(
            "/v1/auth/login",
            json!({"email": "agent@example.com", "password": "n3w-secret"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    Ok(())
}

#[tokio::test]
async fn profile_update_and_health() -> Result<()> {
    let h = Harness::new()?;
    let cookie = h
        .confirmed_agent("named@example.com", "region", "r-1")
        .await?;

    let reply = h
        .call(
            Method::PUT,
            "/v1/agent/me",
            Some(&cookie),
            Some(json!({"surname": "Owusu", "other_names": "Ama"})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["surname"], json!("Owusu"));
    assert_eq!(reply.body["other_names"], json!("Ama"));

    let reply = h
        .call(Method::PUT, "/v1/agent/me", Some(&cookie), Some(json!({})))
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = h.call(Method::GET, "/health", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["database"], json!("ok"));
    Ok(())
}

#[tokio::test]
async fn requests_without_session_are_rejected() -> Result<()> {
    let h = Harness::new()?;
    let reply = h.call(Method::GET, "/v1/agent/me", None, None).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], json!("unauthenticated"));

    let reply = h
        .get("/v1/agent/me", "pollagent=forged.signature")
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = h.call(Method::GET, "/v1/auth/session", None, None).await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn member_resends_code_and_picks_area() -> Result<()> {
    let h = Harness::new()?;
    let supervisor = h.confirmed_agent("r1@example.com", "region", "r-1").await?;
    for (id, parent) in [("c-1", "r-1"), ("c-9", "r-2")] {
        h.store
            .upsert_area(&ElectoralArea {
                id: id.to_string(),
                name: format!("Constituency {id}"),
                level: "constituency".to_string(),
                parent_id: Some(parent.to_string()),
            })
            .await?;
    }

    let reply = h
        .call(
            Method::POST,
            "/v1/supervisor/subagents",
            Some(&supervisor),
            Some(json!({"agents": [{"email": "member@example.com"}]})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);

    // Nothing to resend before signup has started.
    let reply = h
        .post("/v1/auth/code/resend", json!({"email": "member@example.com"}))
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = h
        .post(
            "/v1/auth/signup",
            json!({"email": "member@example.com", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);

    let reply = h
        .post("/v1/auth/code/resend", json!({"email": "member@example.com"}))
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert_eq!(
        h.notifier
            .sent()
            .iter()
            .filter(|message| message.recipient == "member@example.com")
            .count(),
        2
    );

    let code = h.code_for("member@example.com")?;
    let reply = h
        .post(
            "/v1/auth/signup/confirm",
            json!({"email": "member@example.com", "code": code}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    let member = reply.cookie.context("no session cookie")?;

    // Only areas under the supervisor's area are offered.
    let reply = h.get("/v1/agent/electoral-area/options", &member).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!([{
        "id": "c-1",
        "name": "Constituency c-1",
        "level": "constituency",
        "parent_id": "r-1"
    }]));
    let reply = h.get("/v1/agent/electoral-areas", &member).await?;
    assert_eq!(reply.body, json!([]));

    let reply = h
        .call(
            Method::PUT,
            "/v1/agent/electoral-area",
            Some(&member),
            Some(json!({"area_id": "c-9"})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], json!("outside_supervisor_area"));

    let reply = h
        .call(
            Method::PUT,
            "/v1/agent/electoral-area",
            Some(&member),
            Some(json!({"area_id": "c-1"})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["electoral_area_id"], json!("c-1"));
    assert_eq!(reply.body["electoral_area_name"], json!("Constituency c-1"));

    let reply = h.get("/v1/agent/electoral-areas", &member).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body[0]["id"], json!("c-1"));

    let reply = h
        .call(Method::POST, "/v1/auth/logout/all", Some(&member), None)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["revoked"], json!(1));
    assert_eq!(
        h.get("/v1/agent/me", &member).await?.status,
        StatusCode::UNAUTHORIZED
    );
    Ok(())
}

#[tokio::test]
async fn rejected_delivery_is_reported() -> Result<()> {
    let h = Harness::new()?;
    h.store
        .insert_record(AgentRecord {
            id: Uuid::now_v7(),
            email: Some("bounce@example.com".to_string()),
            electoral_level: Some("region".to_string()),
            ..AgentRecord::default()
        })
        .await?;

    h.notifier.set_rejecting(true);
    let reply = h
        .post(
            "/v1/auth/signup",
            json!({"email": "bounce@example.com", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body["error"], json!("delivery_failure"));
    assert!(reply.cookie.is_none());

    // Once the relay accepts again a resend completes the signup.
    h.notifier.set_rejecting(false);
    let reply = h
        .post("/v1/auth/code/resend", json!({"email": "bounce@example.com"}))
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    let code = h.code_for("bounce@example.com")?;
    let reply = h
        .post(
            "/v1/auth/signup/confirm",
            json!({"email": "bounce@example.com", "code": code}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::OK);

    h.notifier.set_rejecting(true);
    let reply = h
        .post(
            "/v1/auth/login",
            json!({"email": "bounce@example.com", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body["error"], json!("delivery_failure"));
    Ok(())
}

#[tokio::test]
async fn phone_subagent_needs_a_supervisor_inbox() -> Result<()> {
    let h = Harness::new()?;
    let supervisor = AgentRecord {
        id: Uuid::now_v7(),
        phone: Some("2335550000".to_string()),
        phone_confirmed: true,
        electoral_level: Some("constituency".to_string()),
        ..AgentRecord::default()
    };
    h.store.insert_record(supervisor.clone()).await?;
    h.store
        .insert_record(AgentRecord {
            id: Uuid::now_v7(),
            phone: Some("2335550001".to_string()),
            supervisor_id: Some(supervisor.id),
            electoral_level: Some("pollingStation".to_string()),
            ..AgentRecord::default()
        })
        .await?;

    let reply = h
        .post(
            "/v1/auth/signup",
            json!({"phone": "2335550001", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body["error"], json!("delivery_failure"));
    assert!(h.notifier.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn phone_agent_without_supervisor_cannot_receive_codes() -> Result<()> {
    let h = Harness::new()?;
    h.store
        .insert_record(AgentRecord {
            id: Uuid::now_v7(),
            phone: Some("2335550002".to_string()),
            electoral_level: Some("pollingStation".to_string()),
            ..AgentRecord::default()
        })
        .await?;

    let reply = h
        .post(
            "/v1/auth/signup",
            json!({"phone": "2335550002", "password": "s3cret-pass"}),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body["error"], json!("delivery_failure"));
    assert!(h.notifier.sent().is_empty());
    Ok(())
}
