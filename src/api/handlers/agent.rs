use super::types::{AgentResponse, AreaAssignment};
use crate::{
    auth::{types::ProfileUpdate, AuthError, AuthState, ErrorBody, Strategy},
    store::ElectoralArea,
};
use axum::{extract::Extension, http::HeaderMap, response::Json};
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/v1/agent/me",
    responses(
        (status = 200, description = "Current agent", body = AgentResponse),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "agent"
)]
pub async fn me(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<AgentResponse>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::AnyAgent).await?;
    Ok(Json(AgentResponse::new(
        principal.agent,
        &auth_state.hierarchy().snapshot(),
    )))
}

#[utoipa::path(
    put,
    path = "/v1/agent/me",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile updated", body = AgentResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "agent"
)]
pub async fn update_me(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<AgentResponse>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::AnyAgent).await?;
    let agent = auth_state.update_profile(&principal.agent, &update).await?;
    Ok(Json(AgentResponse::new(
        agent,
        &auth_state.hierarchy().snapshot(),
    )))
}

#[utoipa::path(
    put,
    path = "/v1/agent/electoral-area",
    request_body = AreaAssignment,
    responses(
        (status = 200, description = "Electoral area recorded", body = AgentResponse),
        (status = 400, description = "Unknown area or level mismatch", body = ErrorBody),
        (status = 403, description = "Area is outside the supervisor's area", body = ErrorBody)
    ),
    tag = "agent"
)]
pub async fn assign_electoral_area(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(assignment): Json<AreaAssignment>,
) -> Result<Json<AgentResponse>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::AnyAgent).await?;
    let agent = auth_state
        .supervisors()
        .assign_electoral_area(&principal.agent, &assignment.area_id)
        .await?;
    Ok(Json(AgentResponse::new(
        agent,
        &auth_state.hierarchy().snapshot(),
    )))
}

#[utoipa::path(
    get,
    path = "/v1/agent/electoral-area/options",
    responses(
        (status = 200, description = "Areas the agent may pick", body = [ElectoralArea]),
        (status = 400, description = "Supervisor has not picked an area", body = ErrorBody),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "agent"
)]
pub async fn electoral_area_choices(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Vec<ElectoralArea>>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::AnyAgent).await?;
    let areas = auth_state
        .supervisors()
        .electoral_area_choices(&principal.agent)
        .await?;
    Ok(Json(areas))
}

#[utoipa::path(
    get,
    path = "/v1/agent/electoral-areas",
    responses(
        (status = 200, description = "Areas held by the agent", body = [ElectoralArea]),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "agent"
)]
pub async fn electoral_areas(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Vec<ElectoralArea>>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::AnyAgent).await?;
    let areas = auth_state
        .supervisors()
        .agent_electoral_areas(&principal.agent)
        .await?;
    Ok(Json(areas))
}

#[utoipa::path(
    get,
    path = "/v1/subagent/me",
    responses(
        (status = 200, description = "Current subagent", body = AgentResponse),
        (status = 401, description = "No active session", body = ErrorBody),
        (status = 403, description = "Agent is not at the bottom electoral level", body = ErrorBody)
    ),
    tag = "agent"
)]
pub async fn subagent_me(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<AgentResponse>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::SubAgent).await?;
    Ok(Json(AgentResponse::new(
        principal.agent,
        &auth_state.hierarchy().snapshot(),
    )))
}
