//! Supervisor-only endpoints. Every handler admits the caller with
//! [`Strategy::Supervisor`] first.

use super::types::{AgentResponse, CodeResponse, SubAgentsCreated, SubAgentsRequest};
use crate::auth::{AuthError, AuthState, ErrorBody, Strategy};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/v1/supervisor/subagents",
    request_body = SubAgentsRequest,
    responses(
        (status = 201, description = "Subagents created or captured", body = SubAgentsCreated),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Not a supervisor, or agent belongs to another supervisor", body = ErrorBody)
    ),
    tag = "supervisor"
)]
pub async fn add_sub_agents(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SubAgentsRequest>,
) -> Result<(StatusCode, Json<SubAgentsCreated>), AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::Supervisor).await?;
    let ids = auth_state
        .supervisors()
        .add_sub_agents(&principal.agent, &request.agents)
        .await?;
    Ok((StatusCode::CREATED, Json(SubAgentsCreated { ids })))
}

#[utoipa::path(
    get,
    path = "/v1/supervisor/subagents",
    responses(
        (status = 200, description = "Subagents of the current supervisor", body = [AgentResponse]),
        (status = 403, description = "Not a supervisor", body = ErrorBody)
    ),
    tag = "supervisor"
)]
pub async fn list_sub_agents(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Vec<AgentResponse>>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::Supervisor).await?;
    let hierarchy = auth_state.hierarchy().snapshot();
    let records = auth_state
        .supervisors()
        .list_sub_agents(&principal.agent)
        .await?;
    Ok(Json(
        records
            .into_iter()
            .map(|record| AgentResponse::new(record, &hierarchy))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/supervisor/subagents/{id}",
    params(("id" = Uuid, Path, description = "Subagent id")),
    responses(
        (status = 200, description = "Subagent", body = AgentResponse),
        (status = 403, description = "Not one of the supervisor's subagents", body = ErrorBody)
    ),
    tag = "supervisor"
)]
pub async fn get_sub_agent(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgentResponse>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::Supervisor).await?;
    let record = auth_state
        .supervisors()
        .get_one_sub_agent(&principal.agent, id)
        .await?;
    Ok(Json(AgentResponse::new(
        record,
        &auth_state.hierarchy().snapshot(),
    )))
}

#[utoipa::path(
    post,
    path = "/v1/supervisor/subagents/{id}/code",
    params(("id" = Uuid, Path, description = "Subagent id")),
    responses(
        (status = 200, description = "Code issued for relay to the subagent", body = CodeResponse),
        (status = 403, description = "Not one of the supervisor's subagents", body = ErrorBody)
    ),
    tag = "supervisor"
)]
pub async fn issue_sub_agent_code(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CodeResponse>, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::Supervisor).await?;
    let code = auth_state
        .supervisors()
        .issue_sub_agent_code(&principal.agent, id)
        .await?;
    Ok(Json(CodeResponse { code }))
}

#[utoipa::path(
    delete,
    path = "/v1/supervisor/subagents/{id}",
    params(("id" = Uuid, Path, description = "Subagent id")),
    responses(
        (status = 204, description = "Subagent deactivated"),
        (status = 403, description = "Not one of the supervisor's subagents", body = ErrorBody),
        (status = 409, description = "Subagent still supervises other agents", body = ErrorBody)
    ),
    tag = "supervisor"
)]
pub async fn deactivate_sub_agent(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::Supervisor).await?;
    auth_state
        .supervisors()
        .deactivate_sub_agent(&principal.agent, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
