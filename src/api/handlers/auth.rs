//! Signup, login, reset and session endpoints.
//!
//! Handlers validate nothing themselves; they hand the body to the matching
//! `AuthState` flow and turn the outcome into a response. Confirmation
//! endpoints set the `pollagent` cookie.

use super::types::{AgentResponse, LogoutAllResponse, SessionResponse};
use crate::auth::{
    session::{clear_session_cookie, extract_session_cookie, session_cookie},
    types::{
        CodeConfirmation, Credentials, IdentityInput, MessageResponse, PasswordResetConfirmation,
    },
    AuthError, AuthState, ErrorBody, IssuedSession, Strategy,
};
use anyhow::Context;
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;

fn session_response(
    auth_state: &AuthState,
    issued: IssuedSession,
) -> Result<Response, AuthError> {
    let cookie = session_cookie(auth_state.config(), &issued.cookie_value)
        .context("Failed to build session cookie")?;
    let body = AgentResponse::new(issued.agent, &auth_state.hierarchy().snapshot());
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

fn accepted(message: &str) -> Response {
    (StatusCode::ACCEPTED, Json(MessageResponse::new(message))).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = Credentials,
    responses(
        (status = 202, description = "Password set, signup code sent", body = MessageResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Identity was not pre-approved", body = ErrorBody),
        (status = 409, description = "Account already exists", body = ErrorBody),
        (status = 502, description = "Code delivery failed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn signup(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<Credentials>,
) -> Result<Response, AuthError> {
    auth_state.signup(&request).await?;
    Ok(accepted("Signup code sent"))
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup/confirm",
    request_body = CodeConfirmation,
    responses(
        (status = 200, description = "Signup confirmed, session cookie set", body = AgentResponse),
        (status = 401, description = "Unknown account or bad code", body = ErrorBody),
        (status = 409, description = "Account already exists", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn signup_confirm(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<CodeConfirmation>,
) -> Result<Response, AuthError> {
    let issued = auth_state.signup_confirm(&request).await?;
    session_response(&auth_state, issued)
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = Credentials,
    responses(
        (status = 202, description = "Password accepted, login code sent", body = MessageResponse),
        (status = 401, description = "Unknown account or wrong password", body = ErrorBody),
        (status = 502, description = "Code delivery failed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<Credentials>,
) -> Result<Response, AuthError> {
    auth_state.login(&request).await?;
    Ok(accepted("Login code sent"))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/confirm",
    request_body = CodeConfirmation,
    responses(
        (status = 200, description = "Login confirmed, session cookie set", body = AgentResponse),
        (status = 401, description = "Unknown account or bad code", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login_confirm(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<CodeConfirmation>,
) -> Result<Response, AuthError> {
    let issued = auth_state.login_confirm(&request).await?;
    session_response(&auth_state, issued)
}

#[utoipa::path(
    post,
    path = "/v1/auth/code/resend",
    request_body = IdentityInput,
    responses(
        (status = 202, description = "New code sent", body = MessageResponse),
        (status = 401, description = "Unknown account", body = ErrorBody),
        (status = 502, description = "Code delivery failed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_code(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<IdentityInput>,
) -> Result<Response, AuthError> {
    auth_state.resend_code(&request).await?;
    Ok(accepted("Code sent"))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = IdentityInput,
    responses(
        (status = 202, description = "Reset code sent", body = MessageResponse),
        (status = 401, description = "Unknown account", body = ErrorBody),
        (status = 502, description = "Code delivery failed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn password_reset(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<IdentityInput>,
) -> Result<Response, AuthError> {
    auth_state.password_reset(&request).await?;
    Ok(accepted("Password reset code sent"))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset/confirm",
    request_body = PasswordResetConfirmation,
    responses(
        (status = 204, description = "Password replaced, all sessions revoked"),
        (status = 401, description = "Unknown account or bad code", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn password_reset_confirm(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<PasswordResetConfirmation>,
) -> Result<StatusCode, AuthError> {
    auth_state.password_reset_confirm(&request).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    // Missing or stale sessions are "no session" to avoid leaking auth state.
    match auth_state.authorize(&headers, Strategy::AnyAgent).await {
        Ok(principal) => {
            let response = SessionResponse {
                agent: AgentResponse::new(principal.agent, &auth_state.hierarchy().snapshot()),
                claim: principal.claim,
            };
            Ok((StatusCode::OK, Json(response)).into_response())
        }
        Err(err @ AuthError::Storage(_)) => Err(err),
        Err(_) => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    if let Some(cookie_value) = extract_session_cookie(&headers) {
        if let Err(err) = auth_state.sessions().revoke(&cookie_value).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout/all",
    responses(
        (status = 200, description = "Every session of the agent revoked", body = LogoutAllResponse),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout_all(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let principal = auth_state.authorize(&headers, Strategy::AnyAgent).await?;
    let revoked = auth_state.sessions().revoke_all(principal.agent.id).await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        StatusCode::OK,
        response_headers,
        Json(LogoutAllResponse { revoked }),
    )
        .into_response())
}
