//! Session registry REST endpoints.
//!
//! The teacher UI calls `POST /session/generate` to get a code (plus the
//! controller token it must present on join); the student UI calls
//! `POST /session/validate` to reject typos before opening a websocket.

use axum::Json;
use axum::extract::State;
use protocol::SessionCode;
use serde::{Deserialize, Serialize};

use crate::services::registry;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub session_code: String,
    pub controller_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub session_code: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /session/generate` — issue a fresh code and create the session.
pub async fn generate(State(state): State<AppState>) -> Json<GenerateResponse> {
    let issued = registry::issue_session(&state).await;
    Json(GenerateResponse {
        session_code: issued.code.to_string(),
        controller_token: issued.controller_token,
    })
}

/// `POST /session/validate` — check a student-entered code.
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Json<ValidateResponse> {
    let Ok(code) = SessionCode::parse(&request.session_code) else {
        return Json(ValidateResponse {
            success: false,
            error: Some("Invalid session code".into()),
        });
    };

    if registry::validate(&state, &code).await {
        Json(ValidateResponse { success: true, error: None })
    } else {
        Json(ValidateResponse { success: false, error: Some("Invalid session code".into()) })
    }
}

#[cfg(test)]
#[path = "sessions_test.rs"]
mod tests;
