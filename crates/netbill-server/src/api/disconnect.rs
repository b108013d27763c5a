//! Forced disconnect endpoint

use super::App;
use crate::disconnect::NasSpec;
use crate::error::CoreError;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    pub username: String,
    #[serde(default)]
    pub sid: String,
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub nas_spec: NasSpec,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

pub async fn session(
    State(app): State<Arc<App>>,
    Json(request): Json<DisconnectRequest>,
) -> Result<Json<DisconnectResponse>, CoreError> {
    info!(
        username = %request.username,
        sid = %request.sid,
        ip = %request.ip,
        reason = ?request.reason,
        "Manual disconnect requested"
    );

    // A live session supplies NAS coordinates the caller may not have
    let nas_spec = if request.nas_spec.nas_ip.is_some() {
        request.nas_spec
    } else {
        app.sessions
            .find_by_ip(request.ip)
            .await
            .map(|s| s.nas_spec)
            .unwrap_or(request.nas_spec)
    };

    app.disconnect
        .disconnect_session(&request.username, &request.sid, request.ip, &nas_spec)
        .await?;
    Ok(Json(DisconnectResponse { success: true }))
}
