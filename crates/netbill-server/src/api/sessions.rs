//! Session lifecycle and query endpoints

use super::App;
use crate::error::CoreError;
use crate::netflow::{DispatchSummary, FlowRecord};
use crate::session::{PrepareContext, Session, SessionStats};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub uuid: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    pub uuid: Uuid,
    #[serde(flatten)]
    pub context: PrepareContext,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub username: String,
    pub sid: String,
    #[serde(default)]
    pub cid: String,
    pub ip: Ipv4Addr,
}

#[derive(Debug, Deserialize)]
pub struct SidRequest {
    pub sid: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpireRequest {
    pub uuid: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

/// One flow or a batch under a `flows` key
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NetflowRequest {
    Batch { flows: Vec<FlowRecord> },
    Single(FlowRecord),
}

pub async fn init(
    State(app): State<Arc<App>>,
    Json(request): Json<InitRequest>,
) -> Result<Json<InitResponse>, CoreError> {
    let uuid = app.sessions.init_session(&request.username).await?;
    Ok(Json(InitResponse { uuid }))
}

pub async fn prepare(
    State(app): State<Arc<App>>,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<AckResponse>, CoreError> {
    app.sessions
        .prepare_session(request.uuid, request.context)
        .await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn start(
    State(app): State<Arc<App>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<InitResponse>, CoreError> {
    let uuid = app
        .sessions
        .start_session(&request.username, &request.sid, &request.cid, request.ip)
        .await?;
    Ok(Json(InitResponse { uuid }))
}

pub async fn interim(
    State(app): State<Arc<App>>,
    Json(request): Json<SidRequest>,
) -> Result<Json<AckResponse>, CoreError> {
    app.sessions.interim_update(&request.sid).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn stop(
    State(app): State<Arc<App>>,
    Json(request): Json<SidRequest>,
) -> Result<Json<AckResponse>, CoreError> {
    app.sessions.stop_session(&request.sid).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn expire(
    State(app): State<Arc<App>>,
    Json(request): Json<ExpireRequest>,
) -> Result<Json<AckResponse>, CoreError> {
    app.sessions.expire_session(request.uuid).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn netflow(
    State(app): State<Arc<App>>,
    Json(request): Json<NetflowRequest>,
) -> Result<Json<DispatchSummary>, CoreError> {
    let summary = match request {
        NetflowRequest::Single(record) => app.netflow.dispatch_batch(&[record]).await?,
        NetflowRequest::Batch { flows } => app.netflow.dispatch_batch(&flows).await?,
    };
    Ok(Json(summary))
}

pub async fn list(State(app): State<Arc<App>>) -> Json<Vec<Session>> {
    Json(app.sessions.list_sessions().await)
}

pub async fn stats(State(app): State<Arc<App>>) -> Json<SessionStats> {
    Json(app.sessions.stats().await)
}

pub async fn by_ip(
    State(app): State<Arc<App>>,
    Path(ip): Path<String>,
) -> Result<Json<Session>, CoreError> {
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| CoreError::Input(format!("invalid IP address: {}", ip)))?;
    app.sessions
        .find_by_ip(ip)
        .await
        .map(Json)
        .ok_or_else(|| CoreError::NotFound(format!("session for IP {}", ip)))
}

pub async fn by_username(
    State(app): State<Arc<App>>,
    Path(username): Path<String>,
) -> Result<Json<Session>, CoreError> {
    app.sessions
        .find_by_username(&username)
        .await
        .map(Json)
        .ok_or_else(|| CoreError::NotFound(format!("session for user {}", username)))
}

pub async fn by_sid(
    State(app): State<Arc<App>>,
    Path(sid): Path<String>,
) -> Result<Json<Session>, CoreError> {
    app.sessions
        .find_by_sid(&sid)
        .await
        .map(Json)
        .ok_or_else(|| CoreError::NotFound(format!("session for SID {}", sid)))
}
