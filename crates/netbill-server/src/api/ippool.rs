//! IP pool endpoints

use super::App;
use crate::error::CoreError;
use crate::ippool::{PoolEntry, PoolStats};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub ip: Ipv4Addr,
}

#[derive(Debug, Serialize)]
pub struct PoolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PoolResponse {
    fn ok() -> Self {
        PoolResponse {
            success: true,
            ip: None,
            pool: None,
            error: None,
        }
    }

    fn failure(err: &CoreError) -> (StatusCode, Json<Self>) {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(PoolResponse {
                success: false,
                ip: None,
                pool: None,
                error: Some(err.kind().to_string()),
            }),
        )
    }
}

pub async fn lease(State(app): State<Arc<App>>, Json(request): Json<LeaseRequest>) -> Response {
    debug!(pool = %request.pool, username = ?request.username, sid = ?request.sid, "Lease request");
    match app.ippool.lease(&request.pool).await {
        Ok((ip, pool)) => Json(PoolResponse {
            success: true,
            ip: Some(ip),
            pool: Some(pool),
            error: None,
        })
        .into_response(),
        Err(e) => PoolResponse::failure(&e).into_response(),
    }
}

pub async fn renew(State(app): State<Arc<App>>, Json(request): Json<AddressRequest>) -> Response {
    match app.ippool.renew(request.ip).await {
        Ok(()) => Json(PoolResponse::ok()).into_response(),
        Err(e) => PoolResponse::failure(&e).into_response(),
    }
}

/// Idempotent: releasing an unknown or already free address succeeds
pub async fn release(State(app): State<Arc<App>>, Json(request): Json<AddressRequest>) -> Response {
    match app.ippool.release(request.ip).await {
        Ok(()) => Json(PoolResponse::ok()).into_response(),
        Err(e) => PoolResponse::failure(&e).into_response(),
    }
}

pub async fn info(State(app): State<Arc<App>>) -> Result<Json<Vec<PoolEntry>>, CoreError> {
    Ok(Json(app.ippool.info().await?))
}

pub async fn stats_all(State(app): State<Arc<App>>) -> Result<Json<Vec<PoolStats>>, CoreError> {
    Ok(Json(app.ippool.stats(None).await?))
}

pub async fn stats_pool(
    State(app): State<Arc<App>>,
    Path(pool): Path<String>,
) -> Result<Json<Vec<PoolStats>>, CoreError> {
    Ok(Json(app.ippool.stats(Some(&pool)).await?))
}
