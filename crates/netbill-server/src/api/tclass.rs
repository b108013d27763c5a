//! Traffic classification endpoints

use super::App;
use crate::config::ClassConfig;
use crate::error::CoreError;
use crate::tclass::{ClassificationResult, TreeStats};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ClassifyManyRequest {
    pub ips: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyManyResponse {
    pub results: Vec<ClassificationResult>,
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub classes: Vec<ClassConfig>,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

pub async fn classify_one(
    State(app): State<Arc<App>>,
    Path(ip): Path<String>,
) -> Result<Json<ClassificationResult>, CoreError> {
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| CoreError::Input(format!("invalid IP address: {}", ip)))?;
    Ok(Json(app.tclass.classify_detailed(ip).await))
}

pub async fn classify_many(
    State(app): State<Arc<App>>,
    Json(request): Json<ClassifyManyRequest>,
) -> Result<Json<ClassifyManyResponse>, CoreError> {
    let mut results = Vec::with_capacity(request.ips.len());
    for text in &request.ips {
        let ip: Ipv4Addr = text
            .parse()
            .map_err(|_| CoreError::Input(format!("invalid IP address: {}", text)))?;
        results.push(app.tclass.classify_detailed(ip).await);
    }
    Ok(Json(ClassifyManyResponse { results }))
}

pub async fn list(State(app): State<Arc<App>>) -> Json<Vec<ClassConfig>> {
    Json(app.tclass.classes().await)
}

pub async fn add(
    State(app): State<Arc<App>>,
    Json(class): Json<ClassConfig>,
) -> Result<Json<AckResponse>, CoreError> {
    app.tclass.add_class(class).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn remove(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> Result<Json<AckResponse>, CoreError> {
    app.tclass.remove_class(&name).await?;
    Ok(Json(AckResponse { success: true }))
}

/// Replace the whole classification set. A rejected set (overlap, bad
/// network) leaves the previous tree serving.
pub async fn load(
    State(app): State<Arc<App>>,
    Json(request): Json<LoadRequest>,
) -> Result<Json<AckResponse>, CoreError> {
    app.tclass.load(request.classes).await?;
    Ok(Json(AckResponse { success: true }))
}

pub async fn stats(State(app): State<Arc<App>>) -> Json<TreeStats> {
    Json(app.tclass.stats().await)
}

#[derive(Debug, Serialize)]
pub struct ProtocolResponse {
    pub port: u16,
    pub protocol: Option<String>,
}

pub async fn protocol(
    State(app): State<Arc<App>>,
    Path(port): Path<u16>,
) -> Json<ProtocolResponse> {
    Json(ProtocolResponse {
        port,
        protocol: app.protocols.classify_port(port).map(str::to_string),
    })
}
