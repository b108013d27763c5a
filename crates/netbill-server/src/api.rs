//! HTTP façade
//!
//! Thin adaptors translating the JSON vocabulary of the RADIUS front-end
//! (and the operator tooling) into core operations. Handlers validate,
//! delegate and map [`CoreError`] onto status codes; no business logic
//! lives here.

pub mod disconnect;
pub mod ippool;
pub mod radius;
pub mod sessions;
pub mod subscription;
pub mod tclass;

use crate::config::Config;
use crate::db::BillingDb;
use crate::disconnect::DisconnectService;
use crate::error::CoreError;
use crate::ippool::IpPoolService;
use crate::netflow::NetflowDispatcher;
use crate::session::SessionService;
use crate::state::StateBackend;
use crate::subscription::SubscriptionProcessor;
use crate::tclass::{ProtocolClassifier, TclassService};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::trace::TraceLayer;

/// Shared handler state
pub struct App {
    pub config: Config,
    pub backend: Arc<dyn StateBackend>,
    pub db: Option<Arc<BillingDb>>,
    pub sessions: Arc<SessionService>,
    pub ippool: Arc<IpPoolService>,
    pub tclass: Arc<TclassService>,
    pub protocols: Arc<ProtocolClassifier>,
    pub disconnect: Arc<DisconnectService>,
    pub netflow: Arc<NetflowDispatcher>,
    pub subscription: Option<Arc<SubscriptionProcessor>>,
}

impl App {
    /// The billing database, required by the RADIUS and subscription paths
    pub fn require_db(&self) -> Result<&Arc<BillingDb>, CoreError> {
        self.db
            .as_ref()
            .ok_or_else(|| CoreError::Internal("billing database is not configured".to_string()))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
    backend: &'static str,
    timestamp: u64,
}

async fn health(State(app): State<Arc<App>>) -> Response {
    let backend_up = app.backend.ping().await.is_ok();
    let body = HealthBody {
        status: if backend_up { "ok" } else { "degraded" },
        service: "netbill",
        backend: if backend_up { "up" } else { "down" },
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };
    let status = if backend_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Build the full route table
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        // RADIUS façade
        .route("/radius/authorize", post(radius::authorize))
        .route("/radius/accounting", post(radius::accounting))
        .route("/radius/post-auth", post(radius::post_auth))
        // IP pool
        .route("/ippool/lease", post(ippool::lease))
        .route("/ippool/renew", post(ippool::renew))
        .route("/ippool/release", post(ippool::release))
        .route("/ippool/info", get(ippool::info))
        .route("/ippool/stats", get(ippool::stats_all))
        .route("/ippool/stats/{pool}", get(ippool::stats_pool))
        // Sessions
        .route("/sessions", get(sessions::list))
        .route("/sessions/stats", get(sessions::stats))
        .route("/session/init", post(sessions::init))
        .route("/session/prepare", post(sessions::prepare))
        .route("/session/start", post(sessions::start))
        .route("/session/interim", post(sessions::interim))
        .route("/session/stop", post(sessions::stop))
        .route("/session/expire", post(sessions::expire))
        .route("/session/netflow", post(sessions::netflow))
        .route("/session/by-ip/{ip}", get(sessions::by_ip))
        .route("/session/by-username/{username}", get(sessions::by_username))
        .route("/session/by-sid/{sid}", get(sessions::by_sid))
        // Traffic classes
        .route("/tclass/classify/{ip}", get(tclass::classify_one))
        .route("/tclass/classify", post(tclass::classify_many))
        .route("/tclass/classes", get(tclass::list).post(tclass::add))
        .route("/tclass/classes/{name}", delete(tclass::remove))
        .route("/tclass/load", post(tclass::load))
        .route("/tclass/stats", get(tclass::stats))
        .route("/tclass/protocol/{port}", get(tclass::protocol))
        // Disconnect
        .route("/disconnect/session", post(disconnect::session))
        // Subscriptions
        .route("/subscription/process", post(subscription::process))
        .route("/subscription/process/{date}", post(subscription::process_for_date))
        .route("/subscription/account/{id}/history", get(subscription::history))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
