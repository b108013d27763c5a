//! RADIUS front-end endpoints
//!
//! The external RADIUS server authenticates against these three routes.
//! Authorization returns the cleartext password so the front-end can run
//! its own challenge math; accounting drives the session lifecycle.

use super::App;
use crate::billing::plan_data::PlanData;
use crate::billing::{self, AlgorithmKind, Decision};
use crate::db::AccountRecord;
use crate::disconnect::NasSpec;
use crate::error::CoreError;
use crate::session::PrepareContext;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub nas_ip_address: String,
    #[serde(default)]
    pub nas_port: u32,
    #[serde(default)]
    pub auth_type: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub result: &'static str,
    pub attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthorizeResponse {
    fn reject(reason: &str) -> Self {
        AuthorizeResponse {
            result: "reject",
            attributes: HashMap::new(),
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountingRequest {
    pub username: String,
    pub session_id: String,
    #[serde(default)]
    pub nas_ip_address: String,
    #[serde(default)]
    pub nas_port: u32,
    #[serde(default)]
    pub framed_ip_address: String,
    #[serde(default)]
    pub calling_station_id: String,
    pub acct_status_type: String,
    #[serde(default)]
    pub acct_input_octets: u64,
    #[serde(default)]
    pub acct_output_octets: u64,
    #[serde(default)]
    pub acct_session_time: u64,
    #[serde(default)]
    pub acct_terminate_cause: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccountingResponse {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AccountingResponse {
    fn accept() -> Self {
        AccountingResponse {
            result: "accept",
            message: None,
        }
    }

    fn reject(message: String) -> Self {
        AccountingResponse {
            result: "reject",
            message: Some(message),
        }
    }
}

/// Account plan_data with the configured per-algorithm defaults underneath
fn effective_plan_data(app: &App, algo: &str, account: &AccountRecord) -> Result<PlanData, CoreError> {
    let mut merged = PlanData::new();
    let (_, function) = billing::split_algo_name(algo);
    if let Some(defaults) = app.config.billing.algorithms.get(function) {
        for (key, value) in defaults {
            merged.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in account.parse_plan_data()? {
        merged.insert(key, value);
    }
    Ok(merged)
}

pub async fn authorize(
    State(app): State<Arc<App>>,
    Json(request): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, CoreError> {
    info!(
        username = %request.username,
        nas_ip = %request.nas_ip_address,
        auth_type = %request.auth_type,
        "RADIUS authorization request"
    );

    let db = app.require_db()?;
    let Some(account) = db.fetch_account(&request.username).await? else {
        info!(username = %request.username, "Account unknown or inactive");
        return Ok(Json(AuthorizeResponse::reject("not_found")));
    };

    let plan_data = effective_plan_data(&app, &account.auth_algo, &account)?;

    let Some(kind) = AlgorithmKind::resolve(&account.auth_algo) else {
        warn!(algo = %account.auth_algo, "Unknown authorization algorithm");
        return Ok(Json(AuthorizeResponse::reject(
            billing::RejectReason::UnknownAlgo.as_str(),
        )));
    };

    let outcome = billing::algorithms::authorize(
        kind,
        account.balance,
        account.credit,
        &plan_data,
        billing::seconds_of_day_now(),
    );

    if outcome.decision == Decision::Reject {
        let reason = outcome
            .reason
            .map(|r| r.as_str())
            .unwrap_or("rejected");
        info!(username = %request.username, reason, "Authorization rejected");
        return Ok(Json(AuthorizeResponse::reject(reason)));
    }

    let mut attributes = HashMap::new();
    attributes.insert("Cleartext-Password".to_string(), account.password.clone());
    attributes.insert("Service-Type".to_string(), "Framed-User".to_string());
    attributes.insert("Framed-Protocol".to_string(), "PPP".to_string());

    let pool_name = billing::plan_data::get_str(
        &plan_data,
        "POOL_NAME",
        &app.config.ippool.default_pool,
    );
    attributes.insert("Pool-Name".to_string(), pool_name.to_string());

    for key in ["Download-Speed", "Upload-Speed"] {
        let plan_key = key.replace('-', "_").to_uppercase();
        let speed = billing::plan_data::get_f64(&plan_data, &plan_key, 0.0);
        if speed > 0.0 {
            attributes.insert(key.to_string(), format!("{}", speed as u64));
        }
    }

    for (name, value) in outcome.replies {
        attributes.insert(name, value);
    }

    for reply in db.fetch_radius_avpairs(account.id, account.plan_id).await? {
        attributes.insert(reply.name, reply.value);
    }

    info!(username = %request.username, "Authorization accepted");
    Ok(Json(AuthorizeResponse {
        result: "accept",
        attributes,
        reason: None,
    }))
}

pub async fn accounting(
    State(app): State<Arc<App>>,
    Json(request): Json<AccountingRequest>,
) -> Result<Json<AccountingResponse>, CoreError> {
    info!(
        username = %request.username,
        session_id = %request.session_id,
        status_type = %request.acct_status_type,
        "RADIUS accounting request"
    );

    let outcome = match request.acct_status_type.as_str() {
        "Start" => handle_start(&app, &request).await,
        "Interim-Update" => app.sessions.interim_update(&request.session_id).await,
        "Stop" => app.sessions.stop_session(&request.session_id).await,
        other => {
            warn!(status_type = other, "Unknown accounting status type");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(Json(AccountingResponse::accept())),
        Err(e) => {
            warn!(username = %request.username, error = %e, "Accounting request rejected");
            Ok(Json(AccountingResponse::reject(e.to_string())))
        }
    }
}

/// Accounting-Start: prepare the session context from the account row,
/// obtain an address if the NAS did not send one, activate.
async fn handle_start(app: &App, request: &AccountingRequest) -> Result<(), CoreError> {
    let db = app.require_db()?;
    let account = db
        .fetch_account(&request.username)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("account {}", request.username)))?;

    let plan_data = effective_plan_data(app, &account.acct_algo, &account)?;
    let nas_spec = NasSpec {
        nas_ip: request.nas_ip_address.parse().ok(),
        nas_port: Some(request.nas_port),
        nas_identifier: None,
    };

    let uuid = match app.sessions.find_by_username(&request.username).await {
        Some(session) if session.status == crate::session::SessionStatus::New => session.uuid,
        _ => app.sessions.init_session(&request.username).await?,
    };

    app.sessions
        .prepare_session(
            uuid,
            PrepareContext {
                account_id: account.id,
                plan_id: account.plan_id,
                plan_data,
                currency: account.currency_id,
                balance: account.balance,
                auth_algo: account.auth_algo.clone(),
                acct_algo: account.acct_algo.clone(),
                nas_spec,
            },
        )
        .await?;

    let ip: Ipv4Addr = if request.framed_ip_address.is_empty() {
        let (ip, pool) = app.ippool.lease("").await?;
        info!(username = %request.username, ip = %ip, pool, "Leased framed IP for session");
        ip
    } else {
        request
            .framed_ip_address
            .parse()
            .map_err(|_| CoreError::Input(format!("invalid framed IP {}", request.framed_ip_address)))?
    };

    app.sessions
        .start_session(
            &request.username,
            &request.session_id,
            &request.calling_station_id,
            ip,
        )
        .await?;
    Ok(())
}

/// Advisory hook; the front-end already made its decision
pub async fn post_auth(
    State(_app): State<Arc<App>>,
    Json(request): Json<AuthorizeRequest>,
) -> Json<AuthorizeResponse> {
    info!(username = %request.username, "RADIUS post-auth");
    Json(AuthorizeResponse {
        result: "accept",
        attributes: HashMap::new(),
        reason: None,
    })
}
