//! Subscription processor endpoints

use super::App;
use crate::db::ChargeRecord;
use crate::error::CoreError;
use crate::subscription::RunSummary;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub amount: f64,
    pub charged_at: String,
    pub comment: String,
    pub balance_after: f64,
}

impl From<ChargeRecord> for HistoryEntry {
    fn from(record: ChargeRecord) -> Self {
        HistoryEntry {
            amount: record.amount,
            charged_at: record.charged_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            comment: record.comment,
            balance_after: record.balance_after,
        }
    }
}

fn processor(app: &App) -> Result<&Arc<crate::subscription::SubscriptionProcessor>, CoreError> {
    app.subscription
        .as_ref()
        .ok_or_else(|| CoreError::Internal("subscription processing is not configured".to_string()))
}

/// Manual run for the current month; the day-of-month gate does not apply
pub async fn process(State(app): State<Arc<App>>) -> Result<Json<RunSummary>, CoreError> {
    let summary = processor(&app)?
        .process_monthly_charges(Local::now().date_naive())
        .await?;
    Ok(Json(summary))
}

pub async fn process_for_date(
    State(app): State<Arc<App>>,
    Path(date): Path<String>,
) -> Result<Json<RunSummary>, CoreError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| CoreError::Input(format!("invalid date (want YYYY-MM-DD): {}", date)))?;
    let summary = processor(&app)?.process_monthly_charges(date).await?;
    Ok(Json(summary))
}

pub async fn history(
    State(app): State<Arc<App>>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<HistoryEntry>>, CoreError> {
    let records = processor(&app)?.history(id, 20).await?;
    Ok(Json(records.into_iter().map(HistoryEntry::from).collect()))
}
