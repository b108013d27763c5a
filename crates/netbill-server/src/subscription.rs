//! Monthly subscription charges
//!
//! Once a day at the configured wall-clock time the processor wakes up;
//! on the configured day of month it walks every active account and
//! debits the monthly fee. The run is resumable: each account is charged
//! at most once per period because the debit itself (comment prefix plus
//! timestamp inside the period) is the idempotency marker.

use crate::billing::plan_data::{self, PlanData};
use crate::config::SubscriptionConfig;
use crate::db::{BillingAccount, BillingDb, ChargeRecord, SubscriptionStats};
use crate::error::CoreError;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const COMMENT_PREFIX: &str = "Monthly subscription fee";

/// Outcome of one account in a processing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeOutcome {
    pub account_id: i32,
    pub login: String,
    pub amount: f64,
    pub status: ChargeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Totals for one processing run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Subscription fee processor
pub struct SubscriptionProcessor {
    db: Arc<BillingDb>,
    config: SubscriptionConfig,
}

impl SubscriptionProcessor {
    pub fn new(db: Arc<BillingDb>, config: SubscriptionConfig) -> Self {
        SubscriptionProcessor { db, config }
    }

    /// Charge every active account for the month containing `target_date`.
    /// Per-account failures are recorded and do not stop the run.
    pub async fn process_monthly_charges(
        &self,
        target_date: NaiveDate,
    ) -> Result<RunSummary, CoreError> {
        info!(date = %target_date, "Starting monthly subscription charges");

        let accounts = self.db.fetch_billing_accounts().await?;
        info!(count = accounts.len(), "Found accounts for billing");

        let mut summary = RunSummary::default();
        for account in &accounts {
            summary.processed += 1;
            match self.process_account(account, target_date).await {
                Ok(outcome) => {
                    match outcome.status {
                        ChargeStatus::Success => summary.succeeded += 1,
                        ChargeStatus::Skipped => summary.skipped += 1,
                        ChargeStatus::Failed => summary.failed += 1,
                    }
                    info!(
                        account_id = outcome.account_id,
                        login = %outcome.login,
                        status = ?outcome.status,
                        amount = outcome.amount,
                        "Processed account charge"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(account_id = account.id, login = %account.login, error = %e,
                        "Failed to process account charge");
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Monthly charges processing completed"
        );
        Ok(summary)
    }

    async fn process_account(
        &self,
        account: &BillingAccount,
        target_date: NaiveDate,
    ) -> Result<ChargeOutcome, CoreError> {
        let plan = plan_data::parse(&account.plan_data)
            .map_err(|e| CoreError::Input(format!("plan_data for account {}: {}", account.id, e)))?;

        let monthly_fee = self.monthly_fee(&plan);
        if monthly_fee <= 0.0 {
            return Ok(ChargeOutcome {
                account_id: account.id,
                login: account.login.clone(),
                amount: 0.0,
                status: ChargeStatus::Success,
                failure_reason: None,
            });
        }

        let (period_start, period_end) = billing_period(target_date);

        if self
            .db
            .has_subscription_charge(account.id, period_start, period_end)
            .await?
        {
            return Ok(ChargeOutcome {
                account_id: account.id,
                login: account.login.clone(),
                amount: 0.0,
                status: ChargeStatus::Skipped,
                failure_reason: None,
            });
        }

        let amount = if self.config.enable_proration {
            prorated_amount(monthly_fee, account.created_at, period_start, period_end)
        } else {
            monthly_fee
        };
        if amount <= 0.0 {
            return Ok(ChargeOutcome {
                account_id: account.id,
                login: account.login.clone(),
                amount: 0.0,
                status: ChargeStatus::Skipped,
                failure_reason: None,
            });
        }

        if account.balance + account.credit < amount {
            if self.config.disable_on_insufficient_funds {
                if let Err(e) = self.db.deactivate_account(account.id).await {
                    error!(account_id = account.id, error = %e, "Failed to deactivate account");
                }
            }
            return Ok(ChargeOutcome {
                account_id: account.id,
                login: account.login.clone(),
                amount,
                status: ChargeStatus::Failed,
                failure_reason: Some("insufficient_funds".to_string()),
            });
        }

        let comment = charge_comment(period_start.date(), period_end.date());
        match self.db.debit_transaction(account.id, amount, &comment).await {
            Ok(new_balance) => {
                info!(account_id = account.id, amount, new_balance, "Subscription fee debited");
                Ok(ChargeOutcome {
                    account_id: account.id,
                    login: account.login.clone(),
                    amount,
                    status: ChargeStatus::Success,
                    failure_reason: None,
                })
            }
            Err(e) => Ok(ChargeOutcome {
                account_id: account.id,
                login: account.login.clone(),
                amount,
                status: ChargeStatus::Failed,
                failure_reason: Some(format!("transaction_failed: {}", e)),
            }),
        }
    }

    fn monthly_fee(&self, plan: &PlanData) -> f64 {
        let fee = plan_data::get_f64(plan, "MONTHLY_FEE", f64::NAN);
        if !fee.is_nan() {
            return fee;
        }
        let fee = plan_data::get_f64(plan, "SUBSCRIPTION_FEE", f64::NAN);
        if !fee.is_nan() {
            return fee;
        }
        self.config.default_monthly_fee
    }

    pub async fn history(&self, account_id: i32, limit: i64) -> Result<Vec<ChargeRecord>, CoreError> {
        self.db.subscription_history(account_id, limit).await
    }

    pub async fn stats(&self) -> Result<SubscriptionStats, CoreError> {
        self.db.subscription_stats().await
    }

    /// Daily scheduler. Sleeps until the configured processing time, then
    /// runs the monthly charges when the day matches.
    pub fn spawn_scheduler(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Local::now().naive_local();
                let next_run = next_run_time(now, &self.config.processing_time);
                let wait = (next_run - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(60));

                info!(next_run = %next_run, "Subscription processor scheduled");
                tokio::time::sleep(wait).await;

                let today = Local::now().date_naive();
                if today.day() == self.config.scheduler.day_of_month {
                    if let Err(e) = self.process_monthly_charges(today).await {
                        error!(error = %e, "Scheduled subscription processing failed");
                    }
                }

                // Step past the processing minute before rescheduling
                tokio::time::sleep(std::time::Duration::from_secs(61)).await;
            }
        })
    }
}

/// Calendar month containing `date`: first second to last second
pub fn billing_period(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start_date = date.with_day(1).expect("day 1 always exists");
    let next_month = if start_date.month() == 12 {
        NaiveDate::from_ymd_opt(start_date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start_date.year(), start_date.month() + 1, 1)
    }
    .expect("first of month always exists");

    let start = start_date.and_time(NaiveTime::MIN);
    let end = next_month.and_time(NaiveTime::MIN) - TimeDelta::seconds(1);
    (start, end)
}

/// Fee share for an account created mid-period, in whole days
pub fn prorated_amount(
    monthly_fee: f64,
    account_created: NaiveDateTime,
    period_start: NaiveDateTime,
    period_end: NaiveDateTime,
) -> f64 {
    if account_created <= period_start {
        return monthly_fee;
    }
    if account_created > period_end {
        return 0.0;
    }

    let days_total = period_end.date().day() as f64;
    let days_remaining = (period_end.date() - account_created.date()).num_days() + 1;
    if days_remaining <= 0 {
        return 0.0;
    }

    monthly_fee * days_remaining as f64 / days_total
}

fn charge_comment(period_start: NaiveDate, period_end: NaiveDate) -> String {
    format!(
        "{} for period {} - {}",
        COMMENT_PREFIX,
        period_start.format("%Y-%m-%d"),
        period_end.format("%Y-%m-%d")
    )
}

/// Next occurrence of the "HH:MM" processing time, today or tomorrow
fn next_run_time(now: NaiveDateTime, processing_time: &str) -> NaiveDateTime {
    let time = NaiveTime::parse_from_str(processing_time, "%H:%M").unwrap_or_else(|_| {
        warn!(processing_time, "Invalid processing_time, falling back to 02:00");
        NaiveTime::from_hms_opt(2, 0, 0).expect("02:00 is valid")
    });

    let candidate = now.date().and_time(time);
    if candidate > now {
        candidate
    } else {
        (now.date() + TimeDelta::days(1)).and_time(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_billing_period_regular_month() {
        let (start, end) = billing_period(date(2024, 1, 15));
        assert_eq!(start, date(2024, 1, 1).and_time(NaiveTime::MIN));
        assert_eq!(
            end,
            date(2024, 1, 31).and_hms_opt(23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_billing_period_december_rolls_year() {
        let (start, end) = billing_period(date(2023, 12, 5));
        assert_eq!(start.date(), date(2023, 12, 1));
        assert_eq!(end.date(), date(2023, 12, 31));
    }

    #[test]
    fn test_billing_period_leap_february() {
        let (_, end) = billing_period(date(2024, 2, 10));
        assert_eq!(end.date(), date(2024, 2, 29));
    }

    #[test]
    fn test_proration_mid_month_account() {
        let (start, end) = billing_period(date(2024, 1, 1));
        let created = date(2024, 1, 15).and_time(NaiveTime::MIN);

        // 17 of 31 days remain
        let amount = prorated_amount(31.0, created, start, end);
        assert!((amount - 17.0).abs() < 1e-9);
    }

    #[test]
    fn test_proration_old_account_pays_full() {
        let (start, end) = billing_period(date(2024, 1, 1));
        let created = date(2023, 6, 1).and_time(NaiveTime::MIN);
        assert_eq!(prorated_amount(31.0, created, start, end), 31.0);
    }

    #[test]
    fn test_proration_future_account_pays_nothing() {
        let (start, end) = billing_period(date(2024, 1, 1));
        let created = date(2024, 2, 2).and_time(NaiveTime::MIN);
        assert_eq!(prorated_amount(31.0, created, start, end), 0.0);
    }

    #[test]
    fn test_proration_last_day() {
        let (start, end) = billing_period(date(2024, 1, 1));
        let created = date(2024, 1, 31).and_hms_opt(12, 0, 0).unwrap();
        let amount = prorated_amount(31.0, created, start, end);
        assert!((amount - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_charge_comment_format() {
        let comment = charge_comment(date(2024, 1, 1), date(2024, 1, 31));
        assert_eq!(
            comment,
            "Monthly subscription fee for period 2024-01-01 - 2024-01-31"
        );
        assert!(comment.starts_with(COMMENT_PREFIX));
    }

    #[test]
    fn test_next_run_time() {
        let now = date(2024, 3, 10).and_hms_opt(1, 0, 0).unwrap();
        assert_eq!(
            next_run_time(now, "02:00"),
            date(2024, 3, 10).and_hms_opt(2, 0, 0).unwrap()
        );

        let later = date(2024, 3, 10).and_hms_opt(3, 0, 0).unwrap();
        assert_eq!(
            next_run_time(later, "02:00"),
            date(2024, 3, 11).and_hms_opt(2, 0, 0).unwrap()
        );

        // Garbage falls back to 02:00
        assert_eq!(
            next_run_time(now, "late"),
            date(2024, 3, 10).and_hms_opt(2, 0, 0).unwrap()
        );
    }
}
