//! The built-in algorithm catalog
//!
//! Four variants cover the deployed plans:
//!
//! | function | authorize | accounting |
//! |---|---|---|
//! | `prepaid_auth` | balance + credit >= 0 and access interval open | per-flow charge after a prepaid allowance |
//! | `limited_prepaid_auth` | prepaid plus a positive PREPAID counter | same as `prepaid_auth` |
//! | `on_auth` | access interval only | traffic is free |
//! | `no_overlimit_auth` | prepaid, replying the slow shaper once tripped | charge suppressed, DROP_SPEED latched instead |

use super::plan_data::{self, PlanData};
use chrono::{Local, Timelike};
use serde_json::Value;

const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;

/// Reply attribute announcing the selected shaper to the NAS
pub const SHAPER_REPLY: &str = "Netspire-Shapers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    Prepaid,
    LimitedPrepaid,
    OnAuth,
    NoOverlimit,
}

impl AlgorithmKind {
    /// Resolve an algorithm function name; the module prefix is advisory
    pub fn resolve(name: &str) -> Option<AlgorithmKind> {
        let (_module, function) = super::split_algo_name(name);
        match function {
            "prepaid_auth" => Some(AlgorithmKind::Prepaid),
            "limited_prepaid_auth" => Some(AlgorithmKind::LimitedPrepaid),
            "on_auth" => Some(AlgorithmKind::OnAuth),
            "no_overlimit_auth" => Some(AlgorithmKind::NoOverlimit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Closed reason set for rejected authorizations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LowBalance,
    TimeOfDay,
    InsufficientSessionCost,
    UnknownAlgo,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::LowBalance => "low_balance",
            RejectReason::TimeOfDay => "time_of_day",
            RejectReason::InsufficientSessionCost => "insufficient_session_cost",
            RejectReason::UnknownAlgo => "unknown_algo",
        }
    }
}

/// Authorization outcome: decision plus reply attributes
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub decision: Decision,
    pub reason: Option<RejectReason>,
    pub replies: Vec<(String, String)>,
}

impl AuthOutcome {
    fn accept(replies: Vec<(String, String)>) -> Self {
        AuthOutcome {
            decision: Decision::Accept,
            reason: None,
            replies,
        }
    }

    fn reject(reason: RejectReason) -> Self {
        AuthOutcome {
            decision: Decision::Reject,
            reason: Some(reason),
            replies: Vec::new(),
        }
    }
}

/// Per-flow accounting outcome
#[derive(Debug, Clone)]
pub struct AccountOutcome {
    pub amount: f64,
    /// Plan data after the flow, when the algorithm changed it
    pub plan_data: Option<PlanData>,
}

impl AccountOutcome {
    fn free() -> Self {
        AccountOutcome {
            amount: 0.0,
            plan_data: None,
        }
    }
}

/// Seconds elapsed since local midnight
pub fn seconds_of_day_now() -> u32 {
    let now = Local::now();
    now.hour() * 3600 + now.minute() * 60 + now.second()
}

/// Run an authorization algorithm.
///
/// `balance` and `credit` come from the account row; `now_seconds` is the
/// local time of day, injected so the interval walk is testable.
pub fn authorize(
    kind: AlgorithmKind,
    balance: f64,
    credit: f64,
    plan_data: &PlanData,
    now_seconds: u32,
) -> AuthOutcome {
    match kind {
        AlgorithmKind::Prepaid => prepaid_authorize(balance, credit, plan_data, now_seconds),
        AlgorithmKind::LimitedPrepaid => {
            let prepaid = plan_data::get_f64(plan_data, "PREPAID", 0.0);
            if prepaid <= 0.0 {
                // Interval rejection still wins over the counter check
                let outcome = prepaid_authorize(balance, credit, plan_data, now_seconds);
                if outcome.reason == Some(RejectReason::TimeOfDay) {
                    return outcome;
                }
                return AuthOutcome::reject(RejectReason::LowBalance);
            }
            prepaid_authorize(balance, credit, plan_data, now_seconds)
        }
        AlgorithmKind::OnAuth => on_auth_authorize(balance, credit, plan_data, now_seconds),
        AlgorithmKind::NoOverlimit => {
            no_overlimit_authorize(balance, credit, plan_data, now_seconds)
        }
    }
}

/// Run an accounting algorithm for one flow already classified as `class`.
pub fn account(
    kind: AlgorithmKind,
    currency: i32,
    plan_data: &PlanData,
    class: &str,
    direction: &str,
    octets: u64,
    now_seconds: u32,
) -> AccountOutcome {
    match kind {
        AlgorithmKind::Prepaid | AlgorithmKind::LimitedPrepaid => {
            prepaid_account(currency, plan_data, class, direction, octets, now_seconds)
        }
        AlgorithmKind::OnAuth => AccountOutcome::free(),
        AlgorithmKind::NoOverlimit => {
            let outcome =
                prepaid_account(currency, plan_data, class, direction, octets, now_seconds);
            if outcome.amount > 0.0 {
                let mut updated = outcome.plan_data.unwrap_or_else(|| plan_data.clone());
                updated.insert("DROP_SPEED".to_string(), Value::from(1.0));
                return AccountOutcome {
                    amount: 0.0,
                    plan_data: Some(updated),
                };
            }
            outcome
        }
    }
}

fn prepaid_authorize(
    balance: f64,
    credit: f64,
    plan_data: &PlanData,
    now_seconds: u32,
) -> AuthOutcome {
    let default_shaper = plan_data::get_str(plan_data, "SHAPER", "");

    let access = check_access_intervals(plan_data, default_shaper, now_seconds);
    if access.decision != Decision::Accept {
        return AuthOutcome::reject(RejectReason::TimeOfDay);
    }

    if balance + credit >= 0.0 {
        let mut replies = Vec::new();
        if !access.shaper.is_empty() {
            replies.push((SHAPER_REPLY.to_string(), access.shaper));
        }
        return AuthOutcome::accept(replies);
    }

    AuthOutcome::reject(RejectReason::LowBalance)
}

fn on_auth_authorize(
    balance: f64,
    credit: f64,
    plan_data: &PlanData,
    now_seconds: u32,
) -> AuthOutcome {
    let default_shaper = plan_data::get_str(plan_data, "SHAPER", "");

    let access = check_access_intervals(plan_data, default_shaper, now_seconds);
    if access.decision != Decision::Accept {
        return AuthOutcome::reject(RejectReason::TimeOfDay);
    }

    // No balance check, but a plan may still demand a fixed session cost
    let session_cost = plan_data::get_f64(plan_data, "SESSION_COST", 0.0);
    if session_cost > 0.0 && balance + credit < session_cost {
        return AuthOutcome::reject(RejectReason::InsufficientSessionCost);
    }

    let mut replies = Vec::new();
    if !access.shaper.is_empty() {
        replies.push((SHAPER_REPLY.to_string(), access.shaper));
    }
    AuthOutcome::accept(replies)
}

fn no_overlimit_authorize(
    balance: f64,
    credit: f64,
    plan_data: &PlanData,
    now_seconds: u32,
) -> AuthOutcome {
    let default_shaper = plan_data::get_str(plan_data, "SHAPER", "");
    let drop_speed = plan_data::get_f64(plan_data, "DROP_SPEED", 0.0);

    let access = check_access_intervals(plan_data, default_shaper, now_seconds);
    if access.decision != Decision::Accept {
        return AuthOutcome::reject(RejectReason::TimeOfDay);
    }

    if balance + credit >= 0.0 {
        let mut replies = Vec::new();
        if drop_speed == 1.0 {
            // Throttled plans answer with the slow plan shaper, not the
            // interval one
            if !default_shaper.is_empty() {
                replies.push((SHAPER_REPLY.to_string(), default_shaper.to_string()));
            }
        } else if !access.shaper.is_empty() {
            replies.push((SHAPER_REPLY.to_string(), access.shaper));
        }
        return AuthOutcome::accept(replies);
    }

    AuthOutcome::reject(RejectReason::LowBalance)
}

fn prepaid_account(
    currency: i32,
    plan_data: &PlanData,
    class: &str,
    direction: &str,
    octets: u64,
    now_seconds: u32,
) -> AccountOutcome {
    let Some((in_price, out_price)) = lookup_prices(plan_data, class, currency, now_seconds)
    else {
        return AccountOutcome::free();
    };

    let price = if direction == "in" { in_price } else { out_price };
    if price == 0.0 {
        return AccountOutcome::free();
    }

    // PREPAID_<class>_<dir> names the counter indirectly; the link value
    // itself is a plan_data key
    let link = format!("PREPAID_{}_{}", class, direction);
    let counter_name = plan_data::get_str(plan_data, &link, "PREPAID").to_string();
    let prepaid = plan_data::get_f64(plan_data, &counter_name, 0.0).max(0.0) as u64;

    let payable = octets.saturating_sub(prepaid);
    let remaining = prepaid.saturating_sub(octets);

    let amount = price * payable as f64 / BYTES_PER_MEGABYTE;

    if remaining != prepaid {
        let mut updated = plan_data.clone();
        updated.insert(counter_name, Value::from(remaining as f64));
        return AccountOutcome {
            amount,
            plan_data: Some(updated),
        };
    }

    AccountOutcome {
        amount,
        plan_data: None,
    }
}

struct AccessOutcome {
    decision: Decision,
    shaper: String,
}

/// Walk `ACCESS_INTERVALS`: an ordered list of
/// `[boundary_seconds_of_day, "accept"|"reject", shaper?]` entries. The
/// first entry whose boundary lies beyond the current time of day decides;
/// a present-but-exhausted list rejects, an absent list allows.
fn check_access_intervals(
    plan_data: &PlanData,
    default_shaper: &str,
    now_seconds: u32,
) -> AccessOutcome {
    let Some(intervals) = plan_data::get_array(plan_data, "ACCESS_INTERVALS") else {
        return AccessOutcome {
            decision: Decision::Accept,
            shaper: default_shaper.to_string(),
        };
    };
    if intervals.is_empty() {
        return AccessOutcome {
            decision: Decision::Accept,
            shaper: default_shaper.to_string(),
        };
    }

    for interval in intervals {
        let Value::Array(entry) = interval else {
            continue;
        };
        if entry.len() < 2 {
            continue;
        }
        let Some(boundary) = plan_data::value_as_f64(&entry[0]) else {
            continue;
        };
        if (now_seconds as f64) >= boundary {
            continue;
        }

        let Value::String(access) = &entry[1] else {
            continue;
        };

        let shaper = match entry.get(2) {
            Some(Value::String(s)) => s.clone(),
            _ => default_shaper.to_string(),
        };

        if access == "accept" {
            return AccessOutcome {
                decision: Decision::Accept,
                shaper,
            };
        }
        return AccessOutcome {
            decision: Decision::Reject,
            shaper: String::new(),
        };
    }

    AccessOutcome {
        decision: Decision::Reject,
        shaper: String::new(),
    }
}

/// Look up `(in_price, out_price)` for a class at the current time of day.
///
/// `INTERVALS` is `[[boundary, prices_map], …]`; the first interval whose
/// boundary exceeds the time of day applies. Within the map a class prices
/// entry comes in two shapes kept for compatibility with existing plan
/// rows: `[[currency, in, out], …]` or `{"in": .., "out": ..}`.
fn lookup_prices(
    plan_data: &PlanData,
    class: &str,
    currency: i32,
    now_seconds: u32,
) -> Option<(f64, f64)> {
    let intervals = plan_data::get_array(plan_data, "INTERVALS")?;

    let mut current: Option<&serde_json::Map<String, Value>> = None;
    for interval in intervals {
        let Value::Array(entry) = interval else {
            continue;
        };
        if entry.len() < 2 {
            continue;
        }
        let Some(boundary) = plan_data::value_as_f64(&entry[0]) else {
            continue;
        };
        if (now_seconds as f64) < boundary {
            if let Value::Object(prices) = &entry[1] {
                current = Some(prices);
                break;
            }
        }
    }

    let class_prices = current?.get(class)?;
    match class_prices {
        Value::Array(rows) => {
            for row in rows {
                let Value::Array(triple) = row else {
                    continue;
                };
                if triple.len() < 3 {
                    continue;
                }
                let row_currency = plan_data::value_as_f64(&triple[0])? as i32;
                if row_currency != currency {
                    continue;
                }
                let in_price = plan_data::value_as_f64(&triple[1]).unwrap_or(0.0);
                let out_price = plan_data::value_as_f64(&triple[2]).unwrap_or(0.0);
                return Some((in_price, out_price));
            }
            None
        }
        Value::Object(map) => {
            let in_price = map.get("in").and_then(plan_data::value_as_f64).unwrap_or(0.0);
            let out_price = map
                .get("out")
                .and_then(plan_data::value_as_f64)
                .unwrap_or(0.0);
            Some((in_price, out_price))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MB: u64 = 1_048_576;
    const NOON: u32 = 12 * 3600;

    fn plan(value: Value) -> PlanData {
        match value {
            Value::Object(map) => map,
            _ => panic!("plan_data must be an object"),
        }
    }

    fn priced_plan() -> PlanData {
        plan(json!({
            "INTERVALS": [[86400.0, {"internet": [[1, 0.01, 0.02]]}]]
        }))
    }

    #[test]
    fn test_resolve_names() {
        assert_eq!(
            AlgorithmKind::resolve("algo_builtin:prepaid_auth"),
            Some(AlgorithmKind::Prepaid)
        );
        assert_eq!(AlgorithmKind::resolve("on_auth"), Some(AlgorithmKind::OnAuth));
        assert_eq!(
            AlgorithmKind::resolve("custom_module:no_overlimit_auth"),
            Some(AlgorithmKind::NoOverlimit)
        );
        assert_eq!(AlgorithmKind::resolve("postpaid"), None);
    }

    #[test]
    fn test_prepaid_authorize_balance_gate() {
        let data = plan(json!({}));

        let ok = authorize(AlgorithmKind::Prepaid, 10.0, 0.0, &data, NOON);
        assert_eq!(ok.decision, Decision::Accept);

        // Credit keeps a negative balance authorized
        let credit = authorize(AlgorithmKind::Prepaid, -5.0, 5.0, &data, NOON);
        assert_eq!(credit.decision, Decision::Accept);

        let broke = authorize(AlgorithmKind::Prepaid, -5.0, 4.0, &data, NOON);
        assert_eq!(broke.decision, Decision::Reject);
        assert_eq!(broke.reason, Some(RejectReason::LowBalance));
    }

    #[test]
    fn test_access_intervals_walk() {
        // Accept until 08:00, reject until 20:00, accept with a night shaper after
        let data = plan(json!({
            "SHAPER": "10mbit",
            "ACCESS_INTERVALS": [
                [28800.0, "accept"],
                [72000.0, "reject"],
                [86400.0, "accept", "2mbit"]
            ]
        }));

        let morning = authorize(AlgorithmKind::Prepaid, 1.0, 0.0, &data, 7 * 3600);
        assert_eq!(morning.decision, Decision::Accept);
        assert_eq!(
            morning.replies,
            vec![(SHAPER_REPLY.to_string(), "10mbit".to_string())]
        );

        let day = authorize(AlgorithmKind::Prepaid, 1.0, 0.0, &data, NOON);
        assert_eq!(day.decision, Decision::Reject);
        assert_eq!(day.reason, Some(RejectReason::TimeOfDay));

        let night = authorize(AlgorithmKind::Prepaid, 1.0, 0.0, &data, 22 * 3600);
        assert_eq!(night.decision, Decision::Accept);
        assert_eq!(
            night.replies,
            vec![(SHAPER_REPLY.to_string(), "2mbit".to_string())]
        );
    }

    #[test]
    fn test_exhausted_interval_list_rejects() {
        let data = plan(json!({
            "ACCESS_INTERVALS": [[100.0, "accept"]]
        }));
        let outcome = authorize(AlgorithmKind::Prepaid, 1.0, 0.0, &data, NOON);
        assert_eq!(outcome.reason, Some(RejectReason::TimeOfDay));
    }

    #[test]
    fn test_limited_prepaid_requires_counter() {
        let with = plan(json!({"PREPAID": 1000.0}));
        let without = plan(json!({}));

        assert_eq!(
            authorize(AlgorithmKind::LimitedPrepaid, 1.0, 0.0, &with, NOON).decision,
            Decision::Accept
        );
        let rejected = authorize(AlgorithmKind::LimitedPrepaid, 1.0, 0.0, &without, NOON);
        assert_eq!(rejected.reason, Some(RejectReason::LowBalance));
    }

    #[test]
    fn test_on_auth_ignores_balance() {
        let data = plan(json!({}));
        let outcome = authorize(AlgorithmKind::OnAuth, -100.0, 0.0, &data, NOON);
        assert_eq!(outcome.decision, Decision::Accept);
    }

    #[test]
    fn test_on_auth_session_cost() {
        let data = plan(json!({"SESSION_COST": 5.0}));
        let poor = authorize(AlgorithmKind::OnAuth, 3.0, 0.0, &data, NOON);
        assert_eq!(poor.reason, Some(RejectReason::InsufficientSessionCost));

        let rich = authorize(AlgorithmKind::OnAuth, 5.0, 0.0, &data, NOON);
        assert_eq!(rich.decision, Decision::Accept);
    }

    #[test]
    fn test_no_overlimit_shaper_switch() {
        let normal = plan(json!({
            "SHAPER": "256kbit",
            "ACCESS_INTERVALS": [[86400.0, "accept", "10mbit"]]
        }));
        let outcome = authorize(AlgorithmKind::NoOverlimit, 1.0, 0.0, &normal, NOON);
        assert_eq!(
            outcome.replies,
            vec![(SHAPER_REPLY.to_string(), "10mbit".to_string())]
        );

        let tripped = plan(json!({
            "SHAPER": "256kbit",
            "DROP_SPEED": 1.0,
            "ACCESS_INTERVALS": [[86400.0, "accept", "10mbit"]]
        }));
        let outcome = authorize(AlgorithmKind::NoOverlimit, 1.0, 0.0, &tripped, NOON);
        assert_eq!(
            outcome.replies,
            vec![(SHAPER_REPLY.to_string(), "256kbit".to_string())]
        );
    }

    #[test]
    fn test_prepaid_account_charges_per_megabyte() {
        let data = priced_plan();
        let outcome = account(
            AlgorithmKind::Prepaid,
            1,
            &data,
            "internet",
            "in",
            MB,
            NOON,
        );
        assert!((outcome.amount - 0.01).abs() < 1e-9);
        assert!(outcome.plan_data.is_none());
    }

    #[test]
    fn test_prepaid_account_consumes_allowance_first() {
        let mut data = priced_plan();
        data.insert("PREPAID".to_string(), Value::from(2.0 * MB as f64));

        // First MB eats the allowance, no charge
        let first = account(AlgorithmKind::Prepaid, 1, &data, "internet", "in", MB, NOON);
        assert_eq!(first.amount, 0.0);
        let updated = first.plan_data.expect("counter must be written back");
        assert_eq!(plan_data::get_f64(&updated, "PREPAID", -1.0), MB as f64);

        // Flow straddling the boundary pays only the overrun
        let second = account(
            AlgorithmKind::Prepaid,
            1,
            &updated,
            "internet",
            "in",
            3 * MB,
            NOON,
        );
        assert!((second.amount - 0.02).abs() < 1e-9);
        let drained = second.plan_data.expect("counter must be written back");
        assert_eq!(plan_data::get_f64(&drained, "PREPAID", -1.0), 0.0);
    }

    #[test]
    fn test_prepaid_counter_indirection() {
        let mut data = priced_plan();
        data.insert(
            "PREPAID_internet_in".to_string(),
            Value::from("INTERNET_BONUS"),
        );
        data.insert("INTERNET_BONUS".to_string(), Value::from(MB as f64));

        let outcome = account(AlgorithmKind::Prepaid, 1, &data, "internet", "in", MB, NOON);
        assert_eq!(outcome.amount, 0.0);
        let updated = outcome.plan_data.unwrap();
        assert_eq!(plan_data::get_f64(&updated, "INTERNET_BONUS", -1.0), 0.0);
    }

    #[test]
    fn test_account_directions_use_their_price() {
        let data = priced_plan();
        let inbound = account(AlgorithmKind::Prepaid, 1, &data, "internet", "in", MB, NOON);
        let outbound = account(AlgorithmKind::Prepaid, 1, &data, "internet", "out", MB, NOON);
        assert!((inbound.amount - 0.01).abs() < 1e-9);
        assert!((outbound.amount - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_account_free_cases() {
        // No INTERVALS at all
        let empty = plan(json!({}));
        assert_eq!(
            account(AlgorithmKind::Prepaid, 1, &empty, "internet", "in", MB, NOON).amount,
            0.0
        );

        // Interval present but class missing
        let other_class = plan(json!({
            "INTERVALS": [[86400.0, {"local": {"in": 0.5, "out": 0.5}}]]
        }));
        assert_eq!(
            account(AlgorithmKind::Prepaid, 1, &other_class, "internet", "in", MB, NOON).amount,
            0.0
        );

        // Currency mismatch in the triples form
        let wrong_currency = plan(json!({
            "INTERVALS": [[86400.0, {"internet": [[2, 0.01, 0.02]]}]]
        }));
        assert_eq!(
            account(AlgorithmKind::Prepaid, 1, &wrong_currency, "internet", "in", MB, NOON).amount,
            0.0
        );
    }

    #[test]
    fn test_prices_map_form() {
        let data = plan(json!({
            "INTERVALS": [[86400.0, {"internet": {"in": 0.03, "out": 0.04}}]]
        }));
        let outcome = account(AlgorithmKind::Prepaid, 1, &data, "internet", "out", MB, NOON);
        assert!((outcome.amount - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_interval_boundary_selection() {
        // Day tariff until 18:00, night tariff after
        let data = plan(json!({
            "INTERVALS": [
                [64800.0, {"internet": {"in": 0.10, "out": 0.10}}],
                [86400.0, {"internet": {"in": 0.01, "out": 0.01}}]
            ]
        }));

        let day = account(AlgorithmKind::Prepaid, 1, &data, "internet", "in", MB, NOON);
        assert!((day.amount - 0.10).abs() < 1e-9);

        let night = account(AlgorithmKind::Prepaid, 1, &data, "internet", "in", MB, 20 * 3600);
        assert!((night.amount - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_on_auth_account_is_free() {
        let data = priced_plan();
        let outcome = account(AlgorithmKind::OnAuth, 1, &data, "internet", "in", 10 * MB, NOON);
        assert_eq!(outcome.amount, 0.0);
        assert!(outcome.plan_data.is_none());
    }

    #[test]
    fn test_no_overlimit_latches_drop_speed() {
        let data = priced_plan();
        let outcome = account(
            AlgorithmKind::NoOverlimit,
            1,
            &data,
            "internet",
            "in",
            2 * MB,
            NOON,
        );
        assert_eq!(outcome.amount, 0.0);
        let updated = outcome.plan_data.expect("DROP_SPEED must be set");
        assert_eq!(plan_data::get_f64(&updated, "DROP_SPEED", 0.0), 1.0);
    }

    #[test]
    fn test_no_overlimit_free_flow_passes_through() {
        let mut data = priced_plan();
        data.insert("PREPAID".to_string(), Value::from(4.0 * MB as f64));

        let outcome = account(
            AlgorithmKind::NoOverlimit,
            1,
            &data,
            "internet",
            "in",
            MB,
            NOON,
        );
        assert_eq!(outcome.amount, 0.0);
        let updated = outcome.plan_data.unwrap();
        // Allowance consumed, throttle not tripped
        assert_eq!(plan_data::get_f64(&updated, "DROP_SPEED", 0.0), 0.0);
        assert_eq!(
            plan_data::get_f64(&updated, "PREPAID", -1.0),
            3.0 * MB as f64
        );
    }
}
