//! Session record and its state machine
//!
//! ```text
//!  (none) --init-->    new
//!  new    --prepare--> new (context populated)
//!  new    --start--> active
//!  active --interim--> active
//!  active --stop-->    stopping --(delay)--> stopped
//!  active --expire-->  expired
//!  stopped|expired --(cleanup delay)--> removed
//! ```

use crate::billing::plan_data::PlanData;
use crate::disconnect::NasSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    New,
    Active,
    Stopping,
    Stopped,
    Expired,
}

/// Per-class traffic counters mirrored into `session_details`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassDetail {
    pub in_octets: u64,
    pub out_octets: u64,
    pub in_packets: u64,
    pub out_packets: u64,
    pub amount: f64,
}

/// Billing context captured at prepare time from the account row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareContext {
    pub account_id: i32,
    pub plan_id: i32,
    pub plan_data: PlanData,
    pub currency: i32,
    pub balance: f64,
    pub auth_algo: String,
    pub acct_algo: String,
    #[serde(default)]
    pub nas_spec: NasSpec,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// One subscriber session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub uuid: Uuid,
    pub sid: String,
    pub cid: String,
    pub username: String,
    pub ip: Option<Ipv4Addr>,
    pub status: SessionStatus,

    pub started_at: i64,
    pub expires_at: i64,
    pub stopped_at: i64,
    pub last_sync: i64,
    pub last_traffic: i64,

    pub in_octets: u64,
    pub out_octets: u64,
    pub in_packets: u64,
    pub out_packets: u64,
    pub amount: f64,
    pub traffic_details: HashMap<String, ClassDetail>,

    pub db_session_id: i64,
    pub account_id: i32,
    pub plan_id: i32,
    pub plan_data: PlanData,
    pub plan_data_changed: bool,
    pub currency: i32,
    pub balance: f64,
    pub auth_algo: String,
    pub acct_algo: String,
    pub nas_spec: NasSpec,
    pub disc_req_sent: bool,
}

impl Session {
    pub fn new(username: &str, timeout: u64) -> Self {
        let now = now_unix();
        Session {
            uuid: Uuid::new_v4(),
            sid: String::new(),
            cid: String::new(),
            username: username.to_string(),
            ip: None,
            status: SessionStatus::New,
            started_at: now,
            expires_at: now + timeout as i64,
            stopped_at: 0,
            last_sync: 0,
            last_traffic: 0,
            in_octets: 0,
            out_octets: 0,
            in_packets: 0,
            out_packets: 0,
            amount: 0.0,
            traffic_details: HashMap::new(),
            db_session_id: 0,
            account_id: 0,
            plan_id: 0,
            plan_data: PlanData::new(),
            plan_data_changed: false,
            currency: 0,
            balance: 0.0,
            auth_algo: String::new(),
            acct_algo: String::new(),
            nas_spec: NasSpec::default(),
            disc_req_sent: false,
        }
    }

    /// Populate billing context; the session stays `new`
    pub fn prepare(&mut self, ctx: PrepareContext) {
        self.account_id = ctx.account_id;
        self.plan_id = ctx.plan_id;
        self.plan_data = ctx.plan_data;
        self.currency = ctx.currency;
        self.balance = ctx.balance;
        self.auth_algo = ctx.auth_algo;
        self.acct_algo = ctx.acct_algo;
        self.nas_spec = ctx.nas_spec;
    }

    /// Transition to `active` with the accounting identifiers
    pub fn activate(&mut self, sid: &str, cid: &str, ip: Ipv4Addr, timeout: u64) {
        self.sid = sid.to_string();
        self.cid = cid.to_string();
        self.ip = Some(ip);
        self.status = SessionStatus::Active;
        let now = now_unix();
        self.started_at = now;
        self.expires_at = now + timeout as i64;
    }

    pub fn mark_stopping(&mut self) {
        self.status = SessionStatus::Stopping;
    }

    pub fn stop(&mut self) {
        self.status = SessionStatus::Stopped;
        self.stopped_at = now_unix();
    }

    pub fn expire(&mut self) {
        self.status = SessionStatus::Expired;
        self.stopped_at = now_unix();
    }

    pub fn renew_timeout(&mut self, timeout: u64) {
        self.expires_at = now_unix() + timeout as i64;
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_overdue(&self, now: i64) -> bool {
        self.status == SessionStatus::Active && self.expires_at <= now
    }

    /// Counters and amount move only while the session is active
    pub fn accumulate(
        &mut self,
        class: &str,
        direction: &str,
        octets: u64,
        packets: u64,
        amount: f64,
    ) {
        let detail = self.traffic_details.entry(class.to_string()).or_default();
        match direction {
            "in" => {
                detail.in_octets += octets;
                detail.in_packets += packets;
                self.in_octets += octets;
                self.in_packets += packets;
            }
            _ => {
                detail.out_octets += octets;
                detail.out_packets += packets;
                self.out_octets += octets;
                self.out_packets += packets;
            }
        }
        detail.amount += amount;
        self.amount += amount;
        self.last_traffic = now_unix();
    }

    /// Install plan_data returned by an accounting algorithm and flag it
    /// for write-back at the next sync
    pub fn update_plan_data(&mut self, plan_data: PlanData) {
        self.plan_data = plan_data;
        self.plan_data_changed = true;
    }

    pub fn needs_sync(&self) -> bool {
        self.last_traffic > self.last_sync || self.plan_data_changed
    }

    pub fn mark_synced(&mut self) {
        self.last_sync = now_unix();
        self.plan_data_changed = false;
    }

    /// Detail rows in the shape the database layer wants
    pub fn detail_rows(&self) -> HashMap<String, (i64, i64)> {
        self.traffic_details
            .iter()
            .map(|(class, d)| (class.clone(), (d.in_octets as i64, d.out_octets as i64)))
            .collect()
    }
}
