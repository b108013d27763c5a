//! Session store and lifecycle
//!
//! The in-process map is the authority; every mutation is written through
//! to the KV backend so a restart (or a peer node) can rehydrate. All
//! operations on one session serialize on its own mutex; the store itself
//! is sharded and never globally locked.
//!
//! Timers are plain tasks: `start` and every `interim` arm a fresh
//! deadline task that calls `expire` when it fires.

pub mod model;

pub use model::{ClassDetail, PrepareContext, Session, SessionStatus};

use crate::billing::{self, AlgorithmKind};
use crate::config::SessionConfig;
use crate::db::BillingDb;
use crate::disconnect::DisconnectService;
use crate::error::CoreError;
use crate::ippool::IpPoolService;
use crate::state::StateBackend;
use crate::tclass::TclassService;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SESSION_PREFIX: &str = "session:";
const USER_INDEX_PREFIX: &str = "session_by_user:";
const IP_INDEX_PREFIX: &str = "session_by_ip:";
const SID_INDEX_PREFIX: &str = "session_by_sid:";

/// Seconds between finalization and removal of a stopped session
const STOP_CLEANUP_DELAY: u64 = 10;
/// Seconds between expiry finalization and removal
const EXPIRE_CLEANUP_DELAY: u64 = 5;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Aggregate counters for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub stopping_sessions: usize,
    pub stopped_sessions: usize,
    pub expired_sessions: usize,
    pub max_sessions: usize,
}

/// Session store and state machine
pub struct SessionService {
    sessions: DashMap<Uuid, Arc<Mutex<Session>>>,
    by_username: DashMap<String, Uuid>,
    by_ip: DashMap<Ipv4Addr, Uuid>,
    by_sid: DashMap<String, Uuid>,
    timers: DashMap<Uuid, JoinHandle<()>>,

    backend: Arc<dyn StateBackend>,
    db: Option<Arc<BillingDb>>,
    ippool: Option<Arc<IpPoolService>>,
    disconnect: Option<Arc<DisconnectService>>,
    tclass: Arc<TclassService>,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        db: Option<Arc<BillingDb>>,
        ippool: Option<Arc<IpPoolService>>,
        disconnect: Option<Arc<DisconnectService>>,
        tclass: Arc<TclassService>,
        config: SessionConfig,
    ) -> Self {
        SessionService {
            sessions: DashMap::new(),
            by_username: DashMap::new(),
            by_ip: DashMap::new(),
            by_sid: DashMap::new(),
            timers: DashMap::new(),
            backend,
            db,
            ippool,
            disconnect,
            tclass,
            config,
        }
    }

    // ---- lifecycle operations ----

    /// Create a fresh session for a user. A user with a live session is
    /// rejected; a leftover drained session is replaced.
    pub async fn init_session(&self, username: &str) -> Result<Uuid, CoreError> {
        let live = self
            .sessions_for_user(username)
            .await
            .into_iter()
            .filter(|s| matches!(s.status, SessionStatus::Active | SessionStatus::Stopping))
            .count();
        if live >= self.config.max_sessions_per_user {
            return Err(CoreError::Duplicate(format!(
                "user {} already has an active session",
                username
            )));
        }

        if self.sessions.len() >= self.config.max_sessions {
            return Err(CoreError::Capacity("sessions".to_string()));
        }

        // Replace a drained leftover under the same login
        if let Some(old) = self.by_username.get(username).map(|e| *e.value()) {
            self.cleanup_session(old).await;
        }

        let session = Session::new(username, self.config.session_timeout);
        let uuid = session.uuid;

        self.save_session(&session).await?;
        self.sessions.insert(uuid, Arc::new(Mutex::new(session)));
        self.by_username.insert(username.to_string(), uuid);
        self.backend
            .set(
                &format!("{}{}", USER_INDEX_PREFIX, username),
                uuid.to_string().as_bytes(),
                None,
            )
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        info!(uuid = %uuid, username, "Session initialized");
        Ok(uuid)
    }

    /// Populate the billing context fetched at authorize time
    pub async fn prepare_session(&self, uuid: Uuid, ctx: PrepareContext) -> Result<(), CoreError> {
        let entry = self
            .session_arc(uuid)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", uuid)))?;
        let mut session = entry.lock().await;
        session.prepare(ctx);
        self.save_session(&session).await?;
        info!(uuid = %uuid, username = %session.username, plan_id = session.plan_id, "Session prepared");
        Ok(())
    }

    /// Accounting-Start: activate the prepared session, insert the DB row,
    /// index it and arm the expiry timer.
    pub async fn start_session(
        self: &Arc<Self>,
        username: &str,
        sid: &str,
        cid: &str,
        ip: Ipv4Addr,
    ) -> Result<Uuid, CoreError> {
        let uuid = self
            .by_username
            .get(username)
            .map(|e| *e.value())
            .ok_or_else(|| CoreError::NotFound(format!("no prepared session for {}", username)))?;
        let entry = self
            .session_arc(uuid)
            .ok_or_else(|| CoreError::NotFound(format!("no prepared session for {}", username)))?;

        let mut session = entry.lock().await;
        if session.status != SessionStatus::New {
            return Err(CoreError::Duplicate(format!(
                "session for {} is already {}",
                username,
                serde_json::to_string(&session.status).unwrap_or_default()
            )));
        }

        session.activate(sid, cid, ip, self.config.session_timeout);

        if let Some(db) = &self.db {
            let db_session_id = db
                .start_session(
                    session.account_id,
                    &ip.to_string(),
                    sid,
                    cid,
                    Utc::now().naive_utc(),
                )
                .await?;
            session.db_session_id = db_session_id;
        }

        self.by_ip.insert(ip, uuid);
        self.by_sid.insert(sid.to_string(), uuid);
        self.backend
            .set(
                &format!("{}{}", IP_INDEX_PREFIX, ip),
                uuid.to_string().as_bytes(),
                None,
            )
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        self.backend
            .set(
                &format!("{}{}", SID_INDEX_PREFIX, sid),
                uuid.to_string().as_bytes(),
                None,
            )
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        self.arm_timer(uuid, self.config.session_timeout);
        self.save_session(&session).await?;

        info!(
            uuid = %uuid, username, sid, cid, ip = %ip,
            db_session_id = session.db_session_id,
            "Session started"
        );
        Ok(uuid)
    }

    /// Interim-Update: push the expiry deadline and renew the IP lease
    pub async fn interim_update(self: &Arc<Self>, sid: &str) -> Result<(), CoreError> {
        let entry = self
            .find_arc_by_sid(sid)
            .ok_or_else(|| CoreError::NotFound(format!("session for SID {}", sid)))?;

        let mut session = entry.lock().await;
        if !session.is_active() {
            return Err(CoreError::NotFound(format!("session for SID {}", sid)));
        }

        session.renew_timeout(self.config.session_timeout);
        self.arm_timer(session.uuid, self.config.session_timeout);

        if let (Some(ippool), Some(ip)) = (&self.ippool, session.ip) {
            if let Err(e) = ippool.renew(ip).await {
                warn!(sid, ip = %ip, error = %e, "Failed to renew IP lease");
            }
        }

        self.save_session(&session).await?;
        debug!(sid, username = %session.username, "Session interim update");
        Ok(())
    }

    /// Accounting-Stop: mark stopping and finalize after `delay_stop`
    /// seconds so trailing NetFlow samples still land. A second stop while
    /// stopping is a no-op.
    pub async fn stop_session(self: &Arc<Self>, sid: &str) -> Result<(), CoreError> {
        let entry = self
            .find_arc_by_sid(sid)
            .ok_or_else(|| CoreError::NotFound(format!("session for SID {}", sid)))?;

        let uuid;
        {
            let mut session = entry.lock().await;
            match session.status {
                SessionStatus::Stopping | SessionStatus::Stopped | SessionStatus::Expired => {
                    return Ok(())
                }
                _ => {}
            }
            uuid = session.uuid;
            session.mark_stopping();
            if let Err(e) = self.sync_session_locked(&mut session).await {
                error!(sid, error = %e, "Failed to sync session before stop");
            }
            self.save_session(&session).await?;
        }

        self.cancel_timer(uuid);

        let service = self.clone();
        let delay = self.config.delay_stop;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            service.finalize_session(uuid).await;
        });

        info!(sid, delay_stop = delay, "Session stop initiated");
        Ok(())
    }

    /// Timer fired: mark expired, dispatch the disconnect engine, finalize
    /// and schedule removal.
    pub async fn expire_session(self: &Arc<Self>, uuid: Uuid) -> Result<(), CoreError> {
        let entry = self
            .session_arc(uuid)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", uuid)))?;

        {
            let mut session = entry.lock().await;
            match session.status {
                SessionStatus::Stopped | SessionStatus::Expired => return Ok(()),
                _ => {}
            }
            session.expire();
            self.save_session(&session).await?;

            if let Some(disconnect) = &self.disconnect {
                if let Some(ip) = session.ip {
                    session.disc_req_sent = true;
                    let disconnect = disconnect.clone();
                    let username = session.username.clone();
                    let sid = session.sid.clone();
                    let nas_spec = session.nas_spec.clone();
                    tokio::spawn(async move {
                        if let Err(e) = disconnect
                            .disconnect_session(&username, &sid, ip, &nas_spec)
                            .await
                        {
                            error!(%username, %sid, error = %e, "Failed to disconnect expired session");
                        }
                    });
                }
            }
            info!(uuid = %uuid, username = %session.username, "Session expired");
        }

        // Finalization runs even when the peer disconnect fails
        self.finalize_now(uuid, true).await;

        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(EXPIRE_CLEANUP_DELAY)).await;
            service.cleanup_session(uuid).await;
        });

        Ok(())
    }

    /// Delayed-stop completion: transition to stopped, release the IP and
    /// write the final row plus the debit.
    async fn finalize_session(self: &Arc<Self>, uuid: Uuid) {
        let Some(entry) = self.session_arc(uuid) else {
            return;
        };

        {
            let mut session = entry.lock().await;
            if session.status != SessionStatus::Stopping {
                return;
            }
            session.stop();
            if let Err(e) = self.save_session(&session).await {
                error!(uuid = %uuid, error = %e, "Failed to persist stopped session");
            }
        }

        self.finalize_now(uuid, false).await;

        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(STOP_CLEANUP_DELAY)).await;
            service.cleanup_session(uuid).await;
        });

        info!(uuid = %uuid, "Session stopped");
    }

    /// Release the address and run the atomic debit/finish/details unit
    async fn finalize_now(&self, uuid: Uuid, expired: bool) {
        let Some(entry) = self.session_arc(uuid) else {
            return;
        };
        let mut session = entry.lock().await;

        if let (Some(ippool), Some(ip)) = (&self.ippool, session.ip) {
            if let Err(e) = ippool.release(ip).await {
                error!(ip = %ip, error = %e, "Failed to release IP on session end");
            }
        }

        if let Some(db) = &self.db {
            if session.db_session_id > 0 {
                let plan_data = session.plan_data_changed.then(|| session.plan_data.clone());
                let details = session.detail_rows();
                let result = db
                    .finalize_session(
                        session.db_session_id,
                        session.account_id,
                        session.in_octets as i64,
                        session.out_octets as i64,
                        session.amount,
                        Utc::now().naive_utc(),
                        expired,
                        plan_data.as_ref(),
                        &details,
                    )
                    .await;
                match result {
                    Ok(()) => session.mark_synced(),
                    // The debit is retried by the next sync cycle
                    Err(e) => error!(uuid = %uuid, error = %e, "Failed to finalize DB session"),
                }
            }
        }

        if let Err(e) = self.save_session(&session).await {
            error!(uuid = %uuid, error = %e, "Failed to persist finalized session");
        }
    }

    /// Map a flow to the owning session, classify the peer, run the
    /// plan's accounting algorithm and accumulate. Flows for unknown
    /// addresses are dropped silently.
    pub async fn apply_flow(
        &self,
        direction: &str,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        octets: u64,
        packets: u64,
    ) -> Result<bool, CoreError> {
        let (subscriber, peer) = if direction == "in" {
            (dst, src)
        } else {
            (src, dst)
        };

        let Some(entry) = self.find_arc_by_ip(subscriber) else {
            return Ok(false);
        };

        let mut session = entry.lock().await;
        if !session.is_active() {
            return Ok(false);
        }

        let class = self.tclass.classify(peer).await;

        let amount = match AlgorithmKind::resolve(&session.acct_algo) {
            Some(kind) => {
                let outcome = billing::algorithms::account(
                    kind,
                    session.currency,
                    &session.plan_data,
                    &class,
                    direction,
                    octets,
                    billing::seconds_of_day_now(),
                );
                if let Some(plan_data) = outcome.plan_data {
                    session.update_plan_data(plan_data);
                }
                outcome.amount
            }
            None => {
                warn!(algo = %session.acct_algo, "Unknown accounting algorithm, flow not charged");
                0.0
            }
        };

        session.accumulate(&class, direction, octets, packets, amount);
        self.save_session(&session).await?;

        debug!(
            session = %session.uuid, direction, octets, %class, amount,
            "Flow accounted"
        );
        Ok(true)
    }

    // ---- background loops ----

    /// Spawn the sync and cleanup loops; returns their handles
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let service = self.clone();
        let sync_interval = self.config.sync_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sync_interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.sync_all_sessions().await;
            }
        }));

        let service = self.clone();
        let cleanup_interval = self.config.cleanup_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(cleanup_interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.cleanup_tick().await;
            }
        }));

        handles
    }

    /// One pass of the sync loop
    pub async fn sync_all_sessions(&self) {
        let entries: Vec<Arc<Mutex<Session>>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();

        let mut synced = 0;
        for entry in entries {
            let mut session = entry.lock().await;
            if !session.needs_sync() {
                continue;
            }
            match self.sync_session_locked(&mut session).await {
                Ok(()) => synced += 1,
                Err(e) => {
                    // Transient DB trouble defers to the next cycle
                    error!(session = %session.uuid, error = %e, "Failed to sync session");
                }
            }
        }

        if synced > 0 {
            debug!(count = synced, "Synced sessions to database");
        }
    }

    async fn sync_session_locked(&self, session: &mut Session) -> Result<(), CoreError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        if session.db_session_id == 0 {
            return Ok(());
        }

        db.sync_session(
            session.in_octets as i64,
            session.out_octets as i64,
            Utc::now().naive_utc(),
            session.amount,
            &session.sid,
            session.account_id,
        )
        .await?;

        if session.plan_data_changed {
            db.update_account_plan_data(&session.plan_data, session.account_id)
                .await?;
        }

        db.upsert_session_details(session.db_session_id, &session.detail_rows())
            .await?;

        session.mark_synced();
        self.save_session(session).await?;
        Ok(())
    }

    /// One pass of the cleanup loop: expire overdue actives and drop
    /// long-drained sessions (rehydrated leftovers included)
    async fn cleanup_tick(self: &Arc<Self>) {
        let now = now_unix();
        let entries: Vec<Arc<Mutex<Session>>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();

        for entry in entries {
            let (uuid, overdue, drained) = {
                let session = entry.lock().await;
                let drained = matches!(
                    session.status,
                    SessionStatus::Stopped | SessionStatus::Expired
                ) && session.stopped_at + (STOP_CLEANUP_DELAY as i64) * 2 <= now;
                (session.uuid, session.is_overdue(now), drained)
            };

            if overdue {
                if let Err(e) = self.expire_session(uuid).await {
                    error!(uuid = %uuid, error = %e, "Failed to expire overdue session");
                }
            } else if drained {
                self.cleanup_session(uuid).await;
            }
        }
    }

    /// Remove a session and all its indexes, in memory and in the backend
    pub async fn cleanup_session(&self, uuid: Uuid) {
        self.cancel_timer(uuid);

        let Some((_, entry)) = self.sessions.remove(&uuid) else {
            return;
        };
        let session = entry.lock().await;

        let _ = self
            .backend
            .delete(&format!("{}{}", SESSION_PREFIX, uuid))
            .await;

        // Drop each index only if this session still owns it; a newer
        // session may have taken the name over
        if self
            .by_username
            .remove_if(&session.username, |_, v| *v == uuid)
            .is_some()
        {
            let _ = self
                .backend
                .delete(&format!("{}{}", USER_INDEX_PREFIX, session.username))
                .await;
        }

        if let Some(ip) = session.ip {
            if self.by_ip.remove_if(&ip, |_, v| *v == uuid).is_some() {
                let _ = self
                    .backend
                    .delete(&format!("{}{}", IP_INDEX_PREFIX, ip))
                    .await;
            }
        }
        if !session.sid.is_empty() {
            if self.by_sid.remove_if(&session.sid, |_, v| *v == uuid).is_some() {
                let _ = self
                    .backend
                    .delete(&format!("{}{}", SID_INDEX_PREFIX, session.sid))
                    .await;
            }
        }

        debug!(uuid = %uuid, "Session cleaned up");
    }

    /// Reload persisted sessions after a restart and re-arm timers for
    /// the ones still live
    pub async fn rehydrate(self: &Arc<Self>) -> Result<usize, CoreError> {
        let keys = self
            .backend
            .keys(&format!("{}*", SESSION_PREFIX))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let mut loaded = 0;
        let now = now_unix();
        for key in keys {
            let Some(raw) = self
                .backend
                .get(&key)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?
            else {
                continue;
            };
            let session: Session = match serde_json::from_slice(&raw) {
                Ok(session) => session,
                Err(e) => {
                    warn!(%key, error = %e, "Failed to parse persisted session");
                    continue;
                }
            };

            let uuid = session.uuid;
            self.by_username.insert(session.username.clone(), uuid);
            if let Some(ip) = session.ip {
                self.by_ip.insert(ip, uuid);
            }
            if !session.sid.is_empty() {
                self.by_sid.insert(session.sid.clone(), uuid);
            }

            if session.is_active() && session.expires_at > now {
                self.arm_timer(uuid, (session.expires_at - now) as u64);
            }

            self.sessions.insert(uuid, Arc::new(Mutex::new(session)));
            loaded += 1;
        }

        info!(count = loaded, "Loaded existing sessions");
        Ok(loaded)
    }

    /// Drain for shutdown: final sync, optionally asking every active
    /// session's NAS to disconnect first
    pub async fn shutdown(self: &Arc<Self>) {
        if self.config.disconnect_on_shutdown {
            if let Some(disconnect) = &self.disconnect {
                let snapshots = self.list_sessions().await;
                let mut dispatched = 0;
                for session in snapshots.iter().filter(|s| s.is_active()) {
                    if let Some(ip) = session.ip {
                        if let Err(e) = disconnect
                            .disconnect_session(&session.username, &session.sid, ip, &session.nas_spec)
                            .await
                        {
                            error!(username = %session.username, error = %e,
                                "Failed to disconnect session on shutdown");
                        }
                        dispatched += 1;
                    }
                }
                info!(count = dispatched, "Disconnected active sessions on shutdown");
            }
        }

        self.sync_all_sessions().await;
        info!("Session service stopped");
    }

    // ---- timers ----

    fn arm_timer(self: &Arc<Self>, uuid: Uuid, timeout_secs: u64) {
        let service = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            if let Err(e) = service.expire_session(uuid).await {
                debug!(uuid = %uuid, error = %e, "Expiry timer found no session");
            }
        });

        if let Some(previous) = self.timers.insert(uuid, handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self, uuid: Uuid) {
        if let Some((_, handle)) = self.timers.remove(&uuid) {
            handle.abort();
        }
    }

    // ---- lookups ----

    fn session_arc(&self, uuid: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&uuid).map(|e| e.value().clone())
    }

    fn find_arc_by_sid(&self, sid: &str) -> Option<Arc<Mutex<Session>>> {
        let uuid = self.by_sid.get(sid).map(|e| *e.value())?;
        self.session_arc(uuid)
    }

    fn find_arc_by_ip(&self, ip: Ipv4Addr) -> Option<Arc<Mutex<Session>>> {
        let uuid = self.by_ip.get(&ip).map(|e| *e.value())?;
        self.session_arc(uuid)
    }

    pub async fn get_session(&self, uuid: Uuid) -> Option<Session> {
        let entry = self.session_arc(uuid)?;
        let session = entry.lock().await;
        Some(session.clone())
    }

    pub async fn find_by_username(&self, username: &str) -> Option<Session> {
        let uuid = self.by_username.get(username).map(|e| *e.value())?;
        self.get_session(uuid).await
    }

    pub async fn find_by_ip(&self, ip: Ipv4Addr) -> Option<Session> {
        let entry = self.find_arc_by_ip(ip)?;
        let session = entry.lock().await;
        Some(session.clone())
    }

    pub async fn find_by_sid(&self, sid: &str) -> Option<Session> {
        let entry = self.find_arc_by_sid(sid)?;
        let session = entry.lock().await;
        Some(session.clone())
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        let entries: Vec<Arc<Mutex<Session>>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            sessions.push(entry.lock().await.clone());
        }
        sessions
    }

    async fn sessions_for_user(&self, username: &str) -> Vec<Session> {
        let mut result = Vec::new();
        for session in self.list_sessions().await {
            if session.username == username {
                result.push(session);
            }
        }
        result
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.list_sessions().await;
        let mut stats = SessionStats {
            total_sessions: sessions.len(),
            active_sessions: 0,
            stopping_sessions: 0,
            stopped_sessions: 0,
            expired_sessions: 0,
            max_sessions: self.config.max_sessions,
        };
        for session in &sessions {
            match session.status {
                SessionStatus::Active => stats.active_sessions += 1,
                SessionStatus::Stopping => stats.stopping_sessions += 1,
                SessionStatus::Stopped => stats.stopped_sessions += 1,
                SessionStatus::Expired => stats.expired_sessions += 1,
                SessionStatus::New => {}
            }
        }
        stats
    }

    // ---- persistence ----

    async fn save_session(&self, session: &Session) -> Result<(), CoreError> {
        let raw = serde_json::to_vec(session)?;
        self.backend
            .set(&format!("{}{}", SESSION_PREFIX, session.uuid), &raw, None)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(())
    }
}
