//! ISP session accounting and billing core
//!
//! An external RADIUS server fronts this service over HTTP/JSON: it asks
//! for authorization decisions, reports accounting events and forwards
//! flow samples. The core authorizes subscribers against the billing
//! database, hands out addresses from managed IP pools, tracks sessions
//! with per-class traffic accumulation, runs the plan's charging
//! algorithm per flow, and force-terminates sessions over RFC 3576
//! Disconnect-Request (with script and UDP fallbacks). A companion
//! processor debits monthly subscription fees.
//!
//! # Architecture
//!
//! - [`state`]: pluggable KV backend (memory or Valkey) holding sessions
//!   and pool entries
//! - [`ippool`]: atomic lease/renew/release with per-pool capacity
//! - [`tclass`]: balanced search tree over disjoint IPv4 ranges
//! - [`billing`]: the four charging algorithms over `plan_data`
//! - [`session`]: per-session state machine, timers, DB sync
//! - [`disconnect`]: RFC 3576 / script / PoD transports
//! - [`subscription`]: monthly fixed-fee debits with idempotency
//! - [`db`]: the SQL boundary toward the billing schema
//! - [`api`]: the axum route table

pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod disconnect;
pub mod error;
pub mod ippool;
pub mod iprange;
pub mod netflow;
pub mod session;
pub mod state;
pub mod subscription;
pub mod tclass;

pub use config::{Config, ConfigError};
pub use error::CoreError;
