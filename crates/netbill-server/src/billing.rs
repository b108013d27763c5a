//! Charging algorithms
//!
//! Plans bind an authorization algorithm and an accounting algorithm by
//! name (`module:function`; the module segment is advisory and kept only
//! for compatibility with existing plan rows). Algorithms read their
//! parameters from the account's opaque `plan_data` map and may return a
//! modified copy, which the session layer flushes back on sync.

pub mod algorithms;
pub mod plan_data;

pub use algorithms::{
    seconds_of_day_now, AccountOutcome, AlgorithmKind, AuthOutcome, Decision, RejectReason,
};
pub use plan_data::PlanData;

/// Split an algorithm name into its advisory module and the function that
/// selects behavior. Bare names get the builtin module.
pub fn split_algo_name(name: &str) -> (&str, &str) {
    match name.split_once(':') {
        Some((module, function)) => (module, function),
        None => ("algo_builtin", name),
    }
}
