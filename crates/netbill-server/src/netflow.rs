//! Flow-to-session dispatch
//!
//! Flow records arrive from the collector already decoded; the dispatcher
//! only decides which session owns the flow and in which direction, then
//! hands it to the session layer for classification and charging.

use crate::error::CoreError;
use crate::session::SessionService;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// One decoded flow sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub octets: u64,
    #[serde(default)]
    pub packets: u64,
    /// "in" (toward the subscriber) or "out"; inferred from session
    /// ownership when absent
    #[serde(default)]
    pub direction: Option<String>,
}

/// Outcome counters for a batch of flows
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub processed: usize,
    pub dropped: usize,
}

/// Maps flows onto their owning sessions
pub struct NetflowDispatcher {
    sessions: Arc<SessionService>,
}

impl NetflowDispatcher {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        NetflowDispatcher { sessions }
    }

    /// Dispatch one flow. Returns `true` when a session accepted it;
    /// flows for unknown addresses are dropped silently.
    pub async fn dispatch(&self, record: &FlowRecord) -> Result<bool, CoreError> {
        match record.direction.as_deref() {
            Some("in") => {
                self.sessions
                    .apply_flow("in", record.src_ip, record.dst_ip, record.octets, record.packets)
                    .await
            }
            Some("out") => {
                self.sessions
                    .apply_flow("out", record.src_ip, record.dst_ip, record.octets, record.packets)
                    .await
            }
            Some(other) => Err(CoreError::Input(format!("invalid direction: {}", other))),
            None => {
                // No hint: whichever end owns a session decides the direction
                if self
                    .sessions
                    .apply_flow("in", record.src_ip, record.dst_ip, record.octets, record.packets)
                    .await?
                {
                    return Ok(true);
                }
                self.sessions
                    .apply_flow("out", record.src_ip, record.dst_ip, record.octets, record.packets)
                    .await
            }
        }
    }

    /// Dispatch a batch, counting accepted and dropped flows
    pub async fn dispatch_batch(&self, records: &[FlowRecord]) -> Result<DispatchSummary, CoreError> {
        let mut summary = DispatchSummary::default();
        for record in records {
            if self.dispatch(record).await? {
                summary.processed += 1;
            } else {
                summary.dropped += 1;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::plan_data::PlanData;
    use crate::config::SessionConfig;
    use crate::disconnect::NasSpec;
    use crate::session::PrepareContext;
    use crate::state::MemoryStateBackend;
    use crate::tclass::TclassService;
    use serde_json::json;

    async fn dispatcher_with_session(ip: Ipv4Addr) -> (NetflowDispatcher, Arc<SessionService>) {
        let backend = Arc::new(MemoryStateBackend::new());
        let tclass = Arc::new(TclassService::new("internet"));
        let sessions = Arc::new(SessionService::new(
            backend,
            None,
            None,
            None,
            tclass,
            SessionConfig::default(),
        ));

        let plan_data = match json!({
            "INTERVALS": [[86400.0, {"internet": [[1, 0.01, 0.02]]}]]
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let uuid = sessions.init_session("alice").await.unwrap();
        sessions
            .prepare_session(
                uuid,
                PrepareContext {
                    account_id: 1,
                    plan_id: 1,
                    plan_data,
                    currency: 1,
                    balance: 10.0,
                    auth_algo: "prepaid_auth".to_string(),
                    acct_algo: "prepaid_auth".to_string(),
                    nas_spec: NasSpec::default(),
                },
            )
            .await
            .unwrap();
        sessions
            .start_session("alice", "s1", "AA:BB", ip)
            .await
            .unwrap();

        (NetflowDispatcher::new(sessions.clone()), sessions)
    }

    #[tokio::test]
    async fn test_inbound_flow_resolves_by_destination() {
        let subscriber = Ipv4Addr::new(10, 0, 0, 10);
        let (dispatcher, sessions) = dispatcher_with_session(subscriber).await;

        let accepted = dispatcher
            .dispatch(&FlowRecord {
                src_ip: Ipv4Addr::new(8, 8, 8, 8),
                dst_ip: subscriber,
                octets: 1_048_576,
                packets: 700,
                direction: Some("in".to_string()),
            })
            .await
            .unwrap();
        assert!(accepted);

        let session = sessions.find_by_ip(subscriber).await.unwrap();
        assert_eq!(session.in_octets, 1_048_576);
        assert!((session.amount - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_outbound_flow_resolves_by_source() {
        let subscriber = Ipv4Addr::new(10, 0, 0, 10);
        let (dispatcher, sessions) = dispatcher_with_session(subscriber).await;

        let accepted = dispatcher
            .dispatch(&FlowRecord {
                src_ip: subscriber,
                dst_ip: Ipv4Addr::new(8, 8, 8, 8),
                octets: 2_048,
                packets: 3,
                direction: Some("out".to_string()),
            })
            .await
            .unwrap();
        assert!(accepted);

        let session = sessions.find_by_ip(subscriber).await.unwrap();
        assert_eq!(session.out_octets, 2_048);
        assert_eq!(session.out_packets, 3);
    }

    #[tokio::test]
    async fn test_missing_hint_is_inferred() {
        let subscriber = Ipv4Addr::new(10, 0, 0, 10);
        let (dispatcher, sessions) = dispatcher_with_session(subscriber).await;

        let accepted = dispatcher
            .dispatch(&FlowRecord {
                src_ip: Ipv4Addr::new(8, 8, 8, 8),
                dst_ip: subscriber,
                octets: 512,
                packets: 1,
                direction: None,
            })
            .await
            .unwrap();
        assert!(accepted);
        assert_eq!(sessions.find_by_ip(subscriber).await.unwrap().in_octets, 512);
    }

    #[tokio::test]
    async fn test_unknown_subscriber_dropped() {
        let (dispatcher, _sessions) = dispatcher_with_session(Ipv4Addr::new(10, 0, 0, 10)).await;

        let summary = dispatcher
            .dispatch_batch(&[FlowRecord {
                src_ip: Ipv4Addr::new(8, 8, 8, 8),
                dst_ip: Ipv4Addr::new(10, 99, 99, 99),
                octets: 100,
                packets: 1,
                direction: Some("in".to_string()),
            }])
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.dropped, 1);
    }

    #[tokio::test]
    async fn test_invalid_direction_rejected() {
        let (dispatcher, _sessions) = dispatcher_with_session(Ipv4Addr::new(10, 0, 0, 10)).await;
        let err = dispatcher
            .dispatch(&FlowRecord {
                src_ip: Ipv4Addr::new(8, 8, 8, 8),
                dst_ip: Ipv4Addr::new(10, 0, 0, 10),
                octets: 100,
                packets: 1,
                direction: Some("sideways".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Input(_)));
    }
}
