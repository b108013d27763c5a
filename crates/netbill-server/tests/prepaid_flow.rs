//! End-to-end prepaid session flow over the in-memory backend:
//! lease, start, flow accounting, interim, stop, release.

use netbill_server::config::{ClassConfig, PoolConfig, SessionConfig};
use netbill_server::ippool::IpPoolService;
use netbill_server::session::{PrepareContext, SessionService, SessionStatus};
use netbill_server::state::MemoryStateBackend;
use netbill_server::tclass::TclassService;
use serde_json::json;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

const MB: u64 = 1_048_576;

async fn build_stack() -> (Arc<SessionService>, Arc<IpPoolService>) {
    let backend = Arc::new(MemoryStateBackend::new());

    let ippool = Arc::new(IpPoolService::new(backend.clone(), 300, "main", false));
    ippool
        .allocate(&[PoolConfig {
            name: "main".to_string(),
            ranges: vec!["10.0.0.10-10.0.0.12".to_string()],
        }])
        .await
        .unwrap();

    let tclass = Arc::new(TclassService::new("internet"));
    tclass
        .load(vec![ClassConfig {
            name: "local".to_string(),
            networks: vec!["10.0.0.0/8".to_string()],
            priority: 0,
            cost_in: 0.0,
            cost_out: 0.0,
        }])
        .await
        .unwrap();

    let config = SessionConfig {
        delay_stop: 0,
        ..Default::default()
    };

    let sessions = Arc::new(SessionService::new(
        backend,
        None,
        Some(ippool.clone()),
        None,
        tclass,
        config,
    ));

    (sessions, ippool)
}

fn prepaid_context() -> PrepareContext {
    let plan_data = match json!({
        "INTERVALS": [[86400.0, {"internet": [[1, 0.01, 0.01]]}]],
        "ACCESS_INTERVALS": [[86400.0, "accept"]]
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };

    PrepareContext {
        account_id: 1,
        plan_id: 1,
        plan_data,
        currency: 1,
        balance: 10.0,
        auth_algo: "algo_builtin:prepaid_auth".to_string(),
        acct_algo: "algo_builtin:prepaid_auth".to_string(),
        nas_spec: Default::default(),
    }
}

#[tokio::test]
async fn prepaid_happy_path() {
    let (sessions, ippool) = build_stack().await;

    // Accounting-Start: lease an address, activate the session
    let (ip, pool) = ippool.lease("main").await.unwrap();
    assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 10));
    assert_eq!(pool, "main");

    let uuid = sessions.init_session("u1").await.unwrap();
    sessions.prepare_session(uuid, prepaid_context()).await.unwrap();
    sessions.start_session("u1", "s1", "AA:BB", ip).await.unwrap();

    // NetFlow: 1 MiB inbound from the wider internet
    let matched = sessions
        .apply_flow("in", Ipv4Addr::new(8, 8, 8, 8), ip, MB, 700)
        .await
        .unwrap();
    assert!(matched);

    let session = sessions.get_session(uuid).await.unwrap();
    assert_eq!(session.in_octets, MB);
    assert!((session.amount - 0.01).abs() < 1e-9);
    assert_eq!(session.traffic_details["internet"].in_octets, MB);

    // Interim renews the deadline and the lease
    sessions.interim_update("s1").await.unwrap();
    let renewed = sessions.get_session(uuid).await.unwrap();
    assert!(renewed.is_active());
    assert!(renewed.expires_at >= session.expires_at);

    // Stop: finalization runs after delay_stop (0 here)
    sessions.stop_session("s1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped = sessions.get_session(uuid).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(stopped.stopped_at > 0);
    assert_eq!(stopped.in_octets, MB);

    // The address went back to the pool
    let entries = ippool.info().await.unwrap();
    let entry = entries
        .iter()
        .find(|e| e.ip == Ipv4Addr::new(10, 0, 0, 10))
        .unwrap();
    assert_eq!(entry.expires_at, 0);

    let stats = ippool.stats(Some("main")).await.unwrap();
    assert_eq!(stats[0].used_ips, 0);
    assert_eq!(stats[0].free_ips, 3);

    // And can be leased again
    let (again, _) = ippool.lease("main").await.unwrap();
    assert_eq!(again, Ipv4Addr::new(10, 0, 0, 10));
}

#[tokio::test]
async fn second_session_while_active_is_rejected() {
    let (sessions, ippool) = build_stack().await;
    let (ip, _) = ippool.lease("main").await.unwrap();

    let uuid = sessions.init_session("u1").await.unwrap();
    sessions.prepare_session(uuid, prepaid_context()).await.unwrap();
    sessions.start_session("u1", "s1", "", ip).await.unwrap();

    assert!(sessions.init_session("u1").await.is_err());
}

#[tokio::test]
async fn local_traffic_is_classified_and_free() {
    let (sessions, ippool) = build_stack().await;
    let (ip, _) = ippool.lease("main").await.unwrap();

    let uuid = sessions.init_session("u1").await.unwrap();
    sessions.prepare_session(uuid, prepaid_context()).await.unwrap();
    sessions.start_session("u1", "s1", "", ip).await.unwrap();

    // Peer inside 10.0.0.0/8 lands in the unpriced "local" class
    sessions
        .apply_flow("out", ip, Ipv4Addr::new(10, 200, 0, 1), 4 * MB, 100)
        .await
        .unwrap();

    let session = sessions.get_session(uuid).await.unwrap();
    assert_eq!(session.out_octets, 4 * MB);
    assert_eq!(session.amount, 0.0);
    assert_eq!(session.traffic_details["local"].out_octets, 4 * MB);
}
