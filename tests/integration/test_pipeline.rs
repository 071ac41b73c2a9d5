use std::sync::Arc;
use std::time::Duration;

use chronos_engine::analyzer::AlertKind;
use chronos_engine::client::ClusterClient;
use chronos_engine::engine::Engine;
use chronos_engine::error::{EngineError, StreamError};
use chronos_engine::event_bus::EventBus;
use chronos_engine::metrics::EngineMetrics;
use chronos_engine::poller::{PollExit, PollOnce, Poller};
use chronos_engine::registry::{ThresholdFlags, MAX_VAL_SUFFIX, MEMORY_QUOTA_STAT};
use chronos_engine::service::ServiceStatus;
use tokio_util::sync::CancellationToken;

use super::{harness, test_config};
use crate::mocks::{MockCluster, NodeScript, RecordingSink};
use crate::utils::{record_json, wait_for};

#[tokio::test]
async fn test_threshold_breach_is_reported() {
    crate::init_test_environment();
    let cluster = MockCluster::start().await.unwrap();
    cluster.set_node(
        "n1",
        NodeScript::new(vec![
            record_json(&[("cpu", 10.0)], false),
            record_json(&[("cpu", 12.0)], false),
            record_json(&[("cpu", 90.0)], false),
        ])
        .with_interval(Duration::from_millis(200)),
    );
    let node = cluster.node_url("n1");

    let mut flags = ThresholdFlags::default();
    flags.insert(format!("cpu{MAX_VAL_SUFFIX}"), "50");
    let mut h = harness(&cluster, &[node.clone()], flags);

    h.service.start().await.unwrap();
    assert_eq!(h.service.status().await.status, ServiceStatus::Running);

    let writer = h.writer.clone();
    assert!(wait_for(Duration::from_secs(15), || {
        let writer = writer.clone();
        async move { !writer.is_empty() }
    })
    .await);

    let reported = h.writer.alerts();
    let alert = &reported[0];
    assert_eq!(alert.node, node);
    assert_eq!(alert.stat, "cpu");
    assert_eq!(alert.kind, AlertKind::AboveThreshold);
    assert_eq!(alert.observed, 90.0);
    assert!(alert.data.contains(&90.0));

    let text = &h.writer.texts()[0];
    assert!(text.starts_with(&format!("Node - {node}\nStat - cpu\n")));
    assert!(text.contains(" ALERT"));

    let status = h.service.status().await;
    assert!(status.counters.alerts_created >= 1);
    assert!(status.counters.reports_written >= 1);

    h.service.stop().await.unwrap();
    assert!(cluster.stream_requests() >= 1);
    assert_eq!(cluster.unauthorized_requests(), 0);
}

#[tokio::test]
async fn test_memory_quota_becomes_threshold() {
    crate::init_test_environment();
    let cluster = MockCluster::start().await.unwrap();
    cluster.set_node(
        "n1",
        NodeScript::new(vec![
            record_json(&[(MEMORY_QUOTA_STAT, 10.0)], false),
            record_json(&[(MEMORY_QUOTA_STAT, 500.0)], false),
        ])
        .with_interval(Duration::from_millis(200))
        .with_memory_quota(100.0),
    );
    let node = cluster.node_url("n1");
    let mut h = harness(&cluster, &[node.clone()], ThresholdFlags::default());

    h.service.start().await.unwrap();

    let engine = h.service.engine().clone();
    assert!(wait_for(Duration::from_secs(10), || {
        let engine = engine.clone();
        async move { engine.threshold(MEMORY_QUOTA_STAT).await.and_then(|t| t.max) == Some(100.0) }
    })
    .await);

    let store = h.service.store().clone();
    let writer = h.writer.clone();
    assert!(wait_for(Duration::from_secs(10), || {
        let store = store.clone();
        let writer = writer.clone();
        async move { !store.is_empty().await || !writer.is_empty() }
    })
    .await);

    let mut alerts = h.service.alerts().await;
    alerts.extend(h.writer.alerts());
    assert!(alerts
        .iter()
        .any(|alert| alert.stat == MEMORY_QUOTA_STAT && alert.kind == AlertKind::AboveThreshold));

    h.service.stop().await.unwrap();
}

#[tokio::test]
async fn test_poller_emits_one_event_per_breach() {
    crate::init_test_environment();
    let cluster = MockCluster::start().await.unwrap();
    cluster.set_node(
        "n1",
        NodeScript::new(vec![
            record_json(&[("cpu", 10.0)], false),
            record_json(&[("cpu", 90.0)], false),
            record_json(&[("cpu", 20.0)], false),
            record_json(&[("cpu", 75.0)], false),
        ])
        .with_interval(Duration::from_millis(50)),
    );
    let node = cluster.node_url("n1");

    let mut flags = ThresholdFlags::default();
    flags.insert(format!("cpu{MAX_VAL_SUFFIX}"), "50");
    let engine = Arc::new(Engine::with_capacity(16, flags));
    engine.add_node(&node).await;

    let config = test_config(&cluster);
    let client = Arc::new(ClusterClient::new(&config.cluster).unwrap());
    let sink = Arc::new(RecordingSink::new());
    let (bus, _receivers) = EventBus::channel();
    let mut poller = Poller::new(
        node.clone(),
        engine.clone(),
        client,
        sink.clone(),
        bus,
        Arc::new(EngineMetrics::new().unwrap()),
        CancellationToken::new(),
    );

    let exit = poller.poll_once().await;
    assert!(matches!(exit, PollExit::Retry(EngineError::Stream(StreamError::Eof))));

    let events = sink.events();
    let observed: Vec<f64> = events.iter().map(|event| event.observed).collect();
    assert_eq!(observed, vec![90.0, 75.0]);
    assert!(events
        .iter()
        .all(|event| event.node == node && event.stat == "cpu" && event.kind == AlertKind::AboveThreshold));
    assert!(events.iter().all(|event| event.threshold == 50.0));

    // Each event carries the arrival time stored for the breaching sample
    let times = engine.snapshot_arrival_times(&node).await.unwrap();
    assert_eq!(Some(events[1].triggered_at), times[times.len() - 1]);
    assert_eq!(Some(events[0].triggered_at), times[times.len() - 3]);
}
