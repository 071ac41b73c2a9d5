use std::time::Duration;

use chronos_engine::event_bus::Notice;
use chronos_engine::registry::ThresholdFlags;

use super::harness;
use crate::mocks::{MockCluster, NodeScript};
use crate::utils::record_json;

fn steady_script() -> NodeScript {
    NodeScript::new((0..50).map(|i| record_json(&[("cpu", i as f64)], false)).collect())
        .with_interval(Duration::from_millis(200))
}

/// Next node membership notice, skipping stat and timing notices
async fn next_membership(notices: &mut tokio::sync::mpsc::UnboundedReceiver<Notice>) -> Option<Notice> {
    let wait = async {
        while let Some(notice) = notices.recv().await {
            if matches!(notice, Notice::NodeAdded(_) | Notice::NodeRemoved(_)) {
                return Some(notice);
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(10), wait).await.ok().flatten()
}

#[tokio::test]
async fn test_departed_node_is_dropped() {
    crate::init_test_environment();
    let cluster = MockCluster::start().await.unwrap();
    cluster.set_node("a", steady_script());
    cluster.set_node("b", steady_script());
    let (a, b) = (cluster.node_url("a"), cluster.node_url("b"));

    let mut h = harness(&cluster, &[a.clone(), b.clone()], ThresholdFlags::default());
    h.service.start().await.unwrap();

    assert_eq!(next_membership(&mut h.channels.notices).await, Some(Notice::NodeAdded(a.clone())));
    assert_eq!(next_membership(&mut h.channels.notices).await, Some(Notice::NodeAdded(b.clone())));
    assert_eq!(h.service.engine().nodes().await, vec![a.clone(), b.clone()]);

    h.discovery.set_nodes([a.clone()]);
    assert_eq!(next_membership(&mut h.channels.notices).await, Some(Notice::NodeRemoved(b.clone())));
    assert!(!h.service.engine().has_node(&b).await);
    assert!(h.service.engine().has_node(&a).await);

    h.discovery.set_nodes([a.clone(), b.clone()]);
    assert_eq!(next_membership(&mut h.channels.notices).await, Some(Notice::NodeAdded(b.clone())));

    h.service.stop().await.unwrap();
    assert!(h.service.engine().nodes().await.is_empty());
}

#[tokio::test]
async fn test_lost_cluster_is_fatal() {
    crate::init_test_environment();
    let cluster = MockCluster::start().await.unwrap();
    cluster.set_node("a", steady_script());

    let mut h = harness(&cluster, &[cluster.node_url("a")], ThresholdFlags::default());
    h.service.start().await.unwrap();

    h.discovery.fail();
    let diagnostics = &mut h.channels.diagnostics;
    let fatal = async {
        while let Some(diagnostic) = diagnostics.recv().await {
            if diagnostic.fatal {
                return Some(diagnostic);
            }
        }
        None
    };
    let diagnostic = tokio::time::timeout(Duration::from_secs(10), fatal).await.unwrap().unwrap();
    assert!(diagnostic.fatal);
    assert_eq!(diagnostic.source, "monitor");
    assert_eq!(diagnostic.exit_code, 4);

    h.service.stop().await.unwrap();
}
