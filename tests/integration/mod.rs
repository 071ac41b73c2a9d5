//! Cross-component tests running the engine service against the mock cluster

mod test_node_churn;
mod test_pipeline;

use std::sync::Arc;

use chronos_engine::client::ClusterClient;
use chronos_engine::config::EngineConfig;
use chronos_engine::registry::ThresholdFlags;
use chronos_engine::service::{EngineService, ServiceChannels};

use crate::mocks::{MockCluster, MockDiscovery, RecordingReportWriter};

/// Engine config pointing at `cluster` with short alert windows
pub(crate) fn test_config(cluster: &MockCluster) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cluster.connection_string = cluster.base_url();
    config.cluster.username = "admin".to_string();
    config.cluster.password = "secret".to_string();
    config.cluster.request_timeout_secs = 2;
    config.alerts.ttl_secs = 1;
    config.alerts.data_padding_secs = 2;
    config
}

pub(crate) struct Harness {
    pub service: EngineService,
    pub channels: ServiceChannels,
    pub discovery: Arc<MockDiscovery>,
    pub writer: Arc<RecordingReportWriter>,
}

/// Build a service whose discovery answers with `nodes` and whose streams
/// come from `cluster`
pub(crate) fn harness(cluster: &MockCluster, nodes: &[String], flags: ThresholdFlags) -> Harness {
    let config = test_config(cluster);
    let discovery = Arc::new(MockDiscovery::new(nodes.iter().cloned()));
    let writer = Arc::new(RecordingReportWriter::new());
    let client = Arc::new(ClusterClient::new(&config.cluster).unwrap());

    let (service, channels) =
        EngineService::new(&config, flags, discovery.clone(), client, writer.clone()).unwrap();
    Harness {
        service,
        channels,
        discovery,
        writer,
    }
}
