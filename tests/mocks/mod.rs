pub mod mock_cluster;
pub mod mock_discovery;
pub mod recording;

pub use mock_cluster::{MockCluster, NodeScript};
pub use mock_discovery::MockDiscovery;
pub use recording::{RecordingReportWriter, RecordingSink};
