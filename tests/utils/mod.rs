//! Helpers shared by the integration tests

use std::future::Future;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::Instant;

/// Render one stats stream record
pub fn record_json(stats: &[(&str, f64)], rebalance: bool) -> String {
    let stats: Map<String, Value> = stats.iter().map(|(name, value)| (name.to_string(), json!(value))).collect();
    json!({ "stats": stats, "rebalance": rebalance }).to_string()
}

/// Poll `condition` every 50 ms until it holds or `limit` passes
pub async fn wait_for<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let record: Value = serde_json::from_str(&record_json(&[("cpu", 1.5)], true)).unwrap();
        assert_eq!(record["stats"]["cpu"], json!(1.5));
        assert_eq!(record["rebalance"], json!(true));
    }

    #[tokio::test]
    async fn test_wait_for_gives_up() {
        assert!(!wait_for(Duration::from_millis(120), || async { false }).await);
        assert!(wait_for(Duration::from_millis(120), || async { true }).await);
    }
}
