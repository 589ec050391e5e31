//! Liveness check
//!
//! Reports status instead of raising: any failure yields the
//! "probe failed" value, never an error.

use serde_json::Value;
use tracing::debug;

use crate::handlers::{PING_FAILED, PING_OK};
use crate::metrics::Params;
use crate::target::TargetSession;
use crate::types::Result;

pub async fn ping(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    if let Err(e) = session.ping().await {
        debug!(error = %e, "ping failed");
        return Ok(Value::from(PING_FAILED));
    }

    Ok(Value::from(PING_OK))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::mock::MockSession;

    #[tokio::test]
    async fn alive_target_reports_ok() {
        let session = MockSession::new();
        let result = ping(&session, &Params::new()).await.unwrap();
        assert_eq!(result, Value::from(PING_OK));
    }

    #[tokio::test]
    async fn dead_target_reports_failed_without_error() {
        let session = MockSession::new().fail_ping();
        let result = ping(&session, &Params::new()).await.unwrap();
        assert_eq!(result, Value::from(PING_FAILED));
    }
}
