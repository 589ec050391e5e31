//! Request dispatcher
//!
//! Routes a metric key to its handler over a cached connection, under a
//! bounded deadline. The ping key is the one special case: a connection
//! that cannot be established is itself the measurement, so it reports
//! `0` instead of an error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProbeOptions;
use crate::conn::{ConnKey, ConnManager, Connect, MongoConnector};
use crate::handlers::PING_FAILED;
use crate::metrics::{MetricSet, KEY_PING};
use crate::target::TargetSession;
use crate::types::{ProbeError, Result};

/// The probe: metric table, options and the connection cache.
///
/// Built once, started once; [`Probe::export`] may then be called
/// concurrently until [`Probe::stop`] tears the cache down.
pub struct Probe<C>
where
    C: Connect,
    C::Session: TargetSession,
{
    options: ProbeOptions,
    /// Fallback deadline in seconds when the options leave the probe
    /// timeout unset.
    global_timeout: u64,
    metrics: MetricSet,
    manager: Option<Arc<ConnManager<C>>>,
}

impl<C> Probe<C>
where
    C: Connect,
    C::Session: TargetSession,
{
    pub fn new(options: ProbeOptions, global_timeout: u64) -> Self {
        Self {
            options,
            global_timeout,
            metrics: MetricSet::new(),
            manager: None,
        }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    /// Start the connection cache with the given session factory.
    pub fn start_with(&mut self, connector: C) {
        let keep_alive = Duration::from_secs(self.options.keep_alive);
        self.manager = Some(ConnManager::start(connector, keep_alive));
    }

    /// Drain the connection cache and stop its housekeeper. Further
    /// exports are refused.
    pub async fn stop(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.shutdown().await;
        }
    }

    /// Evaluate one request: resolve parameters, fetch (or create) the
    /// connection, and run the handler under the effective deadline.
    pub async fn export(&self, key: &str, raw_params: &[String]) -> Result<Value> {
        let Some(metric) = self.metrics.get(key) else {
            return Err(ProbeError::UnsupportedMetric(key.to_string()));
        };

        let manager = self
            .manager
            .as_ref()
            .ok_or_else(|| ProbeError::ConnectionFailed("probe is not started".into()))?;

        let params =
            metric.eval_params(raw_params, &self.options.sessions, self.options.default.as_ref())?;
        let conn_key = ConnKey::from_params(&params)?;

        let session = match manager.get_or_create(&conn_key).await {
            Ok(session) => session,
            // For the ping key an unreachable server is the answer, not
            // an error.
            Err(e) if key == KEY_PING => {
                debug!(target = %conn_key.uri, error = %e, "ping target unreachable");
                return Ok(Value::from(PING_FAILED));
            }
            Err(e) => {
                warn!(target = %conn_key.uri, error = %e, "connection failed");
                return Err(e);
            }
        };

        let deadline = effective_deadline(self.options.timeout, self.global_timeout);
        let handler = metric.handler();

        let result = tokio::time::timeout(
            Duration::from_secs(deadline),
            handler(&*session as &dyn TargetSession, &params),
        )
        .await
        .map_err(|_| ProbeError::Timeout(deadline))?;

        if let Err(e) = &result {
            debug!(key, target = %conn_key.uri, error = %e, "export failed");
        }

        result
    }
}

impl Probe<MongoConnector> {
    /// Start with the driver-backed session factory, using the probe
    /// timeout as the per-connection time budget.
    pub fn start(&mut self) {
        let timeout = Duration::from_secs(effective_deadline(
            self.options.timeout,
            self.global_timeout,
        ));
        self.start_with(MongoConnector::new(timeout));
    }
}

/// Seconds a request may take: the probe timeout when set, otherwise
/// the global fallback, never less than the fallback.
fn effective_deadline(probe_timeout: u64, global_timeout: u64) -> u64 {
    if probe_timeout == 0 {
        global_timeout
    } else {
        probe_timeout.max(global_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::handlers::PING_OK;
    use crate::metrics::{KEY_VERSION, PARAM_URI};
    use crate::target::mock::{MockConnector, MockSession};
    use bson::doc;

    fn started(session: MockSession) -> Probe<MockConnector> {
        let mut probe = Probe::new(ProbeOptions::default(), 3);
        probe.start_with(MockConnector::new(session));
        probe
    }

    #[test]
    fn deadline_prefers_the_larger_bound() {
        assert_eq!(effective_deadline(0, 3), 3);
        assert_eq!(effective_deadline(10, 3), 10);
        assert_eq!(effective_deadline(2, 3), 3);
    }

    #[tokio::test]
    async fn unknown_key_is_unsupported() {
        let probe = started(MockSession::new());

        let result = probe.export("mongodb.nonexistent", &[]).await;
        assert!(matches!(result, Err(ProbeError::UnsupportedMetric(_))));
    }

    #[tokio::test]
    async fn parameter_errors_surface_before_connecting() {
        let probe = started(MockSession::new());

        let raw: Vec<String> = vec!["tcp://localhost".into(), "u".into(), "p".into(), "x".into()];
        let result = probe.export(crate::metrics::KEY_PING, &raw).await;
        assert!(matches!(result, Err(ProbeError::TooManyParams)));
    }

    #[tokio::test]
    async fn ping_reports_zero_when_unreachable() {
        let mut probe = Probe::new(ProbeOptions::default(), 3);
        probe.start_with(MockConnector::refusing());

        let result = probe.export(crate::metrics::KEY_PING, &[]).await.unwrap();
        assert_eq!(result, Value::from(PING_FAILED));
    }

    #[tokio::test]
    async fn other_keys_propagate_connection_failures() {
        let mut probe = Probe::new(ProbeOptions::default(), 3);
        probe.start_with(MockConnector::refusing());

        let result = probe.export(KEY_VERSION, &[]).await;
        assert!(matches!(result, Err(ProbeError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn export_runs_the_handler() {
        let session = MockSession::new().with_command(
            "admin",
            "buildInfo",
            doc! { "version": "7.0.5", "ok": 1 },
        );
        let probe = started(session.clone());

        let result = probe.export(KEY_VERSION, &[]).await.unwrap();
        assert_eq!(result, Value::String("7.0.5".into()));

        let result = probe.export(crate::metrics::KEY_PING, &[]).await.unwrap();
        assert_eq!(result, Value::from(PING_OK));
    }

    #[tokio::test]
    async fn named_session_routes_the_connection() {
        let session = MockSession::new();
        let mut options = ProbeOptions::default();
        options.sessions.insert(
            "prod".into(),
            SessionConfig {
                uri: "tcp://db.example.com:27017".into(),
                user: "monitor".into(),
                password: "secret".into(),
                ..Default::default()
            },
        );

        let mut probe = Probe::new(options, 3);
        probe.start_with(MockConnector::new(session));

        let raw: Vec<String> = vec!["prod".into()];
        let result = probe.export(crate::metrics::KEY_PING, &raw).await.unwrap();
        assert_eq!(result, Value::from(PING_OK));

        // A plain parameter evaluation of the same request resolves the
        // stored URI, so the cache key is the session's target.
        let metric = probe.metrics().get(crate::metrics::KEY_PING).unwrap();
        let params = metric
            .eval_params(&raw, &probe.options().sessions, None)
            .unwrap();
        assert_eq!(params[PARAM_URI], "tcp://db.example.com:27017");
    }

    #[tokio::test]
    async fn stop_closes_cached_connections() {
        let session = MockSession::new();
        let mut probe = started(session.clone());

        probe.export(crate::metrics::KEY_PING, &[]).await.unwrap();
        assert_eq!(session.close_count(), 0);

        probe.stop().await;
        assert_eq!(session.close_count(), 1);

        // A stopped probe refuses further exports.
        let result = probe.export(crate::metrics::KEY_PING, &[]).await;
        assert!(matches!(result, Err(ProbeError::ConnectionFailed(_))));
    }
}
