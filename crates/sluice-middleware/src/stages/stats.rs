//! Per-route request statistics.

use crate::strategy::{BoxFuture, Param, Strategy, StrategyResult};
use sluice_core::{Session, INTERNAL_ERROR_CODE};
use sluice_telemetry::metrics;
use std::time::Instant;

/// Strategy name.
pub const NAME: &str = "stats";

/// Route label used when the session has no matched route.
pub const UNROUTED: &str = "unrouted";

/// Counts requests per route and client type, and queues a deferred action
/// recording route latency. Never fails.
///
/// Metrics are labelled with the matched descriptor's route, or
/// [`UNROUTED`] outside an executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsStrategy;

impl StatsStrategy {
    /// Creates the strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Strategy for StatsStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "route hit counter and latency"
    }

    fn error_code(&self) -> u64 {
        INTERNAL_ERROR_CODE
    }

    fn execute<'a>(
        &'a self,
        session: &'a mut Session,
        _param: &'a Param,
    ) -> BoxFuture<'a, StrategyResult> {
        Box::pin(async move {
            let route = session.route().unwrap_or(UNROUTED).to_string();
            metrics::record_route_hit(&route, session.client_type());
            tracing::debug!(request_id = %session.request_id(), route = %route, "stats recorded");

            let started = Instant::now();
            session.add_deferred(move || metrics::record_route_latency(&route, started.elapsed()));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[tokio::test]
    async fn test_queues_one_deferred_action() {
        let mut session = Session::new();
        StatsStrategy::new()
            .execute(&mut session, &Param::none())
            .await
            .unwrap();
        assert_eq!(session.deferred_len(), 1);
    }

    #[test]
    fn test_route_label_comes_from_session() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            for id in 1..=3 {
                let mut session = Session::from_request(
                    http::Method::GET,
                    format!("/api/user/{id}"),
                    http::HeaderMap::new(),
                    None,
                );
                session.set_route("GET /api/user");
                tokio_test::block_on(StatsStrategy::new().execute(&mut session, &Param::none()))
                    .unwrap();
            }
        });

        let output = handle.render();
        assert!(output.contains("route=\"GET /api/user\""));
        assert!(!output.contains("/api/user/1"));
    }

    #[test]
    fn test_records_hit_and_latency() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            let mut session = Session::new();
            tokio_test::block_on(StatsStrategy::new().execute(&mut session, &Param::none()))
                .unwrap();
            for action in session.take_deferred() {
                action();
            }
        });

        let output = handle.render();
        assert!(output.contains("sluice_route_hits_total"));
        assert!(output.contains("route=\"unrouted\""));
        assert!(output.contains("client_type=\"web\""));
        assert!(output.contains("sluice_route_latency_seconds"));
    }
}
