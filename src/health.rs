//! Active health checking.
//!
//! The core only consumes each backend's liveness flag. This optional
//! component probes every backend on a fixed interval and flips the flag
//! after a configured number of consecutive failures or passes.

use crate::{
    backend::Backend, balancer::LoadBalancer, config::HealthCheckConfig, metrics, GatewayError,
    Result,
};
use dashmap::DashMap;
use futures_util::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::interval};
use tracing::{debug, info, warn};

/// Consecutive probe results for one backend.
#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    failures: u32,
    successes: u32,
}

/// Periodic prober for every backend of every route.
pub struct HealthChecker {
    config: HealthCheckConfig,
    /// (route path, balancer) pairs to probe
    targets: Vec<(String, Arc<LoadBalancer>)>,
    client: reqwest::Client,
    /// Streaks keyed by "route|backend"
    streaks: DashMap<String, Streak>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, targets: Vec<(String, Arc<LoadBalancer>)>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build health check client: {}", e)))?;

        Ok(Self {
            config,
            targets,
            client,
            streaks: DashMap::new(),
        })
    }

    /// Probe until a shutdown signal arrives.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Health checker probing {} routes every {}ms",
            self.targets.len(),
            self.config.interval_ms
        );
        let mut ticker = interval(Duration::from_millis(self.config.interval_ms));

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all().await,
                _ = shutdown.recv() => {
                    info!("Health checker received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Run one probe round over all backends concurrently.
    pub async fn check_all(&self) {
        let probes = self.targets.iter().flat_map(|(route, balancer)| {
            balancer
                .backends()
                .into_iter()
                .map(move |backend| (route.as_str(), backend))
        });

        join_all(probes.map(|(route, backend)| async move {
            let passed = self.probe(&backend).await;
            self.record(route, &backend, passed);
        }))
        .await;
    }

    async fn probe(&self, backend: &Backend) -> bool {
        let url = format!(
            "{}://{}{}",
            backend.scheme(),
            backend.authority(),
            self.config.path
        );

        match self.client.get(&url).send().await {
            Ok(response) => {
                let passed = self.status_passes(response.status().as_u16());
                if !passed {
                    debug!(backend = backend.name(), status = %response.status(), "Health probe failed");
                }
                passed
            }
            Err(e) => {
                debug!(backend = backend.name(), error = %e, "Health probe failed");
                false
            }
        }
    }

    fn status_passes(&self, status: u16) -> bool {
        match self.config.expected_status {
            Some(expected) => status == expected,
            None => (200..300).contains(&status),
        }
    }

    fn record(&self, route: &str, backend: &Backend, passed: bool) {
        let mut streak = self
            .streaks
            .entry(format!("{}|{}", route, backend.name()))
            .or_default();

        if passed {
            streak.successes = streak.successes.saturating_add(1);
            streak.failures = 0;
        } else {
            streak.failures = streak.failures.saturating_add(1);
            streak.successes = 0;
        }

        let alive = backend.is_alive();
        if alive && streak.failures >= self.config.unhealthy_threshold {
            backend.set_alive(false);
            metrics::record_health_transition(backend.name(), false);
            warn!(
                route,
                backend = backend.name(),
                failures = streak.failures,
                "Backend marked dead"
            );
        } else if !alive && streak.successes >= self.config.healthy_threshold {
            backend.set_alive(true);
            metrics::record_health_transition(backend.name(), true);
            info!(route, backend = backend.name(), "Backend marked alive");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_backend, unused_addr};

    fn create_test_config(unhealthy_threshold: u32, healthy_threshold: u32) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_ms: 20,
            timeout_ms: 500,
            path: "/health".to_string(),
            expected_status: None,
            unhealthy_threshold,
            healthy_threshold,
        }
    }

    fn balancer_for(name: &str, destination: String) -> Arc<LoadBalancer> {
        Arc::new(
            LoadBalancer::with_backends([Backend::new(name, &destination, 1).unwrap()]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_unreachable_backend_marked_dead_after_threshold() {
        let balancer = balancer_for("gone", format!("http://{}", unused_addr()));
        let checker =
            HealthChecker::new(create_test_config(2, 1), vec![("/r".to_string(), balancer.clone())])
                .unwrap();
        let backend = balancer.find("gone").unwrap();

        checker.check_all().await;
        assert!(backend.is_alive(), "one failure is below the threshold");

        checker.check_all().await;
        assert!(!backend.is_alive());
        assert!(balancer.select_backend().is_none());
    }

    #[tokio::test]
    async fn test_recovered_backend_marked_alive() {
        let addr = spawn_backend("back").await;
        let balancer = balancer_for("back", format!("http://{}", addr));
        let backend = balancer.find("back").unwrap();
        backend.set_alive(false);

        let checker =
            HealthChecker::new(create_test_config(3, 1), vec![("/r".to_string(), balancer.clone())])
                .unwrap();
        checker.check_all().await;

        assert!(backend.is_alive());
        assert_eq!(balancer.select_backend().unwrap().name(), "back");
    }

    #[tokio::test]
    async fn test_expected_status_mismatch_counts_as_failure() {
        let addr = spawn_backend("strict").await;
        let balancer = balancer_for("strict", format!("http://{}", addr));
        let mut config = create_test_config(1, 1);
        config.expected_status = Some(204);

        let checker = HealthChecker::new(config, vec![("/r".to_string(), balancer.clone())]).unwrap();
        checker.check_all().await;

        assert!(!balancer.find("strict").unwrap().is_alive());
    }

    #[test]
    fn test_status_passes() {
        let checker = HealthChecker::new(create_test_config(1, 1), Vec::new()).unwrap();
        assert!(checker.status_passes(200));
        assert!(checker.status_passes(204));
        assert!(!checker.status_passes(301));
        assert!(!checker.status_passes(503));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let balancer = balancer_for("gone", format!("http://{}", unused_addr()));
        let checker = Arc::new(
            HealthChecker::new(create_test_config(1, 1), vec![("/r".to_string(), balancer.clone())])
                .unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(checker.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("health checker did not stop")
            .unwrap();
        assert!(!balancer.find("gone").unwrap().is_alive());
    }
}
