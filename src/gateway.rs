//! Gateway composition: route resolution in front of forwarding.

use crate::{
    config::GatewayConfig,
    metrics::{self, Outcome},
    proxy::{error_response, Proxy},
    router::{RouteTable, Router},
    GatewayError, Result,
};
use futures_util::FutureExt;
use hyper::{Body, Request, Response};
use std::{future::Future, panic::AssertUnwindSafe};
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// Single request-handling entry point.
///
/// Holds no mutable state of its own beyond the router and proxy it was
/// built with, so one instance serves every connection concurrently.
pub struct Gateway {
    router: Router,
    proxy: Proxy,
}

impl Gateway {
    pub fn new(router: Router, proxy: Proxy) -> Self {
        Self { router, proxy }
    }

    /// Validate `config`, then build the route table and every route's load
    /// balancer.
    ///
    /// Any invalid route or backend definition aborts construction.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let table = RouteTable::new(config.routes.clone());
        let proxy = Proxy::new(&table, config.server.upstream_timeout())?;
        Ok(Self::new(Router::new(table), proxy))
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Handle one inbound request; never fails and never panics outward.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        async move {
            let resolved = match self.router.resolve(req.uri().path()) {
                Some(resolved) => resolved,
                None => {
                    let err = GatewayError::RouteNotFound {
                        path: req.uri().path().to_string(),
                    };
                    err.log();
                    metrics::record_outcome(Outcome::RouteNotFound);
                    return error_response(&err);
                }
            };

            let forward = self.proxy.forward(req, resolved.detail);
            contain_panic(&resolved.detail.path, forward).await
        }
        .instrument(span)
        .await
    }
}

/// Run `forward`, turning a panic inside it into a 500 response.
async fn contain_panic<F>(route: &str, forward: F) -> Response<Body>
where
    F: Future<Output = Response<Body>>,
{
    match AssertUnwindSafe(forward).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            let err = GatewayError::internal(format!("panic while forwarding on route {}", route));
            err.log();
            metrics::record_outcome(Outcome::InternalError);
            error_response(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{body_string, spawn_backend, unused_addr};
    use hyper::StatusCode;
    use std::net::SocketAddr;

    fn create_test_gateway(yaml: &str) -> Gateway {
        let config = GatewayConfig::from_yaml_str(yaml).unwrap();
        Gateway::from_config(&config).unwrap()
    }

    fn two_backend_config(a: SocketAddr, b: SocketAddr) -> String {
        format!(
            r#"
routes:
  - name: r
    routes:
      - path: /r
        backends:
          - {{ name: A, destination: "http://{a}", weight: 1 }}
          - {{ name: B, destination: "http://{b}", weight: 2 }}
"#
        )
    }

    async fn get(gateway: &Gateway, uri: &str) -> Response<Body> {
        gateway
            .handle(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let a = spawn_backend("A").await;
        let b = spawn_backend("B").await;
        let gateway = create_test_gateway(&two_backend_config(a, b));

        let response = get(&gateway, "/unknown").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "route not found");
    }

    #[tokio::test]
    async fn test_weighted_sequence_end_to_end() {
        let a = spawn_backend("A").await;
        let b = spawn_backend("B").await;
        let gateway = create_test_gateway(&two_backend_config(a, b));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let response = get(&gateway, "/r/ping").await;
            assert_eq!(response.status(), StatusCode::OK);
            seen.push(body_string(response).await);
        }
        assert_eq!(seen, ["B GET /ping", "A GET /ping", "B GET /ping"]);
    }

    #[tokio::test]
    async fn test_first_declared_prefix_wins() {
        let short = spawn_backend("short").await;
        let long = spawn_backend("long").await;
        let gateway = create_test_gateway(&format!(
            r#"
routes:
  - name: api
    routes:
      - path: /api
        backends:
          - {{ name: short, destination: "http://{short}" }}
      - path: /api/v2
        backends:
          - {{ name: long, destination: "http://{long}" }}
"#
        ));

        let response = get(&gateway, "/api/v2/x").await;
        assert_eq!(body_string(response).await, "short GET /v2/x");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let gone = unused_addr();
        let gateway = create_test_gateway(&format!(
            r#"
routes:
  - name: gone
    routes:
      - path: /gone
        backends:
          - {{ name: gone, destination: "http://{gone}" }}
"#
        ));

        let response = get(&gateway, "/gone/x").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_string(response).await, "backend error");
    }

    #[tokio::test]
    async fn test_all_backends_dead_is_service_unavailable() {
        let a = spawn_backend("A").await;
        let b = spawn_backend("B").await;
        let gateway = create_test_gateway(&two_backend_config(a, b));
        let balancer = gateway.proxy().balancer("/r").unwrap().clone();
        for backend in balancer.backends() {
            backend.set_alive(false);
        }

        let response = get(&gateway, "/r").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        balancer.find("A").unwrap().set_alive(true);
        let response = get(&gateway, "/r").await;
        assert_eq!(body_string(response).await, "A GET /");
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_weighted_shares() {
        let a = spawn_backend("A").await;
        let b = spawn_backend("B").await;
        let gateway = std::sync::Arc::new(create_test_gateway(&two_backend_config(a, b)));

        let tasks: Vec<_> = (0..30)
            .map(|_| {
                let gateway = gateway.clone();
                tokio::spawn(async move { body_string(get(&gateway, "/r").await).await })
            })
            .collect();

        let mut a_count = 0;
        for task in tasks {
            if task.await.unwrap().starts_with("A ") {
                a_count += 1;
            }
        }
        assert_eq!(a_count, 10);
    }

    #[tokio::test]
    async fn test_panic_while_forwarding_becomes_internal_error() {
        async fn exploding_forward() -> Response<Body> {
            panic!("forwarding blew up")
        }

        let response = contain_panic("/r", exploding_forward()).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "internal error");
    }

    #[tokio::test]
    async fn test_forward_without_panic_passes_through() {
        let response = contain_panic("/r", async { Response::new(Body::from("fine")) }).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "fine");
    }

    #[test]
    fn test_from_config_validates_programmatic_config() {
        let base = GatewayConfig::from_yaml_str(
            r#"
routes:
  - name: r
    routes:
      - path: /r
        backends:
          - { name: a, destination: "http://127.0.0.1:1" }
          - { name: b, destination: "http://127.0.0.1:2" }
"#,
        )
        .unwrap();

        let mut config = base.clone();
        config.routes[0].routes[0].path = String::new();
        assert!(matches!(
            Gateway::from_config(&config),
            Err(GatewayError::Config { .. })
        ));

        let mut config = base;
        config.routes[0].routes[0].backends[1].name = "a".to_string();
        assert!(matches!(
            Gateway::from_config(&config),
            Err(GatewayError::DuplicateBackend { .. })
        ));
    }

    #[test]
    fn test_invalid_backend_fails_fast() {
        let mut config = GatewayConfig::from_yaml_str(
            r#"
routes:
  - name: r
    routes:
      - path: /r
        backends:
          - { name: a, destination: "http://127.0.0.1:1" }
"#,
        )
        .unwrap();
        config.routes[0].routes[0].backends[0].destination = "::not-a-url".to_string();

        assert!(matches!(
            Gateway::from_config(&config),
            Err(GatewayError::InvalidTarget { .. })
        ));
    }
}
