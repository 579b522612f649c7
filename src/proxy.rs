//! Request forwarding.
//!
//! The [`Proxy`] owns one [`LoadBalancer`] per route, built from the route
//! table at startup. Forwarding picks a backend, builds a fresh outbound
//! request with the route prefix stripped from the path, and turns every
//! upstream fault into a synthetic response so nothing escapes to the caller.

use crate::{
    balancer::LoadBalancer,
    backend::Backend,
    config::{BackendConfig, RouteDetail},
    metrics,
    router::RouteTable,
    GatewayError, Result,
};
use hyper::{
    client::HttpConnector,
    header::{HeaderValue, CONTENT_TYPE},
    Body, Client, Request, Response, StatusCode, Uri, Version,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// Pooled client shared by all routes.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Forwards requests to the backends of a resolved route.
pub struct Proxy {
    /// Load balancer per route, keyed by route path
    balancers: HashMap<String, Arc<LoadBalancer>>,
    client: UpstreamClient,
    default_timeout: Duration,
}

impl Proxy {
    /// Build one load balancer per route detail.
    ///
    /// Fails on the first invalid backend definition so a bad table never
    /// starts serving.
    pub fn new(table: &RouteTable, default_timeout: Duration) -> Result<Self> {
        let mut balancers = HashMap::new();

        for (group, detail) in table.details() {
            let backends = detail
                .backends
                .iter()
                .map(BackendConfig::build)
                .collect::<Result<Vec<_>>>()?;
            let balancer = LoadBalancer::with_backends(backends)?;

            info!(
                group = %group.name,
                route = %detail.path,
                backends = balancer.len(),
                "Registered route"
            );

            if balancers
                .insert(detail.path.clone(), Arc::new(balancer))
                .is_some()
            {
                return Err(GatewayError::config(format!(
                    "duplicate route path '{}'",
                    detail.path
                )));
            }
        }

        Ok(Self {
            balancers,
            client: build_client(),
            default_timeout,
        })
    }

    /// Load balancer serving `route_path`.
    pub fn balancer(&self, route_path: &str) -> Option<&Arc<LoadBalancer>> {
        self.balancers.get(route_path)
    }

    /// Every (route path, load balancer) pair, in no particular order.
    pub fn balancers(&self) -> impl Iterator<Item = (&str, &Arc<LoadBalancer>)> {
        self.balancers
            .iter()
            .map(|(path, balancer)| (path.as_str(), balancer))
    }

    /// Forward `req` to a backend of `route`.
    ///
    /// Always yields a response: 503 without contacting any upstream when no
    /// backend is available, 502 when the chosen backend fails.
    pub async fn forward(&self, req: Request<Body>, route: &RouteDetail) -> Response<Body> {
        match self.try_forward(req, route).await {
            Ok(response) => {
                metrics::record_outcome(metrics::Outcome::Forwarded);
                response
            }
            Err(err) => {
                err.log();
                metrics::record_outcome(metrics::Outcome::from_error(&err));
                error_response(&err)
            }
        }
    }

    async fn try_forward(&self, req: Request<Body>, route: &RouteDetail) -> Result<Response<Body>> {
        let backend = self
            .balancers
            .get(&route.path)
            .and_then(|balancer| balancer.select_backend())
            .ok_or_else(|| GatewayError::NoBackendAvailable {
                route: route.path.clone(),
            })?;
        metrics::record_selection(&route.path, backend.name());

        let method = req.method().clone();
        let original_path = req.uri().path().to_string();
        let outbound = build_outbound_request(req, &backend, &route.path)?;

        debug!(
            %method,
            path = %original_path,
            backend = backend.name(),
            target = %outbound.uri(),
            "Forwarding request"
        );

        let timeout = route.timeout(self.default_timeout);
        let start = Instant::now();
        let result = tokio::time::timeout(timeout, self.client.request(outbound)).await;
        metrics::record_upstream_duration(&route.path, start.elapsed());

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(GatewayError::Upstream {
                backend: backend.name().to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(GatewayError::UpstreamTimeout {
                backend: backend.name().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

fn build_client() -> UpstreamClient {
    let https_connector = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .build(https_connector)
}

/// Strip the matched route prefix from `path`.
///
/// The result always starts with `/`; a path equal to the prefix maps to `/`.
pub fn rewrite_path(path: &str, prefix: &str) -> String {
    let stripped = path.strip_prefix(prefix).unwrap_or(path);
    if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{}", stripped)
    }
}

/// Build the request sent upstream from the inbound one.
///
/// Scheme and authority come from the backend, the path is rewritten, the
/// query string, method, headers and body are carried over untouched.
fn build_outbound_request(req: Request<Body>, backend: &Backend, prefix: &str) -> Result<Request<Body>> {
    let (mut parts, body) = req.into_parts();

    let mut path_and_query = rewrite_path(parts.uri.path(), prefix);
    if let Some(query) = parts.uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    parts.uri = Uri::builder()
        .scheme(backend.scheme().clone())
        .authority(backend.authority().clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::internal(format!("failed to build upstream URI: {}", e)))?;
    // The upstream pool speaks HTTP/1.1 regardless of the inbound protocol.
    parts.version = Version::HTTP_11;

    Ok(Request::from_parts(parts, body))
}

/// Plain-text response for a request that could not be forwarded.
pub fn error_response(err: &GatewayError) -> Response<Body> {
    let mut response = Response::new(Body::from(err.user_message()));
    *response.status_mut() =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
