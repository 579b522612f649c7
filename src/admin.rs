//! Admin API: liveness of the gateway itself, a snapshot of the route
//! table, and manual backend liveness overrides.

use crate::{backend::Backend, gateway::Gateway, GatewayError, Result, VERSION};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, convert::Infallible, future::Future, net::SocketAddr, sync::Arc};
use tracing::info;
use warp::{http::StatusCode, Filter, Rejection, Reply};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: Option<T>) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            data,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteGroupStatus {
    pub name: String,
    pub routes: Vec<RouteStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteStatus {
    pub path: String,
    pub backends: Vec<BackendStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendStatus {
    pub name: String,
    pub destination: String,
    pub weight: u32,
    pub alive: bool,
    pub current_weight: i64,
}

impl BackendStatus {
    fn new(backend: &Backend, current_weight: i64) -> Self {
        Self {
            name: backend.name().to_string(),
            destination: backend.url().to_string(),
            weight: backend.weight(),
            alive: backend.is_alive(),
            current_weight,
        }
    }
}

/// Body of `PUT /routes/backends/liveness`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessUpdate {
    pub route: String,
    pub backend: String,
    pub alive: bool,
}

/// Bind the admin API; the returned future serves until `shutdown` resolves.
pub fn serve(
    gateway: Arc<Gateway>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static)> {
    warp::serve(routes(gateway))
        .try_bind_with_graceful_shutdown(addr, async move {
            shutdown.await;
            info!("Shutting down admin API");
        })
        .map_err(|e| GatewayError::Bind {
            address: addr.to_string(),
            reason: e.to_string(),
        })
}

pub fn routes(gateway: Arc<Gateway>) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    // GET /health
    let health = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "version": VERSION,
        }))
    });

    // GET /routes
    let list_routes = warp::path!("routes")
        .and(warp::get())
        .and(with_gateway(gateway.clone()))
        .and_then(handle_list_routes);

    // PUT /routes/backends/liveness
    let set_liveness = warp::path!("routes" / "backends" / "liveness")
        .and(warp::put())
        .and(warp::body::json())
        .and(with_gateway(gateway))
        .and_then(handle_set_liveness);

    health
        .or(list_routes)
        .or(set_liveness)
        .with(warp::log("admin_api"))
        .recover(handle_rejection)
}

fn with_gateway(
    gateway: Arc<Gateway>,
) -> impl Filter<Extract = (Arc<Gateway>,), Error = Infallible> + Clone {
    warp::any().map(move || gateway.clone())
}

/// Snapshot of every route in declaration order.
pub fn route_status(gateway: &Gateway) -> Vec<RouteGroupStatus> {
    gateway
        .router()
        .table()
        .groups()
        .iter()
        .map(|group| RouteGroupStatus {
            name: group.name.clone(),
            routes: group
                .routes
                .iter()
                .map(|detail| {
                    let backends = match gateway.proxy().balancer(&detail.path) {
                        Some(balancer) => {
                            let weights: HashMap<String, i64> =
                                balancer.current_weights().into_iter().collect();
                            balancer
                                .backends()
                                .iter()
                                .map(|backend| {
                                    let current = weights.get(backend.name()).copied();
                                    BackendStatus::new(backend, current.unwrap_or_default())
                                })
                                .collect()
                        }
                        None => Vec::new(),
                    };
                    RouteStatus {
                        path: detail.path.clone(),
                        backends,
                    }
                })
                .collect(),
        })
        .collect()
}

async fn handle_list_routes(gateway: Arc<Gateway>) -> std::result::Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&ApiResponse::success(
        "Routes listed successfully",
        Some(route_status(&gateway)),
    )))
}

async fn handle_set_liveness(
    update: LivenessUpdate,
    gateway: Arc<Gateway>,
) -> std::result::Result<impl Reply, Rejection> {
    let found = gateway.proxy().balancer(&update.route).and_then(|balancer| {
        let backend = balancer.find(&update.backend)?;
        backend.set_alive(update.alive);
        let current = balancer
            .current_weights()
            .into_iter()
            .find(|(name, _)| name == backend.name())
            .map_or(0, |(_, weight)| weight);
        Some(BackendStatus::new(&backend, current))
    });

    match found {
        Some(status) => {
            info!(
                route = %update.route,
                backend = %update.backend,
                alive = update.alive,
                "Backend liveness set via admin API"
            );
            Ok(warp::reply::with_status(
                warp::reply::json(&ApiResponse::success("Backend liveness updated", Some(status))),
                StatusCode::OK,
            ))
        }
        None => Ok(warp::reply::with_status(
            warp::reply::json(&ApiResponse::<()>::error(&format!(
                "Backend '{}' not found on route '{}'",
                update.backend, update.route
            ))),
            StatusCode::NOT_FOUND,
        )),
    }
}

async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid JSON body")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    };

    let json = warp::reply::json(&ApiResponse::<()>::error(message));
    Ok(warp::reply::with_status(json, code))
}
