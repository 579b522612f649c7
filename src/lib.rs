//! Moment Gateway: a prefix-routing HTTP reverse proxy with smooth weighted
//! round-robin load balancing.

pub mod admin;
pub mod backend;
pub mod balancer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod router;
pub mod server;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use balancer::LoadBalancer;
pub use config::{BackendConfig, GatewayConfig, RouteConfig, RouteDetail};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use proxy::Proxy;
pub use router::{RouteTable, Router};
pub use server::GatewayServer;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
