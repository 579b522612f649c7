//! Gateway server lifecycle: listener, middleware, side components and
//! graceful shutdown.

use crate::{
    admin,
    config::{parse_socket_addr, CorsConfig, GatewayConfig},
    gateway::Gateway,
    health::HealthChecker,
    metrics, GatewayError, Result,
};
use hyper::{
    server::conn::AddrStream,
    service::{make_service_fn, service_fn},
    Body, Request, Server,
};
use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc};
use tokio::{signal, sync::broadcast};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Owns the gateway and every component started alongside it.
pub struct GatewayServer {
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    /// Shutdown signal broadcaster
    shutdown_sender: broadcast::Sender<()>,
}

impl GatewayServer {
    /// Build the gateway from `config`; fails on any invalid route.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let gateway = Arc::new(Gateway::from_config(&config)?);
        let (shutdown_sender, _) = broadcast::channel(16);

        Ok(Self {
            config,
            gateway,
            shutdown_sender,
        })
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Start every component and serve until SIGTERM, CTRL+C or
    /// [`trigger_shutdown`](Self::trigger_shutdown).
    pub async fn run(&self) -> Result<()> {
        self.start_components()?;

        let (addr, server) = self.bind()?;
        info!("Gateway listening on {}", addr);

        let sender = self.shutdown_sender.clone();
        let mut programmatic = self.shutdown_sender.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => {
                    let _ = sender.send(());
                }
                _ = programmatic.recv() => {}
            }
        });

        server.await?;
        info!("Gateway shut down");
        Ok(())
    }

    /// Bind the public listener.
    ///
    /// Returns the bound address and a future that serves until shutdown is
    /// triggered, then drains in-flight requests for at most
    /// `server.shutdown_timeout_secs`.
    pub fn bind(&self) -> Result<(SocketAddr, impl Future<Output = Result<()>> + Send + 'static)> {
        let addr = parse_socket_addr("server.listen_addr", &self.config.server.listen_addr)?;
        let builder = Server::try_bind(&addr).map_err(|e| GatewayError::Bind {
            address: addr.to_string(),
            reason: e.to_string(),
        })?;

        let cors = self.config.cors.as_ref().map(cors_layer).transpose()?;
        let gateway = self.gateway.clone();

        let make_service = make_service_fn(move |_conn: &AddrStream| {
            let gateway = gateway.clone();
            let service = ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(cors.clone())
                .service(service_fn(move |req: Request<Body>| {
                    let gateway = gateway.clone();
                    async move { Ok::<_, Infallible>(gateway.handle(req).await) }
                }));

            async move { Ok::<_, Infallible>(service) }
        });

        let server = builder.serve(make_service);
        let local_addr = server.local_addr();

        let mut stop_accepting = self.shutdown_sender.subscribe();
        let mut drain_deadline = self.shutdown_sender.subscribe();
        let drain_timeout = self.config.server.shutdown_timeout();

        let server = server.with_graceful_shutdown(async move {
            let _ = stop_accepting.recv().await;
            info!("Gateway stopped accepting connections");
        });

        let serving = async move {
            tokio::pin!(server);
            tokio::select! {
                result = &mut server => {
                    result.map_err(|e| GatewayError::server(format!("gateway server error: {}", e)))
                }
                _ = async {
                    let _ = drain_deadline.recv().await;
                    tokio::time::sleep(drain_timeout).await;
                } => {
                    warn!("Shutdown timeout of {:?} exceeded, dropping in-flight requests", drain_timeout);
                    Ok(())
                }
            }
        };

        Ok((local_addr, serving))
    }

    /// Trigger programmatic shutdown.
    pub fn trigger_shutdown(&self) -> Result<()> {
        self.shutdown_sender
            .send(())
            .map(|_| ())
            .map_err(|e| GatewayError::internal(format!("Failed to send shutdown signal: {}", e)))
    }

    fn start_components(&self) -> Result<()> {
        if self.config.metrics.enabled {
            metrics::init_metrics(&self.config.metrics)?;
        }

        if self.config.health_check.enabled {
            let targets = self
                .gateway
                .proxy()
                .balancers()
                .map(|(path, balancer)| (path.to_string(), balancer.clone()))
                .collect();
            let checker = Arc::new(HealthChecker::new(self.config.health_check.clone(), targets)?);
            tokio::spawn(checker.run(self.shutdown_sender.subscribe()));
        }

        if self.config.admin.enabled {
            let addr = parse_socket_addr("admin.listen_addr", &self.config.admin.listen_addr)?;
            let mut shutdown = self.shutdown_sender.subscribe();
            let (bound, server) = admin::serve(self.gateway.clone(), addr, async move {
                let _ = shutdown.recv().await;
            })?;
            info!("Admin API listening on {}", bound);
            tokio::spawn(server);
        }

        Ok(())
    }
}

/// CORS layer for the public listener.
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
    let origin = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.origins()?)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(config.methods()?)
        .allow_headers(config.headers()?)
        .allow_credentials(config.allow_credentials))
}

/// Wait for SIGTERM or CTRL+C.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received CTRL+C signal");
            }
            _ = wait_for_sigterm() => {
                info!("Received SIGTERM signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received CTRL+C signal");
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            // CTRL+C still works; never resolve so it is the only trigger.
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
