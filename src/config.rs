//! Gateway configuration.
//!
//! The whole route table is read once at startup from a YAML, JSON or TOML
//! file and validated before anything binds a socket.

use crate::{backend::Backend, GatewayError, Result};
use hyper::{header::HeaderName, http::HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, net::SocketAddr, path::Path, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub cors: Option<CorsConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Upper bound on draining in-flight requests after a termination signal
    pub shutdown_timeout_secs: u64,
    /// Upstream timeout for routes without their own `timeout_ms`
    pub upstream_timeout_ms: u64,
}

/// A logical route group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub routes: Vec<RouteDetail>,
}

/// A path prefix and the backends eligible to serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDetail {
    pub path: String,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub destination: String,
    /// Signed so that non-positive values reach validation instead of failing to parse
    #[serde(default = "default_weight")]
    pub weight: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub path: String,
    /// `None` accepts any 2xx status
    pub expected_status: Option<u16>,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

fn default_weight() -> i64 {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            shutdown_timeout_secs: 30,
            upstream_timeout_ms: 30_000,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 10_000,
            timeout_ms: 2_000,
            path: "/health".to_string(),
            expected_status: None,
            unhealthy_threshold: 3,
            healthy_threshold: 1,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:8081".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

impl GatewayConfig {
    /// Load and validate a configuration file; the format follows the extension.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| GatewayError::Io {
            message: format!("{}: {}", path.display(), e),
        })?;

        let config: GatewayConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            // Default to YAML
            _ => serde_yaml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse YAML configuration from memory and validate it.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_socket_addr("server.listen_addr", &self.server.listen_addr)?;
        if self.metrics.enabled {
            parse_socket_addr("metrics.listen_addr", &self.metrics.listen_addr)?;
        }
        if self.admin.enabled {
            parse_socket_addr("admin.listen_addr", &self.admin.listen_addr)?;
        }

        if self.server.upstream_timeout_ms == 0 {
            return Err(GatewayError::config(
                "server.upstream_timeout_ms must be greater than 0",
            ));
        }

        if self.routes.is_empty() {
            return Err(GatewayError::config("at least one route group is required"));
        }

        let mut prefixes = HashSet::new();
        for group in &self.routes {
            if group.name.trim().is_empty() {
                return Err(GatewayError::config("route group name cannot be empty"));
            }

            for detail in &group.routes {
                if !detail.path.starts_with('/') {
                    return Err(GatewayError::config(format!(
                        "route path '{}' in group '{}' must start with '/'",
                        detail.path, group.name
                    )));
                }
                if detail.timeout_ms == Some(0) {
                    return Err(GatewayError::config(format!(
                        "timeout_ms of route '{}' must be greater than 0",
                        detail.path
                    )));
                }
                if !prefixes.insert(detail.path.as_str()) {
                    return Err(GatewayError::config(format!(
                        "duplicate route path '{}'",
                        detail.path
                    )));
                }

                let mut names = HashSet::new();
                for backend in &detail.backends {
                    if backend.name.trim().is_empty() {
                        return Err(GatewayError::config(format!(
                            "backend name cannot be empty in route '{}'",
                            detail.path
                        )));
                    }
                    if !names.insert(backend.name.as_str()) {
                        return Err(GatewayError::DuplicateBackend {
                            backend: backend.name.clone(),
                        });
                    }
                    backend.build()?;
                }
            }
        }

        if let Some(cors) = &self.cors {
            cors.validate()?;
        }
        self.health_check.validate()?;

        Ok(())
    }
}

impl BackendConfig {
    /// Build the runtime backend, rejecting bad targets and weights.
    pub fn build(&self) -> Result<Backend> {
        Backend::new(self.name.clone(), &self.destination, self.weight)
    }
}

impl RouteDetail {
    /// Upstream timeout for this route, falling back to `default`.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

impl CorsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.allowed_methods.iter().any(|m| m == "*") || self.allowed_headers.iter().any(|h| h == "*") {
            return Err(GatewayError::config(
                "CORS methods and headers must be listed explicitly",
            ));
        }
        if self.allow_credentials && self.allows_any_origin() {
            return Err(GatewayError::config(
                "CORS origin '*' cannot be combined with allow_credentials",
            ));
        }
        self.origins()?;
        self.methods()?;
        self.headers()?;
        Ok(())
    }

    /// `*` in the origin list allows every origin.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }

    pub fn origins(&self) -> Result<Vec<HeaderValue>> {
        self.allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| {
                    GatewayError::config(format!("invalid CORS origin '{}': {}", origin, e))
                })
            })
            .collect()
    }

    pub fn methods(&self) -> Result<Vec<Method>> {
        self.allowed_methods
            .iter()
            .map(|method| {
                Method::from_bytes(method.as_bytes()).map_err(|e| {
                    GatewayError::config(format!("invalid CORS method '{}': {}", method, e))
                })
            })
            .collect()
    }

    pub fn headers(&self) -> Result<Vec<HeaderName>> {
        self.allowed_headers
            .iter()
            .map(|header| {
                HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                    GatewayError::config(format!("invalid CORS header '{}': {}", header, e))
                })
            })
            .collect()
    }
}

impl HealthCheckConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval_ms == 0 || self.timeout_ms == 0 {
            return Err(GatewayError::config(
                "health_check interval_ms and timeout_ms must be greater than 0",
            ));
        }
        if self.unhealthy_threshold == 0 || self.healthy_threshold == 0 {
            return Err(GatewayError::config(
                "health_check thresholds must be at least 1",
            ));
        }
        if !self.path.starts_with('/') {
            return Err(GatewayError::config("health_check path must start with '/'"));
        }
        Ok(())
    }
}

pub(crate) fn parse_socket_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| GatewayError::config(format!("invalid {} '{}': {}", field, value, e)))
}
