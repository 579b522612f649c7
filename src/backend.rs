//! Upstream backend instances.
//!
//! A [`Backend`] is one upstream service instance eligible to serve a route.
//! Identity, target and weight are fixed at construction; liveness is the
//! only mutable field and sits behind its own lock so that health updates
//! never contend with the owning load balancer.

use crate::{GatewayError, Result};
use hyper::http::uri::{Authority, Scheme};
use parking_lot::Mutex;
use url::{Position, Url};

/// One upstream instance of a route.
#[derive(Debug)]
pub struct Backend {
    name: String,
    url: Url,
    scheme: Scheme,
    authority: Authority,
    weight: u32,
    alive: Mutex<bool>,
}

impl Backend {
    /// Create a backend from its configured definition.
    ///
    /// Fails with [`GatewayError::InvalidTarget`] when `destination` is not an
    /// absolute `http`/`https` URL with a host, and with
    /// [`GatewayError::InvalidWeight`] when `weight` is below 1.
    /// New backends start alive.
    pub fn new(name: impl Into<String>, destination: &str, weight: i64) -> Result<Self> {
        let name = name.into();

        if weight < 1 || weight > u32::MAX as i64 {
            return Err(GatewayError::InvalidWeight {
                backend: name,
                weight,
            });
        }

        let invalid = |reason: String| GatewayError::InvalidTarget {
            backend: name.clone(),
            target: destination.to_string(),
            reason,
        };

        let url = Url::parse(destination).map_err(|e| invalid(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        let scheme = url
            .scheme()
            .parse::<Scheme>()
            .map_err(|e| invalid(e.to_string()))?;
        let authority = url[Position::BeforeHost..Position::AfterPort]
            .parse::<Authority>()
            .map_err(|e| invalid(e.to_string()))?;

        if url.path() != "/" {
            tracing::warn!(
                backend = %name,
                path = url.path(),
                "destination path is ignored; requests keep only the stripped route path"
            );
        }

        Ok(Self {
            name,
            url,
            scheme,
            authority,
            weight: weight as u32,
            alive: Mutex::new(true),
        })
    }

    /// Backend identity, unique within its route.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured destination URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Relative share of calls; always at least 1.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.lock() = alive;
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_backend_creation() {
        let backend = Backend::new("users-a", "http://127.0.0.1:9001", 3).unwrap();

        assert_eq!(backend.name(), "users-a");
        assert_eq!(backend.weight(), 3);
        assert_eq!(backend.scheme().as_str(), "http");
        assert_eq!(backend.authority().as_str(), "127.0.0.1:9001");
        assert!(backend.is_alive());
    }

    #[test]
    fn test_default_port_is_not_added_to_authority() {
        let backend = Backend::new("a", "https://users.internal", 1).unwrap();
        assert_eq!(backend.scheme().as_str(), "https");
        assert_eq!(backend.authority().as_str(), "users.internal");
    }

    #[test]
    fn test_ipv6_authority() {
        let backend = Backend::new("a", "http://[::1]:8080/", 1).unwrap();
        assert_eq!(backend.authority().as_str(), "[::1]:8080");
    }

    #[test]
    fn test_invalid_weight_rejected() {
        for weight in [0, -1, -100] {
            let err = Backend::new("a", "http://127.0.0.1:9001", weight).unwrap_err();
            assert_eq!(
                err,
                GatewayError::InvalidWeight {
                    backend: "a".to_string(),
                    weight,
                }
            );
        }
    }

    #[test]
    fn test_invalid_target_rejected() {
        for destination in ["", "not a url", "127.0.0.1:9001", "ftp://files.local", "http://"] {
            let err = Backend::new("a", destination, 1).unwrap_err();
            assert!(
                matches!(err, GatewayError::InvalidTarget { .. }),
                "{destination:?} produced {err:?}"
            );
        }
    }

    #[test]
    fn test_liveness_toggle() {
        let backend = Backend::new("a", "http://127.0.0.1:9001", 1).unwrap();

        backend.set_alive(false);
        assert!(!backend.is_alive());

        backend.set_alive(true);
        assert!(backend.is_alive());
    }

    #[test]
    fn test_concurrent_liveness_updates() {
        let backend = Arc::new(Backend::new("a", "http://127.0.0.1:9001", 1).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let backend = backend.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        backend.set_alive(i % 2 == 0);
                        let _ = backend.is_alive();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        backend.set_alive(true);
        assert!(backend.is_alive());
    }
}
