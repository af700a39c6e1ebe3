//! Service-level configuration, read once from the environment at
//! startup (spec.md §6 "Configuration"). Grounded on
//! `examples/original_source/service/config.py`; generalized here into
//! a typed, fallible constructor instead of the Python module's
//! import-time side effects.

use crate::error::LockError;

/// Bare peer names that have a conventional default port, matching the
/// Python prototype's `_port_for`.
fn default_port_for(name: &str) -> Option<u16> {
    match name {
        "svca" => Some(8000),
        "svcb" => Some(8001),
        "svcc" => Some(8002),
        _ => None,
    }
}

/// Resolves one `PEERS` token into a full base URL. A token already
/// carrying a scheme is used verbatim; a bare name maps through
/// [`default_port_for`]; anything else is a configuration error.
fn resolve_peer(token: &str) -> Result<String, LockError> {
    if token.starts_with("http://") || token.starts_with("https://") {
        return Ok(token.to_string());
    }
    match default_port_for(token) {
        Some(port) => Ok(format!("http://{}:{}", token, port)),
        None => Err(LockError::BadRequest(format!(
            "peer token {:?} has no default port; use a full URL",
            token
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub port: u16,
    pub peers: Vec<String>,
}

impl ServiceConfig {
    /// Reads `SERVICE_NAME`, `PORT`, and `PEERS` from the process
    /// environment, applying the same defaults as the Python prototype.
    pub fn from_env() -> Result<Self, LockError> {
        let service_name = std::env::var("SERVICE_NAME").unwrap_or_else(|_| "svca".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);
        let raw_peers = std::env::var("PEERS").unwrap_or_default();
        let peers = raw_peers
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(resolve_peer)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            service_name,
            port,
            peers,
        })
    }
}
