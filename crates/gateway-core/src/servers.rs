//! Registry of configured upstream servers.
//!
//! Servers are created from configuration and never removed while the
//! process runs. Health pollers report through [`ServerRegistry::set_connected`].

use std::sync::{PoisonError, RwLock};

use gateway_types::{Server, ServerId};
use tracing::{info, warn};

use crate::config::ServerConfig;

/// The configured upstream servers and their connection state.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: RwLock<Vec<Server>>,
}

impl ServerRegistry {
    /// Build the registry from configuration. Every server starts
    /// disconnected.
    pub fn from_config(configs: &[ServerConfig]) -> Self {
        let servers = configs
            .iter()
            .map(|cfg| Server {
                id: cfg.resolved_id(),
                url: cfg.url.clone(),
                name: cfg.display_name(),
                connected: false,
                last_error: None,
            })
            .collect();
        Self {
            servers: RwLock::new(servers),
        }
    }

    /// All servers, in configuration order.
    pub fn list(&self) -> Vec<Server> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up one server.
    pub fn get(&self, id: &ServerId) -> Option<Server> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.id == *id)
            .cloned()
    }

    /// Number of configured servers.
    pub fn len(&self) -> usize {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no server is configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The id of the only configured server, if there is exactly one.
    pub fn sole_server(&self) -> Option<ServerId> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        match servers.as_slice() {
            [only] => Some(only.id.clone()),
            _ => None,
        }
    }

    /// Record the outcome of a health check. Returns `false` for an
    /// unknown server.
    pub fn set_connected(&self, id: &ServerId, connected: bool, error: Option<String>) -> bool {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(server) = servers.iter_mut().find(|s| s.id == *id) else {
            return false;
        };
        if server.connected != connected {
            if connected {
                info!(server_id = %id, "Server connected");
            } else {
                warn!(server_id = %id, error = ?error, "Server disconnected");
            }
        }
        server.connected = connected;
        server.last_error = if connected { None } else { error };
        true
    }
}
