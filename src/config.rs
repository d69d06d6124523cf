//! Process Configuration
//!
//! Read once from the environment at start, validated, then handed down as
//! plain structs. Nothing below `main` looks at the environment.

use std::time::Duration;

use crate::leaderboard::engine::EngineConfig;
use crate::network::server::ServerConfig;
use crate::telemetry::relay::RelayConfig;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but unparsable.
    #[error("Invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },
}

/// Metadata service credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCredentials {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
}

/// Everything the binary needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Subscriber listener
    pub server: ServerConfig,
    /// Telemetry relay connection
    pub relay: RelayConfig,
    /// Engine timing
    pub engine: EngineConfig,
    /// Metadata service access, when both halves are set
    pub catalog: Option<CatalogCredentials>,
}

impl AppConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            bind_host: var("BIND_HOST").unwrap_or(server_defaults.bind_host.clone()),
            port: parse(&var, "PORT", server_defaults.port)?,
            max_connections: parse(&var, "MAX_CONNECTIONS", server_defaults.max_connections)?,
            ..server_defaults
        };

        let relay_defaults = RelayConfig::default();
        let relay = RelayConfig {
            host: var("INSIM_HOST").unwrap_or(relay_defaults.host),
            port: parse(&var, "INSIM_PORT", relay_defaults.port)?,
            ..relay_defaults
        };

        let catalog = match (var("LFS_CLIENT_ID"), var("LFS_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(CatalogCredentials { client_id, client_secret }),
            _ => None,
        };

        Ok(Self {
            server,
            relay,
            engine: EngineConfig::default(),
            catalog,
        })
    }

    /// Per-lookup budget of the metadata service.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.lookup_timeout_ms)
    }
}

fn parse<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}
