use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the bridge
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener and forwarding settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Service registry / request log storage
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port (default: 5001)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Token required for mutating management calls.
    /// If not set, the management API is open.
    pub admin_token: Option<String>,

    /// Timeout for a single upstream call in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Value for Access-Control-Allow-Origin (default: "*", empty disables CORS headers)
    #[serde(default = "default_cors_allow_origin")]
    pub cors_allow_origin: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address {}:{}: {}", self.bind, self.port, e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cors_origin(&self) -> Option<&str> {
        if self.cors_allow_origin.is_empty() {
            None
        } else {
            Some(&self.cors_allow_origin)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
            admin_token: None,
            request_timeout_secs: default_request_timeout(),
            cors_allow_origin: default_cors_allow_origin(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Insert the sample services when the registry is empty at startup
    #[serde(default = "default_seed_samples")]
    pub seed_samples: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            seed_samples: default_seed_samples(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    5001
}

fn default_request_timeout() -> u64 {
    30
}

fn default_cors_allow_origin() -> String {
    "*".to_string()
}

fn default_database_path() -> String {
    "data/bridge.db".to_string()
}

fn default_seed_samples() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.request_timeout_secs == 0 {
            errors.push("server.request_timeout_secs must be greater than 0".to_string());
        }

        if let Err(e) = self.server.bind_addr() {
            errors.push(e.to_string());
        }

        if matches!(self.server.admin_token.as_deref(), Some("")) {
            errors.push("server.admin_token must not be empty when set".to_string());
        }

        if self.database.path.is_empty() {
            errors.push("database.path must not be empty".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
