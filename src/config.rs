//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub actor: ActorConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Storage backend selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Path to SQLite database file (ignored by the memory backend)
    pub path: PathBuf,
}

/// The single local account
#[derive(Debug, Clone, Deserialize)]
pub struct ActorConfig {
    /// Preferred username (e.g., "me")
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub summary: String,
}

/// Federation behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// RSA modulus size for generated keys
    pub key_bits: usize,
    /// Allowed distance between a signed Date header and now
    pub signature_max_skew_seconds: i64,
    /// Lifetime of a cached remote actor document
    pub actor_cache_ttl_seconds: u64,
    /// Maximum number of cached remote actors
    pub actor_cache_capacity: u64,
    /// Permit fetches and deliveries to loopback/private hosts
    pub allow_private_hosts: bool,
    /// Domains whose Follow requests are answered with Reject
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    pub user_agent: String,
    pub request_timeout_seconds: u64,
    pub delivery: DeliveryConfig,
}

impl FederationConfig {
    pub fn actor_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.actor_cache_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Return true when `host` or one of its parent domains is blocked.
    pub fn is_domain_blocked(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.blocked_domains.iter().any(|blocked| {
            let blocked = blocked.trim().trim_end_matches('.').to_ascii_lowercase();
            !blocked.is_empty()
                && (host == blocked || host.ends_with(&format!(".{}", blocked)))
        })
    }
}

/// Outbound delivery retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (SOLOFED__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("server.domain", "localhost:8080")?
            .set_default("database.backend", "sqlite")?
            .set_default("database.path", "data/solofed.db")?
            .set_default("actor.handle", "me")?
            .set_default("actor.display_name", "Me")?
            .set_default("actor.summary", "")?
            .set_default("federation.key_bits", 2048)?
            .set_default("federation.signature_max_skew_seconds", 300)?
            .set_default("federation.actor_cache_ttl_seconds", 3600)?
            .set_default("federation.actor_cache_capacity", 10_000)?
            .set_default("federation.allow_private_hosts", false)?
            .set_default("federation.user_agent", concat!("solofed/", env!("CARGO_PKG_VERSION")))?
            .set_default("federation.request_timeout_seconds", 30)?
            .set_default("federation.delivery.max_attempts", 5)?
            .set_default("federation.delivery.initial_backoff_ms", 1000)?
            .set_default("federation.delivery.max_backoff_ms", 60_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SOLOFED")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// URI of the local actor
    pub fn actor_uri(&self) -> String {
        format!("{}/users/{}", self.server.base_url(), self.actor.handle)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;
        const MIN_KEY_BITS: usize = 1024;

        let handle = self.actor.handle.trim();
        if handle.is_empty()
            || !handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(AppError::Config(
                "actor.handle must be non-empty and contain only [A-Za-z0-9_.-]".to_string(),
            ));
        }

        if self.federation.key_bits < MIN_KEY_BITS {
            return Err(AppError::Config(format!(
                "federation.key_bits must be at least {}",
                MIN_KEY_BITS
            )));
        }

        if self.federation.delivery.max_attempts == 0 {
            return Err(AppError::Config(
                "federation.delivery.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.federation.signature_max_skew_seconds <= 0 {
            return Err(AppError::Config(
                "federation.signature_max_skew_seconds must be greater than 0".to_string(),
            ));
        }

        if is_local_server_domain(&self.server.domain) {
            tracing::warn!(
                domain = %self.server.domain,
                protocol = %self.server.protocol,
                "Serving a local domain; remote instances will not be able to reach this actor"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
