use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Secrets that ship in examples and must never reach a running server.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    /// Base URL under which `storage_dir` is served.
    pub public_url: String,
    pub jwt_secret: String,
    pub typing_retention: Duration,
    pub cleanup_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("AGORA_JWT_SECRET").context("AGORA_JWT_SECRET is not set")?;
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("AGORA_JWT_SECRET is a placeholder; set a real secret");
        }

        let port = var("AGORA_PORT", "3000")
            .parse()
            .context("AGORA_PORT must be a port number")?;
        let typing_retention = var("AGORA_TYPING_RETENTION_SECS", "60")
            .parse()
            .context("AGORA_TYPING_RETENTION_SECS must be a number of seconds")?;
        let cleanup_interval: u64 = var("AGORA_CLEANUP_INTERVAL_SECS", "30")
            .parse()
            .context("AGORA_CLEANUP_INTERVAL_SECS must be a number of seconds")?;
        if cleanup_interval == 0 {
            bail!("AGORA_CLEANUP_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            host: var("AGORA_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("AGORA_DB_PATH", "agora.db")),
            storage_dir: PathBuf::from(var("AGORA_STORAGE_DIR", "./storage")),
            public_url: var("AGORA_PUBLIC_URL", "http://localhost:3000/storage"),
            jwt_secret,
            typing_retention: Duration::from_secs(typing_retention),
            cleanup_interval: Duration::from_secs(cleanup_interval),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
