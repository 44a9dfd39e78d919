use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

/// Poll period for the open conversation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Admin keys that MUST NOT be accepted.
const PLACEHOLDER_ADMIN_KEYS: &[&str] = &["change-me", "SuperBasedAdmin"];

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,
    pub bucket_dir: PathBuf,
    pub public_url: String,
    /// `None` disables admin elevation entirely.
    pub admin_key: Option<String>,
    /// Where the admin-mode flag is persisted between runs.
    pub state_path: PathBuf,
    pub poll_interval: Duration,
    pub listing_ttl: chrono::Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: Some(PathBuf::from("treetrade.db")),
            bucket_dir: PathBuf::from("./bucket"),
            public_url: "http://localhost:3000/storage".to_string(),
            admin_key: None,
            state_path: PathBuf::from("treetrade-state.json"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            listing_ttl: chrono::Duration::hours(treetrade_db::DEFAULT_LISTING_TTL_HOURS),
        }
    }
}

impl ClientConfig {
    /// Reads `TREETRADE_*` variables from the process environment.
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("TREETRADE_DB_PATH") {
            config.db_path = if path == ":memory:" { None } else { Some(path.into()) };
        }
        if let Some(dir) = lookup("TREETRADE_BUCKET_DIR") {
            config.bucket_dir = dir.into();
        }
        if let Some(url) = lookup("TREETRADE_PUBLIC_URL") {
            config.public_url = url;
        }
        if let Some(path) = lookup("TREETRADE_STATE_PATH") {
            config.state_path = path.into();
        }
        if let Some(ms) = lookup("TREETRADE_POLL_INTERVAL_MS") {
            let ms: u64 = ms.parse().context("TREETRADE_POLL_INTERVAL_MS must be an integer")?;
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(hours) = lookup("TREETRADE_LISTING_TTL_HOURS") {
            let hours: i64 = hours.parse().context("TREETRADE_LISTING_TTL_HOURS must be an integer")?;
            config.listing_ttl = chrono::Duration::hours(hours);
        }

        config.admin_key = match lookup("TREETRADE_ADMIN_KEY") {
            Some(key) if key.is_empty() || PLACEHOLDER_ADMIN_KEYS.contains(&key.as_str()) => {
                warn!("TREETRADE_ADMIN_KEY is empty or a placeholder; admin mode is disabled");
                None
            }
            other => other,
        };

        Ok(config)
    }
}
