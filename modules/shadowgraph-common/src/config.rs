use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
/// CLI flags override these; everything here has a usable default or is
/// optional so the binary can also run fully flag-driven.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file for the shadow store.
    pub db_path: PathBuf,

    /// Externally captured cookie bundle for the browser session.
    pub cookies_path: Option<PathBuf>,

    /// Chrome/Chromium binary override.
    pub chrome_binary: Option<PathBuf>,

    /// Bearer token for the platform API (backfill).
    pub bearer_token: Option<String>,

    /// Root data directory for run logs and rate-limiter state.
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("SHADOWGRAPH_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir().join("shadow.db")),
            cookies_path: env::var("SHADOWGRAPH_COOKIES").ok().map(PathBuf::from),
            chrome_binary: env::var("CHROME_BIN").ok().map(PathBuf::from),
            bearer_token: env::var("SHADOWGRAPH_BEARER_TOKEN").ok(),
            data_dir: data_dir(),
        }
    }

    /// Log the presence and size of each sensitive value, never the value.
    pub fn log_redacted(&self) {
        tracing::info!("SHADOWGRAPH_DB = {}", self.db_path.display());
        match &self.cookies_path {
            Some(p) => tracing::info!("SHADOWGRAPH_COOKIES = {}", p.display()),
            None => tracing::info!("SHADOWGRAPH_COOKIES = (unset)"),
        }
        match &self.bearer_token {
            Some(t) => tracing::info!("SHADOWGRAPH_BEARER_TOKEN = ({} chars)", t.len()),
            None => tracing::info!("SHADOWGRAPH_BEARER_TOKEN = (unset)"),
        }
        match &self.chrome_binary {
            Some(p) => tracing::info!("CHROME_BIN = {}", p.display()),
            None => tracing::info!("CHROME_BIN = (default)"),
        }
    }
}

/// Root data directory, controlled by `DATA_DIR` env var (default: `"data"`).
pub fn data_dir() -> PathBuf {
    PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()))
}
