use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectError>;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Navigation failed for {url}: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("Blocked by anti-automation gate at {url}")]
    Blocked { url: String },

    #[error("Session expired: redirected to login")]
    SessionExpired,

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Cookie bundle error: {0}")]
    Cookies(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<chromiumoxide::error::CdpError> for CollectError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        CollectError::Browser(err.to_string())
    }
}

impl CollectError {
    /// Errors that end the whole run, not just the current list.
    pub fn aborts_run(&self) -> bool {
        matches!(self, CollectError::Blocked { .. } | CollectError::SessionExpired)
    }
}
