pub mod error;
pub mod rate_limit;
pub mod types;

pub use error::{ApiError, Result};
pub use rate_limit::{SlidingWindowLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
pub use types::{ApiProfile, ListMember, PublicMetrics};

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use types::Envelope;

const BASE_URL: &str = "https://api.x.com/2";

/// Total attempts per call: the first request plus three retries backing
/// off 1s/2s/4s, for 429s and transient server failures alike.
const MAX_ATTEMPTS: u32 = 4;

/// Upper bound on ids per batched user lookup.
pub const MAX_BATCH: usize = 100;

const USER_FIELDS: &str = "description,location,profile_image_url,public_metrics,url";

/// REST client for the platform profile API. Every request passes through
/// the sliding-window limiter, so the per-window quota holds even across
/// process restarts. All calls are reads and safe to retry.
pub struct XApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    limiter: SlidingWindowLimiter,
    cancel: CancellationToken,
}

impl XApiClient {
    pub fn new(token: String, limiter: SlidingWindowLimiter, cancel: CancellationToken) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: BASE_URL.to_string(),
            token,
            limiter,
            cancel,
        }
    }

    /// Point the client at a different API host (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Persist limiter state; called during orderly shutdown.
    pub async fn flush_limiter(&self) -> Result<()> {
        self.limiter.flush().await
    }

    /// Fetch one profile by account id. 404 is an empty result, not an error.
    pub async fn fetch_profile(&self, account_id: &str) -> Result<Option<ApiProfile>> {
        info!(account_id, "Fetching profile");
        let url = format!(
            "{}/users/{}?user.fields={}",
            self.base_url, account_id, USER_FIELDS
        );
        let Some(body) = self.get_json(&url).await? else {
            return Ok(None);
        };
        let envelope: Envelope<ApiProfile> = serde_json::from_value(body)?;
        Ok(envelope.data)
    }

    /// Fetch profiles for up to `MAX_BATCH` ids per API call. Unknown ids are
    /// simply absent from the result map.
    pub async fn fetch_profiles_batch(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, ApiProfile>> {
        let mut profiles = HashMap::new();
        for chunk in ids.chunks(MAX_BATCH) {
            let url = format!(
                "{}/users?ids={}&user.fields={}",
                self.base_url,
                chunk.join(","),
                USER_FIELDS
            );
            let Some(body) = self.get_json(&url).await? else {
                continue;
            };
            let envelope: Envelope<Vec<ApiProfile>> = serde_json::from_value(body)?;
            for profile in envelope.data.unwrap_or_default() {
                profiles.insert(profile.id.clone(), profile);
            }
        }
        info!(
            requested = ids.len(),
            returned = profiles.len(),
            "Fetched profile batch"
        );
        Ok(profiles)
    }

    /// Fetch all members of a list, following pagination to the end.
    pub async fn fetch_list_members(&self, list_id: &str) -> Result<Vec<ListMember>> {
        info!(list_id, "Fetching list members");
        let mut members: Vec<ListMember> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/lists/{}/members?max_results=100",
                self.base_url, list_id
            );
            if let Some(token) = &next_token {
                url.push_str(&format!("&pagination_token={token}"));
            }

            let Some(body) = self.get_json(&url).await? else {
                break;
            };
            let envelope: Envelope<Vec<ListMember>> = serde_json::from_value(body)?;
            members.extend(envelope.data.unwrap_or_default());

            next_token = envelope.meta.and_then(|m| m.next_token);
            if next_token.is_none() {
                break;
            }
        }

        info!(list_id, count = members.len(), "Fetched list members");
        Ok(members)
    }

    /// One throttled GET with the client's retry policy: 429 honors the
    /// server hint, 5xx and network failures back off 1s/2s/4s, 404 maps to
    /// `None`, 401/403 surface immediately.
    async fn get_json(&self, url: &str) -> Result<Option<serde_json::Value>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire(&self.cancel).await?;

            let resp = match self.client.get(url).bearer_auth(&self.token).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let err = ApiError::from(e);
                    if attempt < MAX_ATTEMPTS
                        && matches!(err, ApiError::TransientServer { .. })
                    {
                        let wait = Duration::from_secs(1 << (attempt - 1));
                        warn!(url, attempt, error = %err, "Request failed, retrying");
                        self.sleep(wait).await?;
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = resp.status().as_u16();
            match status {
                200..=299 => {
                    let body = resp
                        .json()
                        .await
                        .map_err(|e| ApiError::MalformedResponse(e.to_string()))?;
                    return Ok(Some(body));
                }
                404 => return Ok(None),
                401 | 403 => return Err(ApiError::Unauthorized { status }),
                429 => {
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok());
                    if attempt < MAX_ATTEMPTS {
                        let wait =
                            Duration::from_secs(retry_after.unwrap_or(1 << (attempt - 1)).max(1));
                        warn!(url, attempt, wait_s = wait.as_secs(), "Rate limited, backing off");
                        self.sleep(wait).await?;
                        continue;
                    }
                    return Err(ApiError::RateLimited { retry_after });
                }
                500..=599 => {
                    if attempt < MAX_ATTEMPTS {
                        let wait = Duration::from_secs(1 << (attempt - 1));
                        warn!(url, status, attempt, "Server error, backing off");
                        self.sleep(wait).await?;
                        continue;
                    }
                    let message = resp.text().await.unwrap_or_default();
                    return Err(ApiError::TransientServer {
                        status: Some(status),
                        message,
                    });
                }
                _ => {
                    let message = resp.text().await.unwrap_or_default();
                    return Err(ApiError::TransientServer {
                        status: Some(status),
                        message,
                    });
                }
            }
        }
    }

    async fn sleep(&self, wait: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
        }
    }
}
