use serde::Deserialize;

/// Profile record as returned by the user-lookup endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiProfile {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub profile_image_url: Option<String>,
    pub public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicMetrics {
    pub followers_count: Option<i64>,
    pub following_count: Option<i64>,
    pub tweet_count: Option<i64>,
    pub like_count: Option<i64>,
}

/// One entry of a list-members page.
#[derive(Debug, Clone, Deserialize)]
pub struct ListMember {
    pub id: String,
    pub username: String,
}

/// Standard `{"data": ..., "meta": ...}` envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: Option<T>,
    pub meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Meta {
    pub next_token: Option<String>,
}
