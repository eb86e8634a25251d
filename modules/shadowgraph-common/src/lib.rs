pub mod config;
pub mod counts;
pub mod error;
pub mod types;

pub use config::Config;
pub use counts::parse_approx_count;
pub use error::ShadowError;
pub use types::{
    EdgeDirection, EdgeSummary, EnrichmentPolicy, ErrorType, ListType, Provenance,
    ScrapeRunMetrics, ShadowAccount, ShadowEdge, normalize_username,
};
