pub mod cookies;
pub mod error;
pub mod extract;
pub mod selectors;
pub mod session;
pub mod types;

pub use error::{CollectError, Result};
pub use extract::Gate;
pub use session::BrowserSession;
pub use types::{CollectedProfile, CollectionStats, CollectorOptions, MemberRecord};

use async_trait::async_trait;

use shadowgraph_common::ListType;

/// Seam between the coordinator and the browser. The production
/// implementation drives a real session; tests script one.
#[async_trait]
pub trait ListCollector: Send + Sync {
    /// Navigate to a profile and extract its record, including claimed
    /// counts.
    async fn open_profile(&self, username: &str) -> Result<CollectedProfile>;

    /// Collect one follow list to exhaustion. Partial capture is not an
    /// error; the stats carry what happened.
    async fn collect_list(
        &self,
        username: &str,
        list_type: ListType,
    ) -> Result<(Vec<MemberRecord>, CollectionStats)>;

    /// Quick preview for the confirmation gate: the initially rendered
    /// entries only, no scrolling. Implementations without a cheap way to
    /// peek may return nothing.
    async fn probe_list(
        &self,
        _username: &str,
        _list_type: ListType,
        _limit: usize,
    ) -> Result<Vec<MemberRecord>> {
        Ok(Vec::new())
    }
}
