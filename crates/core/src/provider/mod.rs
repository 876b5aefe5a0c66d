//! Remote collection/game-metadata provider.

/// HTTP client for the BoardGameGeek XML API.
pub mod client;
/// Boundary parsing of provider XML payloads.
pub mod xml;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use client::BggClient;
pub use xml::{parse_collection, parse_details, RawCollectionItem, RawGameItem};

/// Seam over the remote provider so the coordinator can run against
/// an in-memory double in tests.
#[async_trait]
pub trait CollectionProvider: Send + Sync {
    /// Fetch the raw owned-items XML for a user.
    async fn fetch_collection(&self, username: &str) -> Result<String, ProviderError>;

    /// Fetch the raw details XML for a batch of item ids.
    async fn fetch_details(&self, ids: &[String]) -> Result<String, ProviderError>;
}
