//! Error taxonomy for provider access and preloading.

use thiserror::Error;

/// Errors surfaced by the remote collection provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No username was supplied.
    #[error("a username is required")]
    InvalidInput,
    /// The provider does not know the user.
    #[error("user {0:?} does not exist on BoardGameGeek")]
    UserNotFound(String),
    /// The collection is private or contains no owned items.
    #[error("collection for {0:?} is private or has no owned games")]
    CollectionPrivateOrEmpty(String),
    /// Transport-level failure after the retry budget was exhausted.
    #[error("provider unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),
    /// The provider answered with a hard HTTP error status.
    #[error("provider returned HTTP {0}")]
    Http(u16),
    /// The provider payload could not be parsed.
    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

/// Errors surfaced by the preload coordinator.
#[derive(Debug, Error)]
pub enum PreloadError {
    /// A provider call failed after local retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The preload was cancelled by a newer request. Expected during
    /// normal operation and never shown to the user as a failure.
    #[error("preload aborted")]
    Aborted,
}

impl PreloadError {
    /// True for cancellation, which is an expected outcome rather
    /// than a reportable failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, PreloadError::Aborted)
    }
}
