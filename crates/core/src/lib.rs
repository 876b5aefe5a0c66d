#![warn(clippy::all, missing_docs)]

//! Core domain logic for geekshelf.
//!
//! This crate hosts the cache store, the BoardGameGeek provider
//! client, collection normalization, the preload coordinator, and the
//! filter engine used by the terminal frontend and any future
//! frontends.

pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod models;
pub mod normalize;
pub mod preload;
pub mod provider;

pub use cache::{CacheStats, CacheStore};
pub use config::AppConfig;
pub use error::{PreloadError, ProviderError};
pub use filter::{filter_games, GameFilters, PlayerCountFilter};
pub use models::GameRecord;
pub use preload::{PreloadStatus, Preloader};
pub use provider::{BggClient, CollectionProvider};
