//! Shared domain models.

use serde::{Deserialize, Serialize};

/// A normalized, owned board game from a user's collection.
///
/// Records are only ever built from non-expansion items; the
/// expansion filter runs before any record is materialized or cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Stable BoardGameGeek identifier.
    pub id: String,
    /// Primary display name.
    pub name: String,
    /// Publication year as the provider sends it (display only).
    #[serde(default)]
    pub year_published: String,
    /// Full-size box image URL.
    #[serde(default)]
    pub image: String,
    /// Thumbnail image URL.
    #[serde(default)]
    pub thumbnail: String,
    /// Provider-supplied description (display only).
    #[serde(default)]
    pub description: String,
    /// Minimum supported player count (>= 1).
    pub min_players: u32,
    /// Maximum supported player count (>= min_players).
    pub max_players: u32,
    /// Typical play length in minutes (0 when unknown).
    pub playing_time_minutes: u32,
    /// Community average rating; 0.0 means unrated.
    pub rating: f64,
    /// Overall boardgame rank; 0 means unranked.
    pub rank: u32,
    /// Complexity weight; 0.0 means unknown.
    #[serde(default)]
    pub weight: f64,
    /// Mechanism tags (order-insignificant).
    pub mechanisms: Vec<String>,
    /// Category tags (order-insignificant).
    pub categories: Vec<String>,
    /// Community-poll player counts at which the game plays best,
    /// sorted ascending; empty when the poll gives no signal.
    #[serde(default)]
    pub best_player_counts: Vec<u32>,
    /// Link to the game's page on the provider site.
    pub bgg_url: String,
}

impl GameRecord {
    /// Canonical external URL for a game id.
    pub fn url_for(id: &str) -> String {
        format!("https://boardgamegeek.com/boardgame/{id}")
    }

    /// True when the community has not rated the game.
    pub fn is_unrated(&self) -> bool {
        self.rating == 0.0
    }

    /// True when the game supports the given player count.
    pub fn supports_players(&self, count: u32) -> bool {
        self.min_players <= count && count <= self.max_players
    }
}
