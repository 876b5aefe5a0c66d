//! Declarative filtering over normalized game lists.
//!
//! Filters apply independently and conjunctively; afterwards unrated
//! games are dropped, the rest sorted by rating descending and capped.

use crate::models::GameRecord;

/// Player-count dimension of a filter query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerCountFilter {
    /// No constraint.
    #[default]
    Any,
    /// Exactly this many players.
    Exactly(u32),
}

/// Open-ended ceiling for the best-player-count filter: asking for 8
/// also matches every "8+" style bucket above it.
const BEST_COUNT_CEILING: u32 = 8;

/// Active filter dimensions. Unset dimensions match everything.
#[derive(Debug, Clone, Default)]
pub struct GameFilters {
    /// Case-insensitive substring against mechanism tags.
    pub mechanism: Option<String>,
    /// Case-insensitive substring against category tags.
    pub category: Option<String>,
    /// Supported player count.
    pub player_count: PlayerCountFilter,
    /// Community best-at player count.
    pub best_player_count: PlayerCountFilter,
    /// Inclusive complexity weight range.
    pub complexity: Option<(f64, f64)>,
    /// Inclusive playing time range, in minutes.
    pub game_length: Option<(u32, u32)>,
}

impl GameFilters {
    fn matches(&self, game: &GameRecord) -> bool {
        if let Some(needle) = &self.mechanism {
            if !any_tag_contains(&game.mechanisms, needle) {
                return false;
            }
        }
        if let Some(needle) = &self.category {
            if !any_tag_contains(&game.categories, needle) {
                return false;
            }
        }
        if let PlayerCountFilter::Exactly(count) = self.player_count {
            if !game.supports_players(count) {
                return false;
            }
        }
        if let PlayerCountFilter::Exactly(count) = self.best_player_count {
            if !best_count_matches(&game.best_player_counts, count) {
                return false;
            }
        }
        if let Some((min, max)) = self.complexity {
            if game.weight < min || game.weight > max {
                return false;
            }
        }
        if let Some((min, max)) = self.game_length {
            if game.playing_time_minutes < min || game.playing_time_minutes > max {
                return false;
            }
        }
        true
    }
}

/// Apply `filters` to `games`, drop unrated records, sort by rating
/// descending, and cap the result at `cap` entries.
pub fn filter_games(games: &[GameRecord], filters: &GameFilters, cap: usize) -> Vec<GameRecord> {
    let mut matched: Vec<GameRecord> = games
        .iter()
        .filter(|game| !game.is_unrated() && filters.matches(game))
        .cloned()
        .collect();
    matched.sort_by(|a, b| b.rating.partial_cmp(&a.rating).unwrap_or(std::cmp::Ordering::Equal));
    matched.truncate(cap);
    matched
}

fn any_tag_contains(tags: &[String], needle: &str) -> bool {
    let needle = needle.to_lowercase();
    tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
}

fn best_count_matches(best_counts: &[u32], wanted: u32) -> bool {
    best_counts.iter().any(|&count| {
        count == wanted || (wanted >= BEST_COUNT_CEILING && count >= BEST_COUNT_CEILING)
    })
}
