//! Turns raw provider items into canonical [`GameRecord`]s.
//!
//! Expansion filtering, rank resolution, and the suggested-player-
//! count poll heuristics all live here so every fetch path produces
//! identical records.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    error::PreloadError,
    models::GameRecord,
    provider::{
        parse_details,
        xml::{RawName, RawPollBucket, RawRank},
        CollectionProvider, RawCollectionItem, RawGameItem,
    },
};

/// Subtype tag the provider uses for expansion items.
pub const EXPANSION_SUBTYPE: &str = "boardgameexpansion";

/// Category tags that mark supplementary products.
const CATEGORY_DENYLIST: [&str; 3] = [
    "Expansion for Base-game",
    "Game System",
    "Collectible Components",
];

/// Name fragments that mark supplementary products. Best-effort: a
/// base game named "Booster" is a known false positive.
const EXPANSION_KEYWORDS: [&str; 9] = [
    "expansion",
    "extend",
    "extension",
    "add-on",
    "addon",
    "supplement",
    "booster",
    "promo",
    "mini expansion",
];

static BUCKET_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\+?$").expect("invalid bucket count regex"));

/// Vote thresholds for qualifying a poll bucket as a best player
/// count. Heuristic constants with no documented derivation, so they
/// stay configurable.
#[derive(Debug, Clone, Copy)]
pub struct PollThresholds {
    /// Minimum total votes in a bucket.
    pub min_votes: u32,
    /// Required (best + recommended) / not-recommended ratio.
    pub best_ratio: f64,
}

impl Default for PollThresholds {
    fn default() -> Self {
        Self {
            min_votes: 5,
            best_ratio: 1.5,
        }
    }
}

impl PollThresholds {
    /// Thresholds as configured.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_votes: config.min_poll_votes,
            best_ratio: config.poll_best_ratio,
        }
    }
}

/// Batch-fetch tuning, taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Item ids per detail request.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay: Duration,
    /// Poll qualification thresholds.
    pub thresholds: PollThresholds,
}

impl BatchOptions {
    /// Options as configured.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay(),
            thresholds: PollThresholds::from_config(config),
        }
    }
}

/// True when an item looks like an expansion or accessory rather
/// than a base game.
pub fn is_expansion(subtype: &str, name: &str, categories: &[String]) -> bool {
    if subtype == EXPANSION_SUBTYPE {
        return true;
    }
    if categories
        .iter()
        .any(|category| CATEGORY_DENYLIST.contains(&category.as_str()))
    {
        return true;
    }
    let name = name.to_lowercase();
    EXPANSION_KEYWORDS
        .iter()
        .any(|keyword| name.contains(keyword))
}

/// Drop expansion items from a collection listing.
pub fn filter_expansions(items: Vec<RawCollectionItem>) -> Vec<RawCollectionItem> {
    let before = items.len();
    let base: Vec<_> = items
        .into_iter()
        .filter(|item| !is_expansion(&item.subtype, &item.name, &[]))
        .collect();
    debug!("expansion filter kept {}/{before} items", base.len());
    base
}

/// Build a canonical record from a detailed item.
pub fn build_record(raw: &RawGameItem, thresholds: PollThresholds) -> GameRecord {
    let min_players = raw.min_players.max(1);
    let max_players = raw.max_players.max(min_players);
    GameRecord {
        id: raw.id.clone(),
        name: primary_name(&raw.names),
        year_published: raw.year_published.clone(),
        image: raw.image.clone(),
        thumbnail: raw.thumbnail.clone(),
        description: raw.description.clone(),
        min_players,
        max_players,
        playing_time_minutes: raw.playing_time,
        rating: raw.rating.max(0.0),
        rank: resolve_rank(&raw.ranks),
        weight: raw.weight.max(0.0),
        mechanisms: raw.mechanisms.clone(),
        categories: raw.categories.clone(),
        best_player_counts: best_player_counts(&raw.poll, thresholds),
        bgg_url: GameRecord::url_for(&raw.id),
    }
}

/// Primary display name, falling back through the shapes the
/// provider is known to send.
fn primary_name(names: &[RawName]) -> String {
    names
        .iter()
        .find(|name| name.kind == "primary")
        .or_else(|| names.first())
        .map(|name| name.value.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Resolve the overall boardgame rank through an ordered cascade:
/// exact name+type match, then the known boardgame subtype id, then
/// the first ranked subtype entry, then the first ranked entry at
/// all, then 0.
pub fn resolve_rank(ranks: &[RawRank]) -> u32 {
    let numeric = |rank: &RawRank| rank.value.trim().parse::<u32>().ok();

    ranks
        .iter()
        .find(|rank| rank.kind == "subtype" && rank.name == "boardgame")
        .and_then(numeric)
        .or_else(|| {
            ranks
                .iter()
                .find(|rank| rank.kind == "subtype" && rank.id == "1")
                .and_then(numeric)
        })
        .or_else(|| {
            ranks
                .iter()
                .filter(|rank| rank.kind == "subtype")
                .find_map(numeric)
        })
        .or_else(|| ranks.iter().find_map(numeric))
        .unwrap_or(0)
}

/// Player counts at which the community poll rates the game best,
/// sorted ascending and deduplicated.
pub fn best_player_counts(poll: &[RawPollBucket], thresholds: PollThresholds) -> Vec<u32> {
    let mut counts: Vec<u32> = poll
        .iter()
        .filter_map(|bucket| {
            let count = parse_bucket_count(&bucket.numplayers)?;
            bucket_qualifies(bucket, thresholds).then_some(count)
        })
        .collect();
    counts.sort_unstable();
    counts.dedup();
    counts
}

fn bucket_qualifies(bucket: &RawPollBucket, thresholds: PollThresholds) -> bool {
    let total = bucket.best + bucket.recommended + bucket.not_recommended;
    total >= thresholds.min_votes
        && bucket.best >= bucket.recommended
        && bucket.best >= bucket.not_recommended
        && f64::from(bucket.best + bucket.recommended)
            >= thresholds.best_ratio * f64::from(bucket.not_recommended)
}

/// Parse a poll bucket label. `8` and `8+` both map to 8; the
/// open-ended "more than N" buckets are discarded.
fn parse_bucket_count(label: &str) -> Option<u32> {
    BUCKET_COUNT_RE
        .captures(label.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

/// Fetch and normalize details for all `ids` in fixed-size batches.
///
/// A failed or unparseable batch is logged and skipped so the other
/// batches still contribute; cancellation is honored at every await
/// and aborts the whole fetch with [`PreloadError::Aborted`].
/// `progress` receives (completed batches, total batches).
pub async fn fetch_records(
    provider: &dyn CollectionProvider,
    ids: &[String],
    options: BatchOptions,
    cancel: &CancellationToken,
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<GameRecord>, PreloadError> {
    let batches: Vec<&[String]> = ids.chunks(options.batch_size).collect();
    let total = batches.len();
    let mut records = Vec::with_capacity(ids.len());

    for (index, batch) in batches.into_iter().enumerate() {
        if index > 0 {
            abortable(cancel, tokio::time::sleep(options.batch_delay)).await?;
        }

        let body = match abortable(cancel, provider.fetch_details(batch)).await? {
            Ok(body) => body,
            Err(err) => {
                warn!("detail batch {}/{total} failed, skipping: {err}", index + 1);
                progress(index + 1, total);
                continue;
            }
        };

        match parse_details(&body) {
            Ok(items) => {
                for item in &items {
                    let name = primary_name(&item.names);
                    if is_expansion(&item.kind, &name, &item.categories) {
                        continue;
                    }
                    records.push(build_record(item, options.thresholds));
                }
            }
            Err(err) => {
                warn!(
                    "detail batch {}/{total} unparseable, skipping: {err}",
                    index + 1
                );
            }
        }
        progress(index + 1, total);
    }

    Ok(records)
}

/// Run a future unless the token fires first. No side effect may
/// commit after cancellation, so every suspension point goes through
/// here.
pub async fn abortable<F: std::future::Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, PreloadError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PreloadError::Aborted),
        output = future => Ok(output),
    }
}
