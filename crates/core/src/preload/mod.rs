//! Background preloading of user collections.
//!
//! One coordinator owns the per-username state machine
//! (Idle → Preloading → Ready/Failed), guards overlapping requests
//! through cancellation, and is the only writer into the cache
//! store's collection keys. Starting any preload cancels the
//! in-flight one; an aborted run commits no side effect, so an
//! older, slower request can never overwrite a newer result.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cache::{collection_key, CacheStore},
    config::AppConfig,
    error::PreloadError,
    models::GameRecord,
    normalize::{self, BatchOptions},
    provider::{parse_collection, CollectionProvider},
};

/// Transient per-username preload state. Never persisted; `Ready` is
/// reconstructed from the cache store when no run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum PreloadStatus {
    /// Nothing cached, nothing running.
    Idle,
    /// A preload is in flight.
    Preloading {
        /// Coarse progress, 0..=100.
        progress: u8,
    },
    /// A live collection is cached.
    Ready {
        /// When the cached collection was written.
        as_of: DateTime<Utc>,
    },
    /// The last preload failed.
    Failed {
        /// Human-readable reason, suitable for display.
        message: String,
    },
}

/// Coordinates the two-stage collection preload and serves cached
/// results. Clones share all state.
#[derive(Clone)]
pub struct Preloader {
    cache: CacheStore,
    provider: Arc<dyn CollectionProvider>,
    config: AppConfig,
    statuses: Arc<RwLock<HashMap<String, PreloadStatus>>>,
    /// Username and token of the in-flight run (or pending debounce).
    /// Replacing the slot cancels the predecessor; commits happen
    /// under this lock so a cancelled run can never slip a write in.
    current: Arc<Mutex<Option<(String, CancellationToken)>>>,
}

impl Preloader {
    /// Build a coordinator over an injected cache store and provider.
    pub fn new(cache: CacheStore, provider: Arc<dyn CollectionProvider>, config: AppConfig) -> Self {
        Self {
            cache,
            provider,
            config,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Preload `username` unless a fresh collection is already
    /// cached.
    pub async fn start(&self, username: &str) -> Result<(), PreloadError> {
        let token = self.begin(username);
        self.run(username, false, token).await
    }

    /// Force a preload regardless of cache freshness.
    pub async fn refresh(&self, username: &str) -> Result<(), PreloadError> {
        let token = self.begin(username);
        self.run(username, true, token).await
    }

    /// React to a newly observed username: cancel whatever is in
    /// flight, wait out the debounce window, then preload. Returns
    /// the spawned task; a later observation supersedes it.
    pub fn observe(&self, username: &str) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let username = username.to_string();
        let token = self.begin(&username);
        let delay = self.config.debounce_delay();
        tokio::spawn(async move {
            if normalize::abortable(&token, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return;
            }
            match this.run(&username, false, token).await {
                Ok(()) | Err(PreloadError::Aborted) => {}
                Err(err) => warn!("preload for {username} failed: {err}"),
            }
        })
    }

    /// Periodically re-preload `username` whenever the cached
    /// collection has gone stale.
    pub fn spawn_background_refresh(&self, username: &str) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let username = username.to_string();
        let interval = self.config.refresh_interval();
        let stale_after = this.config.stale_after();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !this.cache.is_stale(&collection_key(&username), stale_after) {
                    continue;
                }
                debug!("cached collection for {username} is stale, refreshing");
                match this.start(&username).await {
                    Ok(()) | Err(PreloadError::Aborted) => {}
                    Err(err) => warn!("background refresh for {username} failed: {err}"),
                }
            }
        })
    }

    /// Current status for a username, reconstructing `Ready` from the
    /// cache store when no transient state is recorded.
    pub fn status(&self, username: &str) -> PreloadStatus {
        if let Some(status) = self.statuses.read().get(username) {
            return status.clone();
        }
        match self.cache.created_at(&collection_key(username)) {
            Some(as_of) => PreloadStatus::Ready { as_of },
            None => PreloadStatus::Idle,
        }
    }

    /// When the cached collection for `username` was written, if a
    /// live entry exists.
    pub fn last_updated(&self, username: &str) -> Option<DateTime<Utc>> {
        self.cache.created_at(&collection_key(username))
    }

    /// Non-blocking read of the cached collection.
    pub fn cached_games(&self, username: &str) -> Option<Vec<GameRecord>> {
        self.cache.get(&collection_key(username))
    }

    /// One-shot fetch-and-normalize path for cache misses. Does not
    /// touch the cache or the status machine.
    pub async fn fetch_games_direct(&self, username: &str) -> Result<Vec<GameRecord>, PreloadError> {
        let token = CancellationToken::new();
        let body = self.provider.fetch_collection(username).await?;
        let items = parse_collection(&body)?;
        let ids: Vec<String> = normalize::filter_expansions(items)
            .into_iter()
            .map(|item| item.id)
            .collect();
        normalize::fetch_records(
            self.provider.as_ref(),
            &ids,
            BatchOptions::from_config(&self.config),
            &token,
            |_, _| {},
        )
        .await
    }

    /// Replace the current slot, cancelling any in-flight run. When
    /// the superseded run was for a different username, its transient
    /// `Preloading` status is dropped so `status` stops reporting a
    /// preload that no longer exists.
    fn begin(&self, username: &str) -> CancellationToken {
        let username = username.trim();
        let token = CancellationToken::new();
        let mut current = self.current.lock();
        if let Some((previous_user, previous)) =
            current.replace((username.to_string(), token.clone()))
        {
            previous.cancel();
            if previous_user != username {
                let mut statuses = self.statuses.write();
                if matches!(
                    statuses.get(&previous_user),
                    Some(PreloadStatus::Preloading { .. })
                ) {
                    statuses.remove(&previous_user);
                }
            }
        }
        token
    }

    async fn run(
        &self,
        username: &str,
        force: bool,
        token: CancellationToken,
    ) -> Result<(), PreloadError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(crate::error::ProviderError::InvalidInput.into());
        }
        let key = collection_key(username);

        if !force && !self.cache.is_stale(&key, self.config.stale_after()) {
            if let Some(as_of) = self.cache.created_at(&key) {
                debug!("cached collection for {username} is fresh, skipping preload");
                self.set_status(username, &token, PreloadStatus::Ready { as_of });
            }
            return Ok(());
        }

        self.set_status(username, &token, PreloadStatus::Preloading { progress: 0 });
        match self.run_stages(username, &key, &token).await {
            Ok(count) => {
                info!("preloaded {count} games for {username}");
                Ok(())
            }
            Err(PreloadError::Aborted) => {
                // Expected when superseded; no state transition.
                debug!("preload for {username} aborted");
                Err(PreloadError::Aborted)
            }
            Err(err) => {
                self.set_status(
                    username,
                    &token,
                    PreloadStatus::Failed {
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        username: &str,
        key: &str,
        token: &CancellationToken,
    ) -> Result<usize, PreloadError> {
        // Stage a: owned-item listing, expansion-filtered.
        self.set_status(username, token, PreloadStatus::Preloading { progress: 20 });
        let body =
            normalize::abortable(token, self.provider.fetch_collection(username)).await??;
        let items = parse_collection(&body)?;
        let ids: Vec<String> = normalize::filter_expansions(items)
            .into_iter()
            .map(|item| item.id)
            .collect();

        // Stage b: batched details, 50% -> 90%.
        self.set_status(username, token, PreloadStatus::Preloading { progress: 50 });
        let records = normalize::fetch_records(
            self.provider.as_ref(),
            &ids,
            BatchOptions::from_config(&self.config),
            token,
            |done, total| {
                let progress = 50 + (40 * done / total.max(1)) as u8;
                self.set_status(username, token, PreloadStatus::Preloading { progress });
            },
        )
        .await?;

        // Commit under the coordinator lock so a run cancelled at the
        // last moment still writes nothing.
        {
            let current = self.current.lock();
            if token.is_cancelled() {
                return Err(PreloadError::Aborted);
            }
            self.cache.set(key, &records, self.config.collection_ttl());
            self.statuses.write().insert(
                username.to_string(),
                PreloadStatus::Ready { as_of: Utc::now() },
            );
            drop(current);
        }
        Ok(records.len())
    }

    /// Record a status transition unless the run was cancelled.
    fn set_status(&self, username: &str, token: &CancellationToken, status: PreloadStatus) {
        if token.is_cancelled() {
            return;
        }
        self.statuses
            .write()
            .insert(username.to_string(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tempfile::tempdir;

    fn collection_xml(entries: &[(&str, &str)]) -> String {
        let mut xml = String::from("<items totalitems=\"0\">");
        for (id, name) in entries {
            xml.push_str(&format!(
                "<item objecttype=\"thing\" objectid=\"{id}\" subtype=\"boardgame\"><name>{name}</name></item>"
            ));
        }
        xml.push_str("</items>");
        xml
    }

    fn details_xml(entries: &[(&str, &str, &str)]) -> String {
        let mut xml = String::from("<items>");
        for (id, name, rating) in entries {
            xml.push_str(&format!(
                "<item type=\"boardgame\" id=\"{id}\">\
                 <name type=\"primary\" value=\"{name}\"/>\
                 <minplayers value=\"2\"/><maxplayers value=\"4\"/>\
                 <playingtime value=\"60\"/>\
                 <statistics><ratings><average value=\"{rating}\"/></ratings></statistics>\
                 </item>"
            ));
        }
        xml.push_str("</items>");
        xml
    }

    /// Scripted provider double: each collection call pops the next
    /// (delay, response) pair; detail calls answer uniformly.
    struct ScriptedProvider {
        collections: PlMutex<VecDeque<(Duration, Result<String, ProviderError>)>>,
        details: String,
        collection_calls: AtomicUsize,
        detail_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(
            collections: Vec<(Duration, Result<String, ProviderError>)>,
            details: String,
        ) -> Self {
            Self {
                collections: PlMutex::new(collections.into()),
                details,
                collection_calls: AtomicUsize::new(0),
                detail_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CollectionProvider for ScriptedProvider {
        async fn fetch_collection(&self, _username: &str) -> Result<String, ProviderError> {
            self.collection_calls.fetch_add(1, Ordering::SeqCst);
            let (delay, result) = self
                .collections
                .lock()
                .pop_front()
                .unwrap_or((Duration::ZERO, Err(ProviderError::InvalidInput)));
            tokio::time::sleep(delay).await;
            result
        }

        async fn fetch_details(&self, _ids: &[String]) -> Result<String, ProviderError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.details.clone())
        }
    }

    fn preloader_with(provider: ScriptedProvider, root: &std::path::Path) -> Preloader {
        preloader_sharing(Arc::new(provider), root)
    }

    fn preloader_sharing(provider: Arc<ScriptedProvider>, root: &std::path::Path) -> Preloader {
        let mut config = AppConfig::default();
        config.batch_delay_ms = 0;
        config.debounce_ms = 50;
        Preloader::new(CacheStore::new(root), provider, config)
    }

    #[tokio::test(start_paused = true)]
    async fn preload_caches_filtered_collection() {
        let dir = tempdir().expect("tempdir");
        let provider = Arc::new(ScriptedProvider::new(
            vec![(
                Duration::ZERO,
                Ok(collection_xml(&[
                    ("1", "Brass: Birmingham"),
                    ("2", "Foo: The Expansion"),
                ])),
            )],
            details_xml(&[("1", "Brass: Birmingham", "8.58")]),
        ));
        let preloader = preloader_sharing(provider.clone(), dir.path());

        preloader.start("alice").await.expect("preload failed");

        // Only the non-expansion id went to the details endpoint.
        assert_eq!(provider.detail_calls.load(Ordering::SeqCst), 1);

        let games = preloader.cached_games("alice").expect("nothing cached");
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "Brass: Birmingham");
        assert!(matches!(
            preloader.status("alice"),
            PreloadStatus::Ready { .. }
        ));
        assert!(preloader.last_updated("alice").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cache_short_circuits_start() {
        let dir = tempdir().expect("tempdir");
        let provider = ScriptedProvider::new(vec![], String::new());
        let preloader = preloader_with(provider, dir.path());
        preloader.cache.set(
            &collection_key("alice"),
            &vec![sample_record("9", "Cached Game")],
            Duration::from_secs(600),
        );

        preloader.start("alice").await.expect("start failed");

        // An empty script means any provider call would fail the
        // run; Ready proves the fresh cache short-circuited it.
        assert!(matches!(
            preloader.status("alice"),
            PreloadStatus::Ready { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_run_never_writes_the_cache() {
        let dir = tempdir().expect("tempdir");
        // First collection call hangs long enough to be superseded;
        // second answers immediately with a different game.
        let provider = ScriptedProvider::new(
            vec![
                (
                    Duration::from_secs(120),
                    Ok(collection_xml(&[("1", "Stale Game")])),
                ),
                (Duration::ZERO, Ok(collection_xml(&[("2", "Fresh Game")]))),
            ],
            details_xml(&[("2", "Fresh Game", "7.5")]),
        );
        let preloader = preloader_with(provider, dir.path());

        let first = {
            let preloader = preloader.clone();
            tokio::spawn(async move { preloader.start("alice").await })
        };
        tokio::task::yield_now().await;

        preloader.refresh("alice").await.expect("refresh failed");

        let first_result = first.await.expect("task panicked");
        assert!(matches!(first_result, Err(PreloadError::Aborted)));

        // Only the second run committed; the slower first run lost to
        // abort, not to a stale write.
        let games = preloader.cached_games("alice").expect("nothing cached");
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "Fresh Game");
        assert!(matches!(
            preloader.status("alice"),
            PreloadStatus::Ready { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn observe_debounces_rapid_username_changes() {
        let dir = tempdir().expect("tempdir");
        let provider = Arc::new(ScriptedProvider::new(
            vec![(Duration::ZERO, Ok(collection_xml(&[("2", "Kept Game")])))],
            details_xml(&[("2", "Kept Game", "7.0")]),
        ));
        let preloader = preloader_sharing(provider.clone(), dir.path());

        let first = preloader.observe("ali");
        let second = preloader.observe("alice");

        first.await.expect("first observe panicked");
        second.await.expect("second observe panicked");

        // The superseded observation never reached the provider.
        assert_eq!(provider.collection_calls.load(Ordering::SeqCst), 1);
        assert!(preloader.cached_games("ali").is_none());
        assert!(preloader.cached_games("alice").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_usernames_stop_reporting_preloading() {
        let dir = tempdir().expect("tempdir");
        // First collection call hangs so "ali" stays mid-preload
        // until "alice" takes over.
        let provider = ScriptedProvider::new(
            vec![
                (
                    Duration::from_secs(120),
                    Ok(collection_xml(&[("1", "Old Game")])),
                ),
                (Duration::ZERO, Ok(collection_xml(&[("2", "New Game")]))),
            ],
            details_xml(&[("2", "New Game", "7.0")]),
        );
        let preloader = preloader_with(provider, dir.path());

        let first = {
            let preloader = preloader.clone();
            tokio::spawn(async move { preloader.start("ali").await })
        };
        tokio::task::yield_now().await;
        assert!(matches!(
            preloader.status("ali"),
            PreloadStatus::Preloading { .. }
        ));

        preloader.start("alice").await.expect("start failed");

        // The abandoned run is gone; nothing was ever cached for it.
        assert_eq!(preloader.status("ali"), PreloadStatus::Idle);
        assert!(matches!(
            preloader.status("alice"),
            PreloadStatus::Ready { .. }
        ));

        let first_result = first.await.expect("task panicked");
        assert!(matches!(first_result, Err(PreloadError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn background_refresh_only_fires_once_stale() {
        let dir = tempdir().expect("tempdir");
        let provider = Arc::new(ScriptedProvider::new(
            vec![(
                Duration::ZERO,
                Ok(collection_xml(&[("3", "Replacement")])),
            )],
            details_xml(&[("3", "Replacement", "7.2")]),
        ));
        let mut config = AppConfig::default();
        config.batch_delay_ms = 0;

        // Entry age is measured in wall-clock time, which a paused
        // runtime does not advance: the cached collection stays fresh
        // however many intervals tick, so no fetch happens.
        let fresh = Preloader::new(
            CacheStore::new(dir.path().join("fresh")),
            provider.clone(),
            config.clone(),
        );
        fresh.cache.set(
            &collection_key("alice"),
            &vec![sample_record("9", "Cached Game")],
            Duration::from_secs(7200),
        );
        let fresh_task = fresh.spawn_background_refresh("alice");
        tokio::time::sleep(config.refresh_interval() * 2 + Duration::from_secs(1)).await;
        assert_eq!(provider.collection_calls.load(Ordering::SeqCst), 0);
        fresh_task.abort();

        // With a zero staleness threshold the same entry counts as
        // aged, and the next tick re-preloads it.
        config.stale_after_secs = 0;
        let stale = Preloader::new(
            CacheStore::new(dir.path().join("stale")),
            provider.clone(),
            config.clone(),
        );
        stale.cache.set(
            &collection_key("alice"),
            &vec![sample_record("9", "Cached Game")],
            Duration::from_secs(7200),
        );
        let stale_task = stale.spawn_background_refresh("alice");
        tokio::time::sleep(config.refresh_interval() + Duration::from_secs(1)).await;

        assert_eq!(provider.collection_calls.load(Ordering::SeqCst), 1);
        let games = stale.cached_games("alice").expect("nothing cached");
        assert_eq!(games[0].name, "Replacement");
        stale_task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failures_surface_as_failed_status() {
        let dir = tempdir().expect("tempdir");
        let provider = ScriptedProvider::new(
            vec![(
                Duration::ZERO,
                Err(ProviderError::UserNotFound("ghost".to_string())),
            )],
            String::new(),
        );
        let preloader = preloader_with(provider, dir.path());

        let result = preloader.start("ghost").await;
        assert!(result.is_err());
        match preloader.status("ghost") {
            PreloadStatus::Failed { message } => {
                assert!(message.contains("does not exist"), "message: {message}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(preloader.cached_games("ghost").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_username_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let provider = ScriptedProvider::new(vec![], String::new());
        let preloader = preloader_with(provider, dir.path());

        let result = preloader.start("   ").await;
        assert!(matches!(
            result,
            Err(PreloadError::Provider(ProviderError::InvalidInput))
        ));
    }

    fn sample_record(id: &str, name: &str) -> GameRecord {
        GameRecord {
            id: id.to_string(),
            name: name.to_string(),
            year_published: String::new(),
            image: String::new(),
            thumbnail: String::new(),
            description: String::new(),
            min_players: 2,
            max_players: 4,
            playing_time_minutes: 60,
            rating: 7.0,
            rank: 10,
            weight: 2.5,
            mechanisms: vec![],
            categories: vec![],
            best_player_counts: vec![],
            bgg_url: GameRecord::url_for(id),
        }
    }
}
