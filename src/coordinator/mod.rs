//! Turns settled search intent into catalog queries and publishes the
//! visible `{results, loading, error}` state.
//!
//! Every intent change opens a new [`FetchEpoch`]. A fetch applies its
//! outcome only if its epoch is still the current one when it completes,
//! so a slow answer to an old query never overwrites a newer one.

use crate::error::BrowseError;
use crate::genres::GenreCatalog;
use crate::models::{MovieQuery, MovieSummary, QueryIntent, SortOrder};
use crate::tmdb::MovieCatalog;
use crate::trending::TrendingAggregator;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchEpoch(u64);

impl FetchEpoch {
    fn next(self) -> Self {
        FetchEpoch(self.0 + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub intent: QueryIntent,
    pub epoch: FetchEpoch,
    pub results: Vec<MovieSummary>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Picks the catalog query for an intent: genre filter first, then free
/// text, then the unfiltered popular list. A genre the catalog does not
/// know is ignored.
pub fn derive_query(intent: &QueryIntent, genres: &GenreCatalog) -> MovieQuery {
    if let Some(genre_id) = intent.genre_id.as_deref().filter(|g| !g.is_empty()) {
        if genres.contains(genre_id) {
            return MovieQuery::DiscoverByGenre {
                genre_id: genre_id.to_string(),
                sort_by: SortOrder::PopularityDesc,
            };
        }
        warn!("Ignoring unknown genre '{}'", genre_id);
    }

    let term = intent.free_text.trim();
    if !term.is_empty() {
        return MovieQuery::TextSearch {
            term: term.to_string(),
        };
    }

    MovieQuery::Discover {
        sort_by: SortOrder::PopularityDesc,
    }
}

#[derive(Clone)]
pub struct QueryCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    catalog: Arc<dyn MovieCatalog>,
    genres: GenreCatalog,
    trending: TrendingAggregator,
    state: watch::Sender<SearchState>,
}

impl QueryCoordinator {
    pub fn new(
        catalog: Arc<dyn MovieCatalog>,
        genres: GenreCatalog,
        trending: TrendingAggregator,
    ) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            inner: Arc::new(Inner {
                catalog,
                genres,
                trending,
                state,
            }),
        }
    }

    pub fn genres(&self) -> &GenreCatalog {
        &self.inner.genres
    }

    pub fn state(&self) -> SearchState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.inner.state.subscribe()
    }

    /// Applies a settled free-text value. Returns the new epoch, or `None`
    /// when the text is unchanged.
    pub fn set_free_text(&self, text: impl Into<String>) -> Option<FetchEpoch> {
        let text = text.into();
        self.update_intent(|intent| {
            if intent.free_text == text {
                return false;
            }
            intent.free_text = text;
            true
        })
    }

    /// Selects a genre filter; `None` or an empty id clears it.
    pub fn set_genre(&self, genre_id: Option<String>) -> Option<FetchEpoch> {
        let genre_id = genre_id.filter(|g| !g.is_empty());
        self.update_intent(|intent| {
            if intent.genre_id == genre_id {
                return false;
            }
            intent.genre_id = genre_id;
            true
        })
    }

    /// Replaces both inputs at once, opening at most one epoch.
    pub fn set_intent(&self, intent: QueryIntent) -> Option<FetchEpoch> {
        let intent = QueryIntent {
            genre_id: intent.genre_id.filter(|g| !g.is_empty()),
            ..intent
        };
        self.update_intent(|current| {
            if *current == intent {
                return false;
            }
            *current = intent;
            true
        })
    }

    /// Re-issues the current intent, e.g. for the initial page load.
    pub fn refresh(&self) -> FetchEpoch {
        let mut issued = None;
        self.inner.state.send_modify(|state| {
            issued = Some(begin_epoch(state, &self.inner.genres));
        });
        self.dispatch(issued).unwrap_or_default()
    }

    /// Feeds settled free-text values from a debouncer into the coordinator
    /// until the sender side closes.
    pub fn follow_settled_text(&self, mut settled: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(text) = settled.recv().await {
                coordinator.set_free_text(text);
            }
            debug!("Settled text stream closed");
        })
    }

    fn update_intent(&self, change: impl FnOnce(&mut QueryIntent) -> bool) -> Option<FetchEpoch> {
        let mut issued = None;
        self.inner.state.send_if_modified(|state| {
            if !change(&mut state.intent) {
                return false;
            }
            issued = Some(begin_epoch(state, &self.inner.genres));
            true
        });
        self.dispatch(issued)
    }

    fn dispatch(&self, issued: Option<(FetchEpoch, MovieQuery)>) -> Option<FetchEpoch> {
        let (epoch, query) = issued?;
        info!(epoch = epoch.0, "Issuing {}", query);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(epoch, query).await;
        });
        Some(epoch)
    }
}

fn begin_epoch(state: &mut SearchState, genres: &GenreCatalog) -> (FetchEpoch, MovieQuery) {
    state.epoch = state.epoch.next();
    state.loading = true;
    state.error = None;
    (state.epoch, derive_query(&state.intent, genres))
}

impl Inner {
    async fn execute(&self, epoch: FetchEpoch, query: MovieQuery) {
        let outcome = match &query {
            MovieQuery::DiscoverByGenre { genre_id, sort_by } => {
                self.catalog.discover_movies(Some(genre_id), *sort_by).await
            }
            MovieQuery::TextSearch { term } => self.catalog.search_movies(term).await,
            MovieQuery::Discover { sort_by } => self.catalog.discover_movies(None, *sort_by).await,
        };

        let observation = match (&query, &outcome) {
            (MovieQuery::TextSearch { term }, Ok(movies)) => {
                movies.first().map(|top| (term.clone(), top.clone()))
            }
            _ => None,
        };

        let applied = self.state.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            state.loading = false;
            match outcome {
                Ok(movies) => {
                    debug!(epoch = epoch.0, "Applying {} results", movies.len());
                    state.results = movies;
                    state.error = None;
                }
                Err(e) => {
                    let error = BrowseError::Network(e.to_string());
                    warn!(epoch = epoch.0, "{}", error);
                    state.results.clear();
                    state.error = Some(error.to_string());
                }
            }
            true
        });

        if !applied {
            debug!(epoch = epoch.0, "Discarding response for superseded query");
            return;
        }

        if let Some((term, top)) = observation {
            self.trending.record_observation(&term, &top);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debounce::Debouncer;
    use crate::models::Genre;
    use crate::trending::tests::RecordingTrending;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Catalog whose answers take a scripted time per query.
    #[derive(Default)]
    struct ScriptedCatalog {
        delays: HashMap<String, u64>,
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedCatalog {
        fn delay(mut self, key: &str, millis: u64) -> Self {
            self.delays.insert(key.to_string(), millis);
            self
        }

        fn failing(mut self, key: &str) -> Self {
            self.failing.push(key.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn answer(&self, key: String, seed: i64) -> Result<Vec<MovieSummary>> {
            self.calls.lock().unwrap().push(key.clone());
            let millis = self.delays.get(&key).copied().unwrap_or(10);
            sleep(Duration::from_millis(millis)).await;
            if self.failing.contains(&key) {
                anyhow::bail!("HTTP request failed: 500 Internal Server Error");
            }
            Ok(vec![movie(seed, &key), movie(seed + 1, &key)])
        }
    }

    #[async_trait]
    impl MovieCatalog for ScriptedCatalog {
        async fn list_genres(&self) -> Result<Vec<Genre>> {
            Ok(Vec::new())
        }

        async fn search_movies(&self, term: &str) -> Result<Vec<MovieSummary>> {
            self.answer(format!("search:{}", term), term.len() as i64 * 100).await
        }

        async fn discover_movies(&self, genre_id: Option<&str>, sort_by: SortOrder) -> Result<Vec<MovieSummary>> {
            let key = format!("discover:{}:{}", genre_id.unwrap_or("-"), sort_by.as_param());
            self.answer(key, 9000).await
        }
    }

    fn movie(id: i64, title: &str) -> MovieSummary {
        MovieSummary {
            id,
            title: title.to_string(),
            overview: String::new(),
            poster_path: None,
            vote_average: Some(7.0),
            original_language: "en".to_string(),
            release_date: None,
        }
    }

    fn genres() -> GenreCatalog {
        GenreCatalog::new(vec![
            Genre { id: 28, name: "Action".to_string() },
            Genre { id: 35, name: "Comedy".to_string() },
        ])
    }

    fn coordinator(catalog: Arc<ScriptedCatalog>) -> QueryCoordinator {
        QueryCoordinator::new(catalog, genres(), TrendingAggregator::disabled())
    }

    fn titles(state: &SearchState) -> Vec<String> {
        state.results.iter().map(|m| m.title.clone()).collect()
    }

    #[test]
    fn test_genre_takes_precedence_over_text() {
        let intent = QueryIntent {
            free_text: "batman".to_string(),
            genre_id: Some("28".to_string()),
        };
        assert_eq!(
            derive_query(&intent, &genres()),
            MovieQuery::DiscoverByGenre {
                genre_id: "28".to_string(),
                sort_by: SortOrder::PopularityDesc,
            }
        );
    }

    #[test]
    fn test_query_selection_fallbacks() {
        let text = QueryIntent {
            free_text: "  batman ".to_string(),
            genre_id: None,
        };
        assert_eq!(
            derive_query(&text, &genres()),
            MovieQuery::TextSearch { term: "batman".to_string() }
        );

        let unknown_genre = QueryIntent {
            free_text: "batman".to_string(),
            genre_id: Some("9999".to_string()),
        };
        assert_eq!(
            derive_query(&unknown_genre, &genres()),
            MovieQuery::TextSearch { term: "batman".to_string() }
        );

        assert_eq!(
            derive_query(&QueryIntent::default(), &genres()),
            MovieQuery::Discover { sort_by: SortOrder::PopularityDesc }
        );
    }

    #[test]
    fn test_genre_ignored_when_catalog_failed_to_load() {
        let intent = QueryIntent {
            free_text: "batman".to_string(),
            genre_id: Some("28".to_string()),
        };
        assert_eq!(
            derive_query(&intent, &GenreCatalog::default()),
            MovieQuery::TextSearch { term: "batman".to_string() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_genre_only_intent_discovers_by_genre() {
        let catalog = Arc::new(ScriptedCatalog::default());
        let coordinator = coordinator(catalog.clone());

        coordinator.set_genre(Some("28".to_string()));
        sleep(Duration::from_secs(1)).await;

        assert_eq!(catalog.calls(), vec!["discover:28:popularity.desc"]);
        assert!(!coordinator.state().loading);
        assert_eq!(coordinator.state().results.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_tracks_outstanding_fetch() {
        let catalog = Arc::new(ScriptedCatalog::default().delay("search:dune", 200));
        let coordinator = coordinator(catalog);

        coordinator.set_free_text("dune");
        assert!(coordinator.state().loading);

        sleep(Duration::from_millis(100)).await;
        assert!(coordinator.state().loading);

        sleep(Duration::from_millis(200)).await;
        let state = coordinator.state();
        assert!(!state.loading);
        assert_eq!(titles(&state), vec!["search:dune", "search:dune"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stale_response_is_discarded() {
        let catalog = Arc::new(
            ScriptedCatalog::default()
                .delay("search:bat", 300)
                .delay("search:batman", 50),
        );
        let coordinator = coordinator(catalog.clone());

        let first = coordinator.set_free_text("bat").unwrap();
        let second = coordinator.set_free_text("batman").unwrap();
        assert!(second > first);

        sleep(Duration::from_millis(100)).await;
        let state = coordinator.state();
        assert!(!state.loading);
        assert_eq!(titles(&state), vec!["search:batman", "search:batman"]);

        sleep(Duration::from_millis(500)).await;
        let state = coordinator.state();
        assert_eq!(state.epoch, second);
        assert_eq!(titles(&state), vec!["search:batman", "search:batman"]);
        assert_eq!(catalog.calls(), vec!["search:bat", "search:batman"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_issued_wins_for_any_arrival_order() {
        let catalog = Arc::new(
            ScriptedCatalog::default()
                .delay("search:a", 50)
                .delay("search:ab", 400)
                .delay("search:abc", 200),
        );
        let coordinator = coordinator(catalog);

        coordinator.set_free_text("a");
        coordinator.set_free_text("ab");
        coordinator.set_free_text("abc");
        sleep(Duration::from_secs(1)).await;

        assert_eq!(titles(&coordinator.state()), vec!["search:abc", "search:abc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_clears_results_and_sets_error() {
        let catalog = Arc::new(ScriptedCatalog::default().failing("search:boom"));
        let coordinator = coordinator(catalog);

        coordinator.set_free_text("dune");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.state().results.len(), 2);

        coordinator.set_free_text("boom");
        sleep(Duration::from_millis(100)).await;

        let state = coordinator.state();
        assert!(!state.loading);
        assert!(state.results.is_empty());
        let error = state.error.unwrap();
        assert!(error.starts_with("Failed to fetch movies"), "{}", error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failure_is_silent() {
        let catalog = Arc::new(
            ScriptedCatalog::default()
                .failing("search:boom")
                .delay("search:boom", 300),
        );
        let coordinator = coordinator(catalog);

        coordinator.set_free_text("boom");
        coordinator.set_free_text("dune");
        sleep(Duration::from_secs(1)).await;

        let state = coordinator.state();
        assert_eq!(state.error, None);
        assert_eq!(titles(&state), vec!["search:dune", "search:dune"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_input_does_not_refetch() {
        let catalog = Arc::new(ScriptedCatalog::default());
        let coordinator = coordinator(catalog.clone());

        assert!(coordinator.set_free_text("dune").is_some());
        assert!(coordinator.set_free_text("dune").is_none());
        assert!(coordinator.set_genre(None).is_none());
        sleep(Duration::from_secs(1)).await;

        assert_eq!(catalog.calls(), vec!["search:dune"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_intent_opens_single_epoch() {
        let catalog = Arc::new(ScriptedCatalog::default());
        let coordinator = coordinator(catalog.clone());

        let epoch = coordinator.set_intent(QueryIntent {
            free_text: "batman".to_string(),
            genre_id: Some("35".to_string()),
        });
        sleep(Duration::from_secs(1)).await;

        assert_eq!(epoch, Some(coordinator.state().epoch));
        assert_eq!(catalog.calls(), vec!["discover:35:popularity.desc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_issues_default_discovery() {
        let catalog = Arc::new(ScriptedCatalog::default());
        let coordinator = coordinator(catalog.clone());

        coordinator.refresh();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(catalog.calls(), vec!["discover:-:popularity.desc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_typing_issues_single_fetch() {
        let catalog = Arc::new(ScriptedCatalog::default());
        let coordinator = coordinator(catalog.clone());
        let (debouncer, settled) = Debouncer::new(Duration::from_millis(500));
        let _listener = coordinator.follow_settled_text(settled);

        debouncer.push("bat".to_string());
        sleep(Duration::from_millis(200)).await;
        debouncer.push("batman".to_string());
        sleep(Duration::from_secs(2)).await;

        assert_eq!(catalog.calls(), vec!["search:batman"]);
        debouncer.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_search_reports_top_result() {
        let catalog = Arc::new(ScriptedCatalog::default());
        let trending = Arc::new(RecordingTrending::default());
        let coordinator = QueryCoordinator::new(
            catalog,
            genres(),
            TrendingAggregator::new(trending.clone(), 5),
        );

        coordinator.set_free_text("dune");
        sleep(Duration::from_millis(100)).await;
        coordinator.set_free_text("");
        sleep(Duration::from_millis(100)).await;

        // Only the text search is reported, with its first result.
        assert_eq!(
            *trending.observations.lock().unwrap(),
            vec![("dune".to_string(), 400)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trending_failure_leaves_state_untouched() {
        let catalog = Arc::new(ScriptedCatalog::default());
        let trending = Arc::new(RecordingTrending {
            fail: true,
            ..Default::default()
        });
        let coordinator = QueryCoordinator::new(
            catalog,
            genres(),
            TrendingAggregator::new(trending, 5),
        );

        coordinator.set_free_text("dune");
        sleep(Duration::from_millis(100)).await;

        let state = coordinator.state();
        assert_eq!(state.error, None);
        assert_eq!(state.results.len(), 2);
    }
}
