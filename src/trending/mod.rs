use crate::config::TrendingConfig;
use crate::error::BrowseError;
use crate::http::HttpClient;
use crate::models::{MovieSummary, TrendingMovie};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The analytics service that counts which movies searches land on.
#[async_trait]
pub trait TrendingService: Send + Sync {
    async fn fetch_top_observed(&self, limit: usize) -> Result<Vec<TrendingMovie>>;
    async fn record_observation(&self, term: &str, movie: &MovieSummary) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct Observation<'a> {
    #[serde(rename = "searchTerm")]
    search_term: &'a str,
    #[serde(rename = "movieId")]
    movie_id: i64,
    title: &'a str,
    #[serde(rename = "posterUrl")]
    poster_url: Option<&'a str>,
}

pub struct AnalyticsClient {
    http: HttpClient,
    config: TrendingConfig,
}

impl AnalyticsClient {
    pub fn new(http: HttpClient, config: TrendingConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl TrendingService for AnalyticsClient {
    #[instrument(skip(self))]
    async fn fetch_top_observed(&self, limit: usize) -> Result<Vec<TrendingMovie>> {
        let url = self.url(&format!("/top-searches?limit={}", limit));
        self.http.get_json(&url).await
    }

    #[instrument(skip(self, movie), fields(movie_id = movie.id))]
    async fn record_observation(&self, term: &str, movie: &MovieSummary) -> Result<()> {
        let body = Observation {
            search_term: term,
            movie_id: movie.id,
            title: &movie.title,
            poster_url: movie.poster_path.as_deref(),
        };
        self.http.post_json(&self.url("/observations"), &body).await
    }
}

/// Failure-isolating front for the trending service.
///
/// Nothing here ever returns an error: failures are logged and the caller
/// sees an empty list or nothing at all.
#[derive(Clone)]
pub struct TrendingAggregator {
    service: Option<Arc<dyn TrendingService>>,
    limit: usize,
}

impl TrendingAggregator {
    pub fn new(service: Arc<dyn TrendingService>, limit: usize) -> Self {
        Self {
            service: Some(service),
            limit,
        }
    }

    /// An aggregator with no backing service; trending stays empty.
    pub fn disabled() -> Self {
        Self {
            service: None,
            limit: 0,
        }
    }

    /// Most observed movies, highest count first. Position `i` is rank `i + 1`.
    pub async fn fetch_trending(&self) -> Vec<TrendingMovie> {
        let Some(ref service) = self.service else {
            debug!("Trending disabled, returning empty list");
            return Vec::new();
        };

        match service.fetch_top_observed(self.limit).await {
            Ok(mut movies) => {
                movies.sort_by(|a, b| b.observation_count.cmp(&a.observation_count));
                movies.truncate(self.limit);
                info!("Loaded {} trending movies", movies.len());
                movies
            }
            Err(e) => {
                warn!("{}", BrowseError::Aggregator(e.to_string()));
                Vec::new()
            }
        }
    }

    /// Reports that `term` led to `movie`. Returns immediately; the report
    /// runs on its own task and its outcome is only logged.
    pub fn record_observation(&self, term: &str, movie: &MovieSummary) {
        let Some(ref service) = self.service else {
            return;
        };

        let service = Arc::clone(service);
        let term = term.to_string();
        let movie = movie.clone();
        tokio::spawn(async move {
            match service.record_observation(&term, &movie).await {
                Ok(()) => debug!("Recorded observation '{}' -> {}", term, movie.id),
                Err(e) => warn!("{}", BrowseError::Aggregator(e.to_string())),
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory trending service that can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingTrending {
        pub fail: bool,
        pub top: Vec<TrendingMovie>,
        pub observations: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl TrendingService for RecordingTrending {
        async fn fetch_top_observed(&self, _limit: usize) -> Result<Vec<TrendingMovie>> {
            if self.fail {
                anyhow::bail!("HTTP request failed: 500 Internal Server Error");
            }
            Ok(self.top.clone())
        }

        async fn record_observation(&self, term: &str, movie: &MovieSummary) -> Result<()> {
            if self.fail {
                anyhow::bail!("HTTP POST failed: 500 Internal Server Error");
            }
            self.observations
                .lock()
                .unwrap()
                .push((term.to_string(), movie.id));
            Ok(())
        }
    }

    fn trending(id: i64, count: u64) -> TrendingMovie {
        TrendingMovie {
            movie_id: id,
            title: format!("Movie {}", id),
            poster_ref: None,
            observation_count: count,
        }
    }

    fn movie(id: i64) -> MovieSummary {
        MovieSummary {
            id,
            title: format!("Movie {}", id),
            overview: String::new(),
            poster_path: Some("/p.jpg".to_string()),
            vote_average: None,
            original_language: "en".to_string(),
            release_date: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_trending_ranks_by_count() {
        let service = Arc::new(RecordingTrending {
            top: vec![trending(1, 3), trending(2, 9), trending(3, 5)],
            ..Default::default()
        });
        let aggregator = TrendingAggregator::new(service, 2);

        let ids: Vec<_> = aggregator
            .fetch_trending()
            .await
            .into_iter()
            .map(|m| m.movie_id)
            .collect();

        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_absorbed() {
        let service = Arc::new(RecordingTrending {
            fail: true,
            ..Default::default()
        });
        let aggregator = TrendingAggregator::new(service, 5);

        assert!(aggregator.fetch_trending().await.is_empty());
        assert!(TrendingAggregator::disabled().fetch_trending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_observation_runs_in_background() {
        let service = Arc::new(RecordingTrending::default());
        let aggregator = TrendingAggregator::new(service.clone(), 5);

        aggregator.record_observation("batman", &movie(268));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *service.observations.lock().unwrap(),
            vec![("batman".to_string(), 268)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_observation_failure_is_swallowed() {
        let service = Arc::new(RecordingTrending {
            fail: true,
            ..Default::default()
        });
        let aggregator = TrendingAggregator::new(service.clone(), 5);

        aggregator.record_observation("batman", &movie(268));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(service.observations.lock().unwrap().is_empty());
    }
}
