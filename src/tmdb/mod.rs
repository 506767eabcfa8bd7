use crate::config::TmdbConfig;
use crate::http::HttpClient;
use crate::models::{Genre, MovieSummary, SortOrder};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};

/// The remote movie catalog as seen by the query coordinator.
#[async_trait]
pub trait MovieCatalog: Send + Sync {
    async fn list_genres(&self) -> Result<Vec<Genre>>;
    async fn search_movies(&self, term: &str) -> Result<Vec<MovieSummary>>;
    async fn discover_movies(
        &self,
        genre_id: Option<&str>,
        sort_by: SortOrder,
    ) -> Result<Vec<MovieSummary>>;
}

#[derive(Debug, Deserialize)]
struct GenreList {
    #[serde(default)]
    genres: Vec<Genre>,
}

#[derive(Debug, Deserialize)]
struct MoviePage {
    #[serde(default)]
    results: Vec<MovieSummary>,
}

pub struct TmdbClient {
    http: HttpClient,
    config: TmdbConfig,
    language: String,
}

impl TmdbClient {
    pub fn new(http: HttpClient, config: TmdbConfig, language: &str) -> Self {
        Self {
            http,
            config,
            language: language.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Fetches a single movie, used to snapshot it into the watchlist.
    #[instrument(skip(self))]
    pub async fn get_movie(&self, id: i64) -> Result<MovieSummary> {
        let url = self.url(&format!("/movie/{}?language={}", id, self.language));
        self.http.get_json(&url).await
    }
}

#[async_trait]
impl MovieCatalog for TmdbClient {
    #[instrument(skip(self))]
    async fn list_genres(&self) -> Result<Vec<Genre>> {
        let url = self.url(&format!("/genre/movie/list?language={}", self.language));
        let list: GenreList = self.http.get_json(&url).await?;
        info!("Retrieved {} genres", list.genres.len());
        Ok(list.genres)
    }

    #[instrument(skip(self))]
    async fn search_movies(&self, term: &str) -> Result<Vec<MovieSummary>> {
        let url = self.url(&format!("/search/movie?query={}", urlencoding::encode(term)));
        let page: MoviePage = self.http.get_json(&url).await?;
        debug!("Search '{}' returned {} movies", term, page.results.len());
        Ok(page.results)
    }

    #[instrument(skip(self))]
    async fn discover_movies(
        &self,
        genre_id: Option<&str>,
        sort_by: SortOrder,
    ) -> Result<Vec<MovieSummary>> {
        let mut path = format!("/discover/movie?sort_by={}", sort_by.as_param());
        if let Some(genre_id) = genre_id {
            path.push_str(&format!("&with_genres={}", urlencoding::encode(genre_id)));
        }

        let page: MoviePage = self.http.get_json(&self.url(&path)).await?;
        debug!("Discover returned {} movies", page.results.len());
        Ok(page.results)
    }
}
