use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p";
const POSTER_PLACEHOLDER: &str = "assets/posters.png";
const OVERVIEW_WORD_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    pub poster_path: Option<String>,
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub original_language: String,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosterSize {
    W200,
    W500,
}

impl PosterSize {
    fn as_str(self) -> &'static str {
        match self {
            PosterSize::W200 => "w200",
            PosterSize::W500 => "w500",
        }
    }
}

/// Poster image URL for a catalog poster path, or the bundled placeholder.
pub fn poster_url(poster_path: Option<&str>, size: PosterSize) -> String {
    match poster_path {
        Some(path) if !path.is_empty() => format!("{}/{}{}", POSTER_BASE_URL, size.as_str(), path),
        _ => POSTER_PLACEHOLDER.to_string(),
    }
}

impl MovieSummary {
    pub fn poster_url(&self, size: PosterSize) -> String {
        poster_url(self.poster_path.as_deref(), size)
    }

    pub fn rating_label(&self) -> String {
        match self.vote_average {
            Some(v) if v > 0.0 => format!("{:.1}", v),
            _ => "N/A".to_string(),
        }
    }

    pub fn release_year(&self) -> &str {
        self.release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .filter(|y| !y.is_empty())
            .unwrap_or("N/A")
    }

    pub fn short_overview(&self) -> String {
        truncate_words(&self.overview, OVERVIEW_WORD_LIMIT)
    }
}

fn truncate_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split(' ').collect();
    if words.len() > limit {
        format!("{}...", words[..limit].join(" "))
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// Raw user intent as typed/selected, before debouncing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryIntent {
    pub free_text: String,
    pub genre_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    PopularityDesc,
}

impl SortOrder {
    pub fn as_param(self) -> &'static str {
        match self {
            SortOrder::PopularityDesc => "popularity.desc",
        }
    }
}

/// The catalog request derived from a settled intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovieQuery {
    DiscoverByGenre { genre_id: String, sort_by: SortOrder },
    TextSearch { term: String },
    Discover { sort_by: SortOrder },
}

impl fmt::Display for MovieQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovieQuery::DiscoverByGenre { genre_id, sort_by } => {
                write!(f, "discover genre={} sort_by={}", genre_id, sort_by.as_param())
            }
            MovieQuery::TextSearch { term } => write!(f, "search '{}'", term),
            MovieQuery::Discover { sort_by } => write!(f, "discover sort_by={}", sort_by.as_param()),
        }
    }
}

/// A movie as it was when added to the watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    #[serde(flatten)]
    pub movie: MovieSummary,
    /// Unknown for entries saved before timestamps were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

impl WatchlistEntry {
    pub fn snapshot(movie: &MovieSummary) -> Self {
        Self {
            movie: movie.clone(),
            added_at: Some(Utc::now()),
        }
    }

    pub fn id(&self) -> i64 {
        self.movie.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingMovie {
    #[serde(rename = "movieId")]
    pub movie_id: i64,
    pub title: String,
    #[serde(rename = "posterUrl")]
    pub poster_ref: Option<String>,
    #[serde(rename = "count")]
    pub observation_count: u64,
}

impl TrendingMovie {
    pub fn poster_url(&self) -> String {
        poster_url(self.poster_ref.as_deref(), PosterSize::W500)
    }
}
