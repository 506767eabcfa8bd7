use crate::error::BrowseError;
use crate::models::Genre;
use crate::tmdb::MovieCatalog;
use tracing::{info, warn};

pub const ALL_GENRES_LABEL: &str = "All Genres";

/// Genres available for filtering, loaded once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenreCatalog {
    genres: Vec<Genre>,
}

/// One entry of the genre filter control. An empty `value` means "no filter".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreOption {
    pub value: String,
    pub label: String,
}

impl GenreCatalog {
    pub fn new(genres: Vec<Genre>) -> Self {
        Self { genres }
    }

    /// Fetches the catalog's genre list. Failure yields an empty catalog;
    /// there is no retry.
    pub async fn load(catalog: &dyn MovieCatalog) -> Self {
        match catalog.list_genres().await {
            Ok(genres) => {
                info!("Genre catalog loaded with {} genres", genres.len());
                Self::new(genres)
            }
            Err(e) => {
                warn!("{}; genre filtering disabled", BrowseError::GenreLoad(e.to_string()));
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
    }

    pub fn contains(&self, genre_id: &str) -> bool {
        self.genres.iter().any(|g| g.id.to_string() == genre_id)
    }

    pub fn options(&self) -> Vec<GenreOption> {
        let mut options = Vec::with_capacity(self.genres.len() + 1);
        options.push(GenreOption {
            value: String::new(),
            label: ALL_GENRES_LABEL.to_string(),
        });
        options.extend(self.genres.iter().map(|g| GenreOption {
            value: g.id.to_string(),
            label: g.name.clone(),
        }));
        options
    }
}
