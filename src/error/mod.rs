use thiserror::Error;

/// Failure classes of the browser core.
///
/// Only `Network` ever reaches the user; the rest are logged where they
/// happen and absorbed.
#[derive(Error, Debug)]
pub enum BrowseError {
    /// Catalog unreachable or answered with a non-success status.
    #[error("Failed to fetch movies: {0}")]
    Network(String),

    #[error("Trending service failure: {0}")]
    Aggregator(String),

    #[error("Genre list unavailable: {0}")]
    GenreLoad(String),

    /// The durable slot holds data that does not parse as a watchlist.
    #[error("Stored watchlist is corrupt: {0}")]
    PersistenceCorruption(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type BrowseResult<T> = std::result::Result<T, BrowseError>;
