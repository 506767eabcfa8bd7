use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_DEBOUNCE_MILLIS: u64 = 500;
const DEFAULT_TRENDING_LIMIT: usize = 5;
const DEFAULT_STORAGE_DIR: &str = ".moviedeck";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Configuration {
    pub tmdb: TmdbConfig,
    pub trending: Option<TrendingConfig>,
    pub debounce: Option<DebounceConfig>,
    pub watchlist: Option<WatchlistConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    /// Sent verbatim as the `Authorization` header, e.g. `Bearer <token>`.
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrendingConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebounceConfig {
    pub millis: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchlistConfig {
    pub dir: Option<PathBuf>,
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let mut config: Configuration = serde_yaml::from_str(content)?;

        if config.tmdb.api_key.is_none() {
            config.tmdb.api_key = std::env::var("TMDB_API_KEY").ok();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.tmdb.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid tmdb.baseUrl '{}': {}", self.tmdb.base_url, e))?;

        if let Some(ref trending) = self.trending {
            Url::parse(&trending.base_url).map_err(|e| {
                anyhow::anyhow!("Invalid trending.baseUrl '{}': {}", trending.base_url, e)
            })?;
        }

        Ok(())
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(
            self.debounce
                .as_ref()
                .map(|d| d.millis)
                .unwrap_or(DEFAULT_DEBOUNCE_MILLIS)
        )
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.watchlist
            .as_ref()
            .and_then(|w| w.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR))
    }

    pub fn trending_limit(&self) -> usize {
        self.trending
            .as_ref()
            .and_then(|t| t.limit)
            .unwrap_or(DEFAULT_TRENDING_LIMIT)
    }

    pub fn language(&self) -> &str {
        self.tmdb.language.as_deref().unwrap_or("en-US")
    }
}
