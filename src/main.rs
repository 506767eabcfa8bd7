mod config;
mod coordinator;
mod debounce;
mod error;
mod genres;
mod http;
mod models;
mod tmdb;
mod trending;
mod watchlist;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Configuration;
use coordinator::{QueryCoordinator, SearchState};
use debounce::Debouncer;
use genres::GenreCatalog;
use http::HttpClient;
use models::{MovieSummary, PosterSize, QueryIntent, WatchlistEntry};
use std::sync::Arc;
use tmdb::{MovieCatalog, TmdbClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use trending::{AnalyticsClient, TrendingAggregator};
use tracing::{error, info};
use watchlist::{FileSlot, WatchlistStore};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the genre filter options
    Genres,
    /// Run one search and print the results
    Search {
        #[arg(short, long, default_value = "")]
        query: String,
        #[arg(short, long)]
        genre: Option<String>,
    },
    /// Show the most searched movies
    Trending,
    /// Manage the watchlist
    Watchlist {
        #[command(subcommand)]
        action: WatchlistAction,
    },
    /// Interactive browsing: type to search, `genre <id>` to filter
    Browse,
}

#[derive(Subcommand)]
enum WatchlistAction {
    List,
    Add { id: i64 },
    Remove { id: i64 },
}

struct Session {
    tmdb: Arc<TmdbClient>,
    trending: TrendingAggregator,
    watchlist: WatchlistStore,
}

impl Session {
    fn new(config: &Configuration) -> Result<Self> {
        let tmdb_http = HttpClient::new(config.tmdb.api_key.as_deref())?;
        let tmdb = Arc::new(TmdbClient::new(tmdb_http, config.tmdb.clone(), config.language()));

        let trending = match config.trending {
            Some(ref trending_config) => {
                let http = HttpClient::new(trending_config.api_key.as_deref())?;
                let service = Arc::new(AnalyticsClient::new(http, trending_config.clone()));
                TrendingAggregator::new(service, config.trending_limit())
            }
            None => TrendingAggregator::disabled(),
        };

        let slot = Arc::new(FileSlot::new(config.storage_dir()));
        let watchlist = WatchlistStore::open(slot);

        Ok(Self {
            tmdb,
            trending,
            watchlist,
        })
    }

    async fn coordinator(&self) -> QueryCoordinator {
        let genres = GenreCatalog::load(self.tmdb.as_ref()).await;
        let catalog: Arc<dyn MovieCatalog> = self.tmdb.clone();
        QueryCoordinator::new(catalog, genres, self.trending.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let config = Configuration::from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    let session = Session::new(&config)?;

    match cli.command {
        Command::Genres => {
            let genres = GenreCatalog::load(session.tmdb.as_ref()).await;
            if genres.is_empty() {
                println!("Genre list unavailable; only \"{}\" can be used", genres::ALL_GENRES_LABEL);
            }
            for option in genres.options() {
                println!("{:>6}  {}", option.value, option.label);
            }
        }
        Command::Search { query, genre } => run_search(&session, query, genre).await?,
        Command::Trending => {
            let movies = session.trending.fetch_trending().await;
            if movies.is_empty() {
                println!("No trending movies yet");
            }
            for (rank, movie) in movies.iter().enumerate() {
                println!("{:>2}. {} ({} searches) {}", rank + 1, movie.title, movie.observation_count, movie.poster_url());
            }
        }
        Command::Watchlist { action } => run_watchlist(&session, action).await?,
        Command::Browse => run_browse(&session, config.debounce_window()).await?,
    }

    Ok(())
}

async fn run_search(session: &Session, query: String, genre: Option<String>) -> Result<()> {
    let coordinator = session.coordinator().await;
    let mut updates = coordinator.subscribe();

    let intent = QueryIntent {
        free_text: query,
        genre_id: genre,
    };
    if coordinator.set_intent(intent).is_none() {
        coordinator.refresh();
    }

    let state = updates.wait_for(|s| !s.loading).await?.clone();
    print_state(&state, &session.watchlist);

    // Let the trending report go out before the runtime shuts down.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}

async fn run_watchlist(session: &Session, action: WatchlistAction) -> Result<()> {
    let store = &session.watchlist;
    match action {
        WatchlistAction::List => {
            let entries = store.list();
            if entries.is_empty() {
                println!("Your watchlist is empty.");
            }
            for entry in entries {
                print_entry(&entry);
            }
        }
        WatchlistAction::Add { id } => {
            let movie = session.tmdb.get_movie(id).await?;
            if store.add(WatchlistEntry::snapshot(&movie))? {
                println!("Added '{}'", movie.title);
            } else {
                println!("'{}' is already on your watchlist", movie.title);
            }
        }
        WatchlistAction::Remove { id } => {
            if store.remove(id)? {
                println!("Removed {}", id);
            } else {
                println!("{} is not on your watchlist", id);
            }
        }
    }
    Ok(())
}

async fn run_browse(session: &Session, window: std::time::Duration) -> Result<()> {
    let coordinator = session.coordinator().await;
    let store = session.watchlist.clone();
    let _sync = store.spawn_sync();

    if coordinator.genres().is_empty() {
        println!("Genre list unavailable; genre filtering is disabled");
    } else {
        for option in coordinator.genres().options() {
            println!("genre {:>6}  {}", option.value, option.label);
        }
    }

    let (debouncer, settled) = Debouncer::new(window);
    let follower = coordinator.follow_settled_text(settled);

    let mut updates = coordinator.subscribe();
    let printer_store = store.clone();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            print_state(&state, &printer_store);
        }
    });

    coordinator.refresh();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        let mut words = line.splitn(2, ' ');
        match (words.next(), words.next()) {
            (Some("genre"), arg) => {
                coordinator.set_genre(arg.map(|g| g.trim().to_string()));
            }
            (Some("add"), Some(id)) => match id.trim().parse::<i64>() {
                Ok(id) => add_from_results(&coordinator.state(), &store, id),
                Err(_) => println!("usage: add <movie-id>"),
            },
            (Some("remove"), Some(id)) => match id.trim().parse::<i64>() {
                Ok(id) => match store.remove(id) {
                    Ok(true) => println!("Removed {}", id),
                    Ok(false) => println!("{} is not on your watchlist", id),
                    Err(e) => error!("Failed to update watchlist: {}", e),
                },
                Err(_) => println!("usage: remove <movie-id>"),
            },
            (Some("watchlist"), None) => {
                for entry in store.list() {
                    print_entry(&entry);
                }
            }
            (Some("quit"), None) => break,
            _ => debouncer.push(line.to_string()),
        }
    }

    debouncer.dispose();
    follower.abort();
    printer.abort();
    Ok(())
}

fn add_from_results(state: &SearchState, store: &WatchlistStore, id: i64) {
    let Some(movie) = state.results.iter().find(|m| m.id == id) else {
        println!("{} is not in the current results", id);
        return;
    };

    match store.add(WatchlistEntry::snapshot(movie)) {
        Ok(true) => println!("Added '{}'", movie.title),
        Ok(false) => println!("'{}' is already on your watchlist", movie.title),
        Err(e) => error!("Failed to update watchlist: {}", e),
    }
}

fn print_state(state: &SearchState, watchlist: &WatchlistStore) {
    if state.loading {
        println!("Loading...");
        return;
    }
    if let Some(ref message) = state.error {
        println!("Error {}", message);
        return;
    }
    for movie in &state.results {
        let marker = if watchlist.contains(movie.id) { "*" } else { " " };
        println!("{} {}", marker, card_line(movie));
    }
}

fn print_entry(entry: &WatchlistEntry) {
    let added = match entry.added_at {
        Some(at) => at.format("%Y-%m-%d").to_string(),
        None => "unknown".to_string(),
    };
    println!("  {}  (added {})", card_line(&entry.movie), added);
}

fn card_line(movie: &MovieSummary) -> String {
    format!(
        "[{}] {} | {} | {} | {}\n      {}\n      {}",
        movie.id,
        movie.title,
        movie.rating_label(),
        movie.original_language,
        movie.release_year(),
        movie.short_overview(),
        movie.poster_url(PosterSize::W200),
    )
}
