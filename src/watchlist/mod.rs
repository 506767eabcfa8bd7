mod slot;

pub use slot::{ContextId, DurableSlot, FileSlot, MemorySlot};

use crate::error::{BrowseError, BrowseResult};
use crate::models::WatchlistEntry;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const WATCHLIST_KEY: &str = "watchlist";

/// The user's watchlist as seen from one context.
///
/// Mutations go straight to the durable slot and to this context's view.
/// Other contexts on the same slot pick them up through [`spawn_sync`],
/// which reloads the whole list on every change notification.
///
/// [`spawn_sync`]: WatchlistStore::spawn_sync
#[derive(Clone)]
pub struct WatchlistStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    slot: Arc<dyn DurableSlot>,
    key: String,
    context: ContextId,
    view: watch::Sender<Vec<WatchlistEntry>>,
}

impl WatchlistStore {
    pub fn open(slot: Arc<dyn DurableSlot>) -> Self {
        let context = ContextId::new();
        let entries = load_entries(slot.as_ref(), WATCHLIST_KEY);
        info!(context = %context, "Opened watchlist with {} entries", entries.len());

        let (view, _) = watch::channel(entries);
        Self {
            inner: Arc::new(StoreInner {
                slot,
                key: WATCHLIST_KEY.to_string(),
                context,
                view,
            }),
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.inner.view.borrow().iter().any(|e| e.id() == id)
    }

    /// Entries in the order they were added.
    pub fn list(&self) -> Vec<WatchlistEntry> {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<WatchlistEntry>> {
        self.inner.view.subscribe()
    }

    /// Appends `entry` unless its id is already listed. Returns whether the
    /// list changed.
    ///
    /// Fails without writing if the slot cannot be read, so an unreadable
    /// list is never overwritten.
    pub fn add(&self, entry: WatchlistEntry) -> BrowseResult<bool> {
        let mut entries = self.inner.load_for_update()?;
        if entries.iter().any(|e| e.id() == entry.id()) {
            debug!("Movie {} already on watchlist", entry.id());
            self.inner.replace_view(entries);
            return Ok(false);
        }

        info!("Adding '{}' ({}) to watchlist", entry.movie.title, entry.id());
        entries.push(entry);
        self.inner.persist(&entries)?;
        self.inner.replace_view(entries);
        Ok(true)
    }

    /// Removes the entry with `id` if present. Returns whether the list
    /// changed.
    pub fn remove(&self, id: i64) -> BrowseResult<bool> {
        let mut entries = self.inner.load_for_update()?;
        let before = entries.len();
        entries.retain(|e| e.id() != id);
        if entries.len() == before {
            debug!("Movie {} not on watchlist", id);
            self.inner.replace_view(entries);
            return Ok(false);
        }

        info!("Removing {} from watchlist", id);
        self.inner.persist(&entries)?;
        self.inner.replace_view(entries);
        Ok(true)
    }

    /// Listens for slot changes made by other contexts and refreshes this
    /// view on each one. The task ends once the store is dropped and the
    /// next notification arrives, or when aborted.
    pub fn spawn_sync(&self) -> JoinHandle<()> {
        let mut changes = self.inner.slot.subscribe();
        let key = self.inner.key.clone();
        let context = self.inner.context;
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.key != key || change.origin == context => continue,
                    Ok(change) => debug!(origin = %change.origin, "Watchlist changed elsewhere"),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} watchlist notifications, reloading", missed)
                    }
                    Err(RecvError::Closed) => break,
                }

                let Some(inner) = store.upgrade() else {
                    break;
                };
                inner.refresh();
            }
            debug!(context = %context, "Watchlist sync stopped");
        })
    }
}

impl StoreInner {
    fn load(&self) -> Vec<WatchlistEntry> {
        load_entries(self.slot.as_ref(), &self.key)
    }

    fn load_for_update(&self) -> BrowseResult<Vec<WatchlistEntry>> {
        read_entries(self.slot.as_ref(), &self.key).inspect_err(|e| {
            warn!("Could not read watchlist slot, leaving it untouched: {}", e);
        })
    }

    fn persist(&self, entries: &[WatchlistEntry]) -> BrowseResult<()> {
        let json = serde_json::to_string(entries)
            .map_err(|e| BrowseError::Storage(std::io::Error::other(e)))?;
        self.slot.write(&self.key, &json, self.context)
    }

    fn refresh(&self) {
        let entries = self.load();
        debug!("Refreshed watchlist: {} entries", entries.len());
        self.replace_view(entries);
    }

    fn replace_view(&self, entries: Vec<WatchlistEntry>) {
        self.view.send_if_modified(|current| {
            if *current == entries {
                return false;
            }
            *current = entries;
            true
        });
    }
}

/// Reads the list under `key` for display. Anything unreadable comes back
/// as an empty list.
fn load_entries(slot: &dyn DurableSlot, key: &str) -> Vec<WatchlistEntry> {
    read_entries(slot, key).unwrap_or_else(|e| {
        warn!("Could not read watchlist slot: {}", e);
        Vec::new()
    })
}

/// Reads the list under `key`. Missing or malformed data is an empty list and
/// duplicate ids keep their first occurrence; only a failed read is an error.
fn read_entries(slot: &dyn DurableSlot, key: &str) -> BrowseResult<Vec<WatchlistEntry>> {
    let Some(raw) = slot.read(key)? else {
        return Ok(Vec::new());
    };

    let entries: Vec<WatchlistEntry> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("{}; starting with an empty watchlist", BrowseError::PersistenceCorruption(e.to_string()));
            return Ok(Vec::new());
        }
    };

    let mut seen = HashSet::new();
    Ok(entries.into_iter().filter(|e| seen.insert(e.id())).collect())
}
