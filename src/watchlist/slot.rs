use crate::error::BrowseResult;
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;
use uuid::Uuid;

pub(crate) const NOTIFY_CAPACITY: usize = 64;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Identity of one execution context (one open window/tab) sharing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// "Something under `key` changed". Carries no payload: receivers reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    pub key: String,
    pub origin: ContextId,
}

/// Durable key-value storage shared by every context of one origin.
pub trait DurableSlot: Send + Sync {
    fn read(&self, key: &str) -> BrowseResult<Option<String>>;

    /// Stores `value` and notifies subscribers, tagged with the writer.
    fn write(&self, key: &str, value: &str, origin: ContextId) -> BrowseResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<SlotChange>;
}

struct SlotNotifier {
    tx: broadcast::Sender<SlotChange>,
}

impl SlotNotifier {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self { tx }
    }

    fn notify(&self, key: &str, origin: ContextId) {
        let change = SlotChange {
            key: key.to_string(),
            origin,
        };
        // No subscribers is fine: nobody else is watching.
        if let Ok(count) = self.tx.send(change) {
            debug!("Slot '{}' change sent to {} subscribers", key, count);
        }
    }
}

/// Process-local slot, for tests and embedding.
pub struct MemorySlot {
    values: Mutex<HashMap<String, String>>,
    notifier: SlotNotifier,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            notifier: SlotNotifier::new(),
        }
    }
}

impl Default for MemorySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableSlot for MemorySlot {
    fn read(&self, key: &str) -> BrowseResult<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str, origin: ContextId) -> BrowseResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.notifier.notify(key, origin);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SlotChange> {
        self.notifier.tx.subscribe()
    }
}

/// One `<key>.json` file per key under a directory. Survives restarts.
///
/// Writes through this instance notify its subscribers directly. Writes by
/// other instances or processes on the same directory are picked up by a
/// poller, started on the first `subscribe` inside a tokio runtime, and
/// reported with an origin no local context owns.
pub struct FileSlot {
    shared: Arc<FileShared>,
    poll_interval: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

struct FileShared {
    dir: PathBuf,
    notifier: SlotNotifier,
    /// Last known content per key; `None` means the file did not exist.
    seen: Mutex<HashMap<String, Option<String>>>,
    external: ContextId,
}

impl FileSlot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_poll_interval(dir, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(FileShared {
                dir: dir.into(),
                notifier: SlotNotifier::new(),
                seen: Mutex::new(HashMap::new()),
                external: ContextId::new(),
            }),
            poll_interval,
            watcher: Mutex::new(None),
        }
    }

    fn ensure_watcher(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.is_some() {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            debug!("No tokio runtime, file slot reports only its own writes");
            return;
        };
        let shared = Arc::downgrade(&self.shared);
        *watcher = Some(runtime.spawn(watch_files(shared, self.poll_interval)));
    }
}

impl Drop for FileSlot {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take() {
            watcher.abort();
        }
    }
}

impl FileShared {
    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    async fn poll(&self) {
        let keys: Vec<String> = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        for key in keys {
            let current = match tokio::fs::read_to_string(self.path(&key)).await {
                Ok(content) => Some(content),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    debug!("Could not poll slot '{}': {}", key, e);
                    continue;
                }
            };

            let changed = {
                let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
                match seen.get(&key) {
                    Some(previous) if *previous == current => false,
                    _ => {
                        seen.insert(key.clone(), current);
                        true
                    }
                }
            };

            if changed {
                debug!("Slot '{}' changed on disk", key);
                self.notifier.notify(&key, self.external);
            }
        }
    }
}

async fn watch_files(shared: Weak<FileShared>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.poll().await;
    }
}

impl DurableSlot for FileSlot {
    fn read(&self, key: &str) -> BrowseResult<Option<String>> {
        let content = match std::fs::read_to_string(self.shared.path(key)) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        self.shared
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| content.clone());
        Ok(content)
    }

    fn write(&self, key: &str, value: &str, origin: ContextId) -> BrowseResult<()> {
        std::fs::create_dir_all(&self.shared.dir)?;
        let path = self.shared.path(key);
        let tmp = self.shared.dir.join(format!("{}.{}.tmp", key, origin));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;

        self.shared
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Some(value.to_string()));
        self.shared.notifier.notify(key, origin);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SlotChange> {
        self.ensure_watcher();
        self.shared.notifier.tx.subscribe()
    }
}
