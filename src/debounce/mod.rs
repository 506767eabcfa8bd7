//! Timer-based coalescing of rapid intent changes.
//!
//! Raw values go in through [`Debouncer::push`]; a value comes out of the
//! paired receiver only once no newer value has arrived for the whole
//! quiescence window.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Output side, shared with the task. Emptied on teardown; the task sends
/// only while holding the lock, so nothing gets out after that.
type SettledSender<T> = Arc<Mutex<Option<mpsc::UnboundedSender<T>>>>;

pub struct Debouncer<T> {
    input: mpsc::UnboundedSender<T>,
    settled: SettledSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawns the coalescing task. Must be called inside a tokio runtime.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (input, raw) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let settled = Arc::new(Mutex::new(Some(settled_tx)));
        let task = tokio::spawn(run(raw, settled.clone(), window));

        (Self { input, settled, task }, settled_rx)
    }

    pub fn push(&self, value: T) {
        // Fails only after disposal, when nothing may be emitted anyway.
        let _ = self.input.send(value);
    }

    /// Cancels any pending emission. Nothing is emitted afterwards and the
    /// settled receiver sees the channel closed.
    pub fn dispose(self) {
        // Teardown happens in Drop.
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.settled.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.task.abort();
    }
}

async fn run<T>(mut raw: mpsc::UnboundedReceiver<T>, settled: SettledSender<T>, window: Duration) {
    while let Some(mut latest) = raw.recv().await {
        loop {
            tokio::select! {
                next = raw.recv() => match next {
                    Some(value) => latest = value,
                    None => return,
                },
                _ = sleep(window) => {
                    let sent = match settled.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                        Some(tx) => tx.send(latest).is_ok(),
                        None => false,
                    };
                    if !sent {
                        debug!("Debouncer torn down, stopping");
                        return;
                    }
                    break;
                }
            }
        }
    }
}
