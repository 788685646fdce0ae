//! Background-filled cache cells for the current user and the site roster.
//!
//! A `Warm<T>` starts a named worker thread and publishes its value once.
//! Readers either peek (`get`, possibly empty) or block until the worker
//! is done (`wait`). A failed worker logs at `warn` and leaves the cell
//! empty; nothing is propagated.

use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::ApiError;
use crate::types::SiteUser;

#[derive(Debug)]
pub struct Warm<T> {
    slot: Arc<OnceLock<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> Warm<T> {
    /// A cell that will never be filled.
    pub fn empty() -> Self {
        Self {
            slot: Arc::new(OnceLock::new()),
            worker: Mutex::new(None),
        }
    }

    /// A cell that is already filled.
    pub fn ready(value: T) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(value);
        Self {
            slot: Arc::new(slot),
            worker: Mutex::new(None),
        }
    }

    pub fn spawn<F>(name: &str, job: F) -> Self
    where
        F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    {
        let slot = Arc::new(OnceLock::new());
        let target = Arc::clone(&slot);
        let label = name.to_string();
        let spawned = std::thread::Builder::new()
            .name(format!("warm-{name}"))
            .spawn(move || match job() {
                Ok(value) => {
                    let _ = target.set(value);
                    tracing::debug!(cache = %label, "cache warmed");
                }
                Err(err) => tracing::warn!(cache = %label, error = %err, "cache warm-up failed"),
            });
        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(cache = name, error = %err, "could not start cache worker");
                None
            }
        };
        Self {
            slot,
            worker: Mutex::new(worker),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.slot.get()
    }

    /// Block until the worker finishes, then read the cell.
    pub fn wait(&self) -> Option<&T> {
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("cache worker panicked");
            }
        }
        self.slot.get()
    }
}

/// The two caches the bootstrap warms.
#[derive(Debug)]
pub struct UserCache {
    pub current_user: Warm<SiteUser>,
    pub site_users: Warm<Vec<SiteUser>>,
}

impl UserCache {
    pub fn empty() -> Self {
        Self {
            current_user: Warm::empty(),
            site_users: Warm::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn wait_returns_worker_value() {
        let cell = Warm::spawn("answer", || Ok(42));
        assert_eq!(cell.wait(), Some(&42));
        assert_eq!(cell.get(), Some(&42));
    }

    #[test]
    fn failed_worker_leaves_cell_empty() {
        let cell: Warm<u32> = Warm::spawn("broken", || Err(ApiError::Transport("down".to_string())));
        assert_eq!(cell.wait(), None);
    }

    #[test]
    fn get_does_not_block_on_slow_worker() {
        let (tx, rx) = mpsc::channel::<()>();
        let cell = Warm::spawn("slow", move || {
            rx.recv().ok();
            Ok("done")
        });
        assert_eq!(cell.get(), None);
        tx.send(()).unwrap();
        assert_eq!(cell.wait(), Some(&"done"));
    }

    #[test]
    fn ready_and_empty_cells() {
        assert_eq!(Warm::ready(1).wait(), Some(&1));
        assert_eq!(Warm::<u8>::empty().wait(), None);
    }
}
