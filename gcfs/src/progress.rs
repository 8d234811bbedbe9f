//! Commit progress and cancellation.
use serde_derive::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub current_entry: Option<String>,
}

pub type ProgressListener = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Progress of the running commit.
///
/// Counters are atomics so another thread can poll `snapshot()` while a
/// commit runs; a listener, if set, is called after every update on the
/// committing thread, outside any lock.
#[derive(Default)]
pub struct Progress {
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    current_entry: Mutex<Option<String>>,
    listener: Mutex<Option<ProgressListener>>,
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Progress {
    pub fn new() -> Progress {
        Progress::default()
    }

    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        let mut slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(listener));
    }

    pub fn clear_listener(&self) {
        let mut slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            current_entry: self
                .current_entry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    pub(crate) fn start(&self, total: u64) {
        self.bytes_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(total, Ordering::Relaxed);
        self.set_current(None);
    }

    pub(crate) fn set_current(&self, entry: Option<&str>) {
        *self.current_entry.lock().unwrap_or_else(|e| e.into_inner()) = entry.map(str::to_string);
        self.notify();
    }

    pub(crate) fn advance(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        self.notify();
    }

    fn notify(&self) {
        let listener = self.listener.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(listener) = listener {
            listener(&self.snapshot());
        }
    }
}

/// Cooperative cancellation flag shared between a commit and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_updates() {
        let progress = Progress::new();
        progress.start(100);
        progress.set_current(Some("/a.bin"));
        progress.advance(40);
        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                bytes_done: 40,
                bytes_total: 100,
                current_entry: Some("/a.bin".to_string()),
            }
        );
    }

    #[test]
    fn test_listener_sees_every_update() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let progress = Progress::new();
        let sink = seen.clone();
        progress.set_listener(move |s| sink.lock().unwrap().push(s.bytes_done));
        progress.start(10);
        progress.advance(4);
        progress.advance(6);
        assert_eq!(*seen.lock().unwrap(), vec![0, 4, 10]);
    }

    #[test]
    fn test_listener_can_clear_itself() {
        let progress = Arc::new(Progress::new());
        let calls = Arc::new(AtomicU64::new(0));
        let handle = Arc::downgrade(&progress);
        let counter = calls.clone();
        progress.set_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(progress) = handle.upgrade() {
                progress.clear_listener();
            }
        });
        progress.advance(1);
        progress.advance(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(progress.snapshot().bytes_done, 2);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
        token.reset();
        assert!(!other.is_cancelled());
    }
}
