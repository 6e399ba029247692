use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::models::ConnectionMode;

/// The single mutation path for everything a job shares across tasks:
/// the byte counter, the resolved total size, the connection mode, the
/// first recorded error, and the cancellation signal.
///
/// Cancellation is cooperative and irreversible. A worker that fails
/// permanently escalates through [`SharedState::fail`], which records the
/// error and cancels the rest of the job; an explicit user cancellation
/// goes through [`SharedState::cancel`] and is remembered separately so
/// the terminal status can distinguish the two.
pub struct SharedState {
    downloaded: AtomicU64,
    total: AtomicU64,
    mode: Mutex<ConnectionMode>,
    error: Mutex<Option<String>>,
    user_cancelled: AtomicBool,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means another task panicked mid-update; the
    // value itself is still a plain scalar worth reading.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SharedState {
    pub fn new(known_size: Option<u64>) -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(known_size.unwrap_or(0)),
            mode: Mutex::new(ConnectionMode::Unknown),
            error: Mutex::new(None),
            user_cancelled: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn add_downloaded(&self, n: u64) -> u64 {
        self.downloaded.fetch_add(n, Ordering::SeqCst) + n
    }

    /// Rolls back bytes counted during a failed segment attempt so the
    /// aggregate stays equal to the bytes held in completed part files.
    pub fn sub_downloaded(&self, n: u64) {
        self.downloaded.fetch_sub(n, Ordering::SeqCst);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Total size in bytes; 0 means unknown.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn mode(&self) -> ConnectionMode {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: ConnectionMode) {
        *lock(&self.mode) = mode;
    }

    /// Records an error unless one is already present. The first failure
    /// is the one reported to the manager.
    pub fn record_error(&self, reason: impl Into<String>) {
        let mut error = lock(&self.error);
        if error.is_none() {
            *error = Some(reason.into());
        }
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.error).clone()
    }

    /// Permanent internal failure: record the reason and stop every other
    /// worker. The terminal status stays `failed`.
    pub fn fail(&self, reason: impl Into<String>) {
        self.record_error(reason);
        self.cancel.cancel();
    }

    /// Explicit cancellation requested from outside the engine.
    pub fn cancel(&self) {
        self.user_cancelled.store(true, Ordering::SeqCst);
        self.record_error("download cancelled by user");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_user_cancelled(&self) -> bool {
        self.user_cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let state = SharedState::new(None);
        state.record_error("segment 2 failed");
        state.record_error("segment 0 failed");
        assert_eq!(state.error().as_deref(), Some("segment 2 failed"));
    }

    #[test]
    fn fail_cancels_without_marking_user_cancellation() {
        let state = SharedState::new(None);
        state.fail("segment 1 failed after 3 attempts");
        assert!(state.is_cancelled());
        assert!(!state.is_user_cancelled());
        assert_eq!(
            state.error().as_deref(),
            Some("segment 1 failed after 3 attempts")
        );
    }

    #[test]
    fn user_cancel_records_default_reason_once() {
        let state = SharedState::new(None);
        state.cancel();
        assert!(state.is_cancelled());
        assert!(state.is_user_cancelled());
        assert_eq!(state.error().as_deref(), Some("download cancelled by user"));

        // An error recorded before cancellation is preserved.
        let state = SharedState::new(None);
        state.record_error("disk full");
        state.cancel();
        assert_eq!(state.error().as_deref(), Some("disk full"));
    }

    #[test]
    fn byte_counter_rolls_back() {
        let state = SharedState::new(Some(100));
        state.add_downloaded(60);
        state.add_downloaded(20);
        state.sub_downloaded(20);
        assert_eq!(state.downloaded(), 60);
        assert_eq!(state.total(), 100);
    }
}
