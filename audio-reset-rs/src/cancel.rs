//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cloneable cancellation flag shared between the pipeline worker and
/// whoever may abort it (Ctrl+C handler, tray menu, FFI caller).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if cancelled.
    ///
    /// Returns `false` if the token was cancelled before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_zero_sleep_reports_state() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::ZERO));
        token.cancel();
        assert!(!token.sleep(Duration::ZERO));
    }

    #[test]
    fn test_cancel_wakes_sleeper() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            let finished = sleeper.sleep(Duration::from_secs(30));
            (finished, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (finished, elapsed) = handle.join().unwrap();
        assert!(!finished);
        assert!(elapsed < Duration::from_secs(5));
    }
}
