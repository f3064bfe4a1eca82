//! Fixed-interval bounded polling.
//!
//! Service readiness, process detection, vendor window detection and device
//! readiness all share `poll_until`. There is no backoff.

use crate::cancel::CancelToken;
use std::time::{Duration, Instant};

/// How often and how many times to check a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollSpec {
    /// Check every `interval` for at most `max_wait`.
    ///
    /// At least one check is always made.
    pub fn bounded(interval: Duration, max_wait: Duration) -> Self {
        let max_attempts = if interval.is_zero() {
            1
        } else {
            (max_wait.as_millis() / interval.as_millis()).clamp(1, u32::MAX as u128) as u32
        };
        Self {
            interval,
            max_attempts,
        }
    }

    /// Check exactly `max_attempts` times (at least once), `interval` apart.
    pub fn attempts(max_attempts: u32, interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Same attempt count with no sleeping between checks.
    pub fn immediate(self) -> Self {
        Self {
            interval: Duration::ZERO,
            ..self
        }
    }

    /// Upper bound of the time spent sleeping.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Result of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate held on check number `attempts`.
    Reached { attempts: u32, elapsed: Duration },

    /// Every check failed.
    TimedOut { attempts: u32, elapsed: Duration },

    /// The cancel token fired before the predicate held.
    Cancelled,
}

impl PollOutcome {
    pub fn is_reached(&self) -> bool {
        matches!(self, PollOutcome::Reached { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollOutcome::Cancelled)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            PollOutcome::Reached { elapsed, .. } | PollOutcome::TimedOut { elapsed, .. } => {
                Some(*elapsed)
            }
            PollOutcome::Cancelled => None,
        }
    }
}

/// Check `predicate` until it returns true, the attempts run out, or
/// `cancel` fires. Checks first and sleeps only between checks.
pub fn poll_until<F>(spec: PollSpec, cancel: &CancelToken, mut predicate: F) -> PollOutcome
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let max_attempts = spec.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if predicate() {
            return PollOutcome::Reached {
                attempts: attempt,
                elapsed: started.elapsed(),
            };
        }
        if attempt < max_attempts && !cancel.sleep(spec.interval) {
            return PollOutcome::Cancelled;
        }
    }

    PollOutcome::TimedOut {
        attempts: max_attempts,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_attempts() {
        let spec = PollSpec::bounded(Duration::from_secs(2), Duration::from_secs(30));
        assert_eq!(spec.max_attempts, 15);
        assert_eq!(spec.max_wait(), Duration::from_secs(28));

        let spec = PollSpec::bounded(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(spec.max_attempts, 1);

        let spec = PollSpec::bounded(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(spec.max_attempts, 1);
    }

    #[test]
    fn test_immediate_keeps_attempts() {
        let spec = PollSpec::bounded(Duration::from_secs(2), Duration::from_secs(60)).immediate();
        assert_eq!(spec.max_attempts, 30);
        assert_eq!(spec.interval, Duration::ZERO);
    }

    #[test]
    fn test_reached_on_first_check() {
        let mut calls = 0;
        let outcome = poll_until(PollSpec::attempts(5, Duration::ZERO), &CancelToken::new(), || {
            calls += 1;
            true
        });
        assert!(matches!(outcome, PollOutcome::Reached { attempts: 1, .. }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_reached_after_several_checks() {
        let mut calls = 0;
        let outcome = poll_until(PollSpec::attempts(5, Duration::ZERO), &CancelToken::new(), || {
            calls += 1;
            calls == 3
        });
        assert!(matches!(outcome, PollOutcome::Reached { attempts: 3, .. }));
    }

    #[test]
    fn test_times_out_without_error() {
        let mut calls = 0;
        let outcome = poll_until(PollSpec::attempts(4, Duration::ZERO), &CancelToken::new(), || {
            calls += 1;
            false
        });
        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 4, .. }));
        assert_eq!(calls, 4);
        assert!(!outcome.is_reached());
    }

    #[test]
    fn test_cancelled_before_first_check() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut calls = 0;
        let outcome = poll_until(PollSpec::attempts(4, Duration::ZERO), &cancel, || {
            calls += 1;
            true
        });
        assert!(outcome.is_cancelled());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_cancel_from_predicate_stops_polling() {
        let cancel = CancelToken::new();
        let mut calls = 0;
        let outcome = poll_until(PollSpec::attempts(10, Duration::ZERO), &cancel, || {
            calls += 1;
            cancel.cancel();
            false
        });
        assert!(outcome.is_cancelled());
        assert_eq!(calls, 1);
    }
}
