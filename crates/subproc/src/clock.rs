//! Deadline arithmetic for bounded operations.
//!
//! Every blocking call is bounded by the smaller of the per-call timeout
//! and whatever is left of the whole-process deadline. `None` means
//! unbounded; `Some(Duration::ZERO)` means the bound has already expired.

use std::time::{Duration, Instant};

/// Converts a relative whole-process deadline into an absolute instant,
/// captured at spawn time.
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|timeout| Instant::now().checked_add(timeout))
}

/// Time left until `deadline`, saturating at zero once it has passed.
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

/// Effective bound for a single blocking call.
pub(crate) fn effective(
    timeout: Option<Duration>,
    deadline: Option<Instant>,
) -> Option<Duration> {
    match (timeout, remaining(deadline)) {
        (None, None) => None,
        (Some(timeout), None) => Some(timeout),
        (None, Some(remaining)) => Some(remaining),
        (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_when_neither_is_set() {
        assert_eq!(effective(None, None), None);
    }

    #[test]
    fn per_call_timeout_passes_through() {
        let timeout = Duration::from_millis(250);
        assert_eq!(effective(Some(timeout), None), Some(timeout));
    }

    #[test]
    fn deadline_caps_the_timeout() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let bound = effective(Some(Duration::from_secs(60)), Some(deadline));
        assert!(bound.expect("bounded") <= Duration::from_millis(10));
    }

    #[test]
    fn expired_deadline_is_zero() {
        let deadline = Instant::now() - Duration::from_millis(10);
        assert_eq!(effective(None, Some(deadline)), Some(Duration::ZERO));
        assert_eq!(
            effective(Some(Duration::from_secs(1)), Some(deadline)),
            Some(Duration::ZERO)
        );
    }
}
