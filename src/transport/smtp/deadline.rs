//! Cancellation and deadlines for blocking operations

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{error, Error};

/// A cancellation token with an optional time limit
///
/// Clones share the cancel flag, so any clone can stop an operation running
/// on another thread with [`Deadline::cancel`]. The token is checked before
/// every blocking step (probe, dial, greeting, each command, waiting on
/// another caller's connection attempt), and socket timeouts are capped by
/// the time that remains. A step already blocked on the network is not
/// interrupted by `cancel`; it ends at the next check or socket timeout.
///
/// ```
/// use std::time::Duration;
/// use relaymail::Deadline;
///
/// let deadline = Deadline::after(Duration::from_secs(30));
/// assert!(!deadline.is_cancelled());
///
/// let other = deadline.clone();
/// other.cancel();
/// assert!(deadline.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// No time limit, only cancellation
    pub fn none() -> Self {
        Self::default()
    }

    /// Expires `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    /// Expires at `instant`
    pub fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            cancelled: Arc::default(),
        }
    }

    /// Cancels every operation using this token or one of its clones
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token was cancelled or the time limit has passed
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.remaining() == Some(Duration::ZERO)
    }

    /// Time left, `None` when there is no limit
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fails with a cancellation error once the token has fired
    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(error::cancelled("operation cancelled"))
        } else if self.remaining() == Some(Duration::ZERO) {
            Err(error::cancelled("deadline exceeded"))
        } else {
            Ok(())
        }
    }

    /// The smaller of `limit` and the remaining time
    pub(crate) fn cap(&self, limit: Duration) -> Duration {
        self.remaining().map_or(limit, |left| left.min(limit))
    }

    /// `timeout` capped by the remaining time, for socket timeouts
    ///
    /// Never returns a zero duration, which sockets reject.
    pub(crate) fn cap_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        let capped = match (timeout, self.remaining()) {
            (Some(timeout), Some(left)) => Some(timeout.min(left)),
            (timeout, left) => timeout.or(left),
        };
        capped.map(|d| d.max(Duration::from_millis(1)))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn none_never_expires() {
        let deadline = Deadline::none();
        assert!(!deadline.is_cancelled());
        assert_eq!(deadline.remaining(), None);
        assert!(deadline.check().is_ok());
        assert_eq!(deadline.cap(Duration::from_secs(10)), Duration::from_secs(10));
        assert_eq!(deadline.cap_timeout(None), None);
    }

    #[test]
    fn cancel_is_shared() {
        let deadline = Deadline::none();
        let clone = deadline.clone();
        clone.cancel();
        assert!(deadline.is_cancelled());
        assert!(deadline.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn expired() {
        let deadline = Deadline::at(Instant::now());
        assert!(deadline.is_cancelled());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        assert!(deadline.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn caps() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert_eq!(deadline.cap(Duration::from_secs(10)), Duration::from_secs(10));
        assert!(deadline.cap(Duration::from_secs(600)) <= Duration::from_secs(60));
        assert!(deadline.cap_timeout(None).unwrap() <= Duration::from_secs(60));
        assert_eq!(
            deadline.cap_timeout(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            Deadline::at(Instant::now()).cap_timeout(None),
            Some(Duration::from_millis(1))
        );
    }
}
