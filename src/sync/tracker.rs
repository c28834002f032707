//! Per-identity count of mutations that started but have not settled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, warn};

use crate::cache::MutationIdentity;
use crate::error::InvariantViolation;

/// Decides when a batch of concurrent mutations has fully drained.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
  counts: Mutex<HashMap<MutationIdentity, usize>>,
}

impl ConcurrencyTracker {
  pub fn new() -> Self {
    Self::default()
  }

  fn counts(&self) -> MutexGuard<'_, HashMap<MutationIdentity, usize>> {
    self.counts.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn begin(&self, identity: &MutationIdentity) {
    *self.counts().entry(identity.clone()).or_insert(0) += 1;
  }

  /// Record one settlement and return how many are still in flight.
  ///
  /// Ending more mutations than were begun is a programming error and is
  /// reported rather than clamped.
  pub fn end(&self, identity: &MutationIdentity) -> Result<usize, InvariantViolation> {
    let mut counts = self.counts();
    let Some(count) = counts.get_mut(identity) else {
      error!(%identity, "settle without matching begin");
      return Err(InvariantViolation::NegativeCounter {
        identity: identity.clone(),
      });
    };

    *count -= 1;
    let remaining = *count;
    if remaining == 0 {
      counts.remove(identity);
    }
    Ok(remaining)
  }

  /// Mutations currently in flight for `identity`.
  pub fn in_flight(&self, identity: &MutationIdentity) -> usize {
    self.counts().get(identity).copied().unwrap_or(0)
  }

  /// Begin a mutation and return a guard that ends it exactly once.
  pub fn track(self: &Arc<Self>, identity: MutationIdentity) -> InFlightGuard {
    self.begin(&identity);
    InFlightGuard {
      tracker: Arc::clone(self),
      identity,
      settled: false,
    }
  }
}

/// Scoped registration of one in-flight mutation.
///
/// Call [`settle`](Self::settle) to learn the remaining count. If the guard is
/// dropped unsettled (the owning future was dropped mid-flight) the count is
/// still released.
#[must_use = "an unsettled guard releases its count only when dropped"]
pub struct InFlightGuard {
  tracker: Arc<ConcurrencyTracker>,
  identity: MutationIdentity,
  settled: bool,
}

impl InFlightGuard {
  pub fn identity(&self) -> &MutationIdentity {
    &self.identity
  }

  pub fn settle(mut self) -> Result<usize, InvariantViolation> {
    self.settled = true;
    self.tracker.end(&self.identity)
  }
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    if !self.settled {
      warn!(identity = %self.identity, "mutation dropped before settling");
      if let Err(e) = self.tracker.end(&self.identity) {
        error!("{}", e);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_begin_end_counts() {
    let tracker = ConcurrencyTracker::new();
    let id = MutationIdentity::new("updateQty");

    tracker.begin(&id);
    tracker.begin(&id);
    assert_eq!(tracker.in_flight(&id), 2);
    assert_eq!(tracker.end(&id), Ok(1));
    assert_eq!(tracker.end(&id), Ok(0));
    assert_eq!(tracker.in_flight(&id), 0);
  }

  #[test]
  fn test_identities_are_independent() {
    let tracker = ConcurrencyTracker::new();
    let a = MutationIdentity::new("a");
    let b = MutationIdentity::new("b");

    tracker.begin(&a);
    tracker.begin(&b);
    assert_eq!(tracker.end(&a), Ok(0));
    assert_eq!(tracker.in_flight(&b), 1);
  }

  #[test]
  fn test_end_without_begin_is_invariant_violation() {
    let tracker = ConcurrencyTracker::new();
    let id = MutationIdentity::new("x");

    assert_eq!(
      tracker.end(&id),
      Err(InvariantViolation::NegativeCounter { identity: id.clone() })
    );

    tracker.begin(&id);
    assert_eq!(tracker.end(&id), Ok(0));
    assert!(tracker.end(&id).is_err());
  }

  #[test]
  fn test_guard_settles_once() {
    let tracker = Arc::new(ConcurrencyTracker::new());
    let id = MutationIdentity::new("x");

    let first = tracker.track(id.clone());
    let second = tracker.track(id.clone());
    assert_eq!(tracker.in_flight(&id), 2);

    assert_eq!(first.settle(), Ok(1));
    assert_eq!(second.settle(), Ok(0));
    assert_eq!(tracker.in_flight(&id), 0);
  }

  #[test]
  fn test_dropped_guard_releases_count() {
    let tracker = Arc::new(ConcurrencyTracker::new());
    let id = MutationIdentity::new("x");

    {
      let _guard = tracker.track(id.clone());
      assert_eq!(tracker.in_flight(&id), 1);
    }
    assert_eq!(tracker.in_flight(&id), 0);
  }
}
