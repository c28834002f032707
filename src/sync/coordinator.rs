//! Lifecycle of a single optimistic mutation.
//!
//! One call to [`MutationCoordinator::execute`] runs, in order, on a task of
//! its own:
//!
//! 1. cancel in-flight reads of the target key
//! 2. snapshot the current entry
//! 3. write the optimistic value (skipped when nothing is cached yet)
//! 4. register with the [`ConcurrencyTracker`]
//! 5. await the gateway, retrying per [`RetryPolicy`]
//! 6. commit the authoritative result, or 7. restore the snapshot and notify
//! 8. settle the tracker registration
//! 9. invalidate the key if this was the last mutation of its identity to settle
//!
//! Steps 1-4 never yield, so no other cache operation can interleave with them.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::retry::RetryPolicy;
use super::tracker::ConcurrencyTracker;
use crate::cache::{CacheStore, MutationIdentity, QueryKey, Snapshot};
use crate::error::MutationError;
use crate::gateway::{ErrorCode, GatewayError, RemoteGateway};
use crate::notify::{Notification, Notifier};

/// Message shown when a mutation fails and no more specific one applies.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Predicts the server's answer from the currently cached value.
pub type OptimisticUpdate = Box<dyn FnOnce(&Value) -> Value + Send>;

/// What to write into the target key when the gateway succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
  /// The response body is the new value.
  Replace,
  /// The new value lives at a JSON pointer inside the response, e.g. `/cart`.
  Pointer(String),
  /// The resource no longer exists; store `null`.
  Clear,
  /// Leave the cache to invalidation.
  Skip,
}

/// When a settled mutation should trigger a fresh read of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
  Never,
  /// After success or failure, once the identity's batch has drained.
  OnSettled,
  /// Only after success, once the identity's batch has drained.
  OnSuccess,
}

/// Description of one state-changing operation.
pub struct Mutation {
  operation: String,
  payload: Value,
  target: Option<QueryKey>,
  identity: Option<MutationIdentity>,
  optimistic: Option<OptimisticUpdate>,
  commit: Commit,
  invalidation: Invalidation,
  retry: RetryPolicy,
  refresh: Option<(QueryKey, Duration)>,
  success_message: Option<String>,
  failure_message: Option<String>,
  code_messages: Vec<(ErrorCode, String)>,
}

impl Mutation {
  pub fn new(operation: impl Into<String>, payload: Value) -> Self {
    Self {
      operation: operation.into(),
      payload,
      target: None,
      identity: None,
      optimistic: None,
      commit: Commit::Replace,
      invalidation: Invalidation::Never,
      retry: RetryPolicy::none(),
      refresh: None,
      success_message: None,
      failure_message: None,
      code_messages: Vec::new(),
    }
  }

  /// The cached resource this mutation changes.
  pub fn target(mut self, key: QueryKey) -> Self {
    self.target = Some(key);
    self
  }

  /// Batch this mutation with others sharing `identity`. Without one, the
  /// mutation forms a batch of its own.
  pub fn identity(mut self, identity: MutationIdentity) -> Self {
    self.identity = Some(identity);
    self
  }

  pub fn optimistic<F>(mut self, update: F) -> Self
  where
    F: FnOnce(&Value) -> Value + Send + 'static,
  {
    self.optimistic = Some(Box::new(update));
    self
  }

  pub fn commit(mut self, commit: Commit) -> Self {
    self.commit = commit;
    self
  }

  pub fn invalidate(mut self, invalidation: Invalidation) -> Self {
    self.invalidation = invalidation;
    self
  }

  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// After success, invalidate `key` once `delay` has passed.
  pub fn refresh_after(mut self, key: QueryKey, delay: Duration) -> Self {
    self.refresh = Some((key, delay));
    self
  }

  pub fn success_message(mut self, message: impl Into<String>) -> Self {
    self.success_message = Some(message.into());
    self
  }

  pub fn failure_message(mut self, message: impl Into<String>) -> Self {
    self.failure_message = Some(message.into());
    self
  }

  /// Use a specific failure message when the gateway reports `code`.
  pub fn message_for(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
    self.code_messages.push((code, message.into()));
    self
  }

  pub fn operation(&self) -> &str {
    &self.operation
  }

  fn failure_text(&self, code: &ErrorCode) -> String {
    self
      .code_messages
      .iter()
      .find(|(c, _)| c == code)
      .map(|(_, m)| m.clone())
      .or_else(|| self.failure_message.clone())
      .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string())
  }
}

impl fmt::Debug for Mutation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Mutation")
      .field("operation", &self.operation)
      .field("target", &self.target)
      .field("identity", &self.identity)
      .field("optimistic", &self.optimistic.is_some())
      .field("commit", &self.commit)
      .field("invalidation", &self.invalidation)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}

/// Runs mutations against the gateway while keeping the cache consistent
/// with user intent.
#[derive(Clone)]
pub struct MutationCoordinator {
  store: Arc<CacheStore>,
  gateway: Arc<dyn RemoteGateway>,
  tracker: Arc<ConcurrencyTracker>,
  notifier: Arc<dyn Notifier>,
}

impl MutationCoordinator {
  pub fn new(
    store: Arc<CacheStore>,
    gateway: Arc<dyn RemoteGateway>,
    tracker: Arc<ConcurrencyTracker>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      store,
      gateway,
      tracker,
      notifier,
    }
  }

  pub fn tracker(&self) -> &Arc<ConcurrencyTracker> {
    &self.tracker
  }

  /// Run the mutation to settlement.
  ///
  /// The protocol runs on its own task, so dropping the returned future
  /// (a timeout, a `select!`, a closed view) still leaves the cache committed
  /// or rolled back, and the tracker settled.
  ///
  /// Gateway failures are rolled back and notified here; the returned error
  /// is informational. [`MutationError::Invariant`] means the tracker state
  /// is corrupt.
  pub async fn execute(&self, mutation: Mutation) -> Result<Value, MutationError> {
    match self.spawn(mutation).await {
      Ok(result) => result,
      Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
      Err(e) => {
        warn!("mutation task stopped before settling: {}", e);
        Err(GatewayError::cancelled().into())
      }
    }
  }

  /// Start the mutation on its own task and return a handle to its outcome.
  pub fn spawn(&self, mutation: Mutation) -> JoinHandle<Result<Value, MutationError>> {
    let span = info_span!(
      "mutation",
      operation = %mutation.operation,
      key = %mutation.target.as_ref().map(ToString::to_string).unwrap_or_default(),
    );
    let coordinator = self.clone();
    tokio::spawn(async move { coordinator.run(mutation).await }.instrument(span))
  }

  async fn run(&self, mut mutation: Mutation) -> Result<Value, MutationError> {
    let identity = mutation
      .identity
      .clone()
      .unwrap_or_else(MutationIdentity::unique);
    let optimistic = mutation.optimistic.take();

    let snapshot = match &mutation.target {
      Some(key) => self.apply_optimistic(key, optimistic),
      None => None,
    };
    let guard = self.tracker.track(identity);

    info!("sending mutation");
    let result = mutation
      .retry
      .run(|| self.gateway.mutate(&mutation.operation, &mutation.payload))
      .await;

    match &result {
      Ok(response) => {
        info!("mutation succeeded");
        if let Some(key) = &mutation.target {
          self.commit(key, &mutation.commit, response);
        }
      }
      Err(err) => {
        warn!("mutation failed: {}", err);
        if let Some(snapshot) = snapshot {
          self.store.restore(snapshot);
        }
        self
          .notifier
          .notify(Notification::destructive(mutation.failure_text(&err.code)));
      }
    }

    let remaining = guard.settle()?;

    if let Some(key) = &mutation.target {
      let wants_refetch = match mutation.invalidation {
        Invalidation::Never => false,
        Invalidation::OnSettled => true,
        Invalidation::OnSuccess => result.is_ok(),
      };
      if wants_refetch {
        if remaining == 0 {
          self.store.invalidate(key);
        } else {
          debug!(remaining, "leaving invalidation to the last settling mutation");
        }
      }
    }

    if result.is_ok() {
      if let Some((key, delay)) = mutation.refresh.take() {
        self.schedule_refresh(key, delay);
      }
      if let Some(message) = mutation.success_message.take() {
        self.notifier.notify(Notification::success(message));
      }
    }

    result.map_err(MutationError::from)
  }

  /// Steps 1-3. Returns the snapshot only if an optimistic value was written.
  fn apply_optimistic(&self, key: &QueryKey, optimistic: Option<OptimisticUpdate>) -> Option<Snapshot> {
    self.store.cancel_in_flight(key);

    let update = optimistic?;
    let Some(snapshot) = self.store.snapshot(key) else {
      debug!(%key, "nothing cached yet, skipping optimistic update");
      return None;
    };
    let next = snapshot.data().map(update)?;
    self.store.write(key, next);
    debug!(%key, "optimistic value written");
    Some(snapshot)
  }

  fn commit(&self, key: &QueryKey, commit: &Commit, response: &Value) {
    let value = match commit {
      Commit::Replace => Some(response.clone()),
      Commit::Pointer(pointer) => {
        let value = response.pointer(pointer).cloned();
        if value.is_none() {
          warn!(%key, %pointer, "response has nothing at pointer, cache left to invalidation");
        }
        value
      }
      Commit::Clear => Some(Value::Null),
      Commit::Skip => None,
    };

    if let Some(value) = value {
      // A read started while the mutation was in flight may predate it.
      self.store.cancel_in_flight(key);
      self.store.write(key, value);
    }
  }

  fn schedule_refresh(&self, key: QueryKey, delay: Duration) {
    debug!(%key, ?delay, "scheduling delayed refresh");
    let store = Arc::clone(&self.store);
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      store.invalidate(&key);
    });
  }
}
