//! Cache-backed query observer.
//!
//! A `QueryObserver<T>` binds one consumer (a view, a CLI command) to one
//! query key. It decodes whatever the cache store holds for that key into
//! a [`QueryState`] and reports when that changes, whether the change came
//! from a read, an optimistic write, a commit or a rollback.
//!
//! # Example
//!
//! ```ignore
//! let mut cart = client.observe::<Cart>(QueryKey::from("cart"));
//! cart.fetch();
//!
//! // In event loop tick
//! if cart.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! match cart.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(cart) => render_cart(cart),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::{CacheEntry, QueryKey, QueryStatus};
use crate::client::QueryClient;
use crate::gateway::{ErrorCode, GatewayError};

/// The state of a query as seen by one observer
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Nothing cached and no read in flight
  Idle,
  /// First read in flight, nothing to show yet
  Loading,
  /// Data available (possibly while a background refresh runs)
  Success(T),
  /// Read failed and there is no data to fall back to
  Error(GatewayError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&GatewayError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

impl<T: DeserializeOwned> QueryState<T> {
  fn from_entry(entry: Option<&CacheEntry>) -> Self {
    let Some(entry) = entry else {
      return QueryState::Idle;
    };

    match (&entry.data, entry.status) {
      (Some(data), _) => match serde_json::from_value(data.clone()) {
        Ok(decoded) => QueryState::Success(decoded),
        Err(e) => QueryState::Error(GatewayError::new(
          ErrorCode::Decode,
          format!("Failed to decode {}: {}", entry.key, e),
        )),
      },
      (None, QueryStatus::Pending) => QueryState::Loading,
      (None, QueryStatus::Error) => QueryState::Error(
        entry
          .error
          .clone()
          .unwrap_or_else(|| GatewayError::new(ErrorCode::Internal, "read failed")),
      ),
      (None, QueryStatus::Idle | QueryStatus::Success) => QueryState::Idle,
    }
  }
}

/// Subscriber bound to a single query key.
pub struct QueryObserver<T> {
  client: QueryClient,
  key: QueryKey,
  receiver: watch::Receiver<Option<CacheEntry>>,
  state: QueryState<T>,
  is_fetching: bool,
  updated_at: Option<DateTime<Utc>>,
}

impl<T: DeserializeOwned> QueryObserver<T> {
  pub(crate) fn new(client: QueryClient, key: QueryKey) -> Self {
    let receiver = client.store().subscribe(&key);
    let mut observer = Self {
      client,
      key,
      receiver,
      state: QueryState::Idle,
      is_fetching: false,
      updated_at: None,
    };
    observer.sync();
    observer
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&GatewayError> {
    self.state.error()
  }

  /// Whether a read is in flight, including background refreshes.
  pub fn is_fetching(&self) -> bool {
    self.is_fetching
  }

  pub fn updated_at(&self) -> Option<DateTime<Utc>> {
    self.updated_at
  }

  /// Start a read unless one is already in flight.
  pub fn fetch(&mut self) {
    if self.is_fetching {
      return;
    }
    self.start_fetch();
  }

  /// Start a read even if one is in flight; the older one is superseded.
  pub fn refetch(&mut self) {
    self.start_fetch();
  }

  /// Pick up cache changes without blocking.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.receiver.has_changed() {
      Ok(true) => {
        self.sync();
        true
      }
      _ => false,
    }
  }

  /// Wait for the next change to the observed key.
  pub async fn changed(&mut self) {
    if self.receiver.changed().await.is_ok() {
      self.sync();
    }
  }

  fn sync(&mut self) {
    let entry = self.receiver.borrow_and_update().clone();
    self.is_fetching = entry
      .as_ref()
      .is_some_and(|e| e.status == QueryStatus::Pending);
    self.updated_at = entry.as_ref().map(|e| e.updated_at);
    self.state = QueryState::from_entry(entry.as_ref());
  }

  fn start_fetch(&mut self) {
    let read = self.client.start_fetch(&self.key);
    let key = self.key.clone();
    self.is_fetching = true;
    tokio::spawn(async move {
      if let Err(e) = read.await {
        debug!(%key, "observer fetch ended: {}", e);
      }
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("is_fetching", &self.is_fetching)
      .finish_non_exhaustive()
  }
}
