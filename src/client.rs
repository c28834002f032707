//! Query client that ties the cache store to the remote gateway.
//!
//! This is the one object the application constructs at startup and passes
//! around: reads go through it into the store, mutations go through its
//! [`MutationCoordinator`], and the paired [`RefetchWorker`] performs the
//! re-fetches that invalidation schedules.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::cache::{CacheStore, InvalidationQueue, QueryKey};
use crate::error::MutationError;
use crate::gateway::{ErrorCode, GatewayError, Page, RemoteGateway};
use crate::infinite::InfiniteQuery;
use crate::notify::Notifier;
use crate::query::QueryObserver;
use crate::sync::{ConcurrencyTracker, Mutation, MutationCoordinator};

/// Result from a cached read, including where the data came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Stale data served because the refresh failed.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network unavailable, serving stale cached data
  Offline,
}

/// Entry point for reads and mutations against one session's cache.
#[derive(Clone)]
pub struct QueryClient {
  store: Arc<CacheStore>,
  gateway: Arc<dyn RemoteGateway>,
  mutations: MutationCoordinator,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl QueryClient {
  /// Create a client with an empty cache. The returned worker must be spawned
  /// for invalidations to turn into re-fetches.
  pub fn new(gateway: Arc<dyn RemoteGateway>, notifier: Arc<dyn Notifier>) -> (Self, RefetchWorker) {
    let (store, queue) = CacheStore::new();
    let store = Arc::new(store);
    let mutations = MutationCoordinator::new(
      Arc::clone(&store),
      Arc::clone(&gateway),
      Arc::new(ConcurrencyTracker::new()),
      notifier,
    );

    let worker = RefetchWorker {
      queue,
      store: Arc::downgrade(&store),
      gateway: Arc::clone(&gateway),
    };

    let client = Self {
      store,
      gateway,
      mutations,
      stale_time: Duration::minutes(1),
    };
    (client, worker)
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn store(&self) -> &Arc<CacheStore> {
    &self.store
  }

  pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
    &self.gateway
  }

  pub fn mutations(&self) -> &MutationCoordinator {
    &self.mutations
  }

  /// Run a mutation to settlement through the coordinator.
  pub async fn mutate(&self, mutation: Mutation) -> Result<Value, MutationError> {
    self.mutations.execute(mutation).await
  }

  /// Seed or overwrite cached data without touching the network.
  pub fn set_query_data(&self, key: &QueryKey, data: Value) {
    self.store.write(key, data);
  }

  pub fn get_query_data(&self, key: &QueryKey) -> Option<Value> {
    self.store.read(key).and_then(|entry| entry.data)
  }

  /// Treat a not-found read of `key` as an absent resource rather than an error.
  pub fn allow_absent(&self, key: &QueryKey) {
    self.store.allow_absent(key);
  }

  pub fn invalidate(&self, key: &QueryKey) {
    self.store.invalidate(key);
  }

  pub fn cancel(&self, key: &QueryKey) -> bool {
    self.store.cancel_in_flight(key)
  }

  /// Read `key` from the server into the cache, superseding any read already
  /// in flight for it.
  ///
  /// Fails with [`ErrorCode::Cancelled`] if the read is cancelled or
  /// superseded before it lands.
  pub async fn fetch_query(&self, key: &QueryKey) -> Result<Value, GatewayError> {
    self.start_fetch(key).await
  }

  /// Like [`fetch_query`](Self::fetch_query), but the read is registered and
  /// started before this returns.
  pub fn start_fetch(&self, key: &QueryKey) -> impl Future<Output = Result<Value, GatewayError>> + Send + 'static {
    fetch_into_store(&self.store, &self.gateway, key)
  }

  /// Cache-first read.
  ///
  /// 1. Fresh cached data is returned immediately
  /// 2. Stale, invalidated or missing data is fetched from the network
  /// 3. If that fetch fails, stale data is served instead (offline mode)
  pub async fn ensure_query_data(&self, key: &QueryKey) -> Result<CacheResult<Value>, GatewayError> {
    let cached = self
      .store
      .read(key)
      .and_then(|entry| entry.data.clone().map(|data| (data, entry)));

    let Some((data, entry)) = cached else {
      return self.fetch_query(key).await.map(CacheResult::from_network);
    };

    if !entry.is_stale(self.stale_time) {
      return Ok(CacheResult::from_cache(data, entry.updated_at));
    }

    match self.fetch_query(key).await {
      Ok(fresh) => Ok(CacheResult::from_network(fresh)),
      Err(err) => {
        warn!(%key, "serving stale data: {}", err);
        let latest = self.store.read(key).unwrap_or(entry);
        let cached_at = latest.updated_at;
        Ok(CacheResult::offline(latest.data.unwrap_or(data), cached_at))
      }
    }
  }

  /// Typed view of [`ensure_query_data`](Self::ensure_query_data).
  pub async fn ensure_query<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<CacheResult<T>, GatewayError> {
    let result = self.ensure_query_data(key).await?;
    let data = serde_json::from_value(result.data.clone()).map_err(|e| {
      GatewayError::new(ErrorCode::Decode, format!("Failed to decode {}: {}", key, e))
    })?;
    Ok(result.map(|_| data))
  }

  /// Subscribe to `key` as a typed query.
  pub fn observe<T: DeserializeOwned>(&self, key: QueryKey) -> QueryObserver<T> {
    QueryObserver::new(self.clone(), key)
  }

  /// Cursor-accumulating query over a list resource.
  pub fn infinite<T>(&self, key: QueryKey, page_size: usize) -> InfiniteQuery<T>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let gateway = Arc::clone(&self.gateway);
    InfiniteQuery::new(move |cursor| {
      let gateway = Arc::clone(&gateway);
      let key = key.clone();
      async move {
        let page = gateway.fetch_page(&key, cursor.as_deref(), page_size).await?;
        let items = page
          .items
          .into_iter()
          .map(serde_json::from_value)
          .collect::<Result<Vec<T>, _>>()
          .map_err(|e| GatewayError::new(ErrorCode::Decode, format!("Failed to decode {} page: {}", key, e)))?;
        Ok::<_, GatewayError>(Page {
          items,
          next_cursor: page.next_cursor,
        })
      }
    })
  }
}

/// Registers a read of `key` immediately and returns a future for its outcome.
///
/// The entry is marked pending and the gateway call is spawned before this
/// returns, so the read is cancellable even if the future is never polled.
fn fetch_into_store(
  store: &Arc<CacheStore>,
  gateway: &Arc<dyn RemoteGateway>,
  key: &QueryKey,
) -> impl Future<Output = Result<Value, GatewayError>> + Send + 'static {
  let ticket = store.begin_fetch(key);

  let task = {
    let gateway = Arc::clone(gateway);
    let key = key.clone();
    tokio::spawn(async move { gateway.query(&key).await })
  };
  store.attach_fetch(&ticket, task.abort_handle());

  let store = Arc::clone(store);
  async move {
    let result = match task.await {
      Ok(result) => result,
      Err(e) if e.is_cancelled() => {
        debug!(key = %ticket.key(), "read cancelled");
        return Err(GatewayError::cancelled());
      }
      Err(e) => Err(GatewayError::new(ErrorCode::Internal, format!("read task failed: {}", e))),
    };
    let result = match result {
      Err(e) if e.is_not_found() && store.is_absent_allowed(ticket.key()) => {
        debug!(key = %ticket.key(), "resource absent");
        Ok(Value::Null)
      }
      other => other,
    };

    if store.complete_fetch(ticket, &result) {
      result
    } else {
      Err(GatewayError::cancelled())
    }
  }
}

/// Drains scheduled invalidations and re-fetches keys that are still in use.
pub struct RefetchWorker {
  queue: InvalidationQueue,
  store: Weak<CacheStore>,
  gateway: Arc<dyn RemoteGateway>,
}

impl RefetchWorker {
  /// Process invalidations until the cache store is dropped.
  pub async fn run(mut self) {
    while let Some(key) = self.queue.recv().await {
      let Some(store) = self.store.upgrade() else {
        break;
      };
      if !store.is_observed(&key) {
        debug!(%key, "invalidated key has no data or observers, skipping re-fetch");
        continue;
      }

      let refetch = fetch_into_store(&store, &self.gateway, &key);
      tokio::spawn(async move {
        match refetch.await {
          Ok(_) => debug!(%key, "re-fetched after invalidation"),
          Err(e) if e.code == ErrorCode::Cancelled => {}
          Err(e) => warn!(%key, "re-fetch after invalidation failed: {}", e),
        }
      });
    }
    debug!("refetch worker stopped");
  }

  /// Take the next scheduled invalidation without processing it.
  pub fn try_next(&mut self) -> Option<QueryKey> {
    self.queue.try_recv()
  }

  /// Drain and count pending invalidations for `key`.
  pub fn drain_count(&mut self, key: &QueryKey) -> usize {
    let mut count = 0;
    while let Some(next) = self.queue.try_recv() {
      if &next == key {
        count += 1;
      }
    }
    count
  }
}
