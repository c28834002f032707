use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::key::QueryKey;
use crate::gateway::GatewayError;

/// Lifecycle of the read side of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Entry exists but nothing has been fetched or written yet
  Idle,
  /// A read for this key is in flight
  Pending,
  /// Data was written by a read, a mutation or a seed
  Success,
  /// The last read failed; previously cached data, if any, is kept
  Error,
}

/// The client-held mirror of one server resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: QueryKey,
  /// `None` until a read or write provides a value.
  pub data: Option<Value>,
  pub status: QueryStatus,
  pub updated_at: DateTime<Utc>,
  /// Error from the most recent failed read.
  pub error: Option<GatewayError>,
  /// Set by invalidation, cleared by the next successful write.
  pub is_invalidated: bool,
}

impl CacheEntry {
  pub(crate) fn empty(key: QueryKey) -> Self {
    Self {
      key,
      data: None,
      status: QueryStatus::Idle,
      updated_at: Utc::now(),
      error: None,
      is_invalidated: false,
    }
  }

  /// Decode the cached value into a typed view.
  pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
    self
      .data
      .as_ref()
      .map(|v| serde_json::from_value(v.clone()))
      .transpose()
  }

  /// Whether this entry should be refreshed before being served as fresh.
  pub fn is_stale(&self, stale_time: Duration) -> bool {
    self.is_invalidated || self.data.is_none() || Utc::now() - self.updated_at > stale_time
  }
}
