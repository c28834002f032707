//! Structural identifiers for cached resources and mutation batches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ordered identifier naming one cached resource, e.g. `["cart"]` or `["order", "1001"]`.
///
/// Two keys are equal iff every segment matches in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Extend the key with one more segment.
  pub fn with(mut self, segment: impl Into<String>) -> Self {
    self.0.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl From<&str> for QueryKey {
  fn from(segment: &str) -> Self {
    Self(vec![segment.to_string()])
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ",")?;
      }
      write!(f, "{:?}", segment)?;
    }
    write!(f, "]")
  }
}

static ANONYMOUS_IDS: AtomicU64 = AtomicU64::new(0);

/// Groups mutations that converge together on the same resource.
///
/// Several identities may target the same [`QueryKey`]; the identity only
/// decides which mutations count as one concurrent batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationIdentity(QueryKey);

impl MutationIdentity {
  pub fn new(name: impl Into<String>) -> Self {
    Self(QueryKey::new([name.into()]))
  }

  /// A fresh identity shared with no other mutation. Mutations without an
  /// explicit identity get one of these, so each forms a batch of one.
  pub fn unique() -> Self {
    let id = ANONYMOUS_IDS.fetch_add(1, Ordering::Relaxed);
    Self(QueryKey::new(["anonymous".to_string(), id.to_string()]))
  }

  pub fn key(&self) -> &QueryKey {
    &self.0
  }
}

impl From<QueryKey> for MutationIdentity {
  fn from(key: QueryKey) -> Self {
    Self(key)
  }
}

impl fmt::Display for MutationIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}
