//! Boundary with the remote commerce backend.
//!
//! The sync core only needs success/failure plus a payload or a structured
//! error; transport concerns (timeouts, connection reuse) live in the
//! implementations.

pub mod http;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::cache::QueryKey;

pub use http::HttpGateway;

/// Opaque position in a paginated sequence.
pub type Cursor = String;

/// One slice of a cursor-paginated resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
  pub items: Vec<T>,
  /// Absent on the last page.
  #[serde(default)]
  pub next_cursor: Option<Cursor>,
}

/// Async access to server-owned state.
pub trait RemoteGateway: Send + Sync + 'static {
  /// Read the current server value for a resource.
  fn query<'a>(&'a self, key: &'a QueryKey) -> BoxFuture<'a, Result<Value, GatewayError>>;

  /// Perform a state-changing operation and return the server's authoritative result.
  fn mutate<'a>(
    &'a self,
    operation: &'a str,
    payload: &'a Value,
  ) -> BoxFuture<'a, Result<Value, GatewayError>>;

  /// Fetch one page of a list-shaped resource. `None` requests the first page.
  fn fetch_page<'a>(
    &'a self,
    key: &'a QueryKey,
    cursor: Option<&'a str>,
    limit: usize,
  ) -> BoxFuture<'a, Result<Page<Value>, GatewayError>>;
}

/// Machine-readable application error codes reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
  NotFound,
  AlreadyExists,
  BackInStockRequestAlreadyExists,
  Unauthorized,
  InvalidArgument,
  /// Transport-level failure; no application answer was received.
  Network,
  /// The response arrived but could not be decoded.
  Decode,
  /// The local side abandoned the request.
  Cancelled,
  Internal,
  /// A code this client does not know about.
  Other(UnknownCode),
}

/// Code string the backend sent that matches no known [`ErrorCode`].
///
/// Only produced by parsing, so it never spells a known code and renders back
/// exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownCode(String);

impl UnknownCode {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl ErrorCode {
  pub fn as_str(&self) -> &str {
    match self {
      Self::NotFound => "NOT_FOUND",
      Self::AlreadyExists => "ALREADY_EXISTS",
      Self::BackInStockRequestAlreadyExists => "BACK_IN_STOCK_NOTIFICATION_REQUEST_ALREADY_EXISTS",
      Self::Unauthorized => "UNAUTHORIZED",
      Self::InvalidArgument => "INVALID_ARGUMENT",
      Self::Network => "NETWORK_ERROR",
      Self::Decode => "DECODE_ERROR",
      Self::Cancelled => "CANCELLED",
      Self::Internal => "INTERNAL",
      Self::Other(code) => code.as_str(),
    }
  }

  /// Whether repeating the same request could plausibly succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Network | Self::Internal | Self::Other(_))
  }
}

impl FromStr for ErrorCode {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "NOT_FOUND" => Self::NotFound,
      "ALREADY_EXISTS" => Self::AlreadyExists,
      "BACK_IN_STOCK_NOTIFICATION_REQUEST_ALREADY_EXISTS" => Self::BackInStockRequestAlreadyExists,
      "UNAUTHORIZED" | "UNAUTHENTICATED" => Self::Unauthorized,
      "INVALID_ARGUMENT" => Self::InvalidArgument,
      "NETWORK_ERROR" => Self::Network,
      "DECODE_ERROR" => Self::Decode,
      "CANCELLED" => Self::Cancelled,
      "INTERNAL" => Self::Internal,
      other => Self::Other(UnknownCode(other.to_string())),
    })
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for ErrorCode {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for ErrorCode {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(s.parse().unwrap_or_else(|never| match never {}))
  }
}

/// A rejected remote operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
  pub code: ErrorCode,
  pub message: String,
  /// HTTP status, when the failure came from an HTTP response.
  pub status: Option<u16>,
}

impl GatewayError {
  pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
      status: None,
    }
  }

  pub fn with_status(mut self, status: u16) -> Self {
    self.status = Some(status);
    self
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::new(ErrorCode::Network, message)
  }

  pub fn cancelled() -> Self {
    Self::new(ErrorCode::Cancelled, "request was cancelled")
  }

  pub fn is_not_found(&self) -> bool {
    self.code == ErrorCode::NotFound
  }
}
