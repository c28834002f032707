//! Error types shared across the sync engine.

use crate::cache::MutationIdentity;
use crate::gateway::GatewayError;

/// A broken internal invariant. Never recoverable by retrying or rolling back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
  #[error("in-flight counter for {identity} would go negative")]
  NegativeCounter { identity: MutationIdentity },
}

/// Outcome of a failed mutation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MutationError {
  /// The server rejected the mutation; the cache was rolled back.
  #[error(transparent)]
  Gateway(#[from] GatewayError),
  #[error("internal invariant violated: {0}")]
  Invariant(#[from] InvariantViolation),
}

impl MutationError {
  pub fn gateway(&self) -> Option<&GatewayError> {
    match self {
      Self::Gateway(err) => Some(err),
      Self::Invariant(_) => None,
    }
  }

  pub fn is_invariant_violation(&self) -> bool {
    matches!(self, Self::Invariant(_))
  }
}
