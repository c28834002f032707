//! Mutation lifecycle and convergence across concurrent mutations.

mod coordinator;
mod retry;
mod tracker;

pub use coordinator::{
  Commit, Invalidation, Mutation, MutationCoordinator, OptimisticUpdate, DEFAULT_FAILURE_MESSAGE,
};
pub use retry::{RetryConfig, RetryPolicy};
pub use tracker::{ConcurrencyTracker, InFlightGuard};
