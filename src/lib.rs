//! Optimistic cache synchronization for a storefront client.
//!
//! The [`client::QueryClient`] keeps a local mirror of server-owned
//! resources. Mutations update that mirror before the server confirms,
//! commit the server's answer on success, roll back on failure, and re-read
//! the resource once the last of several racing mutations has settled.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod infinite;
pub mod logging;
pub mod notify;
pub mod query;
pub mod storefront;
pub mod sync;

pub use cache::{CacheEntry, CacheStore, MutationIdentity, QueryKey, QueryStatus};
pub use client::{CacheResult, CacheSource, QueryClient, RefetchWorker};
pub use error::{InvariantViolation, MutationError};
pub use gateway::{Cursor, ErrorCode, GatewayError, Page, RemoteGateway, UnknownCode};
pub use infinite::{InfiniteQuery, InfiniteStatus};
pub use notify::{Notification, Notifier, Severity};
pub use query::{QueryObserver, QueryState};
pub use sync::{Commit, Invalidation, Mutation, MutationCoordinator, RetryPolicy};
