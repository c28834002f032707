//! Client-held mirror of server-owned state.
//!
//! This module provides the synchronous half of the sync engine:
//! - Structural query keys and mutation identities
//! - One entry per key with data, status and timestamp
//! - Generation-guarded reads so cancelled fetches never land
//! - Change subscriptions for consumers

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, QueryStatus};
pub use key::{MutationIdentity, QueryKey};
pub use store::{CacheStore, FetchTicket, InvalidationQueue, Snapshot};
