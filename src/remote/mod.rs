//! Remote source of truth for the blocklist.
//!
//! - [`RemoteClient`] - listing and block/unblock endpoints over HTTPS
//! - [`BlocklistSync`] - rebuilds the cached blocklist from the listing

mod client;
mod sync;

pub use client::{xsrf_from_cookie, BlockedPage, RemoteClient, RemoteError};
pub use sync::{BlocklistSync, SyncError, SyncOutcome, MAX_PAGES};
