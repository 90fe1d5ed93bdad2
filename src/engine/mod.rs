//! Blocklist enforcement on a live page.
//!
//! - [`classify`] - author identity and content type of a feed item
//! - [`visibility`] - display decision per item and its rendering
//! - [`watcher`] - debounced rescans driven by document mutations
//! - [`actions`] - optimistic block/unblock toggles
//! - [`agent`] - [`FeedGuard`], wiring the above to one page

pub mod actions;
mod agent;
pub mod classify;
pub mod visibility;
pub mod watcher;

pub use actions::{ActionError, BlockActions, BlockState};
pub use agent::{Activation, FeedGuard, ItemDecision, ScanReport};
pub use classify::{classify, Classification, Classified, ContentType, SkipReason};
pub use visibility::{decide, render, DisplayState};
pub use watcher::MutationWatcher;
