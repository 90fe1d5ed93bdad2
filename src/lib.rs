//! Blocklist overlay engine for social feed pages.
//!
//! Keeps a local blocklist in step with the remote one, classifies feed
//! items by author as the page mutates, hides or annotates items by blocked
//! authors, and toggles block status from inline controls.

pub mod config;
pub mod engine;
pub mod page;
pub mod remote;
pub mod storage;
pub mod util;
