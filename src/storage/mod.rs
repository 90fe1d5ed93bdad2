mod kv;
mod schema;
mod types;

pub use schema::{Store, BLOCKED_KEY, LAST_SYNCED_KEY, SETTINGS_KEY};
pub use types::{BlockedIdSet, FilterSettings, StoreError};
