use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("Another instance of feedblock appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored value could not be decoded
    #[error("Stored value for '{key}' is not valid: {source}")]
    Decode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded for storage
    #[error("Failed to encode value for '{key}': {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Map lock-related SQLite failures to `InstanceLocked`
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all mean
/// someone else owns the file.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("sqlite_busy")
        || lower.contains("sqlite_locked")
        || lower.contains("unable to open database file")
}

// ============================================================================
// Filter Settings
// ============================================================================

/// The viewer's filtering preferences.
///
/// Replaced wholesale on save; there is no partial update. Field names are
/// persisted in camelCase (`hideBlocked`, `tempShow`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    /// Enforce the blocklist at all. When off, blocked items stay visible.
    pub hide_blocked: bool,
    /// Show a click-to-reveal placeholder instead of removing the item.
    pub temp_show: bool,
    /// Hide the inline block buttons while blocking is enforced.
    pub hide_block_btn: bool,
    /// Apply the blocklist to non-answer content (articles, pins, ...).
    pub block_non_answers: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            hide_blocked: false,
            temp_show: false,
            hide_block_btn: false,
            block_non_answers: true,
        }
    }
}

// ============================================================================
// Blocked Identity Set
// ============================================================================

/// Author identities on the blocklist.
///
/// Backed by an ordered set so duplicates are impossible and the persisted
/// JSON array is stable across writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockedIdSet(BTreeSet<String>);

impl BlockedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, author_id: &str) -> bool {
        self.0.contains(author_id)
    }

    /// Returns true if the id was not present before.
    pub fn insert(&mut self, author_id: impl Into<String>) -> bool {
        self.0.insert(author_id.into())
    }

    /// Returns true if the id was present.
    pub fn remove(&mut self, author_id: &str) -> bool {
        self.0.remove(author_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for BlockedIdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for BlockedIdSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_settings_defaults() {
        let settings = FilterSettings::default();
        assert!(!settings.hide_blocked);
        assert!(!settings.temp_show);
        assert!(!settings.hide_block_btn);
        assert!(settings.block_non_answers);
    }

    #[test]
    fn test_settings_use_camel_case_keys() {
        let settings = FilterSettings {
            hide_blocked: true,
            temp_show: true,
            hide_block_btn: false,
            block_non_answers: false,
        };
        let json = serde_json::to_value(settings).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "hideBlocked": true,
                "tempShow": true,
                "hideBlockBtn": false,
                "blockNonAnswers": false
            })
        );
    }

    #[test]
    fn test_settings_missing_fields_default() {
        let settings: FilterSettings = serde_json::from_str(r#"{"hideBlocked": true}"#).unwrap();
        assert!(settings.hide_blocked);
        assert!(settings.block_non_answers);
    }

    #[test]
    fn test_blocked_set_deduplicates_on_decode() {
        let set: BlockedIdSet = serde_json::from_str(r#"["7", "42", "7"]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["42","7"]"#);
    }

    #[test]
    fn test_blocked_set_insert_remove() {
        let mut set = BlockedIdSet::new();
        assert!(set.insert("42"));
        assert!(!set.insert("42"));
        assert!(set.contains("42"));
        assert!(set.remove("42"));
        assert!(!set.remove("42"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_lock_messages_detected() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(is_lock_message("(code: 14) unable to open database file"));
        assert!(!is_lock_message("no such table: kv"));
    }
}
