use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use super::kv::{encode, upsert};
use super::types::{is_lock_message, BlockedIdSet, FilterSettings, StoreError};

/// Key of the persisted filter settings.
pub const SETTINGS_KEY: &str = "Config";
/// Key of the persisted blocked-identity list.
pub const BLOCKED_KEY: &str = "blockedIdList";
/// Key of the RFC 3339 timestamp of the last completed sync.
pub const LAST_SYNCED_KEY: &str = "lastSyncedAt";

// ============================================================================
// Store
// ============================================================================

/// Process-wide persistence for the filter settings and the blocklist.
///
/// Values live in a SQLite key-value table and are mirrored in memory so
/// the render path never awaits. Readers get an `Arc` snapshot of the
/// blocklist: a writer builds the next set off to the side and swaps it in
/// with one pointer store, so a reader sees either the old or the new set.
/// All writers serialize on `write_lock`.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
    settings: Arc<RwLock<FilterSettings>>,
    blocked: Arc<RwLock<Arc<BlockedIdSet>>>,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    /// Open (or create) the store and load the cached values.
    ///
    /// `":memory:"` opens a private in-memory database on a single pinned
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process holds the
    /// database (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        #[cfg(unix)]
        if !in_memory {
            restrict_permissions(path);
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // Every connection to `:memory:` is a separate database, so the
        // in-memory store is pinned to one connection that never recycles.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let store = Self {
            pool,
            settings: Arc::new(RwLock::new(FilterSettings::default())),
            blocked: Arc::new(RwLock::new(Arc::new(BlockedIdSet::new()))),
            write_lock: Arc::new(Mutex::new(())),
        };

        store.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;
        store.load_cache().await?;

        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Prime the in-memory mirror. A corrupt entry is logged and replaced
    /// by its default rather than failing the whole store.
    async fn load_cache(&self) -> Result<(), StoreError> {
        let settings = match self.get_json::<FilterSettings>(SETTINGS_KEY).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e @ StoreError::Decode { .. }) => {
                tracing::warn!(error = %e, "Ignoring unreadable settings, using defaults");
                FilterSettings::default()
            }
            Err(e) => return Err(e),
        };

        let blocked = match self.get_json::<BlockedIdSet>(BLOCKED_KEY).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e @ StoreError::Decode { .. }) => {
                tracing::warn!(error = %e, "Ignoring unreadable blocklist, starting empty");
                BlockedIdSet::new()
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            blocked = blocked.len(),
            hide_blocked = settings.hide_blocked,
            "Loaded store"
        );
        self.swap_settings(settings);
        self.swap_blocked(blocked);
        Ok(())
    }

    // ========================================================================
    // Filter Settings
    // ========================================================================

    /// Current filter settings.
    pub fn settings(&self) -> FilterSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the filter settings wholesale.
    pub async fn set_settings(&self, settings: FilterSettings) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.put_json(SETTINGS_KEY, &settings).await?;
        self.swap_settings(settings);
        tracing::info!(?settings, "Saved filter settings");
        Ok(())
    }

    fn swap_settings(&self, settings: FilterSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    // ========================================================================
    // Blocklist
    // ========================================================================

    /// Snapshot of the blocklist. Cheap to clone, never partially updated.
    pub fn blocked_ids(&self) -> Arc<BlockedIdSet> {
        Arc::clone(&self.blocked.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the blocklist with the result of a completed sync and record
    /// the sync time, in one transaction.
    ///
    /// Returns the number of distinct identities stored.
    pub async fn complete_sync(&self, ids: BlockedIdSet) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let encoded = encode(BLOCKED_KEY, &ids)?;
        let synced_at = encode(LAST_SYNCED_KEY, &Utc::now())?;

        let mut tx = self.pool.begin().await?;
        upsert(&mut *tx, BLOCKED_KEY, &encoded).await?;
        upsert(&mut *tx, LAST_SYNCED_KEY, &synced_at).await?;
        tx.commit().await?;

        let count = ids.len();
        self.swap_blocked(ids);
        Ok(count)
    }

    /// Read-modify-write of the blocklist.
    ///
    /// `apply` edits a copy of the persisted set and returns whether it
    /// changed anything; unchanged sets are not written. Reads from the
    /// database rather than the mirror so a second process writing the same
    /// file is not clobbered.
    pub async fn update_blocked_ids<F>(&self, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut BlockedIdSet) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut next = match self.get_json::<BlockedIdSet>(BLOCKED_KEY).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e @ StoreError::Decode { .. }) => {
                tracing::warn!(error = %e, "Persisted blocklist unreadable, editing cached copy");
                (*self.blocked_ids()).clone()
            }
            Err(e) => return Err(e),
        };

        if !apply(&mut next) {
            return Ok(false);
        }

        self.put_json(BLOCKED_KEY, &next).await?;
        self.swap_blocked(next);
        Ok(true)
    }

    fn swap_blocked(&self, ids: BlockedIdSet) {
        *self.blocked.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(ids);
    }

    /// When the last sync completed, if ever.
    pub async fn last_synced(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get_json(LAST_SYNCED_KEY).await
    }
}

/// Pre-create the database file user-only, or tighten an existing one.
#[cfg(unix)]
fn restrict_permissions(path: &str) {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let db_path = std::path::Path::new(path);
    if db_path.exists() {
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = std::fs::set_permissions(db_path, perms) {
            tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
        }
    } else if db_path.parent().is_some_and(|p| p.exists()) {
        // Failure here surfaces again when SQLite opens the file.
        let _ = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(db_path);
    }
}
