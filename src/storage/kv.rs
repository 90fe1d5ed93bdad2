use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqliteExecutor;

use super::schema::Store;
use super::types::StoreError;

// ============================================================================
// Raw Key-Value Operations
// ============================================================================

/// Upsert a single row. Generic over the executor so writes can join a
/// caller's transaction.
pub(crate) async fn upsert<'e, E>(executor: E, key: &str, value: &str) -> Result<(), StoreError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO kv (key, value, updated_at)
        VALUES (?, ?, datetime('now'))
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
    "#,
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) fn encode<T: Serialize>(key: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode { key, source })
}

impl Store {
    /// Get the raw JSON text stored under `key`.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Decode the value under `key`, or `None` if it was never written.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        key: &'static str,
    ) -> Result<Option<T>, StoreError> {
        match self.get_raw(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Decode { key, source }),
            None => Ok(None),
        }
    }

    pub(crate) async fn put_json<T: Serialize>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<(), StoreError> {
        let encoded = encode(key, value)?;
        upsert(&self.pool, key, &encoded).await
    }
}
