use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::client::{RemoteClient, RemoteError};
use crate::storage::{BlockedIdSet, Store, StoreError};

/// Default upper bound on listing pages per sync.
pub const MAX_PAGES: usize = 500;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetching blocklist page at offset {offset} failed: {source}")]
    Remote {
        offset: usize,
        #[source]
        source: RemoteError,
    },
    #[error("Blocklist exceeded {0} pages without signalling its end")]
    TooManyPages(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The blocklist was replaced; holds the number of distinct identities.
    Completed(usize),
    /// Another sync was in flight; nothing was done.
    AlreadyRunning,
}

/// Rebuilds the cached blocklist from the paginated remote listing.
///
/// A sync either replaces the cached set wholesale or leaves it untouched:
/// identities are gathered into a fresh set and only committed once the
/// listing has been read to its end.
pub struct BlocklistSync {
    client: Arc<RemoteClient>,
    store: Store,
    page_size: usize,
    max_pages: usize,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the sync ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BlocklistSync {
    pub fn new(client: Arc<RemoteClient>, store: Store, page_size: usize) -> Self {
        Self {
            client,
            store,
            page_size: page_size.max(1),
            max_pages: MAX_PAGES,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Override the page cap.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Current cached blocklist.
    pub fn snapshot(&self) -> Arc<BlockedIdSet> {
        self.store.blocked_ids()
    }

    /// Page through the remote listing and replace the cached blocklist.
    ///
    /// Concurrent calls while one is running return
    /// `SyncOutcome::AlreadyRunning`. Any page failure aborts the sync with
    /// the cache unchanged; there is no automatic retry.
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Blocklist sync already running");
            return Ok(SyncOutcome::AlreadyRunning);
        }
        let _guard = InFlight(&self.in_flight);

        let mut ids = BlockedIdSet::new();
        let mut offset = 0;
        let mut pages = 0;

        loop {
            if pages == self.max_pages {
                tracing::warn!(pages, "Blocklist paging cap reached, keeping cached list");
                return Err(SyncError::TooManyPages(self.max_pages));
            }

            let page = self
                .client
                .fetch_blocked_page(offset, self.page_size)
                .await
                .map_err(|source| {
                    tracing::warn!(offset, error = %source, "Blocklist sync failed");
                    SyncError::Remote { offset, source }
                })?;
            pages += 1;

            tracing::debug!(offset, received = page.ids.len(), is_end = page.is_end, "Fetched blocklist page");
            ids.extend(page.ids);
            if page.is_end {
                break;
            }
            offset += self.page_size;
        }

        let count = self.store.complete_sync(ids).await?;
        tracing::info!(count, pages, "Synced blocklist");
        Ok(SyncOutcome::Completed(count))
    }

    /// Sync only when nothing is cached yet. Returns `None` if skipped.
    pub async fn sync_if_empty(&self) -> Result<Option<SyncOutcome>, SyncError> {
        if !self.snapshot().is_empty() {
            return Ok(None);
        }
        self.sync().await.map(Some)
    }
}
