//! Optimistic block/unblock toggles and the inline control they drive.
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::page::contract::{CONTROL, CONTROL_BASE, CONTROL_BLOCKED, CONTROL_ERROR, CONTROL_UNBLOCKED};
use crate::page::{Document, NodeId};
use crate::remote::{RemoteClient, RemoteError};
use crate::storage::{Store, StoreError};

/// Label shown while a toggle is in flight.
pub const PENDING_LABEL: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Blocked,
    Unblocked,
}

impl BlockState {
    pub fn from_membership(blocked: bool) -> Self {
        if blocked {
            BlockState::Blocked
        } else {
            BlockState::Unblocked
        }
    }

    pub fn is_blocked(self) -> bool {
        self == BlockState::Blocked
    }

    pub fn label(self) -> &'static str {
        match self {
            BlockState::Blocked => "Blocked",
            BlockState::Unblocked => "Block",
        }
    }

    fn class(self) -> &'static str {
        match self {
            BlockState::Blocked => CONTROL_BLOCKED,
            BlockState::Unblocked => CONTROL_UNBLOCKED,
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("A toggle for {slug} is already in flight")]
    AlreadyPending { slug: String },
    #[error("Toggle request failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("Toggle succeeded remotely but the blocklist could not be saved: {0}")]
    Store(#[from] StoreError),
}

type ToggleKey = (String, String);

/// Issues block/unblock calls and patches the cached blocklist on success.
///
/// At most one toggle per (slug, author id) is in flight at a time.
pub struct BlockActions {
    client: Arc<RemoteClient>,
    store: Store,
    pending: Mutex<HashSet<ToggleKey>>,
}

/// Releases a pending key however the toggle ends.
struct PendingToggle<'a> {
    pending: &'a Mutex<HashSet<ToggleKey>>,
    key: Option<ToggleKey>,
}

impl Drop for PendingToggle<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}

impl BlockActions {
    pub fn new(client: Arc<RemoteClient>, store: Store) -> Self {
        Self {
            client,
            store,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_pending(&self, slug: &str, author_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(slug.to_string(), author_id.to_string()))
    }

    /// Flip the block status of one author.
    ///
    /// On success the blocklist gains or loses `author_id` (read-modify-write)
    /// and the new state is returned. On failure the blocklist is untouched.
    /// Nothing is retried.
    pub async fn toggle(
        &self,
        slug: &str,
        author_id: &str,
        currently_blocked: bool,
    ) -> Result<BlockState, ActionError> {
        let key = (slug.to_string(), author_id.to_string());
        if !self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone())
        {
            return Err(ActionError::AlreadyPending {
                slug: slug.to_string(),
            });
        }
        let _pending = PendingToggle {
            pending: &self.pending,
            key: Some(key),
        };

        let block = !currently_blocked;
        if let Err(e) = self.client.set_block(slug, block).await {
            tracing::warn!(slug, author_id, block, error = %e, "Block toggle failed");
            return Err(e.into());
        }

        let changed = self
            .store
            .update_blocked_ids(|set| {
                if block {
                    set.insert(author_id)
                } else {
                    set.remove(author_id)
                }
            })
            .await
            .inspect_err(|e| {
                tracing::error!(slug, author_id, error = %e, "Failed to record block toggle");
            })?;

        tracing::info!(slug, author_id, block, changed, "Toggled block status");
        Ok(BlockState::from_membership(block))
    }
}

// ============================================================================
// Control Element
// ============================================================================

/// Create a control showing `state` and append it to `region`.
pub fn create_control(doc: &mut Document, region: NodeId, state: BlockState) -> NodeId {
    let control = doc.create_element("button");
    doc.set_attr(control, "type", "button");
    doc.set_attr(control, "class", &format!("{CONTROL_BASE} {CONTROL}"));
    show_state(doc, control, state);
    doc.append_child(region, control);
    control
}

/// The state a control currently displays.
pub fn displayed_state(doc: &Document, control: NodeId) -> BlockState {
    BlockState::from_membership(doc.has_class(control, CONTROL_BLOCKED))
}

pub fn is_pending(doc: &Document, control: NodeId) -> bool {
    doc.has_attr(control, "disabled")
}

/// Idle control showing `state`, with any error indicator cleared.
pub fn show_state(doc: &mut Document, control: NodeId, state: BlockState) {
    doc.set_class(control, CONTROL_BLOCKED, state.is_blocked());
    doc.set_class(control, CONTROL_UNBLOCKED, !state.is_blocked());
    doc.set_class(control, CONTROL_ERROR, false);
    doc.remove_attr(control, "title");
    doc.remove_attr(control, "disabled");
    set_label(doc, control, state.label());
}

pub fn show_pending(doc: &mut Document, control: NodeId) {
    doc.set_attr(control, "disabled", "");
    set_label(doc, control, PENDING_LABEL);
}

/// Idle control back at `state`, flagged with `message`.
pub fn show_error(doc: &mut Document, control: NodeId, state: BlockState, message: &str) {
    show_state(doc, control, state);
    doc.set_class(control, CONTROL_ERROR, true);
    doc.set_attr(control, "title", message);
}

fn set_label(doc: &mut Document, control: NodeId, label: &str) {
    if doc.text_content(control) != label {
        doc.set_text(control, label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::BlockedIdSet;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(server: &MockServer) -> (BlockActions, Store) {
        let config = AppConfig {
            base_url: server.uri(),
            session_cookie: Some("xsrf-token=t".to_string()),
            ..AppConfig::default()
        };
        let client = Arc::new(RemoteClient::new(&config).unwrap());
        let store = Store::open(":memory:").await.unwrap();
        (BlockActions::new(client, store.clone()), store)
    }

    #[tokio::test]
    async fn test_block_then_unblock_round_trip() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v4/members/alice/actions/block"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        let (actions, store) = setup(&server).await;

        assert_eq!(actions.toggle("alice", "7", false).await.unwrap(), BlockState::Blocked);
        assert!(store.blocked_ids().contains("7"));

        assert_eq!(actions.toggle("alice", "7", true).await.unwrap(), BlockState::Unblocked);
        assert_eq!(*store.blocked_ids(), BlockedIdSet::new());
        assert!(!actions.is_pending("alice", "7"));
    }

    #[tokio::test]
    async fn test_failed_toggle_leaves_blocklist() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let (actions, store) = setup(&server).await;

        let result = actions.toggle("alice", "7", false).await;
        assert!(matches!(result, Err(ActionError::Remote(RemoteError::HttpStatus(403)))));
        assert!(store.blocked_ids().is_empty());
        assert!(!actions.is_pending("alice", "7"));
    }

    #[tokio::test]
    async fn test_duplicate_toggle_rejected_while_pending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;
        let (actions, _store) = setup(&server).await;

        let (first, second) = tokio::join!(actions.toggle("bob", "9", false), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            actions.toggle("bob", "9", false).await
        });
        assert_eq!(first.unwrap(), BlockState::Blocked);
        assert!(matches!(second, Err(ActionError::AlreadyPending { .. })));
    }

    #[test]
    fn test_control_states() {
        let mut doc = Document::new();
        let region = doc.create_element("div");
        let root = doc.root();
        doc.append_child(root, region);

        let control = create_control(&mut doc, region, BlockState::Unblocked);
        assert_eq!(doc.text_content(control), "Block");
        assert!(doc.has_class(control, CONTROL_UNBLOCKED));
        assert_eq!(displayed_state(&doc, control), BlockState::Unblocked);

        show_pending(&mut doc, control);
        assert!(is_pending(&doc, control));
        assert_eq!(doc.text_content(control), PENDING_LABEL);

        show_error(&mut doc, control, BlockState::Unblocked, "HTTP error: status 500");
        assert!(!is_pending(&doc, control));
        assert_eq!(doc.text_content(control), "Block");
        assert!(doc.has_class(control, CONTROL_ERROR));
        assert_eq!(doc.attr(control, "title"), Some("HTTP error: status 500"));

        show_state(&mut doc, control, BlockState::Blocked);
        assert_eq!(doc.text_content(control), "Blocked");
        assert!(doc.has_class(control, CONTROL_BLOCKED));
        assert!(!doc.has_class(control, CONTROL_UNBLOCKED));
        assert!(!doc.has_class(control, CONTROL_ERROR));
        assert_eq!(doc.attr(control, "title"), None);
    }
}
