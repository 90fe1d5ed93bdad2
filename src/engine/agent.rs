//! Per-page wiring of sync, scanning, rendering and toggles.
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::actions::{self, ActionError, BlockActions, BlockState};
use super::classify::{classify, Classification, Classified};
use super::visibility::{render, DisplayState};
use super::watcher::MutationWatcher;
use crate::page::contract::{AUTHOR_INFO, CONTROL, PLACEHOLDER};
use crate::page::{Document, NodeId, SharedDocument};
use crate::remote::{BlocklistSync, SyncError, SyncOutcome};
use crate::storage::{BlockedIdSet, FilterSettings, Store, StoreError};

/// Cached per-item state, keyed by the item's node.
#[derive(Debug, Clone)]
struct Annotation {
    classification: Classification,
    revealed: bool,
    state: DisplayState,
}

#[derive(Debug, Clone)]
struct ControlBinding {
    item: NodeId,
    slug: String,
    author_id: String,
}

#[derive(Debug, Default)]
struct PageState {
    annotations: HashMap<NodeId, Annotation>,
    controls: HashMap<NodeId, ControlBinding>,
}

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Feed items found in the document.
    pub items: usize,
    /// Items classified during this scan.
    pub classified: usize,
    /// Items re-rendered from their cached classification.
    pub reused: usize,
    /// Items left unclassified, to be retried next scan.
    pub skipped: usize,
    /// Annotations dropped because their node left the document.
    pub purged: usize,
}

/// What activating a node did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// A placeholder was clicked; its item is shown for this page only.
    Revealed(NodeId),
    /// A control completed a toggle; holds the new state.
    Toggled(BlockState),
    /// The node is neither a placeholder nor a control.
    Ignored,
}

/// One item's current classification and display state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDecision {
    pub item: NodeId,
    pub author_id: String,
    pub author_name: String,
    pub state: DisplayState,
}

/// Everything needed to enforce the blocklist on one page.
///
/// Holds the document, the annotation cache and the action controls it
/// injected. Scans are synchronous and never await while holding the
/// document or page locks (always taken in that order).
pub struct FeedGuard {
    document: SharedDocument,
    store: Store,
    sync: Arc<BlocklistSync>,
    actions: BlockActions,
    debounce: Duration,
    page: Mutex<PageState>,
    watcher: Mutex<Option<MutationWatcher>>,
}

impl FeedGuard {
    pub fn new(
        document: SharedDocument,
        store: Store,
        sync: Arc<BlocklistSync>,
        actions: BlockActions,
        debounce: Duration,
    ) -> Self {
        Self {
            document,
            store,
            sync,
            actions,
            debounce,
            page: Mutex::new(PageState::default()),
            watcher: Mutex::new(None),
        }
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn page(&self) -> MutexGuard<'_, PageState> {
        self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Startup sequence: sync if nothing is cached, scan the page, then
    /// watch for mutations.
    ///
    /// A failed startup sync is logged and scanning proceeds with the
    /// (empty) cache.
    pub async fn start(self: &Arc<Self>) -> ScanReport {
        if let Err(e) = self.sync.sync_if_empty().await {
            tracing::warn!(error = %e, "Startup sync failed, continuing with cached blocklist");
        }

        let report = self.scan();
        self.watch();
        report
    }

    /// Spawn the mutation watcher, replacing any previous one.
    pub fn watch(self: &Arc<Self>) {
        let rx = {
            let mut doc = self.document.lock();
            let rx = doc.observe();
            tracing::debug!(observers = doc.observer_count(), "Watching document mutations");
            rx
        };
        let guard = Arc::downgrade(self);
        let watcher = MutationWatcher::spawn(rx, self.debounce, move || {
            let guard = guard.clone();
            async move {
                match guard.upgrade() {
                    Some(guard) => {
                        guard.scan();
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    /// Classify new items and re-render every item.
    ///
    /// Items already annotated are rendered from the cached classification.
    pub fn scan(&self) -> ScanReport {
        let settings = self.store.settings();
        let blocked = self.sync.snapshot();
        let mut doc = self.document.lock();
        let mut page = self.page();

        let mut report = ScanReport {
            purged: purge_detached(&doc, &mut page),
            ..ScanReport::default()
        };

        for item in doc.feed_items() {
            report.items += 1;
            if let Some(annotation) = page.annotations.get_mut(&item) {
                annotation.state = render(
                    &mut doc,
                    item,
                    &annotation.classification,
                    &blocked,
                    settings,
                    annotation.revealed,
                );
                report.reused += 1;
            } else if process_item(&mut doc, &mut page, item, &blocked, settings) {
                report.classified += 1;
            } else {
                report.skipped += 1;
            }
        }

        tracing::debug!(?report, "Scanned page");
        report
    }

    /// Drop the cached state of one item and process it again.
    ///
    /// Returns the new display state, or `None` if the item was skipped.
    pub fn rescan_item(&self, item: NodeId) -> Option<DisplayState> {
        let settings = self.store.settings();
        let blocked = self.sync.snapshot();
        let mut doc = self.document.lock();
        let mut page = self.page();

        page.annotations.remove(&item);
        if !doc.is_connected(item) {
            return None;
        }
        process_item(&mut doc, &mut page, item, &blocked, settings);
        page.annotations.get(&item).map(|a| a.state)
    }

    /// Forget every cached classification and reveal override, then scan.
    pub fn invalidate_all(&self) -> ScanReport {
        self.page().annotations.clear();
        self.scan()
    }

    /// Persist new filter settings and re-render the whole page under them.
    pub async fn save_settings(&self, settings: FilterSettings) -> Result<ScanReport, StoreError> {
        self.store.set_settings(settings).await?;
        Ok(self.invalidate_all())
    }

    /// On-demand blocklist sync. A completed sync re-renders the page.
    pub async fn resync(&self) -> Result<SyncOutcome, SyncError> {
        let outcome = self.sync.sync().await?;
        if let SyncOutcome::Completed(_) = outcome {
            self.invalidate_all();
        }
        Ok(outcome)
    }

    // ========================================================================
    // Interaction
    // ========================================================================

    /// Handle a click on `node`: reveal a placeholder or toggle a control.
    ///
    /// # Errors
    ///
    /// Toggle failures are returned after the control has been restored to
    /// its previous state with an error indicator.
    pub async fn activate(&self, node: NodeId) -> Result<Activation, ActionError> {
        let (control, binding, previous) = {
            let mut doc = self.document.lock();

            if let Some(placeholder) = doc.closest(node, |d, id| d.has_class(id, PLACEHOLDER)) {
                return Ok(self.reveal(&mut doc, placeholder));
            }

            let Some(control) = doc.closest(node, |d, id| d.has_class(id, CONTROL)) else {
                return Ok(Activation::Ignored);
            };
            let Some(binding) = self.page().controls.get(&control).cloned() else {
                return Ok(Activation::Ignored);
            };
            if actions::is_pending(&doc, control) {
                return Err(ActionError::AlreadyPending { slug: binding.slug });
            }

            let previous = actions::displayed_state(&doc, control);
            actions::show_pending(&mut doc, control);
            (control, binding, previous)
        };

        let result = self
            .actions
            .toggle(&binding.slug, &binding.author_id, previous.is_blocked())
            .await;

        match result {
            Ok(state) => {
                {
                    let mut doc = self.document.lock();
                    let page = self.page();
                    for (&other, other_binding) in &page.controls {
                        let idle = other == control || !actions::is_pending(&doc, other);
                        if other_binding.author_id == binding.author_id && idle {
                            actions::show_state(&mut doc, other, state);
                        }
                    }
                }
                self.rescan_item(binding.item);
                Ok(Activation::Toggled(state))
            }
            Err(ActionError::AlreadyPending { slug }) => {
                actions::show_state(&mut self.document.lock(), control, previous);
                Err(ActionError::AlreadyPending { slug })
            }
            Err(e) => {
                actions::show_error(&mut self.document.lock(), control, previous, &e.to_string());
                Err(e)
            }
        }
    }

    fn reveal(&self, doc: &mut Document, placeholder: NodeId) -> Activation {
        let Some(item) = doc.enclosing_item(placeholder) else {
            return Activation::Ignored;
        };
        let mut page = self.page();
        let Some(annotation) = page.annotations.get_mut(&item) else {
            return Activation::Ignored;
        };

        annotation.revealed = true;
        annotation.state = render(
            doc,
            item,
            &annotation.classification,
            &self.sync.snapshot(),
            self.store.settings(),
            true,
        );
        tracing::debug!(item = %item, author = %annotation.classification.author_id, "Revealed blocked item");
        Activation::Revealed(item)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Current decisions for every annotated item, in document order.
    pub fn decisions(&self) -> Vec<ItemDecision> {
        let doc = self.document.lock();
        let page = self.page();
        doc.feed_items()
            .into_iter()
            .filter_map(|item| {
                page.annotations.get(&item).map(|a| ItemDecision {
                    item,
                    author_id: a.classification.author_id.clone(),
                    author_name: a.classification.author_name.clone(),
                    state: a.state,
                })
            })
            .collect()
    }

    pub fn state_of(&self, item: NodeId) -> Option<DisplayState> {
        self.page().annotations.get(&item).map(|a| a.state)
    }

    /// The action control injected into `item`, if any.
    pub fn control_of(&self, item: NodeId) -> Option<NodeId> {
        self.page()
            .controls
            .iter()
            .find(|(_, binding)| binding.item == item)
            .map(|(&control, _)| control)
    }
}

/// Classify and render one unannotated item. Returns false on skip.
fn process_item(
    doc: &mut Document,
    page: &mut PageState,
    item: NodeId,
    blocked: &BlockedIdSet,
    settings: FilterSettings,
) -> bool {
    let classification = match classify(doc, item) {
        Classified::Item(c) => c,
        Classified::Skip(_) => return false,
    };

    if classification.is_answer() {
        bind_control(doc, page, item, &classification, blocked);
    }

    let state = render(doc, item, &classification, blocked, settings, false);
    page.annotations.insert(
        item,
        Annotation {
            classification,
            revealed: false,
            state,
        },
    );
    true
}

/// Make sure an answer item carries exactly one control showing the
/// author's membership. Items without an author region get none.
fn bind_control(
    doc: &mut Document,
    page: &mut PageState,
    item: NodeId,
    classification: &Classification,
    blocked: &BlockedIdSet,
) {
    let Some(slug) = classification.author_slug.clone() else {
        return;
    };
    let state = BlockState::from_membership(blocked.contains(&classification.author_id));

    let control = match doc.first_with_class(item, CONTROL) {
        Some(control) => {
            if !actions::is_pending(doc, control) && actions::displayed_state(doc, control) != state {
                actions::show_state(doc, control, state);
            }
            control
        }
        None => {
            let Some(region) = doc.first_with_class(item, AUTHOR_INFO) else {
                return;
            };
            actions::create_control(doc, region, state)
        }
    };

    page.controls.insert(
        control,
        ControlBinding {
            item,
            slug,
            author_id: classification.author_id.clone(),
        },
    );
}

fn purge_detached(doc: &Document, page: &mut PageState) -> usize {
    let before = page.annotations.len();
    page.annotations.retain(|&item, _| doc.is_connected(item));
    page.controls.retain(|&control, _| doc.is_connected(control));
    before - page.annotations.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::page::contract::{CONTENT_ITEM, CONTROL_ERROR};
    use crate::page::Display;
    use crate::remote::RemoteClient;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn answer(author: &str, slug: &str, name: &str) -> String {
        format!(
            r#"<div class="List-item"><div class="ContentItem"
                data-za-extra-module='{{"card":{{"content":{{"type":"Answer","author_member_hash_id":"{author}"}}}}}}'>
                <div class="AuthorInfo"><a class="UserLink-link" href="/people/{slug}">{name}</a></div>
                <p>body</p></div></div>"#
        )
    }

    async fn guard(server: &MockServer, html: &str, blocked: &[&str], settings: FilterSettings) -> Arc<FeedGuard> {
        let config = AppConfig {
            base_url: server.uri(),
            session_cookie: Some("xsrf-token=t".to_string()),
            ..AppConfig::default()
        };
        let client = Arc::new(RemoteClient::new(&config).unwrap());
        let store = Store::open(":memory:").await.unwrap();
        store.set_settings(settings).await.unwrap();
        store
            .complete_sync(blocked.iter().copied().collect())
            .await
            .unwrap();
        let sync = Arc::new(BlocklistSync::new(Arc::clone(&client), store.clone(), 20));
        let actions = BlockActions::new(client, store.clone());
        Arc::new(FeedGuard::new(
            SharedDocument::new(Document::from_html(html)),
            store,
            sync,
            actions,
            config.debounce(),
        ))
    }

    fn enforcing(temp_show: bool) -> FilterSettings {
        FilterSettings {
            hide_blocked: true,
            temp_show,
            ..FilterSettings::default()
        }
    }

    #[tokio::test]
    async fn test_scan_classifies_once_then_reuses() {
        let server = MockServer::start().await;
        let html = format!("{}{}", answer("1", "a", "A"), answer("2", "b", "B"));
        let guard = guard(&server, &html, &["2"], enforcing(false)).await;

        let first = guard.scan();
        assert_eq!(first.items, 2);
        assert_eq!(first.classified, 2);

        let second = guard.scan();
        assert_eq!(second.classified, 0);
        assert_eq!(second.reused, 2);

        let states: Vec<_> = guard.decisions().into_iter().map(|d| d.state).collect();
        assert_eq!(states, vec![DisplayState::Visible, DisplayState::Hidden]);
    }

    #[tokio::test]
    async fn test_placeholder_reveal_leaves_blocklist() {
        let server = MockServer::start().await;
        let guard = guard(&server, &answer("42", "carol", "Carol"), &["42"], enforcing(true)).await;
        guard.scan();

        let (item, placeholder, content) = {
            let doc = guard.document().lock();
            let item = doc.feed_items()[0];
            let placeholder = doc.first_with_class(item, PLACEHOLDER).unwrap();
            assert_eq!(doc.text_content(placeholder), "Blocked content from Carol (click to view)");
            (item, placeholder, doc.first_with_class(item, CONTENT_ITEM).unwrap())
        };
        assert_eq!(guard.state_of(item), Some(DisplayState::PlaceholderShown));

        let activation = guard.activate(placeholder).await.unwrap();
        assert_eq!(activation, Activation::Revealed(item));
        assert_eq!(guard.state_of(item), Some(DisplayState::Visible));
        {
            let doc = guard.document().lock();
            assert!(doc.is_hidden(placeholder));
            assert!(!doc.is_hidden(content));
        }

        // The override survives mutation-driven rescans but not invalidation.
        guard.scan();
        assert_eq!(guard.state_of(item), Some(DisplayState::Visible));
        guard.invalidate_all();
        assert_eq!(guard.state_of(item), Some(DisplayState::PlaceholderShown));

        let expected: BlockedIdSet = ["42"].into_iter().collect();
        assert_eq!(*guard.store().blocked_ids(), expected);
        assert_eq!(guard.store().settings(), enforcing(true));
    }

    #[tokio::test]
    async fn test_failed_toggle_restores_label() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/members/alice/actions/block"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let guard = guard(&server, &answer("7", "alice", "Alice"), &[], enforcing(false)).await;
        guard.scan();

        let item = guard.document().lock().feed_items()[0];
        let control = guard.control_of(item).unwrap();
        let nodes_before = guard.document().lock().node_count();

        let result = guard.activate(control).await;
        assert!(matches!(result, Err(ActionError::Remote(_))));

        assert!(guard.store().blocked_ids().is_empty());
        assert_eq!(guard.state_of(item), Some(DisplayState::Visible));
        let doc = guard.document().lock();
        assert_eq!(doc.text_content(control), "Block");
        assert!(doc.has_class(control, CONTROL_ERROR));
        assert!(!actions::is_pending(&doc, control));
        assert!(doc.first_with_class(item, PLACEHOLDER).is_none());
        // Only the label's text node was replaced.
        assert!(doc.node_count() <= nodes_before + 2);
    }

    #[tokio::test]
    async fn test_block_unblock_round_trip() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v4/members/alice/actions/block"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        let guard = guard(&server, &answer("7", "alice", "Alice"), &[], enforcing(false)).await;
        guard.scan();
        let item = guard.document().lock().feed_items()[0];
        let control = guard.control_of(item).unwrap();

        assert_eq!(guard.activate(control).await.unwrap(), Activation::Toggled(BlockState::Blocked));
        assert!(guard.store().blocked_ids().contains("7"));
        assert_eq!(guard.state_of(item), Some(DisplayState::Hidden));
        {
            let doc = guard.document().lock();
            assert_eq!(doc.text_content(control), "Blocked");
            assert_eq!(doc.display(item), Display::None);
        }

        assert_eq!(guard.activate(control).await.unwrap(), Activation::Toggled(BlockState::Unblocked));
        assert!(guard.store().blocked_ids().is_empty());
        assert_eq!(guard.state_of(item), Some(DisplayState::Visible));
        let doc = guard.document().lock();
        assert_eq!(doc.text_content(control), "Block");
        assert_eq!(doc.display(item), Display::Default);
        assert_eq!(doc.elements_with_class(item, CONTROL).len(), 1);
    }

    #[tokio::test]
    async fn test_controls_injected_once() {
        let server = MockServer::start().await;
        let guard = guard(&server, &answer("7", "alice", "Alice"), &[], FilterSettings::default()).await;
        guard.scan();
        guard.invalidate_all();
        guard.scan();

        let doc = guard.document().lock();
        let item = doc.feed_items()[0];
        assert_eq!(doc.elements_with_class(item, CONTROL).len(), 1);
    }

    #[tokio::test]
    async fn test_detached_items_purged() {
        let server = MockServer::start().await;
        let html = format!("{}{}", answer("1", "a", "A"), answer("2", "b", "B"));
        let guard = guard(&server, &html, &[], FilterSettings::default()).await;
        guard.scan();

        {
            let mut doc = guard.document().lock();
            let first = doc.feed_items()[0];
            doc.remove(first);
        }
        let report = guard.scan();
        assert_eq!(report.purged, 1);
        assert_eq!(report.items, 1);
        assert_eq!(guard.decisions().len(), 1);
    }

    #[tokio::test]
    async fn test_save_settings_rerenders_all() {
        let server = MockServer::start().await;
        let guard = guard(&server, &answer("5", "e", "E"), &["5"], FilterSettings::default()).await;
        guard.scan();
        let item = guard.document().lock().feed_items()[0];
        assert_eq!(guard.state_of(item), Some(DisplayState::Visible));

        let report = guard.save_settings(enforcing(false)).await.unwrap();
        assert_eq!(report.classified, 1);
        assert_eq!(guard.state_of(item), Some(DisplayState::Hidden));
    }

    #[tokio::test]
    async fn test_skipped_item_retried_next_scan() {
        let server = MockServer::start().await;
        let guard = guard(
            &server,
            r#"<div class="List-item"><div class="ContentItem"></div></div>"#,
            &[],
            FilterSettings::default(),
        )
        .await;
        assert_eq!(guard.scan().skipped, 1);
        assert_eq!(guard.scan().skipped, 1);
        assert!(guard.decisions().is_empty());
    }
}
