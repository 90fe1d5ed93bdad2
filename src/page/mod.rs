//! The host page as seen by the engine.
//!
//! - [`dom`] - arena document tree with stable node handles and a
//!   child-list mutation stream
//! - [`html`] - loading page snapshots from HTML source
//!
//! The class and attribute names the host page is expected to carry live in
//! [`contract`].

mod dom;
mod html;

pub use dom::{Display, Document, MutationRecord, NodeId, SharedDocument};

/// Names the engine reads from, or writes into, the host page.
pub mod contract {
    /// Feed item container (answer lists).
    pub const LIST_ITEM: &str = "List-item";
    /// Feed item container (home timeline), together with [`TOPSTORY_ITEM`].
    pub const CARD: &str = "Card";
    pub const TOPSTORY_ITEM: &str = "TopstoryItem";
    /// The item's content element, carrying the metadata attributes.
    pub const CONTENT_ITEM: &str = "ContentItem";
    /// The author link; the last path segment of its `href` is the slug.
    pub const USER_LINK: &str = "UserLink-link";
    /// Region the action control is appended to.
    pub const AUTHOR_INFO: &str = "AuthorInfo";

    /// Structured metadata: `card.content.author_member_hash_id` and
    /// `card.content.type`.
    pub const EXTRA_MODULE_ATTR: &str = "data-za-extra-module";
    /// Secondary metadata with an `authorName` fallback.
    pub const ZOP_ATTR: &str = "data-zop";

    /// Placeholder shown in place of blocked content.
    pub const PLACEHOLDER: &str = "feedblock-placeholder";
    /// Inline block/unblock control.
    pub const CONTROL: &str = "feedblock-btn";
    pub const CONTROL_BASE: &str = "Button";
    pub const CONTROL_BLOCKED: &str = "Button--red";
    pub const CONTROL_UNBLOCKED: &str = "Button--blue";
    pub const CONTROL_ERROR: &str = "feedblock-btn--error";
}

impl Document {
    /// Whether `node` is a feed item container.
    pub fn is_feed_item(&self, node: NodeId) -> bool {
        self.has_class(node, contract::LIST_ITEM)
            || (self.has_class(node, contract::CARD) && self.has_class(node, contract::TOPSTORY_ITEM))
    }

    /// Every feed item in the document, in document order.
    pub fn feed_items(&self) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&id| self.is_feed_item(id))
            .collect()
    }

    /// The feed item containing `node`, if any.
    pub fn enclosing_item(&self, node: NodeId) -> Option<NodeId> {
        self.closest(node, |doc, id| doc.is_feed_item(id))
    }
}
