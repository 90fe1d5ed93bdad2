//! Per-item display decisions and their rendering onto the document.
use super::classify::Classification;
use crate::page::contract::{CONTENT_ITEM, CONTROL, PLACEHOLDER};
use crate::page::{Display, Document, NodeId};
use crate::storage::{BlockedIdSet, FilterSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Visible,
    /// Content hidden and the item removed from layout.
    Hidden,
    /// Content hidden behind a click-to-reveal placeholder.
    PlaceholderShown,
}

/// Decide how an item should be displayed.
///
/// `revealed` is the per-item override set by clicking the placeholder; it
/// only has effect where a placeholder would otherwise be shown.
pub fn decide(
    classification: &Classification,
    blocked: &BlockedIdSet,
    settings: FilterSettings,
    revealed: bool,
) -> DisplayState {
    if !blocked.contains(&classification.author_id) {
        return DisplayState::Visible;
    }
    if !settings.block_non_answers && !classification.is_answer() {
        return DisplayState::Visible;
    }
    match (settings.hide_blocked, settings.temp_show) {
        (false, _) => DisplayState::Visible,
        (true, true) if revealed => DisplayState::Visible,
        (true, true) => DisplayState::PlaceholderShown,
        (true, false) => DisplayState::Hidden,
    }
}

/// Whether inline block controls are shown under `settings`.
pub fn controls_visible(settings: FilterSettings) -> bool {
    !(settings.hide_block_btn && settings.hide_blocked)
}

/// Decide and apply the display state of `item`.
///
/// Idempotent: with unchanged inputs a second call changes nothing and
/// emits no mutation records. The placeholder is created on first need and
/// reused afterwards.
pub fn render(
    doc: &mut Document,
    item: NodeId,
    classification: &Classification,
    blocked: &BlockedIdSet,
    settings: FilterSettings,
    revealed: bool,
) -> DisplayState {
    let state = decide(classification, blocked, settings, revealed);
    let content = content_node(doc, item);
    let placeholder = doc.first_with_class(item, PLACEHOLDER);

    match state {
        DisplayState::Visible | DisplayState::Hidden => {
            if let Some(content) = content {
                doc.set_hidden(content, state == DisplayState::Hidden);
            }
            if let Some(placeholder) = placeholder {
                doc.set_hidden(placeholder, true);
            }
            let display = if state == DisplayState::Hidden {
                Display::None
            } else {
                Display::Default
            };
            doc.set_display(item, display);
        }
        DisplayState::PlaceholderShown => {
            if let Some(content) = content {
                doc.set_hidden(content, true);
            }
            let placeholder = placeholder.unwrap_or_else(|| create_placeholder(doc, item));
            let text = placeholder_text(&classification.author_name);
            if doc.text_content(placeholder) != text {
                doc.set_text(placeholder, &text);
            }
            doc.set_hidden(placeholder, false);
            doc.set_display(item, Display::Default);
        }
    }

    let show_controls = controls_visible(settings);
    for control in doc.elements_with_class(item, CONTROL) {
        doc.set_hidden(control, !show_controls);
    }

    state
}

/// The item's primary content: its `ContentItem`, else its first element.
fn content_node(doc: &Document, item: NodeId) -> Option<NodeId> {
    doc.first_with_class(item, CONTENT_ITEM)
        .or_else(|| doc.first_element_child(item))
        .filter(|&node| !doc.has_class(node, PLACEHOLDER))
}

fn create_placeholder(doc: &mut Document, item: NodeId) -> NodeId {
    let placeholder = doc.create_element("div");
    doc.set_attr(placeholder, "class", PLACEHOLDER);
    doc.set_attr(placeholder, "role", "button");
    doc.append_child(item, placeholder);
    placeholder
}

pub fn placeholder_text(author_name: &str) -> String {
    format!("Blocked content from {author_name} (click to view)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classify::ContentType;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn classification(id: &str, answer: bool) -> Classification {
        Classification {
            author_id: id.to_string(),
            author_slug: Some("someone".to_string()),
            author_name: "Someone".to_string(),
            content_type: if answer { ContentType::Answer } else { ContentType::Other },
        }
    }

    fn settings(hide_blocked: bool, temp_show: bool) -> FilterSettings {
        FilterSettings {
            hide_blocked,
            temp_show,
            ..FilterSettings::default()
        }
    }

    fn page() -> (Document, NodeId, NodeId) {
        let doc = Document::from_html(
            r#"<div class="List-item"><div class="ContentItem"><p>text</p>
               <div class="AuthorInfo"><button class="feedblock-btn"></button></div></div></div>"#,
        );
        let item = doc.feed_items()[0];
        let content = doc.first_with_class(item, CONTENT_ITEM).unwrap();
        (doc, item, content)
    }

    #[test]
    fn test_decide_table() {
        let blocked: BlockedIdSet = ["42"].into_iter().collect();
        let c = classification("42", true);
        let other = classification("1", true);

        assert_eq!(decide(&other, &blocked, settings(true, false), false), DisplayState::Visible);
        assert_eq!(decide(&c, &blocked, settings(false, true), false), DisplayState::Visible);
        assert_eq!(decide(&c, &blocked, settings(true, true), false), DisplayState::PlaceholderShown);
        assert_eq!(decide(&c, &blocked, settings(true, true), true), DisplayState::Visible);
        assert_eq!(decide(&c, &blocked, settings(true, false), false), DisplayState::Hidden);
        assert_eq!(decide(&c, &blocked, settings(true, false), true), DisplayState::Hidden);
    }

    #[test]
    fn test_non_answers_exempt_when_not_enforced() {
        let blocked: BlockedIdSet = ["42"].into_iter().collect();
        let article = classification("42", false);
        let mut s = settings(true, false);

        assert_eq!(decide(&article, &blocked, s, false), DisplayState::Hidden);
        s.block_non_answers = false;
        assert_eq!(decide(&article, &blocked, s, false), DisplayState::Visible);
        assert_eq!(decide(&classification("42", true), &blocked, s, false), DisplayState::Hidden);
    }

    #[test]
    fn test_hidden_removes_item_from_layout() {
        let (mut doc, item, content) = page();
        let blocked: BlockedIdSet = ["42"].into_iter().collect();

        let state = render(&mut doc, item, &classification("42", true), &blocked, settings(true, false), false);
        assert_eq!(state, DisplayState::Hidden);
        assert_eq!(doc.display(item), Display::None);
        assert!(doc.is_hidden(content));

        let state = render(&mut doc, item, &classification("42", true), &BlockedIdSet::new(), settings(true, false), false);
        assert_eq!(state, DisplayState::Visible);
        assert_eq!(doc.display(item), Display::Default);
        assert!(!doc.is_hidden(content));
    }

    #[test]
    fn test_placeholder_render_is_idempotent() {
        let (mut doc, item, content) = page();
        let mut rx = doc.observe();
        let blocked: BlockedIdSet = ["42"].into_iter().collect();
        let c = classification("42", true);

        render(&mut doc, item, &c, &blocked, settings(true, true), false);
        let nodes_after_first = doc.node_count();
        while rx.try_recv().is_ok() {}

        let state = render(&mut doc, item, &c, &blocked, settings(true, true), false);
        assert_eq!(state, DisplayState::PlaceholderShown);
        assert_eq!(doc.node_count(), nodes_after_first);
        assert!(rx.try_recv().is_err());

        let placeholders = doc.elements_with_class(item, PLACEHOLDER);
        assert_eq!(placeholders.len(), 1);
        assert_eq!(
            doc.text_content(placeholders[0]),
            "Blocked content from Someone (click to view)"
        );
        assert!(doc.is_hidden(content));
    }

    #[test]
    fn test_reveal_hides_placeholder_and_shows_content() {
        let (mut doc, item, content) = page();
        let blocked: BlockedIdSet = ["42"].into_iter().collect();
        let c = classification("42", true);

        render(&mut doc, item, &c, &blocked, settings(true, true), false);
        render(&mut doc, item, &c, &blocked, settings(true, true), true);

        let placeholder = doc.first_with_class(item, PLACEHOLDER).unwrap();
        assert!(doc.is_hidden(placeholder));
        assert!(!doc.is_hidden(content));
    }

    #[test]
    fn test_controls_hidden_only_when_enforcing() {
        let (mut doc, item, _) = page();
        let control = doc.first_with_class(item, CONTROL).unwrap();
        let c = classification("1", true);
        let mut s = settings(false, false);
        s.hide_block_btn = true;

        render(&mut doc, item, &c, &BlockedIdSet::new(), s, false);
        assert!(!doc.is_hidden(control));

        s.hide_blocked = true;
        render(&mut doc, item, &c, &BlockedIdSet::new(), s, false);
        assert!(doc.is_hidden(control));
    }

    proptest! {
        #[test]
        fn prop_nothing_hidden_without_enforcement(
            id in "[0-9]{1,2}",
            blocked_ids in proptest::collection::vec("[0-9]{1,2}", 0..8),
            answer: bool,
            temp_show: bool,
            hide_block_btn: bool,
            block_non_answers: bool,
            revealed: bool,
        ) {
            let (mut doc, item, content) = page();
            let blocked: BlockedIdSet = blocked_ids.into_iter().collect();
            let s = FilterSettings { hide_blocked: false, temp_show, hide_block_btn, block_non_answers };

            let state = render(&mut doc, item, &classification(&id, answer), &blocked, s, revealed);
            prop_assert_eq!(state, DisplayState::Visible);
            prop_assert_eq!(doc.display(item), Display::Default);
            prop_assert!(!doc.is_hidden(content));
            prop_assert!(doc.first_with_class(item, PLACEHOLDER).is_none());
        }
    }
}
