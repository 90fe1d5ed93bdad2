//! Author identity and content type of a single feed item.
use serde_json::Value;
use url::Url;

use crate::page::contract::{CONTENT_ITEM, EXTRA_MODULE_ATTR, USER_LINK, ZOP_ATTR};
use crate::page::{Document, NodeId};
use crate::util::clean_display_text;

/// Display name used when the page offers none.
pub const DEFAULT_AUTHOR_NAME: &str = "User";

/// Origin relative author links are resolved against.
const LINK_ORIGIN: &str = "https://www.zhihu.com/";

const AUTHOR_ID_POINTER: &str = "/card/content/author_member_hash_id";
const CONTENT_TYPE_POINTER: &str = "/card/content/type";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Answer,
    Other,
}

impl ContentType {
    fn from_metadata(value: Option<&str>) -> Self {
        match value {
            Some("Answer") => ContentType::Answer,
            _ => ContentType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Stable identity, the key checked against the blocklist.
    pub author_id: String,
    /// Routable address used by the block endpoints.
    pub author_slug: Option<String>,
    pub author_name: String,
    pub content_type: ContentType,
}

impl Classification {
    pub fn is_answer(&self) -> bool {
        self.content_type == ContentType::Answer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No content element inside the item.
    NoContent,
    /// The structured metadata is absent or not JSON.
    MalformedMetadata,
    /// The metadata parsed but carries no author identity.
    MissingIdentity,
    /// An answer whose author link yields no usable slug.
    MissingSlug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Item(Classification),
    Skip(SkipReason),
}

/// Classify `item` from its current embedded metadata.
///
/// Reads only; never touches the document.
pub fn classify(doc: &Document, item: NodeId) -> Classified {
    match try_classify(doc, item) {
        Ok(classification) => Classified::Item(classification),
        Err(reason) => {
            tracing::debug!(item = %item, ?reason, "Skipping feed item");
            Classified::Skip(reason)
        }
    }
}

fn try_classify(doc: &Document, item: NodeId) -> Result<Classification, SkipReason> {
    let content = doc
        .first_with_class(item, CONTENT_ITEM)
        .ok_or(SkipReason::NoContent)?;

    let metadata: Value = doc
        .attr(content, EXTRA_MODULE_ATTR)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .ok_or(SkipReason::MalformedMetadata)?;

    let author_id = metadata
        .pointer(AUTHOR_ID_POINTER)
        .and_then(identity_string)
        .ok_or(SkipReason::MissingIdentity)?;
    let content_type =
        ContentType::from_metadata(metadata.pointer(CONTENT_TYPE_POINTER).and_then(Value::as_str));

    let (author_slug, author_name) = match doc.first_with_class(item, USER_LINK) {
        Some(link) => (
            doc.attr(link, "href").and_then(slug_from_href),
            display_name(&doc.text_content(link)),
        ),
        None => (None, zop_author_name(doc, content)),
    };

    if content_type == ContentType::Answer && author_slug.is_none() {
        return Err(SkipReason::MissingSlug);
    }

    Ok(Classification {
        author_id,
        author_slug,
        author_name,
        content_type,
    })
}

fn identity_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn display_name(raw: &str) -> String {
    let cleaned = clean_display_text(raw);
    if cleaned.is_empty() {
        DEFAULT_AUTHOR_NAME.to_string()
    } else {
        cleaned.into_owned()
    }
}

fn zop_author_name(doc: &Document, content: NodeId) -> String {
    let name = doc
        .attr(content, ZOP_ATTR)
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|zop| zop.get("authorName").and_then(Value::as_str).map(display_name));
    name.unwrap_or_else(|| DEFAULT_AUTHOR_NAME.to_string())
}

/// Slug from an author link such as `/people/example-user`.
///
/// The link must resolve to exactly two non-empty path segments (kind, then
/// slug); query and fragment are ignored. Any other shape yields `None`.
pub fn slug_from_href(href: &str) -> Option<String> {
    let origin = Url::parse(LINK_ORIGIN).ok()?;
    let url = origin.join(href.trim()).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [_kind, slug] => Some((*slug).to_string()),
        _ => None,
    }
}
