//! Loading page snapshots from HTML.
use scraper::{Html, Node};

use super::dom::Document;

impl Document {
    /// Build a document from HTML source.
    ///
    /// Elements, attributes and text are carried over; comments, doctypes
    /// and processing instructions are dropped. Parsing never fails: the
    /// HTML5 parser recovers from malformed markup the way a browser does.
    pub fn from_html(source: &str) -> Self {
        let html = Html::parse_document(source);
        let mut doc = Document::new();
        let root = doc.root();

        let mut stack: Vec<_> = html.tree.root().children().rev().map(|c| (root, c)).collect();
        while let Some((parent, node)) = stack.pop() {
            match node.value() {
                Node::Element(element) => {
                    let id = doc.create_element(element.name());
                    for (name, value) in element.attrs() {
                        doc.set_attr(id, name, value);
                    }
                    doc.append_child(parent, id);
                    stack.extend(node.children().rev().map(|c| (id, c)));
                }
                Node::Text(text) => {
                    let id = doc.create_text(text);
                    doc.append_child(parent, id);
                }
                _ => {}
            }
        }

        doc
    }
}
