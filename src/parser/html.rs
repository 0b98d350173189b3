//! Mutable HTML documents.
//!
//! The pipeline only needs a handful of tree operations, captured by
//! [`HtmlDocument`]. [`Document`] implements them on top of `kuchiki`.

use kuchiki::iter::NodeIterator;
use kuchiki::traits::TendrilSink;
use kuchiki::{ElementData, NodeDataRef, NodeRef};

use crate::error::{EmbedError, Result};

/// Tags whose `src` attribute may point at remote media.
pub const MEDIA_TAGS: &[&str] = &["img", "video", "source"];

/// Capability interface over a mutable HTML tree.
pub trait HtmlDocument {
    /// Handle to one element of the tree.
    type Element: Clone;

    /// All elements with one of the given tag names, in document order.
    fn select_tags(&self, tags: &[&str]) -> Vec<Self::Element>;

    fn attr(&self, element: &Self::Element, name: &str) -> Option<String>;

    fn set_attr(&self, element: &Self::Element, name: &str, value: &str);

    fn remove_attr(&self, element: &Self::Element, name: &str);

    /// Replace the element and its subtree with the given markup.
    fn replace_with_html(&self, element: &Self::Element, html: &str);

    /// Serialize the whole document.
    fn serialize(&self) -> Result<String>;
}

/// HTML document backed by a `kuchiki` tree.
pub struct Document {
    root: NodeRef,
}

impl Document {
    /// Parse an HTML string. html5ever recovers from any input, so this never fails.
    pub fn parse(html: &str) -> Self {
        Self {
            root: kuchiki::parse_html().one(html.to_string()),
        }
    }
}

impl HtmlDocument for Document {
    type Element = NodeDataRef<ElementData>;

    fn select_tags(&self, tags: &[&str]) -> Vec<Self::Element> {
        self.root
            .descendants()
            .elements()
            .filter(|el| {
                let name: &str = &el.name.local;
                tags.iter().any(|t| t.eq_ignore_ascii_case(name))
            })
            .collect()
    }

    fn attr(&self, element: &Self::Element, name: &str) -> Option<String> {
        element.attributes.borrow().get(name).map(String::from)
    }

    fn set_attr(&self, element: &Self::Element, name: &str, value: &str) {
        element
            .attributes
            .borrow_mut()
            .insert(name, value.to_string());
    }

    fn remove_attr(&self, element: &Self::Element, name: &str) {
        element.attributes.borrow_mut().remove(name);
    }

    fn replace_with_html(&self, element: &Self::Element, html: &str) {
        let node = element.as_node();
        let fragment = kuchiki::parse_html().one(html.to_string());
        if let Ok(body) = fragment.select_first("body") {
            // Collect first: inserting detaches each child from the fragment.
            let children: Vec<NodeRef> = body.as_node().children().collect();
            for child in children {
                node.insert_before(child);
            }
        }
        node.detach();
    }

    fn serialize(&self) -> Result<String> {
        let mut output = Vec::new();
        self.root
            .serialize(&mut output)
            .map_err(|e| EmbedError::Html(format!("cannot generate html: {e}")))?;
        String::from_utf8(output).map_err(|e| EmbedError::Html(format!("invalid UTF-8: {e}")))
    }
}
