//! Loose XML document tree with empty-default accessors.
//!
//! E-invoice XML is read the way a dictionary view of it would be:
//! attributes become `@name` keys, a text-only element becomes a text leaf,
//! repeated sibling elements become a list and anything missing reads as
//! `XmlNode::Empty`. Lookups never fail; callers decide what an empty node
//! means (empty string, zero, no items).

use std::collections::BTreeMap;

use crate::error::MappingError;

static EMPTY: XmlNode = XmlNode::Empty;

/// Key under which mixed-content text is stored.
const TEXT_KEY: &str = "#text";

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Empty,
    Text(String),
    Element(BTreeMap<String, XmlNode>),
    List(Vec<XmlNode>),
}

impl XmlNode {
    /// Parse a document. The result is an element holding the root tag.
    pub fn parse(xml: &str) -> Result<Self, MappingError> {
        let doc = roxmltree::Document::parse(xml).map_err(|e| MappingError::Parse(e.to_string()))?;
        let root = doc.root_element();

        let mut top = BTreeMap::new();
        top.insert(root.tag_name().name().to_string(), from_element(root));
        Ok(XmlNode::Element(top))
    }

    /// Named child, or `Empty` when absent or when `self` is not an element.
    pub fn child(&self, name: &str) -> &XmlNode {
        match self {
            XmlNode::Element(children) => children.get(name).unwrap_or(&EMPTY),
            _ => &EMPTY,
        }
    }

    /// Descend a fixed path of child names.
    pub fn path(&self, names: &[&str]) -> &XmlNode {
        names.iter().fold(self, |node, name| node.child(name))
    }

    /// Text content, or `""` for anything that carries none.
    pub fn text(&self) -> &str {
        match self {
            XmlNode::Text(text) => text,
            XmlNode::Element(children) => match children.get(TEXT_KEY) {
                Some(XmlNode::Text(text)) => text,
                _ => "",
            },
            _ => "",
        }
    }

    /// Text content, or `default` when there is none.
    pub fn text_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.text() {
            "" => default,
            text => text,
        }
    }

    /// Normalize a collection boundary: a bare node is a one-element
    /// sequence, a list is its elements, an empty node has none.
    pub fn items(&self) -> Vec<&XmlNode> {
        match self {
            XmlNode::Empty => Vec::new(),
            XmlNode::List(nodes) => nodes.iter().collect(),
            node => vec![node],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, XmlNode::Empty)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, XmlNode::Text(_))
    }

    pub fn is_element(&self) -> bool {
        matches!(self, XmlNode::Element(_))
    }
}

fn from_element(node: roxmltree::Node<'_, '_>) -> XmlNode {
    let mut children: BTreeMap<String, XmlNode> = BTreeMap::new();

    for attr in node.attributes() {
        children.insert(format!("@{}", attr.name()), XmlNode::Text(attr.value().to_string()));
    }

    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            let name = child.tag_name().name().to_string();
            let value = from_element(child);
            match children.remove(&name) {
                None => {
                    children.insert(name, value);
                }
                Some(XmlNode::List(mut list)) => {
                    list.push(value);
                    children.insert(name, XmlNode::List(list));
                }
                Some(existing) => {
                    children.insert(name, XmlNode::List(vec![existing, value]));
                }
            }
        } else if let Some(fragment) = child.text() {
            text.push_str(fragment);
        }
    }

    let text = text.trim();
    if children.is_empty() {
        return if text.is_empty() {
            XmlNode::Empty
        } else {
            XmlNode::Text(text.to_string())
        };
    }

    if !text.is_empty() {
        children.insert(TEXT_KEY.to_string(), XmlNode::Text(text.to_string()));
    }
    XmlNode::Element(children)
}
