//! A minimal owned XML element tree.
//!
//! The XML parser and serializer live in the external transport layer; this
//! type is the exchange format between that layer and the dialback core. Its
//! `Display` impl renders canonical XML for logging and for transports that
//! want a ready-made serialization.

use std::collections::BTreeMap;
use std::fmt;

use crate::ns;

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with a resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    namespace: String,
    attrs: BTreeMap<String, String>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`Element::set_attr`].
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder form of [`Element::append_text`].
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.append_text(text);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `true` if the element has this local name and namespace.
    pub fn is(&self, name: &str, namespace: &str) -> bool {
        self.name == name && self.namespace == namespace
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attrs.remove(name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn append_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
    }

    /// Concatenation of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Iterates over child elements, skipping text.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    pub fn get_child(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.children().find(|child| child.is(name, namespace))
    }

    /// Drops every child node, keeping name and attributes.
    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    fn write_xml(&self, out: &mut impl fmt::Write, parent_ns: &str) -> fmt::Result {
        // Stream-level elements use the `stream:` prefix bound on the root.
        let qualified = match self.namespace.as_str() {
            ns::STREAM => format!("stream:{}", self.name),
            ns::DIALBACK => format!("db:{}", self.name),
            _ => self.name.clone(),
        };

        out.write_char('<')?;
        out.write_str(&qualified)?;
        match self.namespace.as_str() {
            ns::STREAM => {}
            ns::DIALBACK => write!(out, " xmlns:db='{}'", ns::DIALBACK)?,
            namespace if namespace != parent_ns => {
                write!(out, " xmlns='{}'", escape(namespace))?;
            }
            _ => {}
        }
        for (name, value) in &self.attrs {
            write!(out, " {}='{}'", name, escape(value))?;
        }

        if self.children.is_empty() {
            return out.write_str("/>");
        }
        out.write_char('>')?;

        let inherited = match self.namespace.as_str() {
            ns::STREAM | ns::DIALBACK => parent_ns,
            namespace => namespace,
        };
        for node in &self.children {
            match node {
                Node::Text(text) => out.write_str(&escape(text))?,
                Node::Element(child) => child.write_xml(out, inherited)?,
            }
        }
        write!(out, "</{qualified}>")
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_xml(f, ns::SERVER)
    }
}

/// Escapes the five XML special characters.
pub(crate) fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}
