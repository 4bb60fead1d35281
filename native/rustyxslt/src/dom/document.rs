//! Arena-backed XML document
//!
//! `Document` is immutable once built. It is shared between calls through an
//! `Arc`, so every accessor takes `&self`.

use std::borrow::Cow;

use super::builder::TreeBuilder;
use super::node::{NodeId, NodeKind, NsDecl, XmlNode};
use super::strings::StringPool;

/// A parsed document or a result tree
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) nodes: Vec<XmlNode>,
    pub(crate) ns_decls: Vec<NsDecl>,
    pub(crate) strings: StringPool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document holding only the document node
    pub fn new() -> Self {
        Document {
            nodes: vec![XmlNode::document()],
            ns_decls: Vec::new(),
            strings: StringPool::new(),
        }
    }

    /// Id of the document node
    #[inline]
    pub fn root(&self) -> NodeId {
        0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &XmlNode {
        &self.nodes[id as usize]
    }

    #[inline]
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    #[inline]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// The single top-level element, if any
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root()).find(|&id| self.node(id).is_element())
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.node(id).has_children()
    }

    /// Local name of an element or attribute, target of a PI
    pub fn local_name(&self, id: NodeId) -> &str {
        self.strings.get(self.node(id).name_id)
    }

    pub fn prefix(&self, id: NodeId) -> &str {
        self.strings.get(self.node(id).prefix_id)
    }

    pub fn namespace_uri(&self, id: NodeId) -> &str {
        self.strings.get(self.node(id).namespace_id)
    }

    /// Name as written, `prefix:local` or `local`
    pub fn qualified_name(&self, id: NodeId) -> Cow<'_, str> {
        let local = self.local_name(id);
        match self.prefix(id) {
            "" => Cow::Borrowed(local),
            prefix => Cow::Owned(format!("{}:{}", prefix, local)),
        }
    }

    /// Character data of text, comment, PI or attribute nodes
    pub fn value(&self, id: NodeId) -> &str {
        self.strings.get(self.node(id).value_id)
    }

    /// True when `id` has the given namespace URI and local name
    pub fn has_name(&self, id: NodeId, uri: &str, local: &str) -> bool {
        self.local_name(id) == local && self.namespace_uri(id) == uri
    }

    /// Child nodes (attributes excluded)
    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        ChildIter {
            doc: self,
            current: self.node(id).first_child,
        }
    }

    /// Attribute nodes of an element, in document order
    pub fn attributes(&self, id: NodeId) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        let node = self.node(id);
        let count = if node.is_element() { node.attr_count } else { 0 };
        (id + 1..id + 1 + count).filter(move |&a| self.node(a).is_attribute())
    }

    /// Descendants in document order, not including `id` or any attributes
    pub fn descendants(&self, id: NodeId) -> DescendantIter<'_> {
        DescendantIter {
            doc: self,
            stack: self.node(id).first_child.into_iter().collect(),
        }
    }

    /// Last node in the subtree rooted at `id`, attributes included
    pub fn subtree_last(&self, id: NodeId) -> NodeId {
        let mut current = id;
        loop {
            let node = self.node(current);
            match node.last_child {
                Some(last) => current = last,
                None => return current + if node.is_element() { node.attr_count } else { 0 },
            }
        }
    }

    /// Value of the attribute with the given expanded name
    pub fn attribute_value(&self, id: NodeId, uri: &str, local: &str) -> Option<&str> {
        self.attributes(id)
            .find(|&a| self.has_name(a, uri, local))
            .map(|a| self.value(a))
    }

    /// XPath string-value
    pub fn string_value(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                for d in self.descendants(id) {
                    if self.node(d).is_text() {
                        out.push_str(self.value(d));
                    }
                }
                out
            }
            _ => self.value(id).to_string(),
        }
    }

    /// True for a text node made only of XML whitespace
    pub fn is_whitespace_text(&self, id: NodeId) -> bool {
        self.node(id).is_text() && self.value(id).bytes().all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
    }

    /// Namespace declarations made on this element, as (prefix, uri)
    pub fn namespace_decls(&self, id: NodeId) -> impl Iterator<Item = (&str, &str)> + '_ {
        let node = self.node(id);
        let start = node.ns_start as usize;
        let end = start + node.ns_count as usize;
        self.ns_decls[start..end]
            .iter()
            .map(move |d| (self.strings.get(d.prefix_id), self.strings.get(d.uri_id)))
    }

    /// Resolve `prefix` in the scope of `id`
    pub fn lookup_namespace(&self, id: NodeId, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(super::namespace::ns::XML);
        }
        let mut current = Some(id);
        while let Some(n) = current {
            if self.node(n).is_element() {
                if let Some((_, uri)) = self.namespace_decls(n).find(|(p, _)| *p == prefix) {
                    return if uri.is_empty() { None } else { Some(uri) };
                }
            }
            current = self.parent(n);
        }
        None
    }

    /// All bindings in scope at `id`, nearest declaration wins
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<(String, String)> {
        let mut seen: Vec<(String, String)> = Vec::new();
        let mut current = Some(id);
        while let Some(n) = current {
            if self.node(n).is_element() {
                for (prefix, uri) in self.namespace_decls(n) {
                    if !seen.iter().any(|(p, _)| p == prefix) {
                        seen.push((prefix.to_string(), uri.to_string()));
                    }
                }
            }
            current = self.parent(n);
        }
        seen.retain(|(_, uri)| !uri.is_empty());
        seen
    }

    /// Copy of this document without the whitespace-only text nodes that
    /// `strip` selects. `strip` receives the parent element of each candidate.
    pub fn strip_whitespace<F>(&self, strip: F) -> Document
    where
        F: Fn(&Document, NodeId) -> bool,
    {
        let mut builder = TreeBuilder::new();
        builder.copy_children_filtered(self, self.root(), &|doc: &Document, id: NodeId| {
            !(doc.is_whitespace_text(id) && doc.parent(id).is_some_and(|p| doc.node(p).is_element() && strip(doc, p)))
        });
        builder.finish()
    }

    /// Approximate heap size
    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<XmlNode>()
            + self.ns_decls.capacity() * std::mem::size_of::<NsDecl>()
            + self.strings.memory_usage()
    }
}

/// Iterator over children of a node
pub struct ChildIter<'d> {
    doc: &'d Document,
    current: Option<NodeId>,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        self.current = self.doc.node(id).next_sibling;
        Some(id)
    }
}

/// Pre-order iterator over descendants
pub struct DescendantIter<'d> {
    doc: &'d Document,
    stack: Vec<NodeId>,
}

impl Iterator for DescendantIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.doc.node(id);
        if let Some(next) = node.next_sibling {
            self.stack.push(next);
        }
        if let Some(child) = node.first_child {
            self.stack.push(child);
        }
        Some(id)
    }
}
