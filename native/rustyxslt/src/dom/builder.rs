//! Sequential tree builder
//!
//! Used by the XML parser, by result-tree construction and by copies. Nodes
//! are only ever appended, which keeps arena order equal to document order.
//! Attributes and namespace declarations must arrive before the first child
//! of their element.

use log::warn;

use super::document::Document;
use super::node::{NodeId, NodeKind, NsDecl, XmlNode, FLAG_NO_ESCAPE};

pub struct TreeBuilder {
    doc: Document,
    /// Open nodes, document node at the bottom
    open: Vec<NodeId>,
    pending: String,
    pending_no_escape: bool,
    /// Top element has no children yet
    attrs_open: bool,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        TreeBuilder {
            doc: Document::new(),
            open: vec![0],
            pending: String::new(),
            pending_no_escape: false,
            attrs_open: false,
        }
    }

    /// Node currently receiving children
    #[inline]
    pub fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(0)
    }

    fn flush_text(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let value_id = self.doc.strings.store(&self.pending);
        let mut node = XmlNode::character_data(NodeKind::Text, value_id, self.current());
        if self.pending_no_escape {
            node.flags |= FLAG_NO_ESCAPE;
        }
        self.pending.clear();
        self.append(node);
    }

    fn append(&mut self, node: XmlNode) -> NodeId {
        let parent = self.current();
        let id = self.doc.nodes.len() as NodeId;
        self.doc.nodes.push(node);
        self.link_child(parent, id);
        self.attrs_open = false;
        id
    }

    /// Link a child node to its parent
    fn link_child(&mut self, parent_id: NodeId, child_id: NodeId) {
        let last_child_opt = self.doc.nodes[parent_id as usize].last_child;
        if let Some(last_child_id) = last_child_opt {
            self.doc.nodes[child_id as usize].prev_sibling = Some(last_child_id);
            self.doc.nodes[last_child_id as usize].next_sibling = Some(child_id);
        } else {
            self.doc.nodes[parent_id as usize].first_child = Some(child_id);
        }
        self.doc.nodes[parent_id as usize].last_child = Some(child_id);
    }

    pub fn start_element(&mut self, uri: &str, prefix: &str, local: &str) -> NodeId {
        self.flush_text();
        let parent = self.current();
        let strings = &mut self.doc.strings;
        let node = XmlNode::element(strings.intern(local), strings.intern(prefix), strings.intern(uri), parent);
        let id = self.append(node);
        self.open.push(id);
        self.attrs_open = true;
        id
    }

    pub fn end_element(&mut self) {
        self.flush_text();
        if self.open.len() > 1 {
            self.open.pop();
        }
        self.attrs_open = false;
    }

    fn open_element(&self) -> Option<NodeId> {
        let top = self.current();
        (self.attrs_open && self.pending.is_empty() && self.doc.node(top).is_element()).then_some(top)
    }

    /// Declare `prefix` on the open element. A repeated prefix rebinds.
    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) -> bool {
        let Some(element) = self.open_element() else {
            return false;
        };
        let prefix_id = self.doc.strings.intern(prefix);
        let uri_id = self.doc.strings.intern(uri);

        let node = &self.doc.nodes[element as usize];
        let start = node.ns_start as usize;
        let count = node.ns_count as usize;
        if let Some(existing) = self.doc.ns_decls[start..start + count]
            .iter_mut()
            .find(|d| d.prefix_id == prefix_id)
        {
            existing.uri_id = uri_id;
            return true;
        }

        if count == 0 {
            self.doc.nodes[element as usize].ns_start = self.doc.ns_decls.len() as u32;
        }
        self.doc.ns_decls.push(NsDecl { prefix_id, uri_id });
        self.doc.nodes[element as usize].ns_count += 1;
        true
    }

    /// Add an attribute to the open element. A repeated expanded name
    /// replaces the earlier value. Returns false when no element can take it.
    pub fn attribute(&mut self, uri: &str, prefix: &str, local: &str, value: &str) -> bool {
        let Some(element) = self.open_element() else {
            warn!("attribute {} ignored: no open element or children already added", local);
            return false;
        };

        let strings = &mut self.doc.strings;
        let name_id = strings.intern(local);
        let prefix_id = strings.intern(prefix);
        let namespace_id = strings.intern(uri);
        let value_id = strings.store(value);

        let count = self.doc.nodes[element as usize].attr_count;
        for attr in element + 1..=element + count {
            let node = &mut self.doc.nodes[attr as usize];
            if node.name_id == name_id && node.namespace_id == namespace_id {
                node.value_id = value_id;
                node.prefix_id = prefix_id;
                return true;
            }
        }

        self.doc
            .nodes
            .push(XmlNode::attribute(name_id, prefix_id, namespace_id, value_id, element));
        self.doc.nodes[element as usize].attr_count += 1;
        true
    }

    pub fn text(&mut self, s: &str) {
        self.push_text(s, false);
    }

    /// Text written with output escaping disabled
    pub fn text_unescaped(&mut self, s: &str) {
        self.push_text(s, true);
    }

    fn push_text(&mut self, s: &str, no_escape: bool) {
        if s.is_empty() {
            return;
        }
        if self.pending_no_escape != no_escape {
            self.flush_text();
            self.pending_no_escape = no_escape;
        }
        self.pending.push_str(s);
    }

    pub fn comment(&mut self, s: &str) {
        self.flush_text();
        let value_id = self.doc.strings.store(s);
        let node = XmlNode::character_data(NodeKind::Comment, value_id, self.current());
        self.append(node);
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) {
        self.flush_text();
        let target_id = self.doc.strings.intern(target);
        let value_id = self.doc.strings.store(data);
        let node = XmlNode::processing_instruction(target_id, value_id, self.current());
        self.append(node);
    }

    /// Deep copy of `id` from `src`, namespace nodes included
    pub fn copy_node(&mut self, src: &Document, id: NodeId) {
        self.copy_filtered(src, id, &|_: &Document, _: NodeId| true);
    }

    /// Deep copy of the children of `id`
    pub fn copy_children_filtered(&mut self, src: &Document, id: NodeId, keep: &dyn Fn(&Document, NodeId) -> bool) {
        for child in src.children(id) {
            self.copy_filtered(src, child, keep);
        }
    }

    /// Iterative deep copy; `keep` prunes nodes (and their subtrees). The
    /// first element copied gets every binding in scope at its source
    /// position; elements below it only repeat their own declarations.
    fn copy_filtered(&mut self, src: &Document, id: NodeId, keep: &dyn Fn(&Document, NodeId) -> bool) {
        enum Step {
            /// Node, and whether its parent element was copied too
            Enter(NodeId, bool),
            Leave,
        }

        let mut stack = vec![Step::Enter(id, false)];
        while let Some(step) = stack.pop() {
            let (node_id, nested) = match step {
                Step::Leave => {
                    self.end_element();
                    continue;
                }
                Step::Enter(node_id, nested) => (node_id, nested),
            };
            if !keep(src, node_id) {
                continue;
            }

            let node = src.node(node_id);
            match node.kind {
                NodeKind::Document => {
                    let children: Vec<_> = src.children(node_id).collect();
                    stack.extend(children.into_iter().rev().map(|c| Step::Enter(c, false)));
                }
                NodeKind::Element => {
                    self.start_element(src.namespace_uri(node_id), src.prefix(node_id), src.local_name(node_id));
                    if nested {
                        for (prefix, uri) in src.namespace_decls(node_id) {
                            self.declare_namespace(prefix, uri);
                        }
                    } else {
                        for (prefix, uri) in src.in_scope_namespaces(node_id) {
                            self.declare_namespace(&prefix, &uri);
                        }
                    }
                    for attr in src.attributes(node_id) {
                        self.attribute(src.namespace_uri(attr), src.prefix(attr), src.local_name(attr), src.value(attr));
                    }
                    stack.push(Step::Leave);
                    let children: Vec<_> = src.children(node_id).collect();
                    stack.extend(children.into_iter().rev().map(|c| Step::Enter(c, true)));
                }
                NodeKind::Attribute => {
                    self.attribute(src.namespace_uri(node_id), src.prefix(node_id), src.local_name(node_id), src.value(node_id));
                }
                NodeKind::Text => {
                    if node.escapes_output() {
                        self.text(src.value(node_id));
                    } else {
                        self.text_unescaped(src.value(node_id));
                    }
                }
                NodeKind::Comment => self.comment(src.value(node_id)),
                NodeKind::ProcessingInstruction => {
                    self.processing_instruction(src.local_name(node_id), src.value(node_id))
                }
            }
        }
    }

    /// Close anything still open and hand back the document
    pub fn finish(mut self) -> Document {
        self.flush_text();
        self.open.truncate(1);
        self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_simple_tree() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "out");
        assert!(b.attribute("", "", "id", "1"));
        b.text("a");
        b.text("b");
        b.end_element();
        let doc = b.finish();

        let out = doc.document_element().unwrap();
        assert_eq!(doc.attribute_value(out, "", "id"), Some("1"));
        let text = doc.children(out).next().unwrap();
        assert_eq!(doc.value(text), "ab");
    }

    #[test]
    fn test_late_attribute_is_ignored() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "out");
        b.start_element("", "", "child");
        b.end_element();
        assert!(!b.attribute("", "", "late", "x"));
        b.end_element();
        let doc = b.finish();
        assert_eq!(doc.attribute_value(doc.document_element().unwrap(), "", "late"), None);
    }

    #[test]
    fn test_duplicate_attribute_replaces() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "out");
        b.attribute("", "", "a", "1");
        b.attribute("", "", "a", "2");
        b.end_element();
        let doc = b.finish();
        let out = doc.document_element().unwrap();
        assert_eq!(doc.attributes(out).count(), 1);
        assert_eq!(doc.attribute_value(out, "", "a"), Some("2"));
    }

    #[test]
    fn test_unescaped_text_is_separate_node() {
        let mut b = TreeBuilder::new();
        b.text("a");
        b.text_unescaped("<b/>");
        let doc = b.finish();
        let nodes: Vec<_> = doc.children(doc.root()).collect();
        assert_eq!(nodes.len(), 2);
        assert!(!doc.node(nodes[1]).escapes_output());
    }

    #[test]
    fn test_copy_node_carries_namespaces() {
        let src = crate::dom::parse_document(b"<r xmlns:p='urn:p'><p:a k='v'>t</p:a></r>").unwrap();
        let r = src.document_element().unwrap();
        let a = src.children(r).next().unwrap();

        let mut b = TreeBuilder::new();
        b.copy_node(&src, a);
        let doc = b.finish();
        let copied = doc.document_element().unwrap();
        assert_eq!(doc.namespace_uri(copied), "urn:p");
        assert_eq!(doc.lookup_namespace(copied, "p"), Some("urn:p"));
        assert_eq!(doc.attribute_value(copied, "", "k"), Some("v"));
        assert_eq!(doc.string_value(copied), "t");
    }

    #[test]
    fn test_deep_copy_declares_each_binding_once() {
        let src = crate::dom::parse_document(
            b"<r xmlns:p='urn:p' xmlns='urn:d'><a><p:b xmlns:q='urn:q'><c xmlns=''/></p:b></a></r>",
        )
        .unwrap();
        let r = src.document_element().unwrap();
        let a = src.children(r).next().unwrap();

        let mut b = TreeBuilder::new();
        b.copy_node(&src, a);
        let doc = b.finish();
        let a = doc.document_element().unwrap();
        let pb = doc.children(a).next().unwrap();
        let c = doc.children(pb).next().unwrap();
        assert_eq!(doc.namespace_decls(a).count(), 2);
        assert_eq!(doc.namespace_decls(pb).collect::<Vec<_>>(), vec![("q", "urn:q")]);
        assert_eq!(doc.lookup_namespace(pb, "p"), Some("urn:p"));
        assert_eq!(doc.lookup_namespace(c, "q"), Some("urn:q"));
        assert_eq!(doc.lookup_namespace(c, ""), None);
        assert_eq!(doc.namespace_uri(c), "");
    }

    #[test]
    fn test_deep_copy_of_deep_tree() {
        let mut b = TreeBuilder::new();
        for _ in 0..50_000 {
            b.start_element("", "", "a");
        }
        let src = b.finish();

        let mut b = TreeBuilder::new();
        b.copy_node(&src, src.root());
        let doc = b.finish();
        assert_eq!(doc.node_count(), src.node_count());
    }
}
