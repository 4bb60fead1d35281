//! XML Node representation
//!
//! Uses NodeId (u32) for compact, cache-friendly node references. Attributes
//! are nodes too: they sit directly after their owner element in the arena,
//! so comparing ids compares document order.

/// Compact node identifier (index into arena)
pub type NodeId = u32;

/// Type of XML node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Document root
    Document,
    /// Element node
    Element,
    /// Attribute node (owned by the preceding element)
    Attribute,
    /// Text content (CDATA sections merge into text)
    Text,
    /// Comment
    Comment,
    /// Processing instruction
    ProcessingInstruction,
}

/// Text node flag: serialize without escaping
pub const FLAG_NO_ESCAPE: u8 = 0x01;

/// An XML node in the arena
#[derive(Debug, Clone)]
pub struct XmlNode {
    /// Type of this node
    pub kind: NodeKind,
    /// Parent node (owner element for attributes, None for document root)
    pub parent: Option<NodeId>,
    /// First child node
    pub first_child: Option<NodeId>,
    /// Last child node
    pub last_child: Option<NodeId>,
    /// Previous sibling
    pub prev_sibling: Option<NodeId>,
    /// Next sibling
    pub next_sibling: Option<NodeId>,
    /// Local name (elements, attributes) or target (PIs)
    pub name_id: u32,
    /// Namespace prefix as written, or 0
    pub prefix_id: u32,
    /// Namespace URI, or 0
    pub namespace_id: u32,
    /// Character data (text, comment, PI data, attribute value)
    pub value_id: u32,
    /// Attribute count; attributes occupy ids `id + 1 ..= id + attr_count`
    pub attr_count: u32,
    /// Start of namespace declarations in the document's declaration table
    pub ns_start: u32,
    /// Number of namespace declarations on this element
    pub ns_count: u32,
    pub flags: u8,
}

impl XmlNode {
    fn blank(kind: NodeKind, parent: Option<NodeId>) -> Self {
        XmlNode {
            kind,
            parent,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            name_id: 0,
            prefix_id: 0,
            namespace_id: 0,
            value_id: 0,
            attr_count: 0,
            ns_start: 0,
            ns_count: 0,
            flags: 0,
        }
    }

    /// Create a new document root node
    pub fn document() -> Self {
        Self::blank(NodeKind::Document, None)
    }

    /// Create a new element node
    pub fn element(name_id: u32, prefix_id: u32, namespace_id: u32, parent: NodeId) -> Self {
        XmlNode {
            name_id,
            prefix_id,
            namespace_id,
            ..Self::blank(NodeKind::Element, Some(parent))
        }
    }

    /// Create an attribute node owned by `owner`
    pub fn attribute(name_id: u32, prefix_id: u32, namespace_id: u32, value_id: u32, owner: NodeId) -> Self {
        XmlNode {
            name_id,
            prefix_id,
            namespace_id,
            value_id,
            ..Self::blank(NodeKind::Attribute, Some(owner))
        }
    }

    /// Create a character data node (text or comment)
    pub fn character_data(kind: NodeKind, value_id: u32, parent: NodeId) -> Self {
        XmlNode {
            value_id,
            ..Self::blank(kind, Some(parent))
        }
    }

    /// Create a processing instruction node
    pub fn processing_instruction(target_id: u32, value_id: u32, parent: NodeId) -> Self {
        XmlNode {
            name_id: target_id,
            value_id,
            ..Self::blank(NodeKind::ProcessingInstruction, Some(parent))
        }
    }

    #[inline]
    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    #[inline]
    pub fn is_attribute(&self) -> bool {
        self.kind == NodeKind::Attribute
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        self.kind == NodeKind::Text
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.first_child.is_some()
    }

    #[inline]
    pub fn escapes_output(&self) -> bool {
        self.flags & FLAG_NO_ESCAPE == 0
    }
}

/// A namespace declaration (`xmlns` or `xmlns:p`) on an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsDecl {
    /// Prefix string id, 0 for the default namespace
    pub prefix_id: u32,
    /// URI string id, 0 for an undeclaration
    pub uri_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let doc = XmlNode::document();
        assert_eq!(doc.kind, NodeKind::Document);
        assert!(doc.parent.is_none());
        assert!(doc.escapes_output());
    }

    #[test]
    fn test_attribute_points_at_owner() {
        let attr = XmlNode::attribute(1, 0, 0, 2, 5);
        assert!(attr.is_attribute());
        assert_eq!(attr.parent, Some(5));
        assert_eq!(attr.value_id, 2);
    }
}
