//! XPath Axes
//!
//! Axis traversal over the arena. Results come back in axis order: reverse
//! axes list the nearest node first. The namespace axis is always empty.

use crate::dom::{Document, NodeId, NodeKind};

use super::compiler::CompiledNodeTest;
use super::parser::Axis;

/// Nodes on `axis` from `node`, in axis order
pub fn navigate(doc: &Document, node: NodeId, axis: Axis) -> Vec<NodeId> {
    let mut out = Vec::new();
    match axis {
        Axis::Child => out.extend(doc.children(node)),
        Axis::Descendant => out.extend(doc.descendants(node)),
        Axis::DescendantOrSelf => {
            out.push(node);
            out.extend(doc.descendants(node));
        }
        Axis::Parent => out.extend(doc.parent(node)),
        Axis::Ancestor => collect_ancestors(doc, node, &mut out),
        Axis::AncestorOrSelf => {
            out.push(node);
            collect_ancestors(doc, node, &mut out);
        }
        Axis::FollowingSibling => {
            let mut current = doc.node(node).next_sibling;
            while let Some(id) = current {
                out.push(id);
                current = doc.node(id).next_sibling;
            }
        }
        Axis::PrecedingSibling => {
            let mut current = doc.node(node).prev_sibling;
            while let Some(id) = current {
                out.push(id);
                current = doc.node(id).prev_sibling;
            }
        }
        Axis::Following => {
            // An attribute's following nodes include its owner's children
            let start = if doc.node(node).is_attribute() {
                node + 1
            } else {
                doc.subtree_last(node) + 1
            };
            let end = doc.node_count() as NodeId;
            out.extend((start..end).filter(|&id| !doc.node(id).is_attribute()));
        }
        Axis::Preceding => {
            let mut ancestors = Vec::new();
            collect_ancestors(doc, node, &mut ancestors);
            out.extend(
                (1..node)
                    .rev()
                    .filter(|&id| !doc.node(id).is_attribute() && !ancestors.contains(&id)),
            );
        }
        Axis::Self_ => out.push(node),
        Axis::Attribute => out.extend(doc.attributes(node)),
        Axis::Namespace => {}
    }
    out
}

fn collect_ancestors(doc: &Document, node: NodeId, out: &mut Vec<NodeId>) {
    let mut current = doc.parent(node);
    while let Some(id) = current {
        out.push(id);
        current = doc.parent(id);
    }
}

/// Check a node against a resolved node test. The principal node type is
/// attribute on the attribute axis, element elsewhere.
pub fn matches_node_test(doc: &Document, node: NodeId, axis: Axis, test: &CompiledNodeTest) -> bool {
    let kind = doc.kind(node);
    let principal = if axis == Axis::Attribute {
        NodeKind::Attribute
    } else {
        NodeKind::Element
    };

    match test {
        CompiledNodeTest::Node => true,
        CompiledNodeTest::Any => kind == principal,
        CompiledNodeTest::Name { uri, local } => kind == principal && doc.has_name(node, uri, local),
        CompiledNodeTest::NamespaceWildcard(uri) => kind == principal && doc.namespace_uri(node) == uri,
        CompiledNodeTest::Text => kind == NodeKind::Text,
        CompiledNodeTest::Comment => kind == NodeKind::Comment,
        CompiledNodeTest::ProcessingInstruction(target) => {
            kind == NodeKind::ProcessingInstruction
                && target.as_deref().is_none_or(|t| doc.local_name(node) == t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;

    fn names(doc: &Document, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| doc.local_name(id).to_string()).collect()
    }

    #[test]
    fn test_sibling_axes() {
        let doc = parse_document(b"<r><a/><b/><c/></r>").unwrap();
        let r = doc.document_element().unwrap();
        let b = doc.children(r).nth(1).unwrap();
        assert_eq!(names(&doc, &navigate(&doc, b, Axis::FollowingSibling)), vec!["c"]);
        assert_eq!(names(&doc, &navigate(&doc, b, Axis::PrecedingSibling)), vec!["a"]);
    }

    #[test]
    fn test_following_and_preceding() {
        let doc = parse_document(b"<r><a><x/></a><b/><c><y/></c></r>").unwrap();
        let r = doc.document_element().unwrap();
        let b = doc.children(r).nth(1).unwrap();
        assert_eq!(names(&doc, &navigate(&doc, b, Axis::Following)), vec!["c", "y"]);
        assert_eq!(names(&doc, &navigate(&doc, b, Axis::Preceding)), vec!["x", "a"]);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let doc = parse_document(b"<r><a><x/></a></r>").unwrap();
        let x = doc.descendants(doc.root()).find(|&id| doc.local_name(id) == "x").unwrap();
        let ancestors = navigate(&doc, x, Axis::Ancestor);
        assert_eq!(ancestors.len(), 3);
        assert_eq!(doc.local_name(ancestors[0]), "a");
        assert_eq!(ancestors[2], doc.root());
    }

    #[test]
    fn test_attribute_axis_and_test() {
        let doc = parse_document(b"<r a='1' b='2'><c/></r>").unwrap();
        let r = doc.document_element().unwrap();
        let attrs = navigate(&doc, r, Axis::Attribute);
        assert_eq!(attrs.len(), 2);
        assert!(matches_node_test(&doc, attrs[0], Axis::Attribute, &CompiledNodeTest::Any));
        assert!(!matches_node_test(&doc, attrs[0], Axis::Child, &CompiledNodeTest::Any));
        // following from an attribute reaches the owner's children
        assert_eq!(names(&doc, &navigate(&doc, attrs[0], Axis::Following)), vec!["c"]);
    }
}
