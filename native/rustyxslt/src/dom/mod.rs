//! DOM Module - Arena-based XML Document
//!
//! - Arena allocation for nodes, attributes included
//! - NodeId (u32) indices for cache-friendly traversal
//! - String interning for names and namespace URIs
//! - Namespace resolution stack during the build

pub mod builder;
pub mod document;
pub mod encoding;
pub mod namespace;
pub mod node;
pub mod parse;
pub mod strings;

pub use builder::TreeBuilder;
pub use document::Document;
pub use namespace::{is_ncname, is_qname, ns, split_qname, ExpandedName, NamespaceBindings, PrefixResolver};
pub use node::{NodeId, NodeKind};
pub use parse::{parse_document, ParseError};
