//! XPath Value Types
//!
//! XPath 1.0 has four data types: node-set, boolean, number, and string.
//! XSLT adds the result tree fragment, produced by variables with content.

use std::sync::Arc;

use crate::dom::{Document, NodeId};

use super::XPathError;

/// XPath value types
#[derive(Debug, Clone)]
#[must_use]
pub enum XPathValue {
    /// A set of nodes in document order, no duplicates
    NodeSet(Vec<NodeId>),
    Boolean(bool),
    Number(f64),
    String(String),
    /// Result tree fragment, owned by the variable that built it
    Fragment(Arc<Document>),
}

impl XPathValue {
    pub fn empty_nodeset() -> Self {
        XPathValue::NodeSet(Vec::new())
    }

    pub fn single_node(id: NodeId) -> Self {
        XPathValue::NodeSet(vec![id])
    }

    /// Convert to boolean (XPath boolean() function semantics)
    pub fn to_boolean(&self) -> bool {
        match self {
            XPathValue::NodeSet(nodes) => !nodes.is_empty(),
            XPathValue::Boolean(b) => *b,
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::String(s) => !s.is_empty(),
            // A fragment always has its root node
            XPathValue::Fragment(_) => true,
        }
    }

    /// Convert to number (XPath number() function semantics)
    pub fn to_number(&self, doc: &Document) -> f64 {
        match self {
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => string_to_number(s),
            _ => string_to_number(&self.to_string_value(doc)),
        }
    }

    /// Convert to string (XPath string() function semantics)
    pub fn to_string_value(&self, doc: &Document) -> String {
        match self {
            XPathValue::NodeSet(nodes) => nodes.first().map(|&n| doc.string_value(n)).unwrap_or_default(),
            XPathValue::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            XPathValue::Number(n) => number_to_string(*n),
            XPathValue::String(s) => s.clone(),
            XPathValue::Fragment(fragment) => fragment.string_value(fragment.root()),
        }
    }

    /// Nodes of a node-set value; anything else is a type error
    pub fn into_nodeset(self) -> Result<Vec<NodeId>, XPathError> {
        match self {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::Type(format!(
                "expected a node-set, found a {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            XPathValue::NodeSet(_) => "node-set",
            XPathValue::Boolean(_) => "boolean",
            XPathValue::Number(_) => "number",
            XPathValue::String(_) => "string",
            XPathValue::Fragment(_) => "result tree fragment",
        }
    }
}

/// XPath number-to-string conversion: no exponent, integers without a point
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// XPath string-to-number: optional whitespace, optional minus, digits with
/// an optional fraction. Anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);

    let mut seen_digit = false;
    let mut seen_point = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_point => seen_point = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}
