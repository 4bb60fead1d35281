//! Namespace Resolution
//!
//! Stack-based namespace resolver used while building trees, plus the
//! expanded-name type and XML name checks shared by the parser, XPath and
//! the stylesheet engine.

use std::fmt;

/// Well-known namespace URIs
pub mod ns {
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XSLT: &str = "http://www.w3.org/1999/XSL/Transform";
}

/// A namespace URI plus local name. Displays in Clark notation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub uri: String,
    pub local: String,
}

impl ExpandedName {
    pub fn new(uri: impl Into<String>, local: impl Into<String>) -> Self {
        ExpandedName {
            uri: uri.into(),
            local: local.into(),
        }
    }

    /// Name in no namespace
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(String::new(), local)
    }

    /// Parse `{uri}local` or a bare local name
    pub fn from_clark(s: &str) -> Option<Self> {
        match s.strip_prefix('{') {
            Some(rest) => {
                let close = rest.find('}')?;
                Some(Self::new(&rest[..close], &rest[close + 1..]))
            }
            None => Some(Self::local(s)),
        }
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.uri, self.local)
        }
    }
}

/// Resolves prefixes in a static context (XPath compile, pattern compile)
pub trait PrefixResolver {
    /// URI bound to `prefix`; `None` when unbound
    fn resolve_prefix(&self, prefix: &str) -> Option<String>;
}

/// A fixed list of bindings, used for compiled expressions
#[derive(Debug, Clone, Default)]
pub struct NamespaceBindings {
    bindings: Vec<(String, String)>,
}

impl NamespaceBindings {
    pub fn new(bindings: Vec<(String, String)>) -> Self {
        NamespaceBindings { bindings }
    }
}

impl PrefixResolver for NamespaceBindings {
    fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some(ns::XML.to_string());
        }
        self.bindings
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.clone())
    }
}

/// Split `prefix:local`; the prefix is "" for unprefixed names
pub fn split_qname(qname: &str) -> (&str, &str) {
    match qname.find(':') {
        Some(i) => (&qname[..i], &qname[i + 1..]),
        None => ("", qname),
    }
}

/// XML 1.0 (fifth edition) NameStartChar
pub fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}' | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' | '\u{10000}'..='\u{EFFFF}')
}

/// XML 1.0 (fifth edition) NameChar
pub fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

/// XML `Name`
pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start_char(c) => chars.all(is_name_char),
        _ => false,
    }
}

/// `Name` without colons
pub fn is_ncname(s: &str) -> bool {
    !s.contains(':') && is_name(s)
}

/// `prefix:local` or an NCName
pub fn is_qname(s: &str) -> bool {
    match s.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(s),
    }
}

/// Namespace binding (prefix -> URI) tagged with its declaring depth
#[derive(Debug, Clone)]
struct NsBinding {
    prefix: String,
    uri: String,
    depth: u32,
}

/// Stack-based namespace resolver
#[derive(Debug)]
pub struct NamespaceResolver {
    bindings: Vec<NsBinding>,
    depth: u32,
}

impl Default for NamespaceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceResolver {
    /// Create a new namespace resolver with the xml prefix pre-bound
    pub fn new() -> Self {
        NamespaceResolver {
            bindings: vec![NsBinding {
                prefix: "xml".to_string(),
                uri: ns::XML.to_string(),
                depth: 0,
            }],
            depth: 0,
        }
    }

    /// Enter a new element scope
    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave an element scope, removing any bindings declared in it
    pub fn pop_scope(&mut self) {
        while let Some(binding) = self.bindings.last() {
            if binding.depth < self.depth {
                break;
            }
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Declare a binding in the current scope. `xml` and `xmlns` cannot be rebound.
    pub fn declare(&mut self, prefix: &str, uri: &str) -> bool {
        if prefix == "xml" || prefix == "xmlns" {
            return false;
        }
        self.bindings.push(NsBinding {
            prefix: prefix.to_string(),
            uri: uri.to_string(),
            depth: self.depth,
        });
        true
    }

    /// Resolve a prefix ("" for the default namespace). An empty URI means
    /// the prefix was undeclared.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix == prefix)
            .map(|b| b.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_bindings() {
        let mut resolver = NamespaceResolver::new();
        resolver.push_scope();
        resolver.declare("a", "urn:a");
        resolver.push_scope();
        resolver.declare("a", "urn:inner");
        assert_eq!(resolver.resolve("a"), Some("urn:inner"));
        resolver.pop_scope();
        assert_eq!(resolver.resolve("a"), Some("urn:a"));
        resolver.pop_scope();
        assert_eq!(resolver.resolve("a"), None);
        assert_eq!(resolver.resolve("xml"), Some(ns::XML));
    }

    #[test]
    fn test_default_undeclaration() {
        let mut resolver = NamespaceResolver::new();
        resolver.push_scope();
        resolver.declare("", "urn:d");
        resolver.push_scope();
        resolver.declare("", "");
        assert_eq!(resolver.resolve(""), None);
    }

    #[test]
    fn test_names() {
        assert!(is_name("p:local"));
        assert!(is_name("_x.y-z"));
        assert!(is_name("\u{E9}l\u{E9}ment"));
        assert!(!is_name("1abc"));
        assert!(!is_name("-a"));
        assert!(!is_name(""));
        assert!(is_qname("p:local"));
        assert!(!is_qname("a:b:c"));
        assert!(!is_qname(":a"));
        assert!(is_ncname("a\u{B7}b"));
        assert!(!is_ncname("p:local"));
    }

    #[test]
    fn test_clark_notation() {
        let name = ExpandedName::from_clark("{urn:x}item").unwrap();
        assert_eq!(name.uri, "urn:x");
        assert_eq!(name.local, "item");
        assert_eq!(name.to_string(), "{urn:x}item");
        assert_eq!(ExpandedName::from_clark("plain").unwrap().to_string(), "plain");
        assert!(ExpandedName::from_clark("{broken").is_none());
    }
}
