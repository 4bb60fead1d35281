//! Parameter Marshaling
//!
//! The host passes stylesheet parameters as a flat list
//! `[name1, value1, name2, value2, ...]`. This module validates that list
//! and turns it into owned [`Parameter`]s. Nothing is truncated or
//! transcoded lossily: names and values arrive as UTF-8 and stay UTF-8.

use log::debug;

use crate::dom::{is_ncname, ExpandedName};
use crate::error::{Result, XsltError};
use crate::xslt::Stylesheet;

/// One stylesheet parameter. `value` is an XPath expression, so `"42"` is
/// a number and `"'abc'"` a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: ExpandedName,
    pub value: String,
}

/// Parameters in the order the host supplied them
#[derive(Debug, Default)]
pub struct ParameterList {
    params: Vec<Parameter>,
}

impl ParameterList {
    /// Validate a flat name/value list
    pub fn from_flat<S: AsRef<str>>(flat: &[S]) -> Result<Self> {
        if flat.len() % 2 != 0 {
            return Err(XsltError::invalid_argument(format!(
                "parameter list must hold name/value pairs, got {} entries",
                flat.len()
            )));
        }

        let mut params = Vec::new();
        params.try_reserve_exact(flat.len() / 2)?;

        for pair in flat.chunks_exact(2) {
            let (name, value) = (pair[0].as_ref(), pair[1].as_ref());
            let name = parse_name(name)?;
            if value.contains('\0') {
                return Err(XsltError::invalid_argument(format!(
                    "value of parameter {} contains a NUL character",
                    name
                )));
            }
            let mut owned = String::new();
            owned.try_reserve_exact(value.len())?;
            owned.push_str(value);
            params.push(Parameter { name, value: owned });
        }

        Ok(ParameterList { params })
    }

    /// Parameters the stylesheet declares. Unknown names are dropped with a
    /// debug log; for a repeated name the first occurrence wins.
    pub fn bind(self, stylesheet: &Stylesheet) -> Vec<Parameter> {
        let mut bound: Vec<Parameter> = Vec::with_capacity(self.params.len());
        for param in self.params {
            if !stylesheet.has_param(&param.name) {
                debug!("parameter {} ignored: the stylesheet declares no such xsl:param", param.name);
                continue;
            }
            if bound.iter().any(|p| p.name == param.name) {
                debug!("parameter {} repeated; keeping the first value", param.name);
                continue;
            }
            bound.push(param);
        }
        bound
    }

}

/// Accept an NCName or Clark notation `{uri}local`. Prefixed QNames have no
/// namespace context at the boundary and are rejected.
fn parse_name(name: &str) -> Result<ExpandedName> {
    let invalid = || XsltError::invalid_argument(format!("invalid parameter name '{}'", name));

    if name.contains('\0') {
        return Err(invalid());
    }
    if name.starts_with('{') {
        let expanded = ExpandedName::from_clark(name).ok_or_else(invalid)?;
        if !is_ncname(&expanded.local) {
            return Err(invalid());
        }
        return Ok(expanded);
    }
    if name.contains(':') {
        return Err(XsltError::invalid_argument(format!(
            "parameter name '{}' has a prefix; use {{uri}}local notation instead",
            name
        )));
    }
    if !is_ncname(name) {
        return Err(invalid());
    }
    Ok(ExpandedName::local(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;
    use crate::xslt::compile_stylesheet;

    #[test]
    fn test_pairs_in_order() {
        let list = ParameterList::from_flat(&["a", "1", "{urn:x}b", "'two'"]).unwrap();
        assert_eq!(list.params.len(), 2);
        assert_eq!(list.params[0].name, ExpandedName::local("a"));
        assert_eq!(list.params[1].name, ExpandedName::new("urn:x", "b"));
        assert_eq!(list.params[1].value, "'two'");
    }

    #[test]
    fn test_odd_length_rejected_first() {
        // The bad name would also fail; the length check comes first
        let err = ParameterList::from_flat(&["1bad", "x", "dangling"]).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
        assert!(err.message().contains("3 entries"));
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "1abc", "p:local", "{urn:x}", "{unclosed", "a b"] {
            let err = ParameterList::from_flat(&[name, "1"]).unwrap_err();
            assert_eq!(err.kind(), "invalid_argument", "{:?}", name);
        }
    }

    #[test]
    fn test_nul_in_value_rejected() {
        let err = ParameterList::from_flat(&["a", "x\0y"]).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_non_ascii_kept_intact() {
        let list = ParameterList::from_flat(&["name", "'Grüße'"]).unwrap();
        assert_eq!(list.params[0].value, "'Grüße'");
    }

    #[test]
    fn test_bind_filters_and_keeps_first() {
        let xslt = br#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:param name="a"/><xsl:variable name="v" select="1"/></xsl:stylesheet>"#;
        let sheet = compile_stylesheet(parse_document(xslt).unwrap()).unwrap();
        let list = ParameterList::from_flat(&["a", "1", "unknown", "2", "a", "3", "v", "4"]).unwrap();
        let bound = list.bind(&sheet);
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].value, "1");
    }
}
