//! XPath 1.0 Functions
//!
//! Implements the 27 core functions:
//!
//! Node Set Functions:
//! - position(), last(), count(), id(), local-name(), namespace-uri(), name()
//!
//! String Functions:
//! - string(), concat(), starts-with(), contains(), substring(),
//!   substring-before(), substring-after(), string-length(),
//!   normalize-space(), translate()
//!
//! Boolean Functions:
//! - boolean(), not(), true(), false(), lang()
//!
//! Number Functions:
//! - number(), sum(), floor(), ceiling(), round()

use crate::dom::{ns, NodeId, NodeKind};

use super::eval::EvalContext;
use super::value::{string_to_number, XPathValue};
use super::XPathError;

/// A core function, bound when the expression is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreFunction {
    Position,
    Last,
    Count,
    Id,
    LocalName,
    NamespaceUri,
    Name,
    String,
    Concat,
    StartsWith,
    Contains,
    Substring,
    SubstringBefore,
    SubstringAfter,
    StringLength,
    NormalizeSpace,
    Translate,
    Boolean,
    Not,
    True,
    False,
    Lang,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
}

impl CoreFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "position" => CoreFunction::Position,
            "last" => CoreFunction::Last,
            "count" => CoreFunction::Count,
            "id" => CoreFunction::Id,
            "local-name" => CoreFunction::LocalName,
            "namespace-uri" => CoreFunction::NamespaceUri,
            "name" => CoreFunction::Name,
            "string" => CoreFunction::String,
            "concat" => CoreFunction::Concat,
            "starts-with" => CoreFunction::StartsWith,
            "contains" => CoreFunction::Contains,
            "substring" => CoreFunction::Substring,
            "substring-before" => CoreFunction::SubstringBefore,
            "substring-after" => CoreFunction::SubstringAfter,
            "string-length" => CoreFunction::StringLength,
            "normalize-space" => CoreFunction::NormalizeSpace,
            "translate" => CoreFunction::Translate,
            "boolean" => CoreFunction::Boolean,
            "not" => CoreFunction::Not,
            "true" => CoreFunction::True,
            "false" => CoreFunction::False,
            "lang" => CoreFunction::Lang,
            "number" => CoreFunction::Number,
            "sum" => CoreFunction::Sum,
            "floor" => CoreFunction::Floor,
            "ceiling" => CoreFunction::Ceiling,
            "round" => CoreFunction::Round,
            _ => return None,
        })
    }

    /// Minimum and maximum argument count; `None` means unbounded
    pub fn arity(self) -> (usize, Option<usize>) {
        use CoreFunction::*;
        match self {
            Position | Last | True | False => (0, Some(0)),
            LocalName | NamespaceUri | Name | String | StringLength | NormalizeSpace | Number => (0, Some(1)),
            Count | Id | Boolean | Not | Lang | Sum | Floor | Ceiling | Round => (1, Some(1)),
            StartsWith | Contains | SubstringBefore | SubstringAfter => (2, Some(2)),
            Substring => (2, Some(3)),
            Translate => (3, Some(3)),
            Concat => (2, None),
        }
    }
}

/// True for names in the core library
pub fn is_core_function(name: &str) -> bool {
    CoreFunction::from_name(name).is_some()
}

/// Evaluate a core function call
pub fn call(function: CoreFunction, args: Vec<XPathValue>, ctx: &EvalContext<'_>) -> Result<XPathValue, XPathError> {
    let doc = ctx.doc;
    let string = |i: usize| -> String { string_arg(&args, i, ctx) };

    Ok(match function {
        // Node Set Functions
        CoreFunction::Position => XPathValue::Number(ctx.position as f64),
        CoreFunction::Last => XPathValue::Number(ctx.size as f64),
        CoreFunction::Count => XPathValue::Number(nodeset_arg(&args, 0, "count")?.len() as f64),
        CoreFunction::Id => fn_id(&args, ctx),
        CoreFunction::LocalName => XPathValue::String(
            node_arg(&args, ctx, "local-name")?
                .filter(|&n| is_named(doc.kind(n)))
                .map(|n| doc.local_name(n).to_string())
                .unwrap_or_default(),
        ),
        CoreFunction::NamespaceUri => XPathValue::String(
            node_arg(&args, ctx, "namespace-uri")?
                .filter(|&n| matches!(doc.kind(n), NodeKind::Element | NodeKind::Attribute))
                .map(|n| doc.namespace_uri(n).to_string())
                .unwrap_or_default(),
        ),
        CoreFunction::Name => XPathValue::String(
            node_arg(&args, ctx, "name")?
                .filter(|&n| is_named(doc.kind(n)))
                .map(|n| doc.qualified_name(n).into_owned())
                .unwrap_or_default(),
        ),

        // String Functions
        CoreFunction::String => XPathValue::String(string(0)),
        CoreFunction::Concat => {
            XPathValue::String(args.iter().map(|a| a.to_string_value(doc)).collect::<Vec<_>>().concat())
        }
        CoreFunction::StartsWith => XPathValue::Boolean(string(0).starts_with(&string(1))),
        CoreFunction::Contains => XPathValue::Boolean(string(0).contains(&string(1))),
        CoreFunction::Substring => {
            let start = args.get(1).map(|a| a.to_number(doc)).unwrap_or(f64::NAN);
            let length = args.get(2).map(|a| a.to_number(doc));
            XPathValue::String(substring(&string(0), start, length))
        }
        CoreFunction::SubstringBefore => {
            let (s, pat) = (string(0), string(1));
            XPathValue::String(s.find(&pat).map(|i| s[..i].to_string()).unwrap_or_default())
        }
        CoreFunction::SubstringAfter => {
            let (s, pat) = (string(0), string(1));
            XPathValue::String(s.find(&pat).map(|i| s[i + pat.len()..].to_string()).unwrap_or_default())
        }
        CoreFunction::StringLength => XPathValue::Number(string(0).chars().count() as f64),
        CoreFunction::NormalizeSpace => XPathValue::String(normalize_space(&string(0))),
        CoreFunction::Translate => XPathValue::String(translate(&string(0), &string(1), &string(2))),

        // Boolean Functions
        CoreFunction::Boolean => XPathValue::Boolean(args.first().is_some_and(|a| a.to_boolean())),
        CoreFunction::Not => XPathValue::Boolean(!args.first().is_some_and(|a| a.to_boolean())),
        CoreFunction::True => XPathValue::Boolean(true),
        CoreFunction::False => XPathValue::Boolean(false),
        CoreFunction::Lang => XPathValue::Boolean(lang_matches(ctx, &string(0))),

        // Number Functions
        CoreFunction::Number => XPathValue::Number(match args.first() {
            Some(arg) => arg.to_number(doc),
            None => string_to_number(&doc.string_value(ctx.node)),
        }),
        CoreFunction::Sum => XPathValue::Number(
            nodeset_arg(&args, 0, "sum")?
                .iter()
                .map(|&n| string_to_number(&doc.string_value(n)))
                .sum(),
        ),
        CoreFunction::Floor => XPathValue::Number(number_arg(&args, ctx).floor()),
        CoreFunction::Ceiling => XPathValue::Number(number_arg(&args, ctx).ceil()),
        CoreFunction::Round => XPathValue::Number(round(number_arg(&args, ctx))),
    })
}

fn is_named(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction
    )
}

/// String value of argument `i`, or of the context node when omitted
fn string_arg(args: &[XPathValue], i: usize, ctx: &EvalContext<'_>) -> String {
    match args.get(i) {
        Some(arg) => arg.to_string_value(ctx.doc),
        None => ctx.doc.string_value(ctx.node),
    }
}

fn number_arg(args: &[XPathValue], ctx: &EvalContext<'_>) -> f64 {
    args.first().map(|a| a.to_number(ctx.doc)).unwrap_or(f64::NAN)
}

fn nodeset_arg<'v>(args: &'v [XPathValue], i: usize, function: &str) -> Result<&'v [NodeId], XPathError> {
    match args.get(i) {
        Some(XPathValue::NodeSet(nodes)) => Ok(nodes),
        Some(other) => Err(XPathError::Type(format!(
            "{}() expects a node-set, found a {}",
            function,
            other.type_name()
        ))),
        None => Err(XPathError::Type(format!("{}() expects a node-set", function))),
    }
}

/// First node of the optional node-set argument, or the context node
fn node_arg(args: &[XPathValue], ctx: &EvalContext<'_>, function: &str) -> Result<Option<NodeId>, XPathError> {
    if args.is_empty() {
        return Ok(Some(ctx.node));
    }
    Ok(nodeset_arg(args, 0, function)?.first().copied())
}

/// Elements whose `xml:id` matches any whitespace-separated token
fn fn_id(args: &[XPathValue], ctx: &EvalContext<'_>) -> XPathValue {
    let doc = ctx.doc;
    let mut tokens: Vec<String> = Vec::new();
    match args.first() {
        Some(XPathValue::NodeSet(nodes)) => {
            for &n in nodes {
                tokens.extend(doc.string_value(n).split_ascii_whitespace().map(str::to_string));
            }
        }
        Some(other) => tokens.extend(other.to_string_value(doc).split_ascii_whitespace().map(str::to_string)),
        None => {}
    }
    if tokens.is_empty() {
        return XPathValue::empty_nodeset();
    }

    let found: Vec<NodeId> = doc
        .descendants(doc.root())
        .filter(|&n| doc.node(n).is_element())
        .filter(|&n| {
            doc.attribute_value(n, ns::XML, "id")
                .is_some_and(|id| tokens.iter().any(|t| t == id))
        })
        .collect();
    XPathValue::NodeSet(found)
}

/// substring() positions are 1-based and rounded; NaN selects nothing
pub fn substring(s: &str, start: f64, length: Option<f64>) -> String {
    let first = round(start);
    let end = match length {
        Some(len) => first + round(len),
        None => f64::INFINITY,
    };
    s.chars()
        .enumerate()
        .filter(|&(i, _)| {
            let position = (i + 1) as f64;
            position >= first && position < end
        })
        .map(|(_, c)| c)
        .collect()
}

pub fn normalize_space(s: &str) -> String {
    s.split(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn translate(s: &str, from: &str, to: &str) -> String {
    let from: Vec<char> = from.chars().collect();
    let to: Vec<char> = to.chars().collect();
    s.chars()
        .filter_map(|c| match from.iter().position(|&f| f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect()
}

/// XPath round(): halves go toward positive infinity, -0.5 < n < 0 gives -0
pub fn round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        return n;
    }
    let rounded = (n + 0.5).floor();
    if rounded == 0.0 && n < 0.0 {
        -0.0
    } else {
        rounded
    }
}

/// Compare against the nearest xml:lang, ignoring case and subtags
fn lang_matches(ctx: &EvalContext<'_>, wanted: &str) -> bool {
    let doc = ctx.doc;
    let mut current = Some(ctx.node);
    while let Some(node) = current {
        if doc.node(node).is_element() {
            if let Some(lang) = doc.attribute_value(node, ns::XML, "lang") {
                let lang = lang.to_ascii_lowercase();
                let wanted = wanted.to_ascii_lowercase();
                return lang == wanted
                    || lang
                        .strip_prefix(&wanted)
                        .is_some_and(|rest| rest.starts_with('-'));
            }
        }
        current = doc.parent(node);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{parse_document, Document, NamespaceBindings};
    use crate::xpath::{compile, evaluate, NoEnvironment};

    fn eval_at(doc: &Document, node: NodeId, xpath: &str) -> XPathValue {
        let compiled = compile(xpath, &NamespaceBindings::default()).unwrap();
        evaluate(&compiled, &EvalContext::new(doc, node, &NoEnvironment)).unwrap()
    }

    fn string(doc: &Document, xpath: &str) -> String {
        eval_at(doc, doc.root(), xpath).to_string_value(doc)
    }

    #[test]
    fn test_string_functions() {
        let doc = parse_document(b"<r/>").unwrap();
        assert_eq!(string(&doc, "concat('a', 'b', 'c')"), "abc");
        assert_eq!(string(&doc, "substring-before('1999/04/01', '/')"), "1999");
        assert_eq!(string(&doc, "substring-after('1999/04/01', '/')"), "04/01");
        assert_eq!(string(&doc, "normalize-space('  a \n b  ')"), "a b");
        assert_eq!(string(&doc, "translate('bar', 'abc', 'ABC')"), "BAr");
        assert_eq!(string(&doc, "translate('--aaa--', 'abc-', 'ABC')"), "AAA");
        assert_eq!(string(&doc, "string-length('h\u{e9}llo')"), "5");
    }

    #[test]
    fn test_substring_rounding() {
        assert_eq!(substring("12345", 2.0, Some(3.0)), "234");
        assert_eq!(substring("12345", 1.5, Some(2.6)), "234");
        assert_eq!(substring("12345", 0.0, Some(3.0)), "12");
        assert_eq!(substring("12345", f64::NAN, Some(3.0)), "");
        assert_eq!(substring("12345", 1.0, Some(f64::NAN)), "");
        assert_eq!(substring("12345", -42.0, Some(f64::INFINITY)), "12345");
        assert_eq!(substring("12345", f64::NEG_INFINITY, Some(f64::INFINITY)), "");
        assert_eq!(substring("12345", 2.0, None), "2345");
    }

    #[test]
    fn test_round() {
        assert_eq!(round(2.5), 3.0);
        assert_eq!(round(-2.5), -2.0);
        assert!(round(-0.3).is_sign_negative());
        assert!(round(f64::NAN).is_nan());
    }

    #[test]
    fn test_name_functions() {
        let doc = parse_document(b"<p:r xmlns:p='urn:p'><?pi data?></p:r>").unwrap();
        let r = doc.document_element().unwrap();
        assert_eq!(eval_at(&doc, r, "name()").to_string_value(&doc), "p:r");
        assert_eq!(eval_at(&doc, r, "local-name()").to_string_value(&doc), "r");
        assert_eq!(eval_at(&doc, r, "namespace-uri()").to_string_value(&doc), "urn:p");
        assert_eq!(eval_at(&doc, r, "name(processing-instruction())").to_string_value(&doc), "pi");
        assert_eq!(eval_at(&doc, r, "name(missing)").to_string_value(&doc), "");
    }

    #[test]
    fn test_lang() {
        let doc = parse_document(b"<r xml:lang='en-US'><p/></r>").unwrap();
        let p = doc.descendants(doc.root()).find(|&n| doc.local_name(n) == "p").unwrap();
        assert!(eval_at(&doc, p, "lang('en')").to_boolean());
        assert!(eval_at(&doc, p, "lang('EN-us')").to_boolean());
        assert!(!eval_at(&doc, p, "lang('e')").to_boolean());
        assert!(!eval_at(&doc, p, "lang('fr')").to_boolean());
    }

    #[test]
    fn test_id_uses_xml_id() {
        let doc = parse_document(b"<r><a xml:id='x1'/><b xml:id='x2'/><c id='x3'/></r>").unwrap();
        assert_eq!(eval_at(&doc, doc.root(), "count(id('x2 x1 x3'))").to_number(&doc), 2.0);
        assert_eq!(string(&doc, "local-name(id('x2'))"), "b");
    }

    #[test]
    fn test_count_requires_nodeset() {
        let doc = parse_document(b"<r/>").unwrap();
        let compiled = compile("count('a')", &NamespaceBindings::default()).unwrap();
        let result = evaluate(&compiled, &EvalContext::new(&doc, doc.root(), &NoEnvironment));
        assert!(matches!(result, Err(XPathError::Type(_))));
    }

    #[test]
    fn test_number_functions() {
        let doc = parse_document(b"<r><n>1.5</n><n>2</n></r>").unwrap();
        assert_eq!(string(&doc, "sum(//n)"), "3.5");
        assert_eq!(string(&doc, "floor(-1.5)"), "-2");
        assert_eq!(string(&doc, "ceiling(1.2)"), "2");
        assert_eq!(string(&doc, "number('x')"), "NaN");
        assert!(is_core_function("normalize-space"));
        assert!(!is_core_function("key"));
    }
}
