//! XSLT Function Library
//!
//! Functions XSLT adds to the XPath core library:
//! current(), key(), generate-id(), format-number(), system-property(),
//! function-available(), element-available(), unparsed-entity-uri(),
//! document().
//!
//! Called by XPath through the executor's [`Environment`](crate::xpath::Environment)
//! implementation.

use std::collections::HashMap;

use crate::dom::{ns, split_qname, ExpandedName, NodeId, PrefixResolver};
use crate::xpath::functions::is_core_function;
use crate::xpath::{evaluate, EvalContext, XPathError, XPathValue};

use super::compiler::INSTRUCTIONS;
use super::executor::Executor;
use super::number::format_decimal;

/// Names the executor answers for, all in no namespace
pub const XSLT_FUNCTIONS: &[&str] = &[
    "current",
    "key",
    "generate-id",
    "format-number",
    "system-property",
    "function-available",
    "element-available",
    "unparsed-entity-uri",
    "document",
];

pub fn is_available(name: &ExpandedName) -> bool {
    name.uri.is_empty() && (is_core_function(&name.local) || XSLT_FUNCTIONS.contains(&name.local.as_str()))
}

pub fn call(
    executor: &Executor<'_>,
    name: &ExpandedName,
    args: Vec<XPathValue>,
    ctx: &EvalContext<'_>,
) -> Result<XPathValue, XPathError> {
    if !name.uri.is_empty() {
        return Err(XPathError::UnknownFunction(name.to_string()));
    }
    let doc = ctx.doc;
    let local = name.local.as_str();

    match local {
        "current" => {
            check_arity(local, &args, 0, 0)?;
            Ok(XPathValue::single_node(executor.current.get()))
        }
        "key" => {
            check_arity(local, &args, 2, 2)?;
            let mut args = args.into_iter();
            let key_name = args.next().map(|v| v.to_string_value(doc)).unwrap_or_default();
            let value = args.next().unwrap_or_else(XPathValue::empty_nodeset);
            let key_name = expand(executor, &key_name)?;
            key(executor, &key_name, value, ctx)
        }
        "generate-id" => {
            check_arity(local, &args, 0, 1)?;
            let node = match args.into_iter().next() {
                Some(value) => value.into_nodeset()?.first().copied(),
                None => Some(ctx.node),
            };
            Ok(XPathValue::String(node.map(|n| format!("id{}", n)).unwrap_or_default()))
        }
        "format-number" => {
            check_arity(local, &args, 2, 3)?;
            if args.len() == 3 {
                return Err(XPathError::Dynamic(
                    "format-number(): named decimal formats are not supported".to_string(),
                ));
            }
            let number = args[0].to_number(doc);
            let pattern = args[1].to_string_value(doc);
            Ok(XPathValue::String(format_decimal(number, &pattern)))
        }
        "system-property" => {
            check_arity(local, &args, 1, 1)?;
            let property = expand(executor, &args[0].to_string_value(doc))?;
            let value = if property.uri == ns::XSLT {
                match property.local.as_str() {
                    "version" => return Ok(XPathValue::Number(1.0)),
                    "vendor" => "rustyxslt",
                    _ => "",
                }
            } else {
                ""
            };
            Ok(XPathValue::String(value.to_string()))
        }
        "function-available" => {
            check_arity(local, &args, 1, 1)?;
            let function = expand(executor, &args[0].to_string_value(doc))?;
            Ok(XPathValue::Boolean(is_available(&function)))
        }
        "element-available" => {
            check_arity(local, &args, 1, 1)?;
            let element = expand(executor, &args[0].to_string_value(doc))?;
            Ok(XPathValue::Boolean(
                element.uri == ns::XSLT && INSTRUCTIONS.contains(&element.local.as_str()),
            ))
        }
        "unparsed-entity-uri" => {
            check_arity(local, &args, 1, 1)?;
            Ok(XPathValue::String(String::new()))
        }
        "document" => Err(XPathError::Dynamic(
            "document(): loading external documents is not supported".to_string(),
        )),
        _ => Err(XPathError::UnknownFunction(name.to_string())),
    }
}

fn check_arity(name: &str, args: &[XPathValue], min: usize, max: usize) -> Result<(), XPathError> {
    if args.len() < min || args.len() > max {
        return Err(XPathError::Dynamic(format!(
            "{}() called with {} arguments",
            name,
            args.len()
        )));
    }
    Ok(())
}

/// QName strings resolve against the stylesheet element's namespaces
fn expand(executor: &Executor<'_>, qname: &str) -> Result<ExpandedName, XPathError> {
    let qname = qname.trim();
    let (prefix, local) = split_qname(qname);
    if prefix.is_empty() {
        return Ok(ExpandedName::local(local));
    }
    let uri = executor
        .stylesheet
        .namespaces
        .resolve_prefix(prefix)
        .ok_or_else(|| XPathError::UndefinedPrefix(prefix.to_string()))?;
    Ok(ExpandedName::new(uri, local))
}

fn key(
    executor: &Executor<'_>,
    name: &ExpandedName,
    value: XPathValue,
    ctx: &EvalContext<'_>,
) -> Result<XPathValue, XPathError> {
    let doc = ctx.doc;
    let lookups: Vec<String> = match value {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|&n| doc.string_value(n)).collect(),
        other => vec![other.to_string_value(doc)],
    };

    build_key_index(executor, name)?;
    let keys = executor.keys.borrow();
    let Some(table) = keys.get(name) else {
        return Ok(XPathValue::empty_nodeset());
    };

    let mut nodes: Vec<NodeId> = lookups
        .iter()
        .filter_map(|v| table.get(v))
        .flat_map(|found| found.iter().copied())
        .collect();
    nodes.sort_unstable();
    nodes.dedup();
    Ok(XPathValue::NodeSet(nodes))
}

/// Index every node against each `xsl:key` declaration named `name`
fn build_key_index(executor: &Executor<'_>, name: &ExpandedName) -> Result<(), XPathError> {
    if executor.keys.borrow().contains_key(name) {
        return Ok(());
    }
    let definitions: Vec<_> = executor.stylesheet.keys.iter().filter(|k| &k.name == name).collect();
    if definitions.is_empty() {
        return Err(XPathError::Dynamic(format!("key() refers to undeclared key {}", name)));
    }
    // Placeholder so key() inside a key's own expressions finds nothing
    executor.keys.borrow_mut().insert(name.clone(), HashMap::new());

    let doc = executor.doc;
    let saved = executor.current.get();
    let mut table: HashMap<String, Vec<NodeId>> = HashMap::new();
    for node in 0..doc.node_count() as NodeId {
        for definition in &definitions {
            if !executor.pattern_matches(&definition.pattern, node)? {
                continue;
            }
            executor.current.set(node);
            let ctx = EvalContext::new(doc, node, executor);
            let values = match evaluate(&definition.use_expr, &ctx)? {
                XPathValue::NodeSet(nodes) => nodes.iter().map(|&n| doc.string_value(n)).collect(),
                other => vec![other.to_string_value(doc)],
            };
            for value in values {
                let entry = table.entry(value).or_default();
                if entry.last() != Some(&node) {
                    entry.push(node);
                }
            }
        }
    }
    executor.current.set(saved);
    executor.keys.borrow_mut().insert(name.clone(), table);
    Ok(())
}
