//! XPath Evaluation Engine
//!
//! Runs compiled ops against a document. Variables and non-core functions
//! come from an [`Environment`], which is how the stylesheet engine plugs
//! in its scopes and its own function library.

use crate::dom::{Document, ExpandedName, NodeId};

use super::axes::{matches_node_test, navigate};
use super::compiler::{CompiledExpr, CompiledStep, Function, Op};
use super::functions;
use super::parser::BinaryOp;
use super::value::XPathValue;
use super::XPathError;

/// Variable bindings and extension functions visible to an expression
pub trait Environment {
    fn variable(&self, name: &ExpandedName) -> Option<XPathValue>;

    fn call_function(
        &self,
        name: &ExpandedName,
        args: Vec<XPathValue>,
        ctx: &EvalContext<'_>,
    ) -> Result<XPathValue, XPathError> {
        let _ = (args, ctx);
        Err(XPathError::UnknownFunction(name.to_string()))
    }
}

/// Environment with no variables and no extra functions
#[cfg(test)]
pub struct NoEnvironment;

#[cfg(test)]
impl Environment for NoEnvironment {
    fn variable(&self, _name: &ExpandedName) -> Option<XPathValue> {
        None
    }
}

/// Evaluation context
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub doc: &'a Document,
    pub node: NodeId,
    pub position: usize,
    pub size: usize,
    pub env: &'a dyn Environment,
}

impl<'a> EvalContext<'a> {
    pub fn new(doc: &'a Document, node: NodeId, env: &'a dyn Environment) -> Self {
        EvalContext {
            doc,
            node,
            position: 1,
            size: 1,
            env,
        }
    }

    /// Same document and environment, different focus
    pub fn at(&self, node: NodeId, position: usize, size: usize) -> Self {
        EvalContext {
            node,
            position,
            size,
            ..*self
        }
    }
}

/// Evaluate a compiled expression
pub fn evaluate(expr: &CompiledExpr, ctx: &EvalContext<'_>) -> Result<XPathValue, XPathError> {
    let mut stack: Vec<XPathValue> = Vec::new();

    for op in &expr.ops {
        let value = match op {
            Op::Root => XPathValue::single_node(ctx.doc.root()),
            Op::Context => XPathValue::single_node(ctx.node),
            Op::Number(n) => XPathValue::Number(*n),
            Op::String(s) => XPathValue::String(s.clone()),
            Op::Variable(name) => ctx
                .env
                .variable(name)
                .ok_or_else(|| XPathError::UndefinedVariable(name.to_string()))?,
            Op::Steps(steps) => {
                let nodes = pop(&mut stack)?.into_nodeset().map_err(navigation_error)?;
                XPathValue::NodeSet(walk_steps(nodes, steps, ctx)?)
            }
            Op::Filter(predicates) => {
                let mut nodes = pop(&mut stack)?.into_nodeset().map_err(navigation_error)?;
                for pred in predicates {
                    nodes = apply_predicate(nodes, pred, ctx)?;
                }
                XPathValue::NodeSet(nodes)
            }
            Op::Union => {
                let right = pop(&mut stack)?.into_nodeset()?;
                let mut left = pop(&mut stack)?.into_nodeset()?;
                left.extend(right);
                left.sort_unstable();
                left.dedup();
                XPathValue::NodeSet(left)
            }
            Op::Call(function, argc) => {
                let at = stack
                    .len()
                    .checked_sub(*argc)
                    .ok_or_else(|| XPathError::Dynamic("argument stack underflow".into()))?;
                let args = stack.split_off(at);
                match function {
                    Function::Core(core) => functions::call(*core, args, ctx)?,
                    Function::External(name) => ctx.env.call_function(name, args, ctx)?,
                }
            }
            Op::Binary(op) => {
                let right = pop(&mut stack)?;
                let left = pop(&mut stack)?;
                binary(*op, &left, &right, ctx.doc)
            }
            Op::And(right) => {
                let left = pop(&mut stack)?;
                XPathValue::Boolean(left.to_boolean() && evaluate(right, ctx)?.to_boolean())
            }
            Op::Or(right) => {
                let left = pop(&mut stack)?;
                XPathValue::Boolean(left.to_boolean() || evaluate(right, ctx)?.to_boolean())
            }
            Op::Negate => {
                let n = pop(&mut stack)?.to_number(ctx.doc);
                XPathValue::Number(-n)
            }
        };
        stack.push(value);
    }

    pop(&mut stack)
}

fn pop(stack: &mut Vec<XPathValue>) -> Result<XPathValue, XPathError> {
    stack
        .pop()
        .ok_or_else(|| XPathError::Dynamic("evaluation stack underflow".into()))
}

fn navigation_error(_: XPathError) -> XPathError {
    XPathError::Type("path steps can only be applied to a node-set".into())
}

/// Apply each step to every node of the input, merging in document order
pub fn walk_steps(mut nodes: Vec<NodeId>, steps: &[CompiledStep], ctx: &EvalContext<'_>) -> Result<Vec<NodeId>, XPathError> {
    for step in steps {
        let mut result = Vec::new();
        for &node in &nodes {
            let mut candidates: Vec<NodeId> = navigate(ctx.doc, node, step.axis)
                .into_iter()
                .filter(|&c| matches_node_test(ctx.doc, c, step.axis, &step.test))
                .collect();
            for pred in &step.predicates {
                candidates = apply_predicate(candidates, pred, ctx)?;
            }
            result.extend(candidates);
        }
        result.sort_unstable();
        result.dedup();
        nodes = result;
    }
    Ok(nodes)
}

/// Filter `nodes` by one predicate; positions follow the given order
pub fn apply_predicate(nodes: Vec<NodeId>, pred: &CompiledExpr, ctx: &EvalContext<'_>) -> Result<Vec<NodeId>, XPathError> {
    let size = nodes.len();
    let mut kept = Vec::with_capacity(size);
    for (i, &node) in nodes.iter().enumerate() {
        let value = evaluate(pred, &ctx.at(node, i + 1, size))?;
        let keep = match value {
            XPathValue::Number(n) => n == (i + 1) as f64,
            other => other.to_boolean(),
        };
        if keep {
            kept.push(node);
        }
    }
    Ok(kept)
}

fn binary(op: BinaryOp, left: &XPathValue, right: &XPathValue, doc: &Document) -> XPathValue {
    let arith = |f: fn(f64, f64) -> f64| XPathValue::Number(f(left.to_number(doc), right.to_number(doc)));
    match op {
        BinaryOp::Add => arith(|a, b| a + b),
        BinaryOp::Sub => arith(|a, b| a - b),
        BinaryOp::Mul => arith(|a, b| a * b),
        BinaryOp::Div => arith(|a, b| a / b),
        BinaryOp::Mod => arith(|a, b| a % b),
        BinaryOp::And => XPathValue::Boolean(left.to_boolean() && right.to_boolean()),
        BinaryOp::Or => XPathValue::Boolean(left.to_boolean() || right.to_boolean()),
        _ => XPathValue::Boolean(compare_values(op, left, right, doc)),
    }
}

/// XPath 1.0 comparison, existential over node-sets
pub fn compare_values(op: BinaryOp, left: &XPathValue, right: &XPathValue, doc: &Document) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(a), XPathValue::NodeSet(b)) => {
            let right_values: Vec<String> = b.iter().map(|&n| doc.string_value(n)).collect();
            a.iter().any(|&n| {
                let l = XPathValue::String(doc.string_value(n));
                right_values
                    .iter()
                    .any(|r| compare_atomic(op, &l, &XPathValue::String(r.clone()), doc))
            })
        }
        (XPathValue::NodeSet(a), XPathValue::Boolean(_)) => {
            compare_atomic(op, &XPathValue::Boolean(!a.is_empty()), right, doc)
        }
        (XPathValue::Boolean(_), XPathValue::NodeSet(b)) => {
            compare_atomic(op, left, &XPathValue::Boolean(!b.is_empty()), doc)
        }
        (XPathValue::NodeSet(a), other) => a
            .iter()
            .any(|&n| compare_atomic(op, &XPathValue::String(doc.string_value(n)), other, doc)),
        (other, XPathValue::NodeSet(b)) => b
            .iter()
            .any(|&n| compare_atomic(op, other, &XPathValue::String(doc.string_value(n)), doc)),
        _ => compare_atomic(op, left, right, doc),
    }
}

fn compare_atomic(op: BinaryOp, left: &XPathValue, right: &XPathValue, doc: &Document) -> bool {
    use XPathValue::{Boolean, Number};

    match op {
        BinaryOp::Eq | BinaryOp::NotEq => {
            let equal = if matches!(left, Boolean(_)) || matches!(right, Boolean(_)) {
                left.to_boolean() == right.to_boolean()
            } else if matches!(left, Number(_)) || matches!(right, Number(_)) {
                left.to_number(doc) == right.to_number(doc)
            } else {
                left.to_string_value(doc) == right.to_string_value(doc)
            };
            (op == BinaryOp::Eq) == equal
        }
        _ => {
            let (a, b) = (left.to_number(doc), right.to_number(doc));
            match op {
                BinaryOp::Lt => a < b,
                BinaryOp::LtEq => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::GtEq => a >= b,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{parse_document, NamespaceBindings};
    use crate::xpath::compile;

    fn eval(doc: &Document, xpath: &str) -> XPathValue {
        let compiled = compile(xpath, &NamespaceBindings::default()).unwrap();
        let ctx = EvalContext::new(doc, doc.root(), &NoEnvironment);
        evaluate(&compiled, &ctx).unwrap()
    }

    fn string(doc: &Document, xpath: &str) -> String {
        eval(doc, xpath).to_string_value(doc)
    }

    #[test]
    fn test_paths() {
        let doc = parse_document(b"<r><item>a</item><item>b</item><x><item>c</item></x></r>").unwrap();
        assert_eq!(eval(&doc, "count(/r/item)").to_number(&doc), 2.0);
        assert_eq!(eval(&doc, "count(//item)").to_number(&doc), 3.0);
        assert_eq!(string(&doc, "//item[last()]"), "b");
        assert_eq!(string(&doc, "(//item)[last()]"), "c");
    }

    #[test]
    fn test_step_predicates_use_proximity() {
        let doc = parse_document(b"<r><a><b>1</b><b>2</b></a><a><b>3</b><b>4</b></a></r>").unwrap();
        // b[1] is per parent
        assert_eq!(eval(&doc, "count(//b[1])").to_number(&doc), 2.0);
        // (//b)[1] is over the whole set
        assert_eq!(string(&doc, "(//b)[1]"), "1");
        assert_eq!(string(&doc, "//b[. = 4]/preceding-sibling::b[1]"), "3");
        assert_eq!(string(&doc, "//b[4]/ancestor::*[last()]/a[2]/b[1]"), "");
        assert_eq!(string(&doc, "/r/a[2]/b[2]/ancestor::*[1]/b[1]"), "3");
    }

    #[test]
    fn test_attributes_are_nodes() {
        let doc = parse_document(b"<r><i id='1'/><i id='2'/><i/></r>").unwrap();
        assert_eq!(eval(&doc, "count(//@id)").to_number(&doc), 2.0);
        assert_eq!(string(&doc, "//i[@id='2']/@id"), "2");
        assert_eq!(string(&doc, "name(//@id)"), "id");
        assert_eq!(eval(&doc, "sum(//@id)").to_number(&doc), 3.0);
    }

    #[test]
    fn test_comparisons() {
        let doc = parse_document(b"<r><n>1</n><n>5</n></r>").unwrap();
        assert!(eval(&doc, "//n = 5").to_boolean());
        assert!(eval(&doc, "//n != 5").to_boolean());
        assert!(eval(&doc, "//n > 4").to_boolean());
        assert!(!eval(&doc, "//n > 5").to_boolean());
        assert!(eval(&doc, "//missing = false()").to_boolean());
        assert!(eval(&doc, "'1' = 1.0").to_boolean());
        assert!(!eval(&doc, "'abc' = 'ABC'").to_boolean());
    }

    #[test]
    fn test_arithmetic() {
        let doc = parse_document(b"<r/>").unwrap();
        assert_eq!(eval(&doc, "7 mod 3").to_number(&doc), 1.0);
        assert_eq!(eval(&doc, "-7 mod 3").to_number(&doc), -1.0);
        assert_eq!(string(&doc, "1 div 0"), "Infinity");
        assert_eq!(string(&doc, "0 div 0"), "NaN");
        assert_eq!(eval(&doc, "2 * 3 + 1").to_number(&doc), 7.0);
    }

    #[test]
    fn test_undefined_variable_errors() {
        let doc = parse_document(b"<r/>").unwrap();
        let compiled = compile("$nope", &NamespaceBindings::default()).unwrap();
        let ctx = EvalContext::new(&doc, doc.root(), &NoEnvironment);
        assert!(matches!(evaluate(&compiled, &ctx), Err(XPathError::UndefinedVariable(_))));
    }

    #[test]
    fn test_short_circuit() {
        let doc = parse_document(b"<r/>").unwrap();
        assert!(!eval(&doc, "false() and $nope").to_boolean());
        assert!(eval(&doc, "true() or $nope").to_boolean());
    }

    #[test]
    fn test_union_in_document_order() {
        let doc = parse_document(b"<r><a/><b/><c/></r>").unwrap();
        let nodes = eval(&doc, "//c | //a").into_nodeset().unwrap();
        assert_eq!(doc.local_name(nodes[0]), "a");
        assert_eq!(doc.local_name(nodes[1]), "c");
    }
}
