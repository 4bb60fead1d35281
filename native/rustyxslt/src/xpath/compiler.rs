//! XPath Expression Compiler
//!
//! Lowers a parsed expression into stack ops with every QName resolved:
//! node tests, variables and function names carry namespace URIs, core
//! functions are bound and arity-checked. Parsed ASTs are cached by source
//! text; the lowering depends on the namespace context and is not cached.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};

use lru::LruCache;

use crate::dom::{split_qname, ExpandedName, PrefixResolver};
use crate::xslt::limits::XPATH_CACHE_CAPACITY;

use super::functions::CoreFunction;
use super::parser::{self, Axis, BinaryOp, Expr, NodeTest, Step};
use super::XPathError;

/// Compiled XPath expression
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub ops: Vec<Op>,
    source: Arc<str>,
}

/// Compiled operation
#[derive(Debug, Clone)]
pub enum Op {
    /// Push the root of the context node's tree
    Root,
    /// Push the context node
    Context,
    /// Pop a node-set and walk location steps from each node
    Steps(Vec<CompiledStep>),
    /// Pop a node-set and filter it, positions in document order
    Filter(Vec<CompiledExpr>),
    /// Union two node sets
    Union,
    Number(f64),
    String(String),
    Variable(ExpandedName),
    Call(Function, usize),
    Binary(BinaryOp),
    /// Pop the left operand; evaluate the right one only if it is true
    And(Box<CompiledExpr>),
    /// Pop the left operand; evaluate the right one only if it is false
    Or(Box<CompiledExpr>),
    Negate,
}

#[derive(Debug, Clone)]
pub struct CompiledStep {
    pub axis: Axis,
    pub test: CompiledNodeTest,
    pub predicates: Vec<CompiledExpr>,
}

/// Compiled node test
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledNodeTest {
    Any,
    NamespaceWildcard(String),
    Name { uri: String, local: String },
    Node,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
}

/// Function bound at compile time
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Core(CoreFunction),
    /// Supplied by the evaluation environment
    External(ExpandedName),
}

impl CompiledExpr {
    /// Text this expression was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of all variables referenced, predicates included
    pub fn variable_references(&self) -> Vec<ExpandedName> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<ExpandedName>) {
        for op in &self.ops {
            match op {
                Op::Variable(name) => {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                Op::Steps(steps) => {
                    for step in steps {
                        for pred in &step.predicates {
                            pred.collect_variables(names);
                        }
                    }
                }
                Op::Filter(preds) => {
                    for pred in preds {
                        pred.collect_variables(names);
                    }
                }
                Op::And(right) | Op::Or(right) => right.collect_variables(names),
                _ => {}
            }
        }
    }
}

/// Lowers ASTs against one namespace context
pub struct Compiler<'r> {
    resolver: &'r dyn PrefixResolver,
    source: Arc<str>,
}

impl<'r> Compiler<'r> {
    pub fn new(resolver: &'r dyn PrefixResolver, source: &str) -> Self {
        Compiler {
            resolver,
            source: Arc::from(source),
        }
    }

    /// Resolve a QName; unprefixed names are in no namespace
    pub fn expand(&self, qname: &str) -> Result<ExpandedName, XPathError> {
        let (prefix, local) = split_qname(qname);
        if prefix.is_empty() {
            return Ok(ExpandedName::local(local));
        }
        let uri = self
            .resolver
            .resolve_prefix(prefix)
            .ok_or_else(|| XPathError::UndefinedPrefix(prefix.to_string()))?;
        Ok(ExpandedName::new(uri, local))
    }

    pub fn compile(&self, expr: &Expr) -> Result<CompiledExpr, XPathError> {
        let mut ops = Vec::new();
        self.compile_expr(expr, &mut ops)?;
        Ok(CompiledExpr {
            ops,
            source: Arc::clone(&self.source),
        })
    }

    fn compile_expr(&self, expr: &Expr, ops: &mut Vec<Op>) -> Result<(), XPathError> {
        match expr {
            Expr::Number(n) => ops.push(Op::Number(*n)),
            Expr::String(s) => ops.push(Op::String(s.clone())),
            Expr::Variable(name) => ops.push(Op::Variable(self.expand(name)?)),
            Expr::Negate(inner) => {
                self.compile_expr(inner, ops)?;
                ops.push(Op::Negate);
            }
            Expr::Binary(left, BinaryOp::And, right) => {
                self.compile_expr(left, ops)?;
                ops.push(Op::And(Box::new(self.compile(right)?)));
            }
            Expr::Binary(left, BinaryOp::Or, right) => {
                self.compile_expr(left, ops)?;
                ops.push(Op::Or(Box::new(self.compile(right)?)));
            }
            Expr::Binary(left, op, right) => {
                self.compile_expr(left, ops)?;
                self.compile_expr(right, ops)?;
                ops.push(Op::Binary(*op));
            }
            Expr::Union(left, right) => {
                self.compile_expr(left, ops)?;
                self.compile_expr(right, ops)?;
                ops.push(Op::Union);
            }
            Expr::Path(path) => {
                ops.push(if path.absolute { Op::Root } else { Op::Context });
                if !path.steps.is_empty() {
                    ops.push(Op::Steps(self.compile_steps(&path.steps)?));
                }
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                self.compile_expr(primary, ops)?;
                if !predicates.is_empty() {
                    let preds = predicates.iter().map(|p| self.compile(p)).collect::<Result<_, _>>()?;
                    ops.push(Op::Filter(preds));
                }
                if !steps.is_empty() {
                    ops.push(Op::Steps(self.compile_steps(steps)?));
                }
            }
            Expr::Function(name, args) => {
                let function = self.bind_function(name, args.len())?;
                for arg in args {
                    self.compile_expr(arg, ops)?;
                }
                ops.push(Op::Call(function, args.len()));
            }
        }
        Ok(())
    }

    fn bind_function(&self, qname: &str, arity: usize) -> Result<Function, XPathError> {
        if !qname.contains(':') {
            if let Some(core) = CoreFunction::from_name(qname) {
                let (min, max) = core.arity();
                if arity < min || max.is_some_and(|max| arity > max) {
                    return Err(XPathError::Syntax {
                        expr: self.source.to_string(),
                        message: format!("wrong number of arguments to {}()", qname),
                    });
                }
                return Ok(Function::Core(core));
            }
        }
        Ok(Function::External(self.expand(qname)?))
    }

    pub fn compile_steps(&self, steps: &[Step]) -> Result<Vec<CompiledStep>, XPathError> {
        steps.iter().map(|step| self.compile_step(step)).collect()
    }

    fn compile_step(&self, step: &Step) -> Result<CompiledStep, XPathError> {
        Ok(CompiledStep {
            axis: step.axis,
            test: self.compile_node_test(&step.node_test)?,
            predicates: step.predicates.iter().map(|p| self.compile(p)).collect::<Result<_, _>>()?,
        })
    }

    pub fn compile_node_test(&self, test: &NodeTest) -> Result<CompiledNodeTest, XPathError> {
        Ok(match test {
            NodeTest::Any => CompiledNodeTest::Any,
            NodeTest::NamespaceWildcard(prefix) => CompiledNodeTest::NamespaceWildcard(
                self.resolver
                    .resolve_prefix(prefix)
                    .ok_or_else(|| XPathError::UndefinedPrefix(prefix.clone()))?,
            ),
            NodeTest::Name(qname) => {
                let name = self.expand(qname)?;
                CompiledNodeTest::Name {
                    uri: name.uri,
                    local: name.local,
                }
            }
            NodeTest::Node => CompiledNodeTest::Node,
            NodeTest::Text => CompiledNodeTest::Text,
            NodeTest::Comment => CompiledNodeTest::Comment,
            NodeTest::ProcessingInstruction(target) => CompiledNodeTest::ProcessingInstruction(target.clone()),
        })
    }
}

fn parse_cache() -> &'static Mutex<LruCache<String, Arc<Expr>>> {
    static CACHE: OnceLock<Mutex<LruCache<String, Arc<Expr>>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        let capacity = NonZeroUsize::new(XPATH_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Mutex::new(LruCache::new(capacity))
    })
}

/// Parse through the shared LRU cache
pub fn parse_cached(source: &str) -> Result<Arc<Expr>, XPathError> {
    let cache = parse_cache();
    if let Ok(mut guard) = cache.lock() {
        if let Some(expr) = guard.get(source) {
            return Ok(Arc::clone(expr));
        }
    }

    let expr = Arc::new(parser::parse(source)?);
    if let Ok(mut guard) = cache.lock() {
        guard.put(source.to_string(), Arc::clone(&expr));
    }
    Ok(expr)
}

/// Parse and compile an XPath expression string
pub fn compile(source: &str, resolver: &dyn PrefixResolver) -> Result<CompiledExpr, XPathError> {
    let expr = parse_cached(source)?;
    Compiler::new(resolver, source).compile(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NamespaceBindings;

    fn bindings() -> NamespaceBindings {
        NamespaceBindings::new(vec![("p".to_string(), "urn:p".to_string())])
    }

    #[test]
    fn test_compile_simple() {
        let compiled = compile("/root", &bindings()).unwrap();
        assert!(matches!(compiled.ops[0], Op::Root));
        assert!(matches!(compiled.ops[1], Op::Steps(_)));
        assert_eq!(compiled.source(), "/root");
    }

    #[test]
    fn test_prefixes_resolve() {
        let compiled = compile("p:item", &bindings()).unwrap();
        let Op::Steps(steps) = &compiled.ops[1] else {
            panic!("expected steps");
        };
        assert_eq!(
            steps[0].test,
            CompiledNodeTest::Name {
                uri: "urn:p".into(),
                local: "item".into()
            }
        );
        assert!(matches!(compile("q:item", &bindings()), Err(XPathError::UndefinedPrefix(_))));
    }

    #[test]
    fn test_core_arity_checked() {
        assert!(compile("count()", &bindings()).is_err());
        assert!(compile("concat('a')", &bindings()).is_err());
        assert!(compile("concat('a', 'b', 'c')", &bindings()).is_ok());
    }

    #[test]
    fn test_variable_references() {
        let compiled = compile("$a + count(item[$b]) and $p:c", &bindings()).unwrap();
        let names: Vec<String> = compiled.variable_references().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["a", "b", "{urn:p}c"]);
    }

    #[test]
    fn test_unknown_functions_bind_externally() {
        let compiled = compile("key('k', 1)", &bindings()).unwrap();
        assert!(compiled
            .ops
            .iter()
            .any(|op| matches!(op, Op::Call(Function::External(name), 2) if *name == ExpandedName::local("key"))));
    }
}
