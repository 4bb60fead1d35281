//! Match Patterns
//!
//! XSLT patterns are parsed with the XPath parser and restricted to child
//! and attribute steps joined by `/` or `//`, optionally anchored at the
//! root or at an `id()`/`key()` call. Matching runs right to left.

use crate::dom::{NodeId, NodeKind, PrefixResolver};
use crate::xpath::axes::{matches_node_test, navigate};
use crate::xpath::compiler::{parse_cached, CompiledNodeTest};
use crate::xpath::eval::apply_predicate;
use crate::xpath::parser::{Axis, Expr, LocationPath, NodeTest, Step};
use crate::xpath::{evaluate, CompiledExpr, Compiler, EvalContext, XPathError};

/// A compiled match pattern: a union of path alternatives
#[derive(Debug, Clone)]
pub struct Pattern {
    alternatives: Vec<PathPattern>,
}

#[derive(Debug, Clone)]
struct PathPattern {
    anchor: Anchor,
    steps: Vec<PatternStep>,
}

#[derive(Debug, Clone)]
enum Anchor {
    Relative,
    Root,
    /// `id(...)` or `key(...)`
    Call(CompiledExpr),
}

#[derive(Debug, Clone)]
struct PatternStep {
    axis: Axis,
    test: CompiledNodeTest,
    predicates: Vec<CompiledExpr>,
    /// Joined to the previous step by `//`
    descendant: bool,
}

impl Pattern {
    pub fn compile(source: &str, resolver: &dyn PrefixResolver) -> Result<Pattern, XPathError> {
        let expr = parse_cached(source)?;
        let compiler = Compiler::new(resolver, source);
        let mut alternatives = Vec::new();
        collect_alternatives(&expr, &compiler, source, &mut alternatives)?;
        Ok(Pattern { alternatives })
    }

    /// One pattern per union member, with its default priority
    pub fn split(self) -> Vec<(Pattern, f64)> {
        self.alternatives
            .into_iter()
            .map(|alt| {
                let priority = alt.default_priority();
                (
                    Pattern {
                        alternatives: vec![alt],
                    },
                    priority,
                )
            })
            .collect()
    }

    /// Test `node` against the pattern. `ctx` supplies the document and the
    /// environment used by predicates and anchors.
    pub fn matches(&self, node: NodeId, ctx: &EvalContext<'_>) -> Result<bool, XPathError> {
        for alt in &self.alternatives {
            if alt.matches(node, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn syntax_error(source: &str, message: &str) -> XPathError {
    XPathError::Syntax {
        expr: source.to_string(),
        message: message.to_string(),
    }
}

fn collect_alternatives(
    expr: &Expr,
    compiler: &Compiler<'_>,
    source: &str,
    out: &mut Vec<PathPattern>,
) -> Result<(), XPathError> {
    match expr {
        Expr::Union(left, right) => {
            collect_alternatives(left, compiler, source, out)?;
            collect_alternatives(right, compiler, source, out)
        }
        Expr::Path(LocationPath { absolute, steps }) => {
            let anchor = if *absolute { Anchor::Root } else { Anchor::Relative };
            out.push(PathPattern {
                anchor,
                steps: compile_steps(steps, compiler, source)?,
            });
            Ok(())
        }
        Expr::Function(name, _) if is_anchor_function(name) => {
            out.push(PathPattern {
                anchor: Anchor::Call(compiler.compile(expr)?),
                steps: Vec::new(),
            });
            Ok(())
        }
        Expr::Filter {
            primary,
            predicates,
            steps,
        } if predicates.is_empty() && matches!(primary.as_ref(), Expr::Function(name, _) if is_anchor_function(name)) => {
            out.push(PathPattern {
                anchor: Anchor::Call(compiler.compile(primary)?),
                steps: compile_steps(steps, compiler, source)?,
            });
            Ok(())
        }
        _ => Err(syntax_error(source, "not a valid match pattern")),
    }
}

fn is_anchor_function(name: &str) -> bool {
    name == "id" || name == "key"
}

fn compile_steps(steps: &[Step], compiler: &Compiler<'_>, source: &str) -> Result<Vec<PatternStep>, XPathError> {
    let mut compiled = Vec::with_capacity(steps.len());
    let mut descendant = false;
    for step in steps {
        match step.axis {
            Axis::DescendantOrSelf if step.node_test == NodeTest::Node && step.predicates.is_empty() => {
                descendant = true;
            }
            Axis::Child | Axis::Attribute => {
                compiled.push(PatternStep {
                    axis: step.axis,
                    test: compiler.compile_node_test(&step.node_test)?,
                    predicates: step
                        .predicates
                        .iter()
                        .map(|p| compiler.compile(p))
                        .collect::<Result<_, _>>()?,
                    descendant,
                });
                descendant = false;
            }
            _ => return Err(syntax_error(source, "patterns allow only child and attribute steps")),
        }
    }
    if descendant {
        return Err(syntax_error(source, "pattern ends with '//'"));
    }
    Ok(compiled)
}

impl PathPattern {
    fn default_priority(&self) -> f64 {
        match (&self.anchor, self.steps.as_slice()) {
            (Anchor::Relative, [step]) if !step.descendant && step.predicates.is_empty() => match step.test {
                CompiledNodeTest::Name { .. } | CompiledNodeTest::ProcessingInstruction(Some(_)) => 0.0,
                CompiledNodeTest::NamespaceWildcard(_) => -0.25,
                _ => -0.5,
            },
            _ => 0.5,
        }
    }

    fn matches(&self, node: NodeId, ctx: &EvalContext<'_>) -> Result<bool, XPathError> {
        match self.steps.len() {
            0 => match &self.anchor {
                Anchor::Root => Ok(node == ctx.doc.root()),
                Anchor::Call(expr) => Ok(anchor_nodes(expr, node, ctx)?.contains(&node)),
                Anchor::Relative => Ok(false),
            },
            n => self.matches_from(n - 1, node, ctx),
        }
    }

    fn matches_from(&self, index: usize, node: NodeId, ctx: &EvalContext<'_>) -> Result<bool, XPathError> {
        let step = &self.steps[index];
        if !step.matches(node, ctx)? {
            return Ok(false);
        }
        let doc = ctx.doc;
        let Some(parent) = doc.parent(node) else {
            return Ok(false);
        };

        if index == 0 {
            return match &self.anchor {
                Anchor::Relative => Ok(true),
                Anchor::Root => Ok(step.descendant || parent == doc.root()),
                Anchor::Call(expr) => {
                    let anchors = anchor_nodes(expr, node, ctx)?;
                    if step.descendant {
                        let mut current = Some(parent);
                        while let Some(a) = current {
                            if anchors.contains(&a) {
                                return Ok(true);
                            }
                            current = doc.parent(a);
                        }
                        Ok(false)
                    } else {
                        Ok(anchors.contains(&parent))
                    }
                }
            };
        }

        if step.descendant {
            let mut current = Some(parent);
            while let Some(a) = current {
                if self.matches_from(index - 1, a, ctx)? {
                    return Ok(true);
                }
                current = doc.parent(a);
            }
            Ok(false)
        } else {
            self.matches_from(index - 1, parent, ctx)
        }
    }
}

impl PatternStep {
    fn matches(&self, node: NodeId, ctx: &EvalContext<'_>) -> Result<bool, XPathError> {
        let doc = ctx.doc;
        let kind_ok = match self.axis {
            Axis::Attribute => doc.kind(node) == NodeKind::Attribute,
            _ => !matches!(doc.kind(node), NodeKind::Attribute | NodeKind::Document),
        };
        if !kind_ok || !matches_node_test(doc, node, self.axis, &self.test) {
            return Ok(false);
        }
        if self.predicates.is_empty() {
            return Ok(true);
        }

        let Some(parent) = doc.parent(node) else {
            return Ok(false);
        };
        let mut candidates: Vec<NodeId> = navigate(doc, parent, self.axis)
            .into_iter()
            .filter(|&c| matches_node_test(doc, c, self.axis, &self.test))
            .collect();
        for pred in &self.predicates {
            candidates = apply_predicate(candidates, pred, ctx)?;
        }
        Ok(candidates.contains(&node))
    }
}

fn anchor_nodes(expr: &CompiledExpr, node: NodeId, ctx: &EvalContext<'_>) -> Result<Vec<NodeId>, XPathError> {
    evaluate(expr, &ctx.at(node, 1, 1))?.into_nodeset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{parse_document, Document, NamespaceBindings};
    use crate::xpath::NoEnvironment;

    fn find(doc: &Document, local: &str) -> Vec<NodeId> {
        (0..doc.node_count() as NodeId)
            .filter(|&n| doc.local_name(n) == local && !doc.node(n).is_text())
            .collect()
    }

    fn matches(doc: &Document, pattern: &str, node: NodeId) -> bool {
        let pattern = Pattern::compile(pattern, &NamespaceBindings::default()).unwrap();
        pattern
            .matches(node, &EvalContext::new(doc, doc.root(), &NoEnvironment))
            .unwrap()
    }

    #[test]
    fn test_name_and_root() {
        let doc = parse_document(b"<r><item/></r>").unwrap();
        let item = find(&doc, "item")[0];
        assert!(matches(&doc, "item", item));
        assert!(matches(&doc, "r/item", item));
        assert!(matches(&doc, "/r/item", item));
        assert!(!matches(&doc, "/item", item));
        assert!(matches(&doc, "/", doc.root()));
        assert!(!matches(&doc, "node()", doc.root()));
        assert!(matches(&doc, "*", item));
    }

    #[test]
    fn test_descendant_separator() {
        let doc = parse_document(b"<r><a><b><c/></b></a></r>").unwrap();
        let c = find(&doc, "c")[0];
        assert!(matches(&doc, "a//c", c));
        assert!(matches(&doc, "//c", c));
        assert!(matches(&doc, "r//b/c", c));
        assert!(!matches(&doc, "a/c", c));
    }

    #[test]
    fn test_attribute_steps() {
        let doc = parse_document(b"<r><i id='1'/></r>").unwrap();
        let id = find(&doc, "id")[0];
        assert!(matches(&doc, "@id", id));
        assert!(matches(&doc, "i/@*", id));
        assert!(!matches(&doc, "id", id));
        assert!(!matches(&doc, "node()", id));
    }

    #[test]
    fn test_positional_predicates() {
        let doc = parse_document(b"<r><i/><x/><i/></r>").unwrap();
        let items = find(&doc, "i");
        assert!(matches(&doc, "i[1]", items[0]));
        assert!(!matches(&doc, "i[1]", items[1]));
        assert!(matches(&doc, "i[last()]", items[1]));
    }

    #[test]
    fn test_default_priorities() {
        let resolver = NamespaceBindings::new(vec![("p".into(), "urn:p".into())]);
        let priorities: Vec<f64> = Pattern::compile("a | p:* | * | a/b | a[1] | text() | /", &resolver)
            .unwrap()
            .split()
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(priorities, vec![0.0, -0.25, -0.5, 0.5, 0.5, -0.5, 0.5]);
    }

    #[test]
    fn test_rejects_other_axes() {
        let resolver = NamespaceBindings::default();
        assert!(Pattern::compile("ancestor::a", &resolver).is_err());
        assert!(Pattern::compile("1 + 2", &resolver).is_err());
        assert!(Pattern::compile("$x", &resolver).is_err());
    }
}
