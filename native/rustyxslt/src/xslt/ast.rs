//! Compiled Stylesheet
//!
//! The program produced by the stylesheet compiler. Everything the
//! executor needs is resolved up front: names are expanded, XPath is
//! compiled, patterns are split into prioritized rules.

use std::collections::HashMap;

use crate::dom::{Document, ExpandedName, NamespaceBindings, NodeId};
use crate::xpath::CompiledExpr;

use super::pattern::Pattern;

/// A compiled XSLT 1.0 stylesheet. Owns the document it was compiled from.
#[derive(Debug)]
pub struct Stylesheet {
    pub(crate) source: Document,
    pub templates: Vec<Template>,
    /// Match rules by mode, in declaration order
    pub rules: HashMap<Option<ExpandedName>, Vec<Rule>>,
    pub named_templates: HashMap<ExpandedName, usize>,
    /// Top-level variables and params, dependencies first
    pub globals: Vec<GlobalVariable>,
    pub keys: Vec<KeyDefinition>,
    pub space_rules: Vec<SpaceRule>,
    pub output: OutputProperties,
    /// Namespaces in scope on the stylesheet element
    pub namespaces: NamespaceBindings,
}

impl Stylesheet {
    /// Names of top-level `xsl:param` declarations
    pub fn param_names(&self) -> impl Iterator<Item = &ExpandedName> {
        self.globals.iter().filter(|g| g.is_param).map(|g| &g.variable.name)
    }

    pub fn has_param(&self, name: &ExpandedName) -> bool {
        self.param_names().any(|n| n == name)
    }

    /// True when whitespace stripping applies to some elements
    pub fn strips_space(&self) -> bool {
        self.space_rules.iter().any(|r| r.strip)
    }

    /// Decide whether whitespace-only children of `element` are stripped
    pub fn should_strip(&self, doc: &Document, element: NodeId) -> bool {
        let best = self
            .space_rules
            .iter()
            .filter(|r| r.test.matches(doc, element))
            .max_by(|a, b| {
                a.test
                    .priority()
                    .total_cmp(&b.test.priority())
                    .then(a.position.cmp(&b.position))
            });
        best.is_some_and(|r| r.strip)
    }

    /// Approximate heap size
    pub fn memory_usage(&self) -> usize {
        self.source.memory_usage() + self.templates.capacity() * std::mem::size_of::<Template>()
    }
}

#[derive(Debug)]
pub struct Template {
    pub params: Vec<Variable>,
    pub body: Vec<Instruction>,
}

/// One alternative of a match pattern, bound to its template
#[derive(Debug)]
pub struct Rule {
    pub pattern: Pattern,
    pub priority: f64,
    pub template: usize,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: ExpandedName,
    pub value: VariableValue,
}

#[derive(Debug, Clone)]
pub enum VariableValue {
    Select(CompiledExpr),
    /// Content builds a result tree fragment
    Content(Vec<Instruction>),
    /// Neither select nor content: the empty string
    Empty,
}

#[derive(Debug)]
pub struct GlobalVariable {
    pub variable: Variable,
    pub is_param: bool,
}

#[derive(Debug)]
pub struct KeyDefinition {
    pub name: ExpandedName,
    pub pattern: Pattern,
    pub use_expr: CompiledExpr,
}

/// `xsl:strip-space` / `xsl:preserve-space` entry
#[derive(Debug)]
pub struct SpaceRule {
    pub test: NameTest,
    pub strip: bool,
    pub position: usize,
}

/// Element name test used by whitespace rules
#[derive(Debug, Clone, PartialEq)]
pub enum NameTest {
    Any,
    Namespace(String),
    Name(ExpandedName),
}

impl NameTest {
    pub fn matches(&self, doc: &Document, element: NodeId) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Namespace(uri) => doc.namespace_uri(element) == uri,
            NameTest::Name(name) => doc.has_name(element, &name.uri, &name.local),
        }
    }

    pub fn priority(&self) -> f64 {
        match self {
            NameTest::Any => -0.5,
            NameTest::Namespace(_) => -0.25,
            NameTest::Name(_) => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

/// Merged `xsl:output` settings
#[derive(Debug, Clone, Default)]
pub struct OutputProperties {
    pub method: Option<OutputMethod>,
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub omit_xml_declaration: bool,
    pub standalone: Option<bool>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
    pub indent: bool,
    pub cdata_section_elements: Vec<ExpandedName>,
    pub media_type: Option<String>,
}

/// Attribute value template
#[derive(Debug, Clone)]
pub struct Avt {
    pub parts: Vec<AvtPart>,
}

#[derive(Debug, Clone)]
pub enum AvtPart {
    Literal(String),
    Expr(CompiledExpr),
}

impl Avt {
    pub fn literal(s: impl Into<String>) -> Self {
        Avt {
            parts: vec![AvtPart::Literal(s.into())],
        }
    }

    /// The fixed value when no expression is involved
    pub fn as_literal(&self) -> Option<String> {
        self.parts
            .iter()
            .map(|p| match p {
                AvtPart::Literal(s) => Some(s.as_str()),
                AvtPart::Expr(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub select: CompiledExpr,
    pub order: Option<Avt>,
    pub data_type: Option<Avt>,
    pub case_order: Option<Avt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberLevel {
    Single,
    Multiple,
    Any,
}

#[derive(Debug, Clone)]
pub struct NumberSpec {
    pub level: NumberLevel,
    pub count: Option<Pattern>,
    pub from: Option<Pattern>,
    pub value: Option<CompiledExpr>,
    pub format: Avt,
    pub grouping_separator: Option<Avt>,
    pub grouping_size: Option<Avt>,
}

#[derive(Debug, Clone)]
pub struct LiteralAttribute {
    pub name: ExpandedName,
    pub prefix: String,
    pub value: Avt,
}

#[derive(Debug, Clone)]
pub struct LiteralElement {
    pub name: ExpandedName,
    pub prefix: String,
    /// Namespace nodes copied to the result
    pub namespaces: Vec<(String, String)>,
    pub attributes: Vec<LiteralAttribute>,
    pub body: Vec<Instruction>,
}

/// Compiled template body instruction
#[derive(Debug, Clone)]
pub enum Instruction {
    Text {
        value: String,
        disable_escaping: bool,
    },
    LiteralElement(Box<LiteralElement>),
    ApplyTemplates {
        select: Option<CompiledExpr>,
        mode: Option<ExpandedName>,
        sort: Vec<SortKey>,
        params: Vec<Variable>,
    },
    CallTemplate {
        name: ExpandedName,
        params: Vec<Variable>,
    },
    ApplyImports,
    ForEach {
        select: CompiledExpr,
        sort: Vec<SortKey>,
        body: Vec<Instruction>,
    },
    If {
        test: CompiledExpr,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(CompiledExpr, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    ValueOf {
        select: CompiledExpr,
        disable_escaping: bool,
    },
    Element {
        name: Avt,
        namespace: Option<Avt>,
        bindings: NamespaceBindings,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        namespace: Option<Avt>,
        bindings: NamespaceBindings,
        body: Vec<Instruction>,
    },
    Comment(Vec<Instruction>),
    ProcessingInstruction {
        name: Avt,
        body: Vec<Instruction>,
    },
    Copy(Vec<Instruction>),
    CopyOf(CompiledExpr),
    Variable(Variable),
    Number(Box<NumberSpec>),
    Message {
        body: Vec<Instruction>,
        terminate: bool,
    },
}

impl Instruction {
    /// Every variable referenced by this instruction or its content
    pub fn collect_variable_references(&self, out: &mut Vec<ExpandedName>) {
        match self {
            Instruction::Text { .. } | Instruction::ApplyImports => {}
            Instruction::LiteralElement(element) => {
                for attr in &element.attributes {
                    collect_avt(&attr.value, out);
                }
                collect_body(&element.body, out);
            }
            Instruction::ApplyTemplates {
                select, sort, params, ..
            } => {
                if let Some(select) = select {
                    collect_expr(select, out);
                }
                sort.iter().for_each(|k| collect_expr(&k.select, out));
                params.iter().for_each(|p| p.value.collect_variable_references(out));
            }
            Instruction::CallTemplate { params, .. } => {
                params.iter().for_each(|p| p.value.collect_variable_references(out));
            }
            Instruction::ForEach { select, sort, body } => {
                collect_expr(select, out);
                sort.iter().for_each(|k| collect_expr(&k.select, out));
                collect_body(body, out);
            }
            Instruction::If { test, body } => {
                collect_expr(test, out);
                collect_body(body, out);
            }
            Instruction::Choose { branches, otherwise } => {
                for (test, body) in branches {
                    collect_expr(test, out);
                    collect_body(body, out);
                }
                collect_body(otherwise, out);
            }
            Instruction::ValueOf { select, .. } | Instruction::CopyOf(select) => collect_expr(select, out),
            Instruction::Element { name, namespace, body, .. }
            | Instruction::Attribute { name, namespace, body, .. } => {
                collect_avt(name, out);
                if let Some(ns) = namespace {
                    collect_avt(ns, out);
                }
                collect_body(body, out);
            }
            Instruction::ProcessingInstruction { name, body } => {
                collect_avt(name, out);
                collect_body(body, out);
            }
            Instruction::Comment(body) | Instruction::Copy(body) | Instruction::Message { body, .. } => {
                collect_body(body, out)
            }
            Instruction::Variable(variable) => variable.value.collect_variable_references(out),
            Instruction::Number(spec) => {
                if let Some(value) = &spec.value {
                    collect_expr(value, out);
                }
                collect_avt(&spec.format, out);
            }
        }
    }
}

impl VariableValue {
    pub fn collect_variable_references(&self, out: &mut Vec<ExpandedName>) {
        match self {
            VariableValue::Select(expr) => collect_expr(expr, out),
            VariableValue::Content(body) => collect_body(body, out),
            VariableValue::Empty => {}
        }
    }
}

fn collect_expr(expr: &CompiledExpr, out: &mut Vec<ExpandedName>) {
    for name in expr.variable_references() {
        if !out.contains(&name) {
            out.push(name);
        }
    }
}

fn collect_avt(avt: &Avt, out: &mut Vec<ExpandedName>) {
    for part in &avt.parts {
        if let AvtPart::Expr(expr) = part {
            collect_expr(expr, out);
        }
    }
}

fn collect_body(body: &[Instruction], out: &mut Vec<ExpandedName>) {
    for instruction in body {
        instruction.collect_variable_references(out);
    }
}
