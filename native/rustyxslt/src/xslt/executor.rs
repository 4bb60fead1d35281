//! Transform Executor
//!
//! Applies a compiled stylesheet to a source document and builds the
//! result tree. Variables live on a scope stack; each template invocation
//! opens a frame so callers' locals stay invisible. XPath sees the executor
//! through the [`Environment`] trait.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use log::info;

use crate::dom::{is_ncname, is_qname, ns, split_qname, Document, ExpandedName, NodeId, NodeKind, PrefixResolver, TreeBuilder};
use crate::error::{Result, XsltError};
use crate::marshal::Parameter;
use crate::xpath::functions::round;
use crate::xpath::{self, CompiledExpr, EvalContext, Environment, XPathError, XPathValue};

use super::ast::{
    Avt, AvtPart, Instruction, NumberLevel, NumberSpec, SortKey, Stylesheet, Variable, VariableValue,
};
use super::functions;
use super::limits::MAX_TEMPLATE_DEPTH;
use super::number::{format_number_list, non_numeric};
use super::pattern::Pattern;

/// Run `stylesheet` against `source` and return the result tree. The
/// source is only read; whitespace stripping works on a copy.
pub fn apply(stylesheet: &Stylesheet, source: &Document, params: &[Parameter]) -> Result<Document> {
    let stripped;
    let doc = if stylesheet.strips_space() {
        stripped = source.strip_whitespace(|d, element| {
            stylesheet.should_strip(d, element) && !preserves_space(d, element)
        });
        &stripped
    } else {
        source
    };

    let mut executor = Executor::new(stylesheet, doc);
    executor.init_globals(params)?;
    executor.apply_templates(vec![doc.root()], None, &[])?;
    Ok(executor.out.finish())
}

/// Nearest `xml:space` on the element or its ancestors says "preserve"
pub(super) fn preserves_space(doc: &Document, element: NodeId) -> bool {
    let mut current = Some(element);
    while let Some(n) = current {
        if doc.node(n).is_element() {
            if let Some(space) = doc.attribute_value(n, ns::XML, "space") {
                return space == "preserve";
            }
        }
        current = doc.parent(n);
    }
    false
}

/// Context node, position and size
#[derive(Debug, Clone, Copy)]
pub(super) struct Focus {
    pub node: NodeId,
    pub position: usize,
    pub size: usize,
}

impl Focus {
    fn single(node: NodeId) -> Self {
        Focus {
            node,
            position: 1,
            size: 1,
        }
    }
}

type Bindings = Vec<(ExpandedName, XPathValue)>;

pub struct Executor<'s> {
    pub(super) stylesheet: &'s Stylesheet,
    pub(super) doc: &'s Document,
    globals: HashMap<ExpandedName, XPathValue>,
    locals: Bindings,
    /// Start of the current template's locals
    frame: usize,
    /// XSLT current node, read by current()
    pub(super) current: Cell<NodeId>,
    /// Built on first use of each key name
    pub(super) keys: RefCell<HashMap<ExpandedName, HashMap<String, Vec<NodeId>>>>,
    mode: Option<ExpandedName>,
    depth: usize,
    /// In-scope bindings of source elements copied so far
    namespace_scopes: HashMap<NodeId, Rc<Vec<(String, String)>>>,
    out: TreeBuilder,
}

impl<'s> Executor<'s> {
    fn new(stylesheet: &'s Stylesheet, doc: &'s Document) -> Self {
        Executor {
            stylesheet,
            doc,
            globals: HashMap::new(),
            locals: Vec::new(),
            frame: 0,
            current: Cell::new(doc.root()),
            keys: RefCell::new(HashMap::new()),
            mode: None,
            depth: 0,
            namespace_scopes: HashMap::new(),
            out: TreeBuilder::new(),
        }
    }

    /// Evaluate globals in dependency order; supplied params win
    fn init_globals(&mut self, params: &[Parameter]) -> Result<()> {
        let stylesheet = self.stylesheet;
        let root = Focus::single(self.doc.root());

        for global in &stylesheet.globals {
            let name = &global.variable.name;
            let supplied = if global.is_param {
                params.iter().find(|p| &p.name == name)
            } else {
                None
            };
            let value = match supplied {
                Some(param) => self.evaluate_parameter(param)?,
                None => self.variable_value(&global.variable.value, root)?,
            };
            self.globals.insert(name.clone(), value);
        }
        Ok(())
    }

    /// Parameter values are XPath expressions evaluated at the source root
    fn evaluate_parameter(&self, param: &Parameter) -> Result<XPathValue> {
        let expr = xpath::compile(&param.value, &self.stylesheet.namespaces)
            .map_err(|e| XsltError::apply(format!("parameter {}: {}", param.name, e)))?;
        self.evaluate(&expr, Focus::single(self.doc.root()))
    }

    pub(super) fn context(&self, focus: Focus) -> EvalContext<'_> {
        EvalContext {
            doc: self.doc,
            node: focus.node,
            position: focus.position,
            size: focus.size,
            env: self,
        }
    }

    fn evaluate(&self, expr: &CompiledExpr, focus: Focus) -> Result<XPathValue> {
        self.current.set(focus.node);
        xpath::evaluate(expr, &self.context(focus)).map_err(|e| expression_error(expr, e))
    }

    fn select_nodes(&self, expr: &CompiledExpr, focus: Focus) -> Result<Vec<NodeId>> {
        self.evaluate(expr, focus)?
            .into_nodeset()
            .map_err(|e| expression_error(expr, e))
    }

    fn evaluate_string(&self, expr: &CompiledExpr, focus: Focus) -> Result<String> {
        Ok(self.evaluate(expr, focus)?.to_string_value(self.doc))
    }

    pub(super) fn pattern_matches(&self, pattern: &Pattern, node: NodeId) -> std::result::Result<bool, XPathError> {
        let saved = self.current.replace(node);
        let result = pattern.matches(node, &self.context(Focus::single(node)));
        self.current.set(saved);
        result
    }

    fn avt(&self, avt: &Avt, focus: Focus) -> Result<String> {
        let mut out = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Literal(s) => out.push_str(s),
                AvtPart::Expr(expr) => out.push_str(&self.evaluate_string(expr, focus)?),
            }
        }
        Ok(out)
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_TEMPLATE_DEPTH {
            return Err(XsltError::apply(format!(
                "template recursion exceeded the maximum depth of {}",
                MAX_TEMPLATE_DEPTH
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn find_template(&self, node: NodeId, mode: Option<&ExpandedName>) -> Result<Option<usize>> {
        let Some(rules) = self.stylesheet.rules.get(&mode.cloned()) else {
            return Ok(None);
        };

        let mut best: Option<(f64, usize)> = None;
        for rule in rules {
            if best.is_some_and(|(priority, _)| rule.priority < priority) {
                continue;
            }
            let matched = self
                .pattern_matches(&rule.pattern, node)
                .map_err(|e| XsltError::apply(format!("match pattern: {}", e)))?;
            if matched {
                best = Some((rule.priority, rule.template));
            }
        }
        Ok(best.map(|(_, template)| template))
    }

    fn apply_templates(&mut self, nodes: Vec<NodeId>, mode: Option<&ExpandedName>, params: &[(ExpandedName, XPathValue)]) -> Result<()> {
        let size = nodes.len();
        for (i, &node) in nodes.iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
            };
            let template = self.find_template(node, mode)?;
            self.enter()?;
            let result = match template {
                Some(index) => {
                    let saved_mode = std::mem::replace(&mut self.mode, mode.cloned());
                    let result = self.invoke_template(index, focus, params);
                    self.mode = saved_mode;
                    result
                }
                None => self.builtin_rule(focus, mode),
            };
            self.depth -= 1;
            result?;
        }
        Ok(())
    }

    fn builtin_rule(&mut self, focus: Focus, mode: Option<&ExpandedName>) -> Result<()> {
        let doc = self.doc;
        match doc.kind(focus.node) {
            NodeKind::Document | NodeKind::Element => {
                let children: Vec<NodeId> = doc.children(focus.node).collect();
                self.apply_templates(children, mode, &[])
            }
            NodeKind::Text | NodeKind::Attribute => {
                self.out.text(doc.value(focus.node));
                Ok(())
            }
            NodeKind::Comment | NodeKind::ProcessingInstruction => Ok(()),
        }
    }

    fn invoke_template(&mut self, index: usize, focus: Focus, params: &[(ExpandedName, XPathValue)]) -> Result<()> {
        let stylesheet = self.stylesheet;
        let template = &stylesheet.templates[index];

        let saved_frame = self.frame;
        let base = self.locals.len();
        self.frame = base;

        let result = self
            .bind_params(&template.params, focus, params)
            .and_then(|()| self.execute_body(&template.body, focus));

        self.locals.truncate(base);
        self.frame = saved_frame;
        result
    }

    fn bind_params(&mut self, declared: &[Variable], focus: Focus, supplied: &[(ExpandedName, XPathValue)]) -> Result<()> {
        for param in declared {
            let value = match supplied.iter().find(|(name, _)| name == &param.name) {
                Some((_, value)) => value.clone(),
                None => self.variable_value(&param.value, focus)?,
            };
            self.locals.push((param.name.clone(), value));
        }
        Ok(())
    }

    fn with_params(&mut self, params: &[Variable], focus: Focus) -> Result<Bindings> {
        let mut values = Vec::with_capacity(params.len());
        for param in params {
            values.push((param.name.clone(), self.variable_value(&param.value, focus)?));
        }
        Ok(values)
    }

    fn variable_value(&mut self, value: &VariableValue, focus: Focus) -> Result<XPathValue> {
        match value {
            VariableValue::Select(expr) => self.evaluate(expr, focus),
            VariableValue::Content(body) => Ok(XPathValue::Fragment(Arc::new(self.build_fragment(body, focus)?))),
            VariableValue::Empty => Ok(XPathValue::String(String::new())),
        }
    }

    /// Run `body` into a fresh tree
    fn build_fragment(&mut self, body: &[Instruction], focus: Focus) -> Result<Document> {
        let saved = std::mem::take(&mut self.out);
        let result = self.execute_body(body, focus);
        let fragment = std::mem::replace(&mut self.out, saved).finish();
        result.map(|()| fragment)
    }

    fn content_string(&mut self, body: &[Instruction], focus: Focus) -> Result<String> {
        let fragment = self.build_fragment(body, focus)?;
        Ok(fragment.string_value(fragment.root()))
    }

    fn execute_body(&mut self, body: &[Instruction], focus: Focus) -> Result<()> {
        let mark = self.locals.len();
        let result = body.iter().try_for_each(|instruction| self.execute(instruction, focus));
        self.locals.truncate(mark);
        result
    }

    fn execute(&mut self, instruction: &Instruction, focus: Focus) -> Result<()> {
        let doc = self.doc;
        match instruction {
            Instruction::Text {
                value,
                disable_escaping,
            } => {
                if *disable_escaping {
                    self.out.text_unescaped(value);
                } else {
                    self.out.text(value);
                }
            }
            Instruction::LiteralElement(element) => {
                self.out.start_element(&element.name.uri, &element.prefix, &element.name.local);
                for (prefix, uri) in &element.namespaces {
                    self.out.declare_namespace(prefix, uri);
                }
                for attr in &element.attributes {
                    let value = self.avt(&attr.value, focus)?;
                    self.out.attribute(&attr.name.uri, &attr.prefix, &attr.name.local, &value);
                }
                self.execute_body(&element.body, focus)?;
                self.out.end_element();
            }
            Instruction::ApplyTemplates {
                select,
                mode,
                sort,
                params,
            } => {
                let nodes = match select {
                    Some(expr) => self.select_nodes(expr, focus)?,
                    None => doc.children(focus.node).collect(),
                };
                let nodes = self.sort_nodes(nodes, sort, focus)?;
                let args = self.with_params(params, focus)?;
                self.apply_templates(nodes, mode.as_ref(), &args)?;
            }
            Instruction::CallTemplate { name, params } => {
                let index = *self
                    .stylesheet
                    .named_templates
                    .get(name)
                    .ok_or_else(|| XsltError::apply(format!("no template named {}", name)))?;
                let args = self.with_params(params, focus)?;
                self.enter()?;
                let result = self.invoke_template(index, focus, &args);
                self.depth -= 1;
                result?;
            }
            Instruction::ApplyImports => {
                let mode = self.mode.clone();
                self.builtin_rule(focus, mode.as_ref())?;
            }
            Instruction::ForEach { select, sort, body } => {
                let nodes = self.select_nodes(select, focus)?;
                let nodes = self.sort_nodes(nodes, sort, focus)?;
                let size = nodes.len();
                for (i, &node) in nodes.iter().enumerate() {
                    self.execute_body(
                        body,
                        Focus {
                            node,
                            position: i + 1,
                            size,
                        },
                    )?;
                }
            }
            Instruction::If { test, body } => {
                if self.evaluate(test, focus)?.to_boolean() {
                    self.execute_body(body, focus)?;
                }
            }
            Instruction::Choose { branches, otherwise } => {
                for (test, body) in branches {
                    if self.evaluate(test, focus)?.to_boolean() {
                        return self.execute_body(body, focus);
                    }
                }
                self.execute_body(otherwise, focus)?;
            }
            Instruction::ValueOf {
                select,
                disable_escaping,
            } => {
                let text = self.evaluate_string(select, focus)?;
                if *disable_escaping {
                    self.out.text_unescaped(&text);
                } else {
                    self.out.text(&text);
                }
            }
            Instruction::Element {
                name,
                namespace,
                bindings,
                body,
            } => {
                let qname = self.avt(name, focus)?;
                if !is_qname(&qname) {
                    return Err(XsltError::apply(format!("xsl:element: '{}' is not a valid name", qname)));
                }
                let (prefix, local) = split_qname(&qname);
                let uri = match namespace {
                    Some(ns) => self.avt(ns, focus)?,
                    None => bindings
                        .resolve_prefix(prefix)
                        .or_else(|| prefix.is_empty().then(String::new))
                        .ok_or_else(|| XsltError::apply(format!("xsl:element: undeclared prefix '{}'", prefix)))?,
                };
                let prefix = if uri.is_empty() { "" } else { prefix };
                self.out.start_element(&uri, prefix, local);
                self.execute_body(body, focus)?;
                self.out.end_element();
            }
            Instruction::Attribute {
                name,
                namespace,
                bindings,
                body,
            } => {
                let qname = self.avt(name, focus)?;
                if !is_qname(&qname) || qname == "xmlns" {
                    return Err(XsltError::apply(format!("xsl:attribute: '{}' is not a valid name", qname)));
                }
                let (prefix, local) = split_qname(&qname);
                let uri = match namespace {
                    Some(ns) => self.avt(ns, focus)?,
                    None if prefix.is_empty() => String::new(),
                    None => bindings
                        .resolve_prefix(prefix)
                        .ok_or_else(|| XsltError::apply(format!("xsl:attribute: undeclared prefix '{}'", prefix)))?,
                };
                let prefix = if uri.is_empty() { "" } else { prefix };
                let value = self.content_string(body, focus)?;
                self.out.attribute(&uri, prefix, local, &value);
            }
            Instruction::Comment(body) => {
                let text = self.content_string(body, focus)?;
                self.out.comment(&comment_text(&text));
            }
            Instruction::ProcessingInstruction { name, body } => {
                let target = self.avt(name, focus)?;
                if !is_ncname(&target) || target.eq_ignore_ascii_case("xml") {
                    return Err(XsltError::apply(format!(
                        "xsl:processing-instruction: '{}' is not a valid target",
                        target
                    )));
                }
                let data = self.content_string(body, focus)?.replace("?>", "? >");
                self.out.processing_instruction(&target, data.trim_start());
            }
            Instruction::Copy(body) => self.copy_shallow(body, focus)?,
            Instruction::CopyOf(select) => match self.evaluate(select, focus)? {
                XPathValue::NodeSet(nodes) => {
                    for node in nodes {
                        self.out.copy_node(doc, node);
                    }
                }
                XPathValue::Fragment(fragment) => {
                    for child in fragment.children(fragment.root()) {
                        self.out.copy_node(&fragment, child);
                    }
                }
                other => self.out.text(&other.to_string_value(doc)),
            },
            Instruction::Variable(variable) => {
                let value = self.variable_value(&variable.value, focus)?;
                self.locals.push((variable.name.clone(), value));
            }
            Instruction::Number(spec) => {
                let text = self.number(spec, focus)?;
                self.out.text(&text);
            }
            Instruction::Message { body, terminate } => {
                let text = self.content_string(body, focus)?;
                info!("xsl:message: {}", text);
                if *terminate {
                    return Err(XsltError::apply(format!("xsl:message terminated the transform: {}", text)));
                }
            }
        }
        Ok(())
    }

    fn copy_shallow(&mut self, body: &[Instruction], focus: Focus) -> Result<()> {
        let doc = self.doc;
        let node = focus.node;
        match doc.kind(node) {
            NodeKind::Document => self.execute_body(body, focus)?,
            NodeKind::Element => {
                self.out.start_element(doc.namespace_uri(node), doc.prefix(node), doc.local_name(node));
                let scope = self.source_namespaces(node);
                for (prefix, uri) in scope.iter() {
                    self.out.declare_namespace(prefix, uri);
                }
                self.execute_body(body, focus)?;
                self.out.end_element();
            }
            NodeKind::Attribute => {
                self.out.attribute(doc.namespace_uri(node), doc.prefix(node), doc.local_name(node), doc.value(node));
            }
            NodeKind::Text => self.out.text(doc.value(node)),
            NodeKind::Comment => self.out.comment(doc.value(node)),
            NodeKind::ProcessingInstruction => self.out.processing_instruction(doc.local_name(node), doc.value(node)),
        }
        Ok(())
    }

    /// Bindings in scope at a source element, nearest declaration first.
    /// Each element is resolved once, from its parent's entry.
    fn source_namespaces(&mut self, element: NodeId) -> Rc<Vec<(String, String)>> {
        let doc = self.doc;
        let mut pending = Vec::new();
        let mut inherited = Rc::new(Vec::new());
        let mut current = Some(element);
        while let Some(n) = current {
            if let Some(known) = self.namespace_scopes.get(&n) {
                inherited = Rc::clone(known);
                break;
            }
            if doc.node(n).is_element() {
                pending.push(n);
            }
            current = doc.parent(n);
        }

        for n in pending.into_iter().rev() {
            if doc.namespace_decls(n).next().is_some() {
                let mut scope: Vec<(String, String)> = doc
                    .namespace_decls(n)
                    .filter(|(_, uri)| !uri.is_empty())
                    .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
                    .collect();
                scope.extend(
                    inherited
                        .iter()
                        .filter(|(prefix, _)| !doc.namespace_decls(n).any(|(p, _)| p == prefix))
                        .cloned(),
                );
                inherited = Rc::new(scope);
            }
            self.namespace_scopes.insert(n, Rc::clone(&inherited));
        }
        inherited
    }

    fn sort_nodes(&mut self, nodes: Vec<NodeId>, keys: &[SortKey], focus: Focus) -> Result<Vec<NodeId>> {
        if keys.is_empty() || nodes.len() < 2 {
            return Ok(nodes);
        }

        let mut settings = Vec::with_capacity(keys.len());
        for key in keys {
            let option = |avt: &Option<Avt>| -> Result<Option<String>> {
                avt.as_ref().map(|a| self.avt(a, focus)).transpose()
            };
            settings.push(SortSettings {
                descending: option(&key.order)?.as_deref() == Some("descending"),
                numeric: option(&key.data_type)?.as_deref() == Some("number"),
                lower_first: option(&key.case_order)?.as_deref() == Some("lower-first"),
            });
        }

        let size = nodes.len();
        let mut rows: Vec<(Vec<SortValue>, NodeId)> = Vec::with_capacity(size);
        for (i, &node) in nodes.iter().enumerate() {
            let row_focus = Focus {
                node,
                position: i + 1,
                size,
            };
            let mut values = Vec::with_capacity(keys.len());
            for (key, setting) in keys.iter().zip(&settings) {
                let value = self.evaluate(&key.select, row_focus)?;
                values.push(if setting.numeric {
                    SortValue::Number(value.to_number(self.doc))
                } else {
                    SortValue::Text(value.to_string_value(self.doc))
                });
            }
            rows.push((values, node));
        }

        rows.sort_by(|a, b| {
            for (i, setting) in settings.iter().enumerate() {
                let ordering = compare_sort_values(&a.0[i], &b.0[i], setting.lower_first);
                let ordering = if setting.descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(rows.into_iter().map(|(_, node)| node).collect())
    }

    fn number(&self, spec: &NumberSpec, focus: Focus) -> Result<String> {
        let numbers = match &spec.value {
            Some(expr) => {
                let n = self.evaluate(expr, focus)?.to_number(self.doc);
                let rounded = round(n);
                if !rounded.is_finite() || rounded < 0.0 {
                    return Ok(non_numeric(n));
                }
                vec![rounded as u64]
            }
            None => self.count_nodes(spec, focus.node)?,
        };
        if numbers.is_empty() {
            return Ok(String::new());
        }

        let format = self.avt(&spec.format, focus)?;
        let grouping = match (&spec.grouping_separator, &spec.grouping_size) {
            (Some(separator), Some(size)) => {
                let size = self.avt(size, focus)?.trim().parse::<usize>().unwrap_or(0);
                Some((self.avt(separator, focus)?, size))
            }
            _ => None,
        };
        Ok(format_number_list(
            &numbers,
            &format,
            grouping.as_ref().map(|(sep, size)| (sep.as_str(), *size)),
        ))
    }

    /// Numbers for `xsl:number` without `value`
    fn count_nodes(&self, spec: &NumberSpec, node: NodeId) -> Result<Vec<u64>> {
        let doc = self.doc;
        match spec.level {
            NumberLevel::Single | NumberLevel::Multiple => {
                let mut counted = Vec::new();
                let mut current = Some(node);
                while let Some(n) = current {
                    if self.counts(spec, node, n)? {
                        counted.push(n);
                        if spec.level == NumberLevel::Single {
                            break;
                        }
                    }
                    if self.is_from(spec, n)? {
                        break;
                    }
                    current = doc.parent(n);
                }
                counted.reverse();

                let mut numbers = Vec::with_capacity(counted.len());
                for n in counted {
                    let mut position = 1;
                    let mut sibling = doc.node(n).prev_sibling;
                    while let Some(s) = sibling {
                        if self.counts(spec, node, s)? {
                            position += 1;
                        }
                        sibling = doc.node(s).prev_sibling;
                    }
                    numbers.push(position);
                }
                Ok(numbers)
            }
            NumberLevel::Any => {
                let mut count = 0;
                for n in (1..=node).rev() {
                    if n != node && doc.node(n).is_attribute() {
                        continue;
                    }
                    if self.counts(spec, node, n)? {
                        count += 1;
                    }
                    if n != node && self.is_from(spec, n)? {
                        break;
                    }
                }
                Ok(if count == 0 { Vec::new() } else { vec![count] })
            }
        }
    }

    /// Matches `count`, or by default has the same type and name as `origin`
    fn counts(&self, spec: &NumberSpec, origin: NodeId, node: NodeId) -> Result<bool> {
        let doc = self.doc;
        match &spec.count {
            Some(pattern) => self
                .pattern_matches(pattern, node)
                .map_err(|e| XsltError::apply(format!("xsl:number count: {}", e))),
            None => Ok(doc.kind(node) == doc.kind(origin)
                && doc.local_name(node) == doc.local_name(origin)
                && doc.namespace_uri(node) == doc.namespace_uri(origin)),
        }
    }

    fn is_from(&self, spec: &NumberSpec, node: NodeId) -> Result<bool> {
        match &spec.from {
            Some(pattern) => self
                .pattern_matches(pattern, node)
                .map_err(|e| XsltError::apply(format!("xsl:number from: {}", e))),
            None => Ok(false),
        }
    }
}

impl Environment for Executor<'_> {
    fn variable(&self, name: &ExpandedName) -> Option<XPathValue> {
        self.locals[self.frame..]
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.clone())
            .or_else(|| self.globals.get(name).cloned())
    }

    fn call_function(
        &self,
        name: &ExpandedName,
        args: Vec<XPathValue>,
        ctx: &EvalContext<'_>,
    ) -> std::result::Result<XPathValue, XPathError> {
        functions::call(self, name, args, ctx)
    }
}

struct SortSettings {
    descending: bool,
    numeric: bool,
    lower_first: bool,
}

enum SortValue {
    Text(String),
    Number(f64),
}

/// NaN sorts before every number. Text compares case-insensitively first.
fn compare_sort_values(a: &SortValue, b: &SortValue, lower_first: bool) -> Ordering {
    match (a, b) {
        (SortValue::Number(x), SortValue::Number(y)) => match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        },
        (SortValue::Text(x), SortValue::Text(y)) => {
            let folded = x.to_lowercase().cmp(&y.to_lowercase());
            if folded != Ordering::Equal {
                return folded;
            }
            let ordering = x.cmp(y);
            if lower_first {
                ordering.reverse()
            } else {
                ordering
            }
        }
        _ => Ordering::Equal,
    }
}

fn expression_error(expr: &CompiledExpr, err: XPathError) -> XsltError {
    XsltError::apply(format!("{} (in '{}')", err, expr.source()))
}

/// Comments may not contain "--" or end with "-"
fn comment_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_dash = false;
    for c in text.chars() {
        if c == '-' && prev_dash {
            out.push(' ');
        }
        prev_dash = c == '-';
        out.push(c);
    }
    if out.ends_with('-') {
        out.push(' ');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_text() {
        assert_eq!(comment_text("a--b"), "a- -b");
        assert_eq!(comment_text("end-"), "end- ");
        assert_eq!(comment_text("plain"), "plain");
    }

    #[test]
    fn test_source_namespaces_match_document_scope() {
        let doc = crate::dom::parse_document(
            b"<r xmlns:p='urn:p' xmlns='urn:d'><a xmlns:p='urn:p2'><b xmlns=''/></a><c/></r>",
        )
        .unwrap();
        let sheet = crate::xslt::compile_stylesheet(
            crate::dom::parse_document(br#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"/>"#)
                .unwrap(),
        )
        .unwrap();
        let mut executor = Executor::new(&sheet, &doc);
        let r = doc.document_element().unwrap();
        let a = doc.children(r).next().unwrap();
        let b = doc.children(a).next().unwrap();
        let c = doc.children(r).nth(1).unwrap();
        // Deepest first, then the rest from the cache
        for node in [b, a, r, c] {
            assert_eq!(*executor.source_namespaces(node), doc.in_scope_namespaces(node), "node {}", node);
        }
    }

    #[test]
    fn test_sort_value_ordering() {
        let nan = SortValue::Number(f64::NAN);
        let one = SortValue::Number(1.0);
        assert_eq!(compare_sort_values(&nan, &one, false), Ordering::Less);
        let upper = SortValue::Text("Apple".into());
        let lower = SortValue::Text("apple".into());
        let banana = SortValue::Text("banana".into());
        assert_eq!(compare_sort_values(&upper, &lower, false), Ordering::Less);
        assert_eq!(compare_sort_values(&upper, &lower, true), Ordering::Greater);
        assert_eq!(compare_sort_values(&banana, &upper, false), Ordering::Greater);
    }
}
