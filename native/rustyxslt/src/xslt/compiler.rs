//! Stylesheet Compiler
//!
//! Turns a parsed stylesheet document into a [`Stylesheet`]. All static
//! checks happen here; anything that fails is a compile failure.
//!
//! Accepted roots:
//! - `xsl:stylesheet` / `xsl:transform` with a `version` attribute
//! - a literal result element carrying `xsl:version` (simplified syntax)

use std::collections::HashMap;

use log::{debug, warn};

use crate::dom::{ns, split_qname, Document, ExpandedName, NamespaceBindings, NodeId, NodeKind, PrefixResolver};
use crate::error::{Result, XsltError};
use crate::xpath::value::string_to_number;
use crate::xpath::{self, CompiledExpr};

use super::ast::{
    Avt, AvtPart, GlobalVariable, Instruction, KeyDefinition, LiteralAttribute, LiteralElement, NameTest,
    NumberLevel, NumberSpec, OutputMethod, OutputProperties, Rule, SortKey, SpaceRule, Stylesheet, Template,
    Variable, VariableValue,
};
use super::executor::preserves_space;
use super::pattern::Pattern;

/// XSLT instructions this engine implements
pub const INSTRUCTIONS: &[&str] = &[
    "apply-imports",
    "apply-templates",
    "attribute",
    "call-template",
    "choose",
    "comment",
    "copy",
    "copy-of",
    "element",
    "fallback",
    "for-each",
    "if",
    "message",
    "number",
    "processing-instruction",
    "text",
    "value-of",
    "variable",
];

/// Compile `doc` into a stylesheet that takes ownership of it
pub fn compile_stylesheet(doc: Document) -> Result<Stylesheet> {
    let root = doc
        .document_element()
        .ok_or_else(|| XsltError::compile("stylesheet has no root element"))?;

    let mut compiler = StylesheetCompiler::new(&doc);
    if compiler.is_xsl(root, "stylesheet") || compiler.is_xsl(root, "transform") {
        let version = compiler.required(root, "version")?;
        compiler.forwards_compatible = version.trim() != "1.0";
        compiler.top_level(root)?;
    } else if doc.attribute_value(root, ns::XSLT, "version").is_some() {
        compiler.simplified(root)?;
    } else {
        return Err(XsltError::compile(format!(
            "root element <{}> is not xsl:stylesheet or xsl:transform",
            doc.qualified_name(root)
        )));
    }

    let namespaces = NamespaceBindings::new(doc.in_scope_namespaces(root));
    let StylesheetCompiler {
        templates,
        rules,
        named_templates,
        globals,
        keys,
        space_rules,
        output,
        ..
    } = compiler;
    let globals = order_globals(globals)?;

    debug!(
        "compiled stylesheet: {} templates, {} globals, {} keys",
        templates.len(),
        globals.len(),
        keys.len()
    );

    Ok(Stylesheet {
        source: doc,
        templates,
        rules,
        named_templates,
        globals,
        keys,
        space_rules,
        output,
        namespaces,
    })
}

struct StylesheetCompiler<'d> {
    doc: &'d Document,
    /// Version other than 1.0: unknown XSLT elements are tolerated
    forwards_compatible: bool,
    templates: Vec<Template>,
    rules: HashMap<Option<ExpandedName>, Vec<Rule>>,
    named_templates: HashMap<ExpandedName, usize>,
    globals: Vec<GlobalVariable>,
    keys: Vec<KeyDefinition>,
    space_rules: Vec<SpaceRule>,
    output: OutputProperties,
}

impl<'d> StylesheetCompiler<'d> {
    fn new(doc: &'d Document) -> Self {
        StylesheetCompiler {
            doc,
            forwards_compatible: false,
            templates: Vec::new(),
            rules: HashMap::new(),
            named_templates: HashMap::new(),
            globals: Vec::new(),
            keys: Vec::new(),
            space_rules: Vec::new(),
            output: OutputProperties::default(),
        }
    }

    fn is_xsl(&self, node: NodeId, local: &str) -> bool {
        self.doc.node(node).is_element() && self.doc.has_name(node, ns::XSLT, local)
    }

    fn attr(&self, node: NodeId, local: &str) -> Option<&'d str> {
        self.doc.attribute_value(node, "", local)
    }

    fn required(&self, node: NodeId, local: &str) -> Result<&'d str> {
        self.attr(node, local).ok_or_else(|| {
            XsltError::compile(format!(
                "{} requires a '{}' attribute",
                self.doc.qualified_name(node),
                local
            ))
        })
    }

    fn yes_no(&self, node: NodeId, local: &str) -> Result<Option<bool>> {
        match self.attr(node, local).map(str::trim) {
            None => Ok(None),
            Some("yes") => Ok(Some(true)),
            Some("no") => Ok(Some(false)),
            Some(other) => Err(XsltError::compile(format!(
                "{}: '{}' must be yes or no, got '{}'",
                self.doc.qualified_name(node),
                local,
                other
            ))),
        }
    }

    fn bindings(&self, node: NodeId) -> NamespaceBindings {
        NamespaceBindings::new(self.doc.in_scope_namespaces(node))
    }

    fn xpath(&self, node: NodeId, source: &str) -> Result<CompiledExpr> {
        xpath::compile(source, &self.bindings(node)).map_err(|e| XsltError::compile(e.to_string()))
    }

    fn pattern(&self, node: NodeId, source: &str) -> Result<Pattern> {
        Pattern::compile(source, &self.bindings(node))
            .map_err(|e| XsltError::compile(format!("match pattern: {}", e)))
    }

    fn avt(&self, node: NodeId, source: &str) -> Result<Avt> {
        parse_avt(source, &self.bindings(node))
    }

    fn optional_avt(&self, node: NodeId, local: &str) -> Result<Option<Avt>> {
        self.attr(node, local).map(|s| self.avt(node, s)).transpose()
    }

    /// QName attribute values; unprefixed names are in no namespace
    fn qname(&self, node: NodeId, qname: &str) -> Result<ExpandedName> {
        let qname = qname.trim();
        let (prefix, local) = split_qname(qname);
        if local.is_empty() {
            return Err(XsltError::compile(format!("'{}' is not a valid QName", qname)));
        }
        if prefix.is_empty() {
            return Ok(ExpandedName::local(local));
        }
        let uri = self
            .doc
            .lookup_namespace(node, prefix)
            .ok_or_else(|| XsltError::compile(format!("undeclared namespace prefix '{}' in '{}'", prefix, qname)))?;
        Ok(ExpandedName::new(uri, local))
    }

    fn optional_qname(&self, node: NodeId, local: &str) -> Result<Option<ExpandedName>> {
        self.attr(node, local).map(|q| self.qname(node, q)).transpose()
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    fn top_level(&mut self, root: NodeId) -> Result<()> {
        let doc = self.doc;
        for child in doc.children(root) {
            match doc.kind(child) {
                NodeKind::Element => {}
                NodeKind::Text if doc.is_whitespace_text(child) => continue,
                NodeKind::Text => {
                    return Err(XsltError::compile("text is not allowed at the top level of a stylesheet"));
                }
                _ => continue,
            }

            let uri = doc.namespace_uri(child);
            if uri.is_empty() {
                return Err(XsltError::compile(format!(
                    "top-level element <{}> must be in a namespace",
                    doc.local_name(child)
                )));
            }
            if uri != ns::XSLT {
                continue;
            }

            match doc.local_name(child) {
                "template" => self.template(child)?,
                "variable" => self.global(child, false)?,
                "param" => self.global(child, true)?,
                "output" => self.output(child)?,
                "key" => self.key(child)?,
                "strip-space" => self.space(child, true)?,
                "preserve-space" => self.space(child, false)?,
                "decimal-format" | "namespace-alias" | "attribute-set" => {
                    warn!("xsl:{} is not supported and was ignored", doc.local_name(child));
                }
                "import" | "include" => {
                    return Err(XsltError::compile(format!(
                        "xsl:{} is not supported: stylesheets must be self-contained",
                        doc.local_name(child)
                    )));
                }
                other if self.forwards_compatible => {
                    debug!("ignoring unknown top-level element xsl:{}", other);
                }
                other => {
                    return Err(XsltError::compile(format!("unknown top-level element xsl:{}", other)));
                }
            }
        }
        Ok(())
    }

    /// Literal result element as the whole stylesheet: one template for "/"
    fn simplified(&mut self, root: NodeId) -> Result<()> {
        let mut body = Vec::new();
        self.instruction(root, &mut body)?;
        let pattern = self.pattern(root, "/")?;
        let index = self.templates.len();
        for (alternative, priority) in pattern.split() {
            self.rules.entry(None).or_default().push(Rule {
                pattern: alternative,
                priority,
                template: index,
            });
        }
        self.templates.push(Template {
            params: Vec::new(),
            body,
        });
        Ok(())
    }

    fn template(&mut self, node: NodeId) -> Result<()> {
        let match_source = self.attr(node, "match");
        let name = self.optional_qname(node, "name")?;
        if match_source.is_none() && name.is_none() {
            return Err(XsltError::compile("xsl:template requires a 'match' or 'name' attribute"));
        }
        let mode = self.optional_qname(node, "mode")?;
        let priority = match self.attr(node, "priority") {
            Some(p) => {
                let value = string_to_number(p);
                if value.is_nan() {
                    return Err(XsltError::compile(format!("xsl:template: invalid priority '{}'", p)));
                }
                Some(value)
            }
            None => None,
        };

        let mut params = Vec::new();
        let mut body = Vec::new();
        for child in self.doc.children(node) {
            if self.is_xsl(child, "param") {
                params.push(self.variable(child)?);
            } else {
                self.content(node, child, &mut body)?;
            }
        }

        let index = self.templates.len();
        if let Some(name) = &name {
            if self.named_templates.insert(name.clone(), index).is_some() {
                return Err(XsltError::compile(format!("duplicate template named {}", name)));
            }
        }
        if let Some(source) = match_source {
            let pattern = self.pattern(node, source)?;
            let rules = self.rules.entry(mode).or_default();
            for (alternative, default_priority) in pattern.split() {
                rules.push(Rule {
                    pattern: alternative,
                    priority: priority.unwrap_or(default_priority),
                    template: index,
                });
            }
        }
        self.templates.push(Template { params, body });
        Ok(())
    }

    fn global(&mut self, node: NodeId, is_param: bool) -> Result<()> {
        let variable = self.variable(node)?;
        if self.globals.iter().any(|g| g.variable.name == variable.name) {
            return Err(XsltError::compile(format!(
                "duplicate global variable or parameter {}",
                variable.name
            )));
        }
        self.globals.push(GlobalVariable { variable, is_param });
        Ok(())
    }

    fn output(&mut self, node: NodeId) -> Result<()> {
        if let Some(method) = self.attr(node, "method") {
            self.output.method = match method.trim() {
                "xml" => Some(OutputMethod::Xml),
                "html" => Some(OutputMethod::Html),
                "text" => Some(OutputMethod::Text),
                other => {
                    warn!("xsl:output method '{}' is not supported, using the default", other);
                    self.output.method
                }
            };
        }
        let text = |local: &str| self.attr(node, local).map(str::to_string);
        let version = text("version");
        let encoding = text("encoding");
        let doctype_public = text("doctype-public");
        let doctype_system = text("doctype-system");
        let media_type = text("media-type");

        let output = &mut self.output;
        output.version = version.or(output.version.take());
        output.encoding = encoding.or(output.encoding.take());
        output.doctype_public = doctype_public.or(output.doctype_public.take());
        output.doctype_system = doctype_system.or(output.doctype_system.take());
        output.media_type = media_type.or(output.media_type.take());

        if let Some(omit) = self.yes_no(node, "omit-xml-declaration")? {
            self.output.omit_xml_declaration = omit;
        }
        if let Some(standalone) = self.yes_no(node, "standalone")? {
            self.output.standalone = Some(standalone);
        }
        if let Some(indent) = self.yes_no(node, "indent")? {
            self.output.indent = indent;
        }
        if let Some(names) = self.attr(node, "cdata-section-elements") {
            for qname in names.split_whitespace() {
                let (prefix, local) = split_qname(qname);
                let uri = self
                    .doc
                    .lookup_namespace(node, prefix)
                    .map(str::to_string)
                    .or_else(|| prefix.is_empty().then(String::new))
                    .ok_or_else(|| XsltError::compile(format!("undeclared namespace prefix '{}'", prefix)))?;
                self.output.cdata_section_elements.push(ExpandedName::new(uri, local));
            }
        }
        Ok(())
    }

    fn key(&mut self, node: NodeId) -> Result<()> {
        let name = self.qname(node, self.required(node, "name")?)?;
        let pattern = self.pattern(node, self.required(node, "match")?)?;
        let use_expr = self.xpath(node, self.required(node, "use")?)?;
        self.keys.push(KeyDefinition {
            name,
            pattern,
            use_expr,
        });
        Ok(())
    }

    fn space(&mut self, node: NodeId, strip: bool) -> Result<()> {
        let elements = self.required(node, "elements")?;
        for token in elements.split_whitespace() {
            let test = match token {
                "*" => NameTest::Any,
                _ => match token.strip_suffix(":*") {
                    Some(prefix) => NameTest::Namespace(
                        self.doc
                            .lookup_namespace(node, prefix)
                            .ok_or_else(|| {
                                XsltError::compile(format!("undeclared namespace prefix '{}'", prefix))
                            })?
                            .to_string(),
                    ),
                    None => NameTest::Name(self.qname(node, token)?),
                },
            };
            let position = self.space_rules.len();
            self.space_rules.push(SpaceRule { test, strip, position });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Template content
    // ------------------------------------------------------------------

    fn body(&self, parent: NodeId) -> Result<Vec<Instruction>> {
        let mut out = Vec::new();
        for child in self.doc.children(parent) {
            self.content(parent, child, &mut out)?;
        }
        Ok(out)
    }

    /// Compile one child of a content-bearing element
    fn content(&self, parent: NodeId, child: NodeId, out: &mut Vec<Instruction>) -> Result<()> {
        let doc = self.doc;
        match doc.kind(child) {
            NodeKind::Text => {
                if !doc.is_whitespace_text(child) || preserves_space(doc, parent) {
                    out.push(Instruction::Text {
                        value: doc.value(child).to_string(),
                        disable_escaping: false,
                    });
                }
                Ok(())
            }
            NodeKind::Element => self.instruction(child, out),
            _ => Ok(()),
        }
    }

    fn instruction(&self, node: NodeId, out: &mut Vec<Instruction>) -> Result<()> {
        let doc = self.doc;
        if doc.namespace_uri(node) != ns::XSLT {
            if self.extension_namespaces(node).iter().any(|u| u == doc.namespace_uri(node)) {
                return self.fallback(node, out);
            }
            out.push(Instruction::LiteralElement(Box::new(self.literal_element(node)?)));
            return Ok(());
        }

        let instruction = match doc.local_name(node) {
            "apply-templates" => {
                let select = self.attr(node, "select").map(|s| self.xpath(node, s)).transpose()?;
                let mode = self.optional_qname(node, "mode")?;
                let (sort, params) = self.sorts_and_params(node, true)?;
                Instruction::ApplyTemplates {
                    select,
                    mode,
                    sort,
                    params,
                }
            }
            "call-template" => {
                let name = self.qname(node, self.required(node, "name")?)?;
                let (_, params) = self.sorts_and_params(node, false)?;
                Instruction::CallTemplate { name, params }
            }
            "apply-imports" => Instruction::ApplyImports,
            "for-each" => {
                let select = self.xpath(node, self.required(node, "select")?)?;
                let mut sort = Vec::new();
                let mut body = Vec::new();
                for child in doc.children(node) {
                    if self.is_xsl(child, "sort") {
                        sort.push(self.sort_key(child)?);
                    } else {
                        self.content(node, child, &mut body)?;
                    }
                }
                Instruction::ForEach { select, sort, body }
            }
            "if" => Instruction::If {
                test: self.xpath(node, self.required(node, "test")?)?,
                body: self.body(node)?,
            },
            "choose" => self.choose(node)?,
            "value-of" => Instruction::ValueOf {
                select: self.xpath(node, self.required(node, "select")?)?,
                disable_escaping: self.yes_no(node, "disable-output-escaping")?.unwrap_or(false),
            },
            "text" => {
                if doc.children(node).any(|c| doc.node(c).is_element()) {
                    return Err(XsltError::compile("xsl:text may only contain text"));
                }
                Instruction::Text {
                    value: doc.string_value(node),
                    disable_escaping: self.yes_no(node, "disable-output-escaping")?.unwrap_or(false),
                }
            }
            "element" => {
                if self.attr(node, "use-attribute-sets").is_some() {
                    warn!("xsl:element: use-attribute-sets is not supported and was ignored");
                }
                Instruction::Element {
                    name: self.avt(node, self.required(node, "name")?)?,
                    namespace: self.optional_avt(node, "namespace")?,
                    bindings: self.bindings(node),
                    body: self.body(node)?,
                }
            }
            "attribute" => Instruction::Attribute {
                name: self.avt(node, self.required(node, "name")?)?,
                namespace: self.optional_avt(node, "namespace")?,
                bindings: self.bindings(node),
                body: self.body(node)?,
            },
            "comment" => Instruction::Comment(self.body(node)?),
            "processing-instruction" => Instruction::ProcessingInstruction {
                name: self.avt(node, self.required(node, "name")?)?,
                body: self.body(node)?,
            },
            "copy" => {
                if self.attr(node, "use-attribute-sets").is_some() {
                    warn!("xsl:copy: use-attribute-sets is not supported and was ignored");
                }
                Instruction::Copy(self.body(node)?)
            }
            "copy-of" => Instruction::CopyOf(self.xpath(node, self.required(node, "select")?)?),
            "variable" => Instruction::Variable(self.variable(node)?),
            "number" => Instruction::Number(Box::new(self.number(node)?)),
            "message" => Instruction::Message {
                body: self.body(node)?,
                terminate: self.yes_no(node, "terminate")?.unwrap_or(false),
            },
            "fallback" => return Ok(()),
            "param" => {
                return Err(XsltError::compile(
                    "xsl:param is only allowed at the top level or at the start of a template",
                ));
            }
            other if self.forwards_compatible => {
                debug!("xsl:{} is unknown, using its fallback", other);
                return self.fallback(node, out);
            }
            other => return Err(XsltError::compile(format!("unknown instruction xsl:{}", other))),
        };
        out.push(instruction);
        Ok(())
    }

    /// Contents of the `xsl:fallback` children of `node`
    fn fallback(&self, node: NodeId, out: &mut Vec<Instruction>) -> Result<()> {
        for child in self.doc.children(node) {
            if self.is_xsl(child, "fallback") {
                out.extend(self.body(child)?);
            }
        }
        Ok(())
    }

    fn choose(&self, node: NodeId) -> Result<Instruction> {
        let doc = self.doc;
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        for child in doc.children(node) {
            if self.is_xsl(child, "when") {
                let test = self.xpath(child, self.required(child, "test")?)?;
                branches.push((test, self.body(child)?));
            } else if self.is_xsl(child, "otherwise") {
                otherwise = self.body(child)?;
            } else if doc.node(child).is_element() || (doc.node(child).is_text() && !doc.is_whitespace_text(child)) {
                return Err(XsltError::compile("xsl:choose may only contain xsl:when and xsl:otherwise"));
            }
        }
        if branches.is_empty() {
            return Err(XsltError::compile("xsl:choose requires at least one xsl:when"));
        }
        Ok(Instruction::Choose { branches, otherwise })
    }

    /// `xsl:sort` and `xsl:with-param` children
    fn sorts_and_params(&self, node: NodeId, allow_sort: bool) -> Result<(Vec<SortKey>, Vec<Variable>)> {
        let doc = self.doc;
        let mut sort = Vec::new();
        let mut params = Vec::new();
        for child in doc.children(node) {
            if allow_sort && self.is_xsl(child, "sort") {
                sort.push(self.sort_key(child)?);
            } else if self.is_xsl(child, "with-param") {
                params.push(self.variable(child)?);
            } else if doc.node(child).is_element() || (doc.node(child).is_text() && !doc.is_whitespace_text(child)) {
                return Err(XsltError::compile(format!(
                    "unexpected content in {}",
                    doc.qualified_name(node)
                )));
            }
        }
        Ok((sort, params))
    }

    fn sort_key(&self, node: NodeId) -> Result<SortKey> {
        Ok(SortKey {
            select: self.xpath(node, self.attr(node, "select").unwrap_or("."))?,
            order: self.optional_avt(node, "order")?,
            data_type: self.optional_avt(node, "data-type")?,
            case_order: self.optional_avt(node, "case-order")?,
        })
    }

    /// `xsl:variable`, `xsl:param` and `xsl:with-param`
    fn variable(&self, node: NodeId) -> Result<Variable> {
        let name = self.qname(node, self.required(node, "name")?)?;
        let value = match self.attr(node, "select") {
            Some(select) => {
                if self.doc.has_children(node) {
                    warn!("{}: content ignored because 'select' is present", name);
                }
                VariableValue::Select(self.xpath(node, select)?)
            }
            None => {
                let body = self.body(node)?;
                if body.is_empty() {
                    VariableValue::Empty
                } else {
                    VariableValue::Content(body)
                }
            }
        };
        Ok(Variable { name, value })
    }

    fn number(&self, node: NodeId) -> Result<NumberSpec> {
        let level = match self.attr(node, "level").map(str::trim) {
            None | Some("single") => NumberLevel::Single,
            Some("multiple") => NumberLevel::Multiple,
            Some("any") => NumberLevel::Any,
            Some(other) => {
                return Err(XsltError::compile(format!("xsl:number: unknown level '{}'", other)));
            }
        };
        Ok(NumberSpec {
            level,
            count: self.attr(node, "count").map(|p| self.pattern(node, p)).transpose()?,
            from: self.attr(node, "from").map(|p| self.pattern(node, p)).transpose()?,
            value: self.attr(node, "value").map(|v| self.xpath(node, v)).transpose()?,
            format: match self.attr(node, "format") {
                Some(format) => self.avt(node, format)?,
                None => Avt::literal("1"),
            },
            grouping_separator: self.optional_avt(node, "grouping-separator")?,
            grouping_size: self.optional_avt(node, "grouping-size")?,
        })
    }

    fn literal_element(&self, node: NodeId) -> Result<LiteralElement> {
        let doc = self.doc;
        let excluded = self.excluded_namespaces(node);
        let namespaces = doc
            .in_scope_namespaces(node)
            .into_iter()
            .filter(|(_, uri)| uri != ns::XSLT && !excluded.contains(uri))
            .collect();

        let mut attributes = Vec::new();
        for attr in doc.attributes(node) {
            if doc.namespace_uri(attr) == ns::XSLT {
                if doc.local_name(attr) == "use-attribute-sets" {
                    warn!("xsl:use-attribute-sets is not supported and was ignored");
                }
                continue;
            }
            attributes.push(LiteralAttribute {
                name: ExpandedName::new(doc.namespace_uri(attr), doc.local_name(attr)),
                prefix: doc.prefix(attr).to_string(),
                value: self.avt(node, doc.value(attr))?,
            });
        }

        Ok(LiteralElement {
            name: ExpandedName::new(doc.namespace_uri(node), doc.local_name(node)),
            prefix: doc.prefix(node).to_string(),
            namespaces,
            attributes,
            body: self.body(node)?,
        })
    }

    /// URIs named by `exclude-result-prefixes` and `extension-element-prefixes`
    /// on `node` and its ancestors
    fn excluded_namespaces(&self, node: NodeId) -> Vec<String> {
        let mut uris = self.prefix_list(node, "exclude-result-prefixes");
        uris.extend(self.extension_namespaces(node));
        uris
    }

    fn extension_namespaces(&self, node: NodeId) -> Vec<String> {
        self.prefix_list(node, "extension-element-prefixes")
    }

    /// Resolve a prefix-list attribute. XSLT elements carry it unqualified,
    /// literal result elements as `xsl:` attributes.
    fn prefix_list(&self, node: NodeId, local: &str) -> Vec<String> {
        let doc = self.doc;
        let mut uris = Vec::new();
        let mut current = Some(node);
        while let Some(n) = current {
            if doc.node(n).is_element() {
                let list = if doc.namespace_uri(n) == ns::XSLT {
                    doc.attribute_value(n, "", local)
                } else {
                    doc.attribute_value(n, ns::XSLT, local)
                };
                for prefix in list.into_iter().flat_map(str::split_whitespace) {
                    let prefix = if prefix == "#default" { "" } else { prefix };
                    match doc.lookup_namespace(n, prefix) {
                        Some(uri) => uris.push(uri.to_string()),
                        None => warn!("{}: prefix '{}' is not declared", local, prefix),
                    }
                }
            }
            current = doc.parent(n);
        }
        uris
    }
}

/// Parse an attribute value template. `{{` and `}}` are literal braces;
/// braces inside quoted strings in an expression do not close it.
pub fn parse_avt(source: &str, resolver: &dyn PrefixResolver) -> Result<Avt> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '{' => {
                let mut quote = None;
                let mut end = None;
                for (j, c) in chars.by_ref() {
                    match quote {
                        Some(q) if c == q => quote = None,
                        Some(_) => {}
                        None => match c {
                            '\'' | '"' => quote = Some(c),
                            '}' => {
                                end = Some(j);
                                break;
                            }
                            _ => {}
                        },
                    }
                }
                let end = end.ok_or_else(|| {
                    XsltError::compile(format!("unterminated '{{' in attribute value template \"{}\"", source))
                })?;
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                let expr = xpath::compile(&source[i + 1..end], resolver).map_err(|e| XsltError::compile(e.to_string()))?;
                parts.push(AvtPart::Expr(expr));
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '}' => {
                return Err(XsltError::compile(format!(
                    "unmatched '}}' in attribute value template \"{}\"",
                    source
                )));
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() || parts.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(Avt { parts })
}

/// Order globals so each is evaluated after the globals it references
fn order_globals(globals: Vec<GlobalVariable>) -> Result<Vec<GlobalVariable>> {
    let index: HashMap<ExpandedName, usize> = globals
        .iter()
        .enumerate()
        .map(|(i, g)| (g.variable.name.clone(), i))
        .collect();
    let dependencies: Vec<Vec<usize>> = globals
        .iter()
        .map(|g| {
            let mut names = Vec::new();
            g.variable.value.collect_variable_references(&mut names);
            names.iter().filter_map(|n| index.get(n).copied()).collect()
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }

    let cycle = |i: usize| {
        XsltError::compile(format!(
            "circular reference in global variable {}",
            globals[i].variable.name
        ))
    };

    let mut marks = vec![Mark::New; globals.len()];
    let mut order = Vec::with_capacity(globals.len());
    // Depth-first, with (variable, next dependency) pairs on an explicit stack
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for start in 0..globals.len() {
        if marks[start] != Mark::New {
            continue;
        }
        marks[start] = Mark::Visiting;
        stack.push((start, 0));
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            match dependencies[node].get(next) {
                Some(&dep) => {
                    top.1 += 1;
                    match marks[dep] {
                        Mark::New => {
                            marks[dep] = Mark::Visiting;
                            stack.push((dep, 0));
                        }
                        Mark::Visiting => return Err(cycle(dep)),
                        Mark::Done => {}
                    }
                }
                None => {
                    marks[node] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }

    let mut slots: Vec<Option<GlobalVariable>> = globals.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;

    fn compile(xml: &str) -> Result<Stylesheet> {
        compile_stylesheet(parse_document(xml.as_bytes()).unwrap())
    }

    fn stylesheet(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
            body
        )
    }

    #[test]
    fn test_minimal_stylesheet() {
        let sheet = compile(&stylesheet(r#"<xsl:template match="/"><out/></xsl:template>"#)).unwrap();
        assert_eq!(sheet.templates.len(), 1);
        assert_eq!(sheet.rules[&None].len(), 1);
        assert!(matches!(sheet.templates[0].body[0], Instruction::LiteralElement(_)));
    }

    #[test]
    fn test_root_must_be_stylesheet() {
        let err = compile("<doc/>").unwrap_err();
        assert_eq!(err.kind(), "compile_failure");
        let err = compile(r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform"/>"#).unwrap_err();
        assert!(err.message().contains("version"));
    }

    #[test]
    fn test_simplified_stylesheet() {
        let sheet = compile(
            r#"<html xsl:version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:value-of select="/a"/></html>"#,
        )
        .unwrap();
        assert_eq!(sheet.templates.len(), 1);
        let Instruction::LiteralElement(element) = &sheet.templates[0].body[0] else {
            panic!("expected a literal result element");
        };
        assert!(element.attributes.is_empty());
        assert!(element.namespaces.is_empty());
    }

    #[test]
    fn test_static_errors() {
        let cases = [
            r#"<xsl:template match="a["><x/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:value-of/></xsl:template>"#,
            r#"<xsl:template name="t"/><xsl:template name="t"/>"#,
            r#"<xsl:template match="/"><xsl:frobnicate/></xsl:template>"#,
            r#"<xsl:include href="other.xsl"/>"#,
            r#"<xsl:variable name="a" select="$b"/><xsl:variable name="b" select="$a"/>"#,
            r#"<xsl:template/>"#,
            r#"<plain/>"#,
        ];
        for body in cases {
            let err = compile(&stylesheet(body)).unwrap_err();
            assert_eq!(err.kind(), "compile_failure", "{}", body);
        }
    }

    #[test]
    fn test_ignored_declarations() {
        let sheet = compile(&stylesheet(
            r#"<xsl:decimal-format name="d"/><xsl:attribute-set name="s"/><my:data xmlns:my="urn:my"/>"#,
        ))
        .unwrap();
        assert!(sheet.templates.is_empty());
    }

    #[test]
    fn test_globals_in_dependency_order() {
        let sheet = compile(&stylesheet(
            r#"<xsl:variable name="c" select="$b + 1"/><xsl:param name="b" select="$a * 2"/><xsl:variable name="a" select="1"/>"#,
        ))
        .unwrap();
        let order: Vec<&str> = sheet.globals.iter().map(|g| g.variable.name.local.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(sheet.has_param(&ExpandedName::local("b")));
        assert!(!sheet.has_param(&ExpandedName::local("a")));
    }

    #[test]
    fn test_long_global_chain() {
        let mut body = String::from(r#"<xsl:variable name="v0" select="0"/>"#);
        for i in (1..5000).rev() {
            body.push_str(&format!(r#"<xsl:variable name="v{}" select="$v{} + 1"/>"#, i, i - 1));
        }
        let sheet = compile(&stylesheet(&body)).unwrap();
        assert_eq!(sheet.globals.len(), 5000);
        assert_eq!(sheet.globals[0].variable.name.local, "v0");
        assert_eq!(sheet.globals[4999].variable.name.local, "v4999");
    }

    #[test]
    fn test_self_reference_is_circular() {
        let err = compile(&stylesheet(r#"<xsl:variable name="a" select="$a"/>"#)).unwrap_err();
        assert!(err.message().contains("circular"));
    }

    #[test]
    fn test_deep_expression_is_compile_failure() {
        let select = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let body = format!(r#"<xsl:template match="/"><xsl:value-of select="{}"/></xsl:template>"#, select);
        let err = compile(&stylesheet(&body)).unwrap_err();
        assert_eq!(err.kind(), "compile_failure");
    }

    #[test]
    fn test_output_settings() {
        let sheet = compile(&stylesheet(
            r#"<xsl:output method="text" encoding="US-ASCII"/><xsl:output indent="yes" cdata-section-elements="code"/>"#,
        ))
        .unwrap();
        assert_eq!(sheet.output.method, Some(OutputMethod::Text));
        assert_eq!(sheet.output.encoding.as_deref(), Some("US-ASCII"));
        assert!(sheet.output.indent);
        assert_eq!(sheet.output.cdata_section_elements, vec![ExpandedName::local("code")]);
    }

    #[test]
    fn test_whitespace_in_templates() {
        let sheet = compile(&stylesheet(
            "<xsl:template match=\"/\">\n  <a> </a>\n  <xsl:text> </xsl:text>\n</xsl:template>",
        ))
        .unwrap();
        let body = &sheet.templates[0].body;
        assert_eq!(body.len(), 2);
        let Instruction::LiteralElement(a) = &body[0] else {
            panic!("expected <a>");
        };
        assert!(a.body.is_empty());
        assert!(matches!(&body[1], Instruction::Text { value, .. } if value == " "));
    }

    #[test]
    fn test_exclude_result_prefixes() {
        let sheet = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:a="urn:a" xmlns:b="urn:b" exclude-result-prefixes="a"><xsl:template match="/"><out/></xsl:template></xsl:stylesheet>"#,
        )
        .unwrap();
        let Instruction::LiteralElement(out) = &sheet.templates[0].body[0] else {
            panic!("expected <out>");
        };
        assert_eq!(out.namespaces, vec![("b".to_string(), "urn:b".to_string())]);
    }

    #[test]
    fn test_parse_avt() {
        let resolver = NamespaceBindings::default();
        let avt = parse_avt("a{1 + 1}b{{c}}", &resolver).unwrap();
        assert_eq!(avt.parts.len(), 3);
        assert!(matches!(&avt.parts[2], AvtPart::Literal(s) if s == "b{c}"));
        let avt = parse_avt("{'}'}", &resolver).unwrap();
        assert_eq!(avt.parts.len(), 1);
        assert_eq!(parse_avt("plain", &resolver).unwrap().as_literal().as_deref(), Some("plain"));
        assert!(parse_avt("{1", &resolver).is_err());
        assert!(parse_avt("x}", &resolver).is_err());
    }

    #[test]
    fn test_priorities_and_modes() {
        let sheet = compile(&stylesheet(
            r#"<xsl:template match="a|b" priority="2"/><xsl:template match="c" mode="m"/>"#,
        ))
        .unwrap();
        let default_rules = &sheet.rules[&None];
        assert_eq!(default_rules.len(), 2);
        assert!(default_rules.iter().all(|r| r.priority == 2.0));
        assert_eq!(sheet.rules[&Some(ExpandedName::local("m"))].len(), 1);
    }
}
