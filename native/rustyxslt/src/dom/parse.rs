//! Strict XML parsing into a [`Document`]
//!
//! quick-xml supplies the token stream; this module enforces the document
//! level well-formedness rules, resolves namespaces and expands entities.
//! Non-validating, nothing is ever fetched.

use std::borrow::Cow;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::builder::TreeBuilder;
use super::document::Document;
use super::encoding::decode_input;
use super::namespace::{is_name, is_name_char, split_qname, NamespaceResolver};

/// Element nesting accepted before parsing fails (libxml2's default limit)
pub const MAX_ELEMENT_DEPTH: usize = 256;

/// Entity replacement text allowed per byte of input
const ENTITY_AMPLIFICATION: usize = 5;

/// Replacement text allowed regardless of input size
const ENTITY_ALLOWANCE: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (byte {position})")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        ParseError {
            position,
            message: message.into(),
        }
    }
}

/// Parse XML bytes into a document
pub fn parse_document(input: &[u8]) -> Result<Document, ParseError> {
    let decoded = decode_input(input)?;
    check_chars(&decoded, 0)?;
    let text = normalize_line_endings(&decoded);
    let doc = DocumentParser::new(&text).run()?;
    debug!("parsed {} bytes into {} nodes", input.len(), doc.node_count());
    Ok(doc)
}

/// XML end-of-line handling: CRLF and lone CR become LF
fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Entities declared in the internal DTD subset
#[derive(Debug)]
struct EntityTable {
    internal: HashMap<String, String>,
    external: HashSet<String>,
    /// Bytes of replacement text handed out so far
    expanded: Cell<usize>,
    budget: usize,
    exhausted: Cell<bool>,
}

impl EntityTable {
    fn new(input_len: usize) -> Self {
        EntityTable {
            internal: HashMap::new(),
            external: HashSet::new(),
            expanded: Cell::new(0),
            budget: input_len
                .saturating_mul(ENTITY_AMPLIFICATION)
                .saturating_add(ENTITY_ALLOWANCE),
            exhausted: Cell::new(false),
        }
    }

    fn resolve(&self, name: &str) -> Option<&str> {
        match name {
            "lt" => Some("<"),
            "gt" => Some(">"),
            "amp" => Some("&"),
            "apos" => Some("'"),
            "quot" => Some("\""),
            _ => {
                let value = self.internal.get(name)?;
                let total = self.expanded.get().saturating_add(value.len());
                if total > self.budget {
                    self.exhausted.set(true);
                    return None;
                }
                self.expanded.set(total);
                Some(value)
            }
        }
    }

    fn unescape<'t>(&self, raw: &'t str, position: usize) -> Result<Cow<'t, str>, ParseError> {
        if !raw.contains('&') {
            return Ok(Cow::Borrowed(raw));
        }
        let text = quick_xml::escape::unescape_with(raw, |name| self.resolve(name)).map_err(|e| {
            if self.exhausted.get() {
                return ParseError::new(
                    position,
                    format!("entity expansion exceeds {} bytes", self.budget),
                );
            }
            let external = self.external.iter().find(|name| raw.contains(&format!("&{};", name)));
            match external {
                Some(name) => ParseError::new(position, format!("external entity '{}' is not loaded", name)),
                None => ParseError::new(position, e.to_string()),
            }
        })?;
        if let Cow::Owned(expanded) = &text {
            check_chars(expanded, position)?;
        }
        Ok(text)
    }
}

struct DocumentParser<'a> {
    reader: Reader<&'a [u8]>,
    builder: TreeBuilder,
    namespaces: NamespaceResolver,
    entities: EntityTable,
    /// Qualified names of open elements
    open: Vec<String>,
    seen_root: bool,
    seen_doctype: bool,
    seen_event: bool,
}

impl<'a> DocumentParser<'a> {
    fn new(text: &'a str) -> Self {
        let entities = EntityTable::new(text.len());
        let mut reader = Reader::from_str(text);
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = true;
        config.check_comments = true;
        config.expand_empty_elements = false;

        DocumentParser {
            reader,
            builder: TreeBuilder::new(),
            namespaces: NamespaceResolver::new(),
            entities,
            open: Vec::new(),
            seen_root: false,
            seen_doctype: false,
            seen_event: false,
        }
    }

    fn position(&self) -> usize {
        self.reader.buffer_position() as usize
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.position(), message)
    }

    fn run(mut self) -> Result<Document, ParseError> {
        loop {
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => return Err(self.error(e.to_string())),
            };

            match event {
                Event::Decl(_) => {
                    if self.seen_event {
                        return Err(self.error("XML declaration allowed only at the start of the document"));
                    }
                }
                Event::DocType(e) => {
                    if self.seen_doctype {
                        return Err(self.error("multiple DOCTYPE declarations"));
                    }
                    if self.seen_root {
                        return Err(self.error("DOCTYPE must come before the root element"));
                    }
                    self.seen_doctype = true;
                    let position = self.position();
                    let content = utf8(&e, position)?;
                    scan_entity_declarations(content, &mut self.entities, position)?;
                }
                Event::Start(e) => self.start_element(&e, false)?,
                Event::Empty(e) => self.start_element(&e, true)?,
                Event::End(e) => {
                    let name = utf8(e.name().into_inner(), self.position())?;
                    match self.open.pop() {
                        Some(open) if open == name => {}
                        Some(open) => {
                            return Err(self.error(format!("mismatched tag: expected </{}>, found </{}>", open, name)))
                        }
                        None => return Err(self.error(format!("unexpected closing tag </{}>", name))),
                    }
                    self.builder.end_element();
                    self.namespaces.pop_scope();
                }
                Event::Text(e) => {
                    let raw = utf8(&e, self.position())?;
                    if self.open.is_empty() {
                        if !is_xml_whitespace(raw) {
                            return Err(self.error("text content outside of the root element"));
                        }
                    } else {
                        if raw.contains("]]>") {
                            return Err(self.error("']]>' is not allowed in character data"));
                        }
                        let text = self.entities.unescape(raw, self.position())?;
                        self.builder.text(&text);
                    }
                }
                Event::CData(e) => {
                    if self.open.is_empty() {
                        return Err(self.error("CDATA section outside of the root element"));
                    }
                    let raw = utf8(&e, self.position())?;
                    self.builder.text(raw);
                }
                Event::Comment(e) => {
                    let raw = utf8(&e, self.position())?;
                    self.builder.comment(raw);
                }
                Event::PI(e) => {
                    let target = utf8(e.target(), self.position())?;
                    if !is_name(target) {
                        return Err(self.error(format!("invalid processing instruction target '{}'", target)));
                    }
                    if target.eq_ignore_ascii_case("xml") {
                        return Err(self.error("processing instruction target 'xml' is reserved"));
                    }
                    let data = utf8(e.content(), self.position())?;
                    self.builder.processing_instruction(target, data.trim_start());
                }
                Event::Eof => break,
            }
            self.seen_event = true;
        }

        if let Some(open) = self.open.first() {
            return Err(self.error(format!("unclosed tag: <{}>", open)));
        }
        if !self.seen_root {
            return Err(self.error("document has no root element"));
        }
        Ok(self.builder.finish())
    }

    fn start_element(&mut self, e: &BytesStart<'_>, is_empty: bool) -> Result<(), ParseError> {
        let position = self.position();
        if self.open.is_empty() {
            if self.seen_root {
                return Err(self.error("extra content after the root element"));
            }
            self.seen_root = true;
        }
        if self.open.len() >= MAX_ELEMENT_DEPTH {
            return Err(self.error(format!("elements nested deeper than {}", MAX_ELEMENT_DEPTH)));
        }

        let qname = utf8(e.name().as_ref(), position)?.to_string();
        if !is_name(&qname) {
            return Err(ParseError::new(position, format!("invalid element name '{}'", qname)));
        }

        let mut attributes: Vec<(String, String)> = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| ParseError::new(position, err.to_string()))?;
            let key = utf8(attr.key.as_ref(), position)?.to_string();
            if !is_name(&key) {
                return Err(ParseError::new(position, format!("invalid attribute name '{}'", key)));
            }
            let raw = utf8(&attr.value, position)?;
            if raw.contains('<') {
                return Err(ParseError::new(position, format!("'<' in the value of attribute '{}'", key)));
            }
            let normalized = raw.replace(['\t', '\n'], " ");
            let value = self.entities.unescape(&normalized, position)?.into_owned();
            attributes.push((key, value));
        }

        self.namespaces.push_scope();
        let mut declared: Vec<(&str, &str)> = Vec::new();
        for (key, value) in &attributes {
            let prefix = if key == "xmlns" {
                ""
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                prefix
            } else {
                continue;
            };
            if !prefix.is_empty() && value.is_empty() {
                return Err(ParseError::new(position, format!("empty namespace URI for prefix '{}'", prefix)));
            }
            if self.namespaces.declare(prefix, value) {
                declared.push((prefix, value));
            }
        }

        let (prefix, local) = split_qname(&qname);
        let uri = self.resolve_prefix(prefix, &qname);
        self.builder.start_element(&uri, prefix, local);
        for (prefix, uri) in declared {
            self.builder.declare_namespace(prefix, uri);
        }

        let mut seen: Vec<(String, &str)> = Vec::with_capacity(attributes.len());
        for (key, value) in &attributes {
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let (prefix, local) = split_qname(key);
            let uri = if prefix.is_empty() {
                String::new()
            } else {
                self.resolve_prefix(prefix, key)
            };
            if seen.iter().any(|(u, l)| *u == uri && *l == local) {
                return Err(ParseError::new(position, format!("duplicate attribute '{}'", key)));
            }
            self.builder.attribute(&uri, prefix, local, value);
            seen.push((uri, local));
        }

        if is_empty {
            self.builder.end_element();
            self.namespaces.pop_scope();
        } else {
            self.open.push(qname);
        }
        Ok(())
    }

    fn resolve_prefix(&self, prefix: &str, qname: &str) -> String {
        match self.namespaces.resolve(prefix) {
            Some(uri) => uri.to_string(),
            None => {
                if !prefix.is_empty() {
                    warn!("namespace prefix '{}' on {} is not defined", prefix, qname);
                }
                String::new()
            }
        }
    }
}

fn utf8(bytes: &[u8], position: usize) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|e| ParseError::new(position, format!("invalid UTF-8: {}", e)))
}

fn is_xml_whitespace(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
}

/// XML 1.0 `Char`; surrogates cannot occur in a `str`
#[inline]
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

fn check_chars(text: &str, offset: usize) -> Result<(), ParseError> {
    match text.char_indices().find(|&(_, c)| !is_xml_char(c)) {
        Some((at, c)) => Err(ParseError::new(
            offset + at,
            format!("character U+{:04X} is not allowed in XML", c as u32),
        )),
        None => Ok(()),
    }
}

/// Collect `<!ENTITY>` declarations from DOCTYPE content into `table`.
/// Internal values are expanded against earlier declarations and count
/// against the expansion budget; parameter entities are skipped.
fn scan_entity_declarations(content: &str, table: &mut EntityTable, position: usize) -> Result<(), ParseError> {
    let mut rest = content;

    while let Some(at) = rest.find("<!ENTITY") {
        rest = rest[at + 8..].trim_start();

        let is_parameter = rest.starts_with('%');
        if is_parameter {
            rest = rest[1..].trim_start();
        }

        let name_len = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
        if name_len == 0 {
            continue;
        }
        let name = rest[..name_len].to_string();
        rest = rest[name_len..].trim_start();

        let decl_end = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let close = rest[1..]
                    .find(quote)
                    .ok_or_else(|| ParseError::new(position, format!("unterminated value for entity '{}'", name)))?;
                if !is_parameter && !table.internal.contains_key(&name) {
                    let value = table.unescape(&rest[1..1 + close], position)?.into_owned();
                    table.internal.insert(name, value);
                }
                1 + close + 1
            }
            _ => {
                if !is_parameter && (rest.starts_with("SYSTEM") || rest.starts_with("PUBLIC")) {
                    table.external.insert(name);
                }
                0
            }
        };

        rest = &rest[decl_end..];
        match rest.find('>') {
            Some(gt) => rest = &rest[gt + 1..],
            None => break,
        }
    }
    Ok(())
}
