//! Result Serialization
//!
//! Turns a result tree into text according to `xsl:output`. The XML form
//! follows libxslt's string output: a declaration line, then each top-level
//! node followed by a newline. Namespace declarations are fixed up as the
//! tree is written, so the result tree itself never needs to carry them.

use log::warn;
use memchr::{memchr, memchr3};

use crate::dom::{ns, Document, NodeId, NodeKind};

use super::ast::{OutputMethod, OutputProperties};

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input", "isindex", "link", "meta",
    "param", "source", "track", "wbr",
];

const HTML_BOOLEAN_ATTRIBUTES: &[&str] = &[
    "checked", "compact", "declare", "defer", "disabled", "ismap", "multiple", "nohref", "noresize", "noshade",
    "nowrap", "readonly", "selected",
];

/// Output character set. Characters outside it are written as references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Ascii,
    Latin1,
}

impl Charset {
    /// Charset for an `xsl:output encoding` name and the name to declare
    pub fn from_name(name: &str) -> (Charset, &'static str) {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => (Charset::Utf8, "UTF-8"),
            "us-ascii" | "ascii" => (Charset::Ascii, "US-ASCII"),
            "iso-8859-1" | "iso_8859-1" | "latin1" | "latin-1" => (Charset::Latin1, "ISO-8859-1"),
            _ => {
                warn!("unsupported output encoding '{}', writing UTF-8", name);
                (Charset::Utf8, "UTF-8")
            }
        }
    }

    /// The result is returned as UTF-8 text, so only ASCII is written
    /// verbatim when a narrower charset is declared.
    #[inline]
    fn can_encode(self, c: char) -> bool {
        match self {
            Charset::Utf8 => true,
            Charset::Ascii | Charset::Latin1 => c.is_ascii(),
        }
    }
}

/// Method used when `xsl:output` does not name one
pub fn default_method(doc: &Document) -> OutputMethod {
    for child in doc.children(doc.root()) {
        match doc.kind(child) {
            NodeKind::Element => {
                let is_html = doc.namespace_uri(child).is_empty() && doc.local_name(child).eq_ignore_ascii_case("html");
                return if is_html { OutputMethod::Html } else { OutputMethod::Xml };
            }
            NodeKind::Text if !doc.is_whitespace_text(child) => return OutputMethod::Xml,
            _ => {}
        }
    }
    OutputMethod::Xml
}

/// Serialize a result tree. An empty tree gives an empty string.
pub fn serialize(doc: &Document, output: &OutputProperties) -> String {
    let root = doc.root();
    if !doc.has_children(root) {
        return String::new();
    }

    let method = output.method.unwrap_or_else(|| default_method(doc));
    if method == OutputMethod::Text {
        return doc.string_value(root);
    }

    let (charset, encoding_name) = match output.encoding.as_deref() {
        Some(name) => {
            let (charset, declared) = Charset::from_name(name);
            (charset, Some(declared))
        }
        None => (Charset::Utf8, None),
    };

    let mut s = Serializer {
        doc,
        out: String::with_capacity(doc.node_count() * 16),
        method,
        charset,
        output,
        scopes: Vec::new(),
    };

    if method == OutputMethod::Xml && !output.omit_xml_declaration {
        s.write_declaration(encoding_name);
    }
    s.write_doctype();

    for child in doc.children(root) {
        s.write_tree(child);
        s.out.push('\n');
    }
    s.out
}

enum Visit {
    Enter { id: NodeId, depth: usize, indent: bool },
    Leave { name: String, mark: usize, depth: usize, indent: bool },
}

struct Serializer<'d> {
    doc: &'d Document,
    out: String,
    method: OutputMethod,
    charset: Charset,
    output: &'d OutputProperties,
    /// In-scope namespace bindings as written, innermost last
    scopes: Vec<(String, String)>,
}

impl<'d> Serializer<'d> {
    fn write_declaration(&mut self, encoding: Option<&str>) {
        let version = self.output.version.as_deref().unwrap_or("1.0");
        self.out.push_str("<?xml version=\"");
        self.out.push_str(version);
        self.out.push('"');
        if let Some(encoding) = encoding {
            self.out.push_str(" encoding=\"");
            self.out.push_str(encoding);
            self.out.push('"');
        }
        if let Some(standalone) = self.output.standalone {
            self.out.push_str(if standalone { " standalone=\"yes\"" } else { " standalone=\"no\"" });
        }
        self.out.push_str("?>\n");
    }

    fn write_doctype(&mut self) {
        let public = self.output.doctype_public.as_deref();
        let system = self.output.doctype_system.as_deref();
        let root_name = match self.doc.document_element() {
            Some(el) => self.doc.qualified_name(el).into_owned(),
            None => return,
        };

        match (self.method, public, system) {
            (OutputMethod::Xml, Some(public), Some(system)) => {
                self.out.push_str(&format!("<!DOCTYPE {} PUBLIC \"{}\" \"{}\">\n", root_name, public, system));
            }
            (OutputMethod::Xml, None, Some(system)) => {
                self.out.push_str(&format!("<!DOCTYPE {} SYSTEM \"{}\">\n", root_name, system));
            }
            (OutputMethod::Html, Some(public), system) => {
                self.out.push_str(&format!("<!DOCTYPE {} PUBLIC \"{}\"", root_name, public));
                if let Some(system) = system {
                    self.out.push_str(&format!(" \"{}\"", system));
                }
                self.out.push_str(">\n");
            }
            (OutputMethod::Html, None, Some(system)) => {
                self.out.push_str(&format!("<!DOCTYPE {} SYSTEM \"{}\">\n", root_name, system));
            }
            _ => {}
        }
    }

    fn write_tree(&mut self, start: NodeId) {
        let doc = self.doc;
        let mut stack = vec![Visit::Enter {
            id: start,
            depth: 0,
            indent: false,
        }];

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Leave {
                    name,
                    mark,
                    depth,
                    indent,
                } => {
                    if indent {
                        self.newline(depth);
                    }
                    self.out.push_str("</");
                    self.out.push_str(&name);
                    self.out.push('>');
                    self.scopes.truncate(mark);
                }
                Visit::Enter { id, depth, indent } => {
                    if indent {
                        self.newline(depth);
                    }
                    match doc.kind(id) {
                        NodeKind::Element => {
                            let mark = self.scopes.len();
                            let name = self.write_start_tag(id);
                            let children: Vec<NodeId> = doc.children(id).collect();
                            let html = self.is_html_element(id);

                            if children.is_empty() {
                                if !html {
                                    self.out.push_str("/>");
                                } else if HTML_VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(&name)) {
                                    self.out.push('>');
                                } else {
                                    self.out.push_str("></");
                                    self.out.push_str(&name);
                                    self.out.push('>');
                                }
                                self.scopes.truncate(mark);
                                continue;
                            }

                            self.out.push('>');
                            let indent_children =
                                self.output.indent && children.iter().all(|&c| !doc.node(c).is_text());
                            stack.push(Visit::Leave {
                                name,
                                mark,
                                depth,
                                indent: indent_children,
                            });
                            for &child in children.iter().rev() {
                                stack.push(Visit::Enter {
                                    id: child,
                                    depth: depth + 1,
                                    indent: indent_children,
                                });
                            }
                        }
                        NodeKind::Text => self.write_text(id),
                        NodeKind::Comment => {
                            self.out.push_str("<!--");
                            self.out.push_str(doc.value(id));
                            self.out.push_str("-->");
                        }
                        NodeKind::ProcessingInstruction => {
                            self.out.push_str("<?");
                            self.out.push_str(doc.local_name(id));
                            let data = doc.value(id);
                            if !data.is_empty() {
                                self.out.push(' ');
                                self.out.push_str(data);
                            }
                            self.out.push_str(if self.method == OutputMethod::Html { ">" } else { "?>" });
                        }
                        NodeKind::Attribute | NodeKind::Document => {}
                    }
                }
            }
        }
    }

    fn newline(&mut self, depth: usize) {
        self.out.push('\n');
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn is_html_element(&self, id: NodeId) -> bool {
        self.method == OutputMethod::Html && self.doc.namespace_uri(id).is_empty()
    }

    fn lookup(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(ns::XML);
        }
        self.scopes
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Bind `prefix` on the element being written, replacing an earlier
    /// declaration of the same prefix on that element
    fn declare(&mut self, decls: &mut Vec<(String, String)>, mark: usize, prefix: &str, uri: &str) {
        if let Some(existing) = decls.iter_mut().find(|(p, _)| p == prefix) {
            existing.1 = uri.to_string();
            if let Some(scoped) = self.scopes[mark..].iter_mut().rev().find(|(p, _)| p == prefix) {
                scoped.1 = uri.to_string();
            }
            return;
        }
        decls.push((prefix.to_string(), uri.to_string()));
        self.scopes.push((prefix.to_string(), uri.to_string()));
    }

    /// Write `<name` with namespace declarations and attributes. Returns
    /// the element name as written.
    fn write_start_tag(&mut self, id: NodeId) -> String {
        let doc = self.doc;
        let mark = self.scopes.len();
        let mut decls: Vec<(String, String)> = Vec::new();

        for (prefix, uri) in doc.namespace_decls(id) {
            if prefix == "xml" || prefix == "xmlns" {
                continue;
            }
            let current = self.lookup(prefix).unwrap_or("");
            if current != uri {
                self.declare(&mut decls, mark, prefix, uri);
            }
        }

        let uri = doc.namespace_uri(id);
        let mut prefix = doc.prefix(id);
        if uri.is_empty() {
            prefix = "";
            if self.lookup("").is_some() {
                self.declare(&mut decls, mark, "", "");
            }
        } else if self.lookup(prefix) != Some(uri) {
            self.declare(&mut decls, mark, prefix, uri);
        }
        let name = qualify(prefix, doc.local_name(id));

        let mut attributes: Vec<(String, &str)> = Vec::new();
        for attr in doc.attributes(id) {
            let attr_uri = doc.namespace_uri(attr);
            let local = doc.local_name(attr);
            if attr_uri.is_empty() {
                attributes.push((local.to_string(), doc.value(attr)));
                continue;
            }
            let attr_prefix = self.attribute_prefix(&mut decls, mark, doc.prefix(attr), attr_uri);
            attributes.push((qualify(&attr_prefix, local), doc.value(attr)));
        }

        self.out.push('<');
        self.out.push_str(&name);
        for (prefix, uri) in &decls {
            self.out.push_str(" xmlns");
            if !prefix.is_empty() {
                self.out.push(':');
                self.out.push_str(prefix);
            }
            self.out.push_str("=\"");
            self.escape_attribute(uri);
            self.out.push('"');
        }

        let html = self.is_html_element(id);
        for (attr_name, value) in attributes {
            self.out.push(' ');
            self.out.push_str(&attr_name);
            if html && HTML_BOOLEAN_ATTRIBUTES.contains(&attr_name.as_str()) && value.eq_ignore_ascii_case(&attr_name) {
                continue;
            }
            self.out.push_str("=\"");
            if html {
                self.escape_html_attribute(value);
            } else {
                self.escape_attribute(value);
            }
            self.out.push('"');
        }
        name
    }

    /// Attributes in a namespace need a non-empty prefix bound to it
    fn attribute_prefix(&mut self, decls: &mut Vec<(String, String)>, mark: usize, wanted: &str, uri: &str) -> String {
        if uri == ns::XML {
            return "xml".to_string();
        }
        if !wanted.is_empty() && self.lookup(wanted) == Some(uri) {
            return wanted.to_string();
        }
        let bound = self
            .scopes
            .iter()
            .rev()
            .find(|(p, u)| !p.is_empty() && u == uri && self.lookup(p) == Some(uri))
            .map(|(p, _)| p.clone());
        if let Some(prefix) = bound {
            return prefix;
        }
        if !wanted.is_empty() && !decls.iter().any(|(p, _)| p == wanted) {
            self.declare(decls, mark, wanted, uri);
            return wanted.to_string();
        }

        let mut n = 1;
        loop {
            let candidate = format!("ns{}", n);
            if self.lookup(&candidate).is_none() && !decls.iter().any(|(p, _)| *p == candidate) {
                self.declare(decls, mark, &candidate, uri);
                return candidate;
            }
            n += 1;
        }
    }

    fn write_text(&mut self, id: NodeId) {
        let doc = self.doc;
        let value = doc.value(id);
        let parent = doc.parent(id);

        if !doc.node(id).escapes_output() {
            self.out.push_str(value);
            return;
        }

        if let Some(parent) = parent.filter(|&p| doc.node(p).is_element()) {
            if self.is_html_element(parent) {
                let local = doc.local_name(parent);
                if local.eq_ignore_ascii_case("script") || local.eq_ignore_ascii_case("style") {
                    self.out.push_str(value);
                    return;
                }
            } else if self.method == OutputMethod::Xml
                && self
                    .output
                    .cdata_section_elements
                    .iter()
                    .any(|n| doc.has_name(parent, &n.uri, &n.local))
            {
                self.write_cdata(value);
                return;
            }
        }
        self.escape_text(value);
    }

    fn write_cdata(&mut self, value: &str) {
        self.out.push_str("<![CDATA[");
        let mut rest = value;
        while let Some(i) = rest.find("]]>") {
            self.push_cdata_chars(&rest[..i + 2]);
            self.out.push_str("]]><![CDATA[");
            rest = &rest[i + 2..];
        }
        self.push_cdata_chars(rest);
        self.out.push_str("]]>");
    }

    fn push_cdata_chars(&mut self, s: &str) {
        for c in s.chars() {
            if self.charset.can_encode(c) {
                self.out.push(c);
            } else {
                self.out.push_str("]]>");
                push_char_ref(&mut self.out, c);
                self.out.push_str("<![CDATA[");
            }
        }
    }

    fn escape_text(&mut self, s: &str) {
        let bytes = s.as_bytes();
        if self.charset == Charset::Utf8 && memchr3(b'&', b'<', b'>', bytes).is_none() && memchr(b'\r', bytes).is_none()
        {
            self.out.push_str(s);
            return;
        }
        for c in s.chars() {
            match c {
                '&' => self.out.push_str("&amp;"),
                '<' => self.out.push_str("&lt;"),
                '>' => self.out.push_str("&gt;"),
                '\r' if self.method == OutputMethod::Xml => self.out.push_str("&#13;"),
                c if !self.charset.can_encode(c) => push_char_ref(&mut self.out, c),
                c => self.out.push(c),
            }
        }
    }

    fn escape_attribute(&mut self, s: &str) {
        let bytes = s.as_bytes();
        if self.charset == Charset::Utf8
            && memchr3(b'&', b'<', b'>', bytes).is_none()
            && memchr3(b'"', b'\n', b'\r', bytes).is_none()
            && memchr(b'\t', bytes).is_none()
        {
            self.out.push_str(s);
            return;
        }
        for c in s.chars() {
            match c {
                '&' => self.out.push_str("&amp;"),
                '<' => self.out.push_str("&lt;"),
                '>' => self.out.push_str("&gt;"),
                '"' => self.out.push_str("&quot;"),
                '\n' => self.out.push_str("&#10;"),
                '\r' => self.out.push_str("&#13;"),
                '\t' => self.out.push_str("&#9;"),
                c if !self.charset.can_encode(c) => push_char_ref(&mut self.out, c),
                c => self.out.push(c),
            }
        }
    }

    /// HTML attributes keep `<` and `>` and leave `&{` alone
    fn escape_html_attribute(&mut self, s: &str) {
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '&' if chars.peek() == Some(&'{') => self.out.push('&'),
                '&' => self.out.push_str("&amp;"),
                '"' => self.out.push_str("&quot;"),
                c if !self.charset.can_encode(c) => push_char_ref(&mut self.out, c),
                c => self.out.push(c),
            }
        }
    }
}

fn qualify(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix, local)
    }
}

fn push_char_ref(out: &mut String, c: char) {
    out.push_str("&#");
    out.push_str(&(c as u32).to_string());
    out.push(';');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ExpandedName, TreeBuilder};

    fn xml(doc: &Document) -> String {
        serialize(doc, &OutputProperties::default())
    }

    #[test]
    fn test_empty_tree_is_empty_string() {
        let doc = TreeBuilder::new().finish();
        assert_eq!(xml(&doc), "");
    }

    #[test]
    fn test_declaration_and_trailing_newline() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "out");
        b.end_element();
        assert_eq!(xml(&b.finish()), "<?xml version=\"1.0\"?>\n<out/>\n");
    }

    #[test]
    fn test_escaping() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "a");
        b.attribute("", "", "v", "\"<&>\"\n");
        b.text("1 < 2 & 3 > 2");
        b.end_element();
        let props = OutputProperties {
            omit_xml_declaration: true,
            ..Default::default()
        };
        assert_eq!(
            serialize(&b.finish(), &props),
            "<a v=\"&quot;&lt;&amp;&gt;&quot;&#10;\">1 &lt; 2 &amp; 3 &gt; 2</a>\n"
        );
    }

    #[test]
    fn test_namespace_fixup() {
        let mut b = TreeBuilder::new();
        b.start_element("urn:a", "a", "root");
        b.start_element("urn:a", "a", "child");
        b.attribute("urn:b", "", "attr", "1");
        b.end_element();
        b.end_element();
        let props = OutputProperties {
            omit_xml_declaration: true,
            ..Default::default()
        };
        assert_eq!(
            serialize(&b.finish(), &props),
            "<a:root xmlns:a=\"urn:a\"><a:child xmlns:ns1=\"urn:b\" ns1:attr=\"1\"/></a:root>\n"
        );
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let mut b = TreeBuilder::new();
        b.start_element("urn:d", "", "root");
        b.start_element("", "", "plain");
        b.end_element();
        b.end_element();
        let props = OutputProperties {
            omit_xml_declaration: true,
            ..Default::default()
        };
        assert_eq!(
            serialize(&b.finish(), &props),
            "<root xmlns=\"urn:d\"><plain xmlns=\"\"/></root>\n"
        );
    }

    #[test]
    fn test_html_method() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "html");
        b.start_element("", "", "body");
        b.start_element("", "", "br");
        b.end_element();
        b.start_element("", "", "input");
        b.attribute("", "", "checked", "checked");
        b.end_element();
        b.start_element("", "", "p");
        b.end_element();
        b.start_element("", "", "script");
        b.text("a < b");
        b.end_element();
        b.end_element();
        b.end_element();
        let doc = b.finish();
        assert_eq!(default_method(&doc), OutputMethod::Html);
        assert_eq!(
            xml(&doc),
            "<html><body><br><input checked><p></p><script>a < b</script></body></html>\n"
        );
    }

    #[test]
    fn test_text_method() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "a");
        b.text("x < y");
        b.end_element();
        let props = OutputProperties {
            method: Some(OutputMethod::Text),
            ..Default::default()
        };
        assert_eq!(serialize(&b.finish(), &props), "x < y");
    }

    #[test]
    fn test_ascii_encoding_uses_references() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "a");
        b.text("caf\u{e9}");
        b.end_element();
        let props = OutputProperties {
            encoding: Some("US-ASCII".into()),
            ..Default::default()
        };
        assert_eq!(
            serialize(&b.finish(), &props),
            "<?xml version=\"1.0\" encoding=\"US-ASCII\"?>\n<a>caf&#233;</a>\n"
        );
    }

    #[test]
    fn test_cdata_and_indent() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "r");
        b.start_element("", "", "code");
        b.text("a]]>b");
        b.end_element();
        b.end_element();
        let props = OutputProperties {
            omit_xml_declaration: true,
            indent: true,
            cdata_section_elements: vec![ExpandedName::local("code")],
            ..Default::default()
        };
        assert_eq!(
            serialize(&b.finish(), &props),
            "<r>\n  <code><![CDATA[a]]]]><![CDATA[>b]]></code>\n</r>\n"
        );
    }

    #[test]
    fn test_doctype() {
        let mut b = TreeBuilder::new();
        b.start_element("", "", "doc");
        b.end_element();
        let props = OutputProperties {
            omit_xml_declaration: true,
            doctype_system: Some("doc.dtd".into()),
            ..Default::default()
        };
        assert_eq!(serialize(&b.finish(), &props), "<!DOCTYPE doc SYSTEM \"doc.dtd\">\n<doc/>\n");
    }
}
