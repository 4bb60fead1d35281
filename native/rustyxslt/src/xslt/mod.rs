//! XSLT 1.0 Engine
//!
//! - `compiler`: stylesheet document -> [`Stylesheet`]
//! - `executor`: applies templates, builds the result tree
//! - `serialize`: result tree -> text per `xsl:output`

pub mod ast;
pub mod compiler;
pub mod executor;
pub mod functions;
pub mod limits;
pub mod number;
pub mod pattern;
pub mod serialize;

use std::time::Instant;

use log::debug;

use crate::dom::Document;
use crate::error::{Result, XsltError};
use crate::marshal::Parameter;

pub use ast::Stylesheet;
pub use compiler::compile_stylesheet;

use limits::TRANSFORM_STACK_SIZE;

/// Compile a parsed stylesheet document on a large-stack worker
pub fn compile(source: Document) -> Result<Stylesheet> {
    run_on_worker("rustyxslt-compile", move || compile_stylesheet(source))
}

/// Apply `stylesheet` to `source` and serialize the result. Runs on a
/// dedicated thread with a large stack; template recursion is bounded by
/// depth, not by the caller's stack.
pub fn transform(stylesheet: &Stylesheet, source: &Document, params: &[Parameter]) -> Result<String> {
    let started = Instant::now();
    let output = run_on_worker("rustyxslt-transform", || -> Result<String> {
        let result = executor::apply(stylesheet, source, params)?;
        Ok(serialize::serialize(&result, &stylesheet.output))
    })?;

    debug!(
        "transform produced {} bytes in {:?}",
        output.len(),
        started.elapsed()
    );
    Ok(output)
}

/// Run `work` on a scoped thread with [`TRANSFORM_STACK_SIZE`] of stack.
/// Dirty scheduler threads have small stacks.
fn run_on_worker<T, F>(name: &str, work: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> Result<T> + Send,
{
    std::thread::scope(|scope| {
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .stack_size(TRANSFORM_STACK_SIZE)
            .spawn_scoped(scope, work)
            .map_err(|e| XsltError::AllocationFailure(format!("cannot start {} thread: {}", name, e)))?;
        worker
            .join()
            .map_err(|_| XsltError::apply(format!("{} thread panicked", name)))?
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;
    use crate::dom::ExpandedName;

    fn run(xslt: &str, xml: &str) -> Result<String> {
        run_with(xslt, xml, &[])
    }

    fn run_with(xslt: &str, xml: &str, params: &[(&str, &str)]) -> Result<String> {
        let sheet = compile(parse_document(xslt.as_bytes())?)?;
        let doc = parse_document(xml.as_bytes())?;
        let params: Vec<Parameter> = params
            .iter()
            .map(|(name, value)| Parameter {
                name: ExpandedName::local(*name),
                value: value.to_string(),
            })
            .collect();
        transform(&sheet, &doc, &params)
    }

    fn sheet(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
            body
        )
    }

    const DECL: &str = "<?xml version=\"1.0\"?>\n";

    #[test]
    fn test_builtin_rules_copy_text() {
        let out = run(&sheet(""), "<a>x<b>y</b><!--c--></a>").unwrap();
        assert_eq!(out, format!("{}xy\n", DECL));
    }

    #[test]
    fn test_identity_transform() {
        let xslt = sheet(
            r#"<xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>"#,
        );
        let out = run(&xslt, r#"<a x="1"><b>t</b><!--c--><?pi d?></a>"#).unwrap();
        assert_eq!(out, format!("{}<a x=\"1\"><b>t</b><!--c--><?pi d?></a>\n", DECL));
    }

    #[test]
    fn test_for_each_sort_and_value_of() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:template match="/"><xsl:for-each select="//n"><xsl:sort select="." data-type="number" order="descending"/><xsl:value-of select="."/><xsl:if test="position() != last()">,</xsl:if></xsl:for-each></xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r><n>2</n><n>10</n><n>1</n></r>").unwrap(), "10,2,1");
    }

    #[test]
    fn test_params_override_defaults() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:param name="who" select="'world'"/><xsl:param name="n" select="1"/><xsl:template match="/">hello <xsl:value-of select="$who"/> <xsl:value-of select="$n * 2"/></xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r/>").unwrap(), "hello world2");
        assert_eq!(
            run_with(&xslt, "<r/>", &[("who", "'there'"), ("n", "21")]).unwrap(),
            "hello there42"
        );
    }

    #[test]
    fn test_named_templates_and_with_param() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:template match="/"><xsl:call-template name="greet"><xsl:with-param name="x" select="'a'"/></xsl:call-template><xsl:call-template name="greet"/></xsl:template><xsl:template name="greet"><xsl:param name="x" select="'default'"/>[<xsl:value-of select="$x"/>]</xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r/>").unwrap(), "[a][default]");
    }

    #[test]
    fn test_priority_and_modes() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:template match="/"><xsl:apply-templates select="//i"/><xsl:apply-templates select="//i" mode="m"/></xsl:template><xsl:template match="i">generic;</xsl:template><xsl:template match="i[@k]">keyed;</xsl:template><xsl:template match="i" mode="m">mode;</xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r><i/><i k='1'/></r>").unwrap(), "generic;keyed;mode;mode;");
    }

    #[test]
    fn test_later_template_wins_ties() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:template match="a">first</xsl:template><xsl:template match="a">second</xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<a/>").unwrap(), "second");
    }

    #[test]
    fn test_element_attribute_and_avt() {
        let xslt = sheet(
            r#"<xsl:template match="/r"><xsl:element name="{@tag}"><xsl:attribute name="n"><xsl:value-of select="count(*)"/></xsl:attribute><item id="x{count(*)}"/></xsl:element></xsl:template>"#,
        );
        let out = run(&xslt, r#"<r tag="box"><c/><c/></r>"#).unwrap();
        assert_eq!(out, format!("{}<box n=\"2\"><item id=\"x2\"/></box>\n", DECL));
    }

    #[test]
    fn test_result_tree_fragment_variable() {
        let xslt = sheet(
            r#"<xsl:template match="/"><xsl:variable name="frag"><b>bold</b></xsl:variable><out><xsl:copy-of select="$frag"/><xsl:value-of select="string-length($frag)"/></out></xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r/>").unwrap(), format!("{}<out><b>bold</b>4</out>\n", DECL));
    }

    #[test]
    fn test_keys_and_generate_id() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:key name="by-type" match="item" use="@type"/><xsl:template match="/"><xsl:value-of select="count(key('by-type', 'a'))"/>:<xsl:value-of select="generate-id(//item[1]) = generate-id(key('by-type', 'a')[1])"/></xsl:template>"#,
        );
        assert_eq!(
            run(&xslt, r#"<r><item type="a"/><item type="b"/><item type="a"/></r>"#).unwrap(),
            "2:true"
        );
    }

    #[test]
    fn test_current_function() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:template match="/"><xsl:for-each select="//p"><xsl:value-of select="count(//p[@ref = current()/@id])"/></xsl:for-each></xsl:template>"#,
        );
        assert_eq!(run(&xslt, r#"<r><p id="1"/><p id="2" ref="1"/></r>"#).unwrap(), "10");
    }

    #[test]
    fn test_strip_space() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:strip-space elements="*"/><xsl:template match="/"><xsl:value-of select="count(/r/node())"/></xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r>\n  <a/>\n  <b/>\n</r>").unwrap(), "2");
    }

    #[test]
    fn test_number_and_format_number() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:template match="i"><xsl:number format="(a)"/></xsl:template><xsl:template match="/"><xsl:apply-templates select="//i"/>|<xsl:value-of select="format-number(1234.5, '#,##0.00')"/></xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r><i/><x/><i/></r>").unwrap(), "(a)(b)|1,234.50");
    }

    #[test]
    fn test_choose_and_comment() {
        let xslt = sheet(
            r#"<xsl:template match="/"><out><xsl:choose><xsl:when test="/r/@v = 1">one</xsl:when><xsl:otherwise>other</xsl:otherwise></xsl:choose><xsl:comment>a--b</xsl:comment></out></xsl:template>"#,
        );
        assert_eq!(
            run(&xslt, r#"<r v="1"/>"#).unwrap(),
            format!("{}<out>one<!--a- -b--></out>\n", DECL)
        );
    }

    #[test]
    fn test_empty_result_is_empty_string() {
        let xslt = sheet(r#"<xsl:template match="/"/>"#);
        assert_eq!(run(&xslt, "<r/>").unwrap(), "");
    }

    #[test]
    fn test_runaway_recursion_fails() {
        let xslt = sheet(
            r#"<xsl:template match="/"><xsl:call-template name="loop"/></xsl:template><xsl:template name="loop"><xsl:call-template name="loop"/></xsl:template>"#,
        );
        let err = run(&xslt, "<r/>").unwrap_err();
        assert_eq!(err.kind(), "apply_failure");
        assert!(err.message().contains("3000"));
    }

    #[test]
    fn test_dynamic_errors_are_apply_failures() {
        let cases = [
            r#"<xsl:template match="/"><xsl:value-of select="$missing"/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:value-of select="no-such-function()"/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:value-of select="document('x.xml')"/></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:message terminate="yes">stop</xsl:message></xsl:template>"#,
            r#"<xsl:template match="/"><xsl:variable name="f"><a/></xsl:variable><xsl:value-of select="$f/a"/></xsl:template>"#,
        ];
        for body in cases {
            let err = run(&sheet(body), "<r/>").unwrap_err();
            assert_eq!(err.kind(), "apply_failure", "{}", body);
        }
    }

    #[test]
    fn test_bad_parameter_expression() {
        let xslt = sheet(r#"<xsl:param name="p"/><xsl:template match="/"><xsl:value-of select="$p"/></xsl:template>"#);
        let err = run_with(&xslt, "<r/>", &[("p", "1 +")]).unwrap_err();
        assert_eq!(err.kind(), "apply_failure");
    }

    #[test]
    fn test_html_output_method() {
        let xslt = sheet(r#"<xsl:template match="/"><html><body><br/></body></html></xsl:template>"#);
        assert_eq!(run(&xslt, "<r/>").unwrap(), "<html><body><br></body></html>\n");
    }

    #[test]
    fn test_compile_on_worker() {
        let nested = format!("{}1{}", "(".repeat(150), ")".repeat(150));
        let xslt = sheet(&format!(
            r#"<xsl:output method="text"/><xsl:template match="/"><xsl:value-of select="{}"/></xsl:template>"#,
            nested
        ));
        let stylesheet = compile(parse_document(xslt.as_bytes()).unwrap()).unwrap();
        let doc = parse_document(b"<r/>").unwrap();
        assert_eq!(transform(&stylesheet, &doc, &[]).unwrap(), "1");

        let deep = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let xslt = sheet(&format!(r#"<xsl:template match="/"><xsl:value-of select="{}"/></xsl:template>"#, deep));
        let err = compile(parse_document(xslt.as_bytes()).unwrap()).unwrap_err();
        assert_eq!(err.kind(), "compile_failure");
    }

    #[test]
    fn test_deeply_nested_template_body() {
        let depth = crate::dom::parse::MAX_ELEMENT_DEPTH - 3;
        let body = format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let xslt = sheet(&format!(r#"<xsl:template match="/">{}</xsl:template>"#, body));
        let out = run(&xslt, "<r/>").unwrap();
        assert!(out.starts_with(&format!("{}<a><a>", DECL)));

        let body = "<a>".repeat(20_000) + &"</a>".repeat(20_000);
        let xslt = sheet(&format!(r#"<xsl:template match="/">{}</xsl:template>"#, body));
        assert_eq!(run(&xslt, "<r/>").unwrap_err().kind(), "parse_failure");
    }

    #[test]
    fn test_system_property_and_availability() {
        let xslt = sheet(
            r#"<xsl:output method="text"/><xsl:template match="/"><xsl:value-of select="system-property('xsl:version')"/>,<xsl:value-of select="function-available('key')"/>,<xsl:value-of select="element-available('xsl:for-each')"/>,<xsl:value-of select="function-available('foo')"/></xsl:template>"#,
        );
        assert_eq!(run(&xslt, "<r/>").unwrap(), "1,true,true,false");
    }
}
