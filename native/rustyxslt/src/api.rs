//! Host-Agnostic Operations
//!
//! The three operations the NIFs expose, without any rustler types:
//! parse a document, compile a stylesheet, transform. The NIF layer only
//! decodes terms, calls these and encodes the result.

use std::time::Instant;

use log::debug;

use crate::dom;
use crate::error::Result;
use crate::lifecycle::{RegistryStats, DOCUMENTS, STYLESHEETS};
use crate::marshal::ParameterList;
use crate::resource::{DocumentResource, StylesheetResource};
use crate::xslt;

/// Parse XML text into a registered document
pub fn parse_document(input: &[u8]) -> Result<DocumentResource> {
    let started = Instant::now();
    let doc = dom::parse_document(input)?;
    debug!(
        "parsed {} bytes into {} nodes in {:?}",
        input.len(),
        doc.node_count(),
        started.elapsed()
    );
    DocumentResource::new(doc)
}

/// Parse and compile a stylesheet. The stylesheet takes its source
/// document; on a compile failure that document is dropped here.
pub fn compile_stylesheet(input: &[u8]) -> Result<StylesheetResource> {
    let started = Instant::now();
    let doc = dom::parse_document(input)?;
    let stylesheet = xslt::compile(doc)?;
    debug!(
        "compiled {} byte stylesheet ({} bytes resident) in {:?}",
        input.len(),
        stylesheet.memory_usage(),
        started.elapsed()
    );
    StylesheetResource::new(stylesheet)
}

/// Apply `stylesheet` to `document`. `params` is the flat
/// `[name, value, ...]` list; an odd length fails before any other work.
pub fn transform<S: AsRef<str>>(
    stylesheet: &StylesheetResource,
    document: &DocumentResource,
    params: &[S],
) -> Result<String> {
    let params = ParameterList::from_flat(params)?;
    let stylesheet = stylesheet.acquire()?;
    let document = document.acquire()?;
    let params = params.bind(&stylesheet);
    xslt::transform(&stylesheet, &document, &params)
}

/// Registry counters for both handle kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleCounts {
    pub documents: RegistryStats,
    pub stylesheets: RegistryStats,
}

pub fn handle_counts() -> HandleCounts {
    HandleCounts {
        documents: DOCUMENTS.stats(),
        stylesheets: STYLESHEETS.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="@*|node()">
    <xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy>
  </xsl:template>
</xsl:stylesheet>"#;

    const OUT: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:template match="/"><out/></xsl:template></xsl:stylesheet>"#;

    const PARAM: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:param name="name"/><xsl:template match="/"><v><xsl:value-of select="$name"/></v></xsl:template></xsl:stylesheet>"#;

    const NO_PARAMS: &[&str] = &[];

    #[test]
    fn test_identity_transform() {
        let sheet = compile_stylesheet(IDENTITY.as_bytes()).unwrap();
        let doc = parse_document(br#"<root a="1"><child>text</child><!--note--></root>"#).unwrap();
        let out = transform(&sheet, &doc, NO_PARAMS).unwrap();
        assert_eq!(
            out,
            "<?xml version=\"1.0\"?>\n<root a=\"1\"><child>text</child><!--note--></root>\n"
        );
    }

    #[test]
    fn test_constant_output_ignores_input() {
        let sheet = compile_stylesheet(OUT.as_bytes()).unwrap();
        let inputs: [&[u8]; 3] = [b"<a/>", b"<b><c>deep</c></b>", b"<?pi x?><z/>"];
        for input in inputs {
            let doc = parse_document(input).unwrap();
            let out = transform(&sheet, &doc, NO_PARAMS).unwrap();
            assert_eq!(out, "<?xml version=\"1.0\"?>\n<out/>\n");
        }
    }

    #[test]
    fn test_parameter_reaches_stylesheet() {
        let sheet = compile_stylesheet(PARAM.as_bytes()).unwrap();
        let doc = parse_document(b"<r/>").unwrap();
        let out = transform(&sheet, &doc, &["name", "42"]).unwrap();
        assert!(out.contains("<v>42</v>"));
        let out = transform(&sheet, &doc, &["name".to_string(), "'Grüße'".to_string()]).unwrap();
        assert!(out.contains("<v>Grüße</v>"));
    }

    #[test]
    fn test_odd_parameter_list() {
        let sheet = compile_stylesheet(PARAM.as_bytes()).unwrap();
        let doc = parse_document(b"<r/>").unwrap();
        let err = transform(&sheet, &doc, &["name"]).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(parse_document(b"<a>").unwrap_err().kind(), "parse_failure");
        assert_eq!(compile_stylesheet(b"<a").unwrap_err().kind(), "parse_failure");
        assert_eq!(compile_stylesheet(b"<a/>").unwrap_err().kind(), "compile_failure");
        assert_eq!(
            compile_stylesheet(br#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:template match="["/></xsl:stylesheet>"#)
                .unwrap_err()
                .kind(),
            "compile_failure"
        );
    }

    #[test]
    fn test_handles_release_once() {
        let mut doc_tokens = Vec::new();
        let mut sheet_tokens = Vec::new();
        for i in 0..500 {
            let doc = parse_document(format!("<n i=\"{}\"/>", i).as_bytes()).unwrap();
            let sheet = compile_stylesheet(OUT.as_bytes()).unwrap();
            doc_tokens.push(doc.token());
            sheet_tokens.push(sheet.token());
            assert!(DOCUMENTS.contains(doc.token()));
            // Both handles drop here
        }
        assert!(doc_tokens.iter().all(|t| !DOCUMENTS.contains(*t)));
        assert!(sheet_tokens.iter().all(|t| !STYLESHEETS.contains(*t)));
        // A stale token never releases again
        assert!(doc_tokens.iter().all(|t| !DOCUMENTS.release(*t)));
        let counts = handle_counts();
        assert!(counts.documents.released >= 500);
        assert!(counts.stylesheets.released >= 500);
    }

    #[test]
    fn test_repeated_failing_transforms() {
        let sheet = compile_stylesheet(
            br#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:template match="/"><xsl:value-of select="$undefined"/></xsl:template></xsl:stylesheet>"#,
        )
        .unwrap();
        let doc = parse_document(b"<r/>").unwrap();
        for _ in 0..200 {
            let err = transform(&sheet, &doc, &["p", "1", "q", "'x'"]).unwrap_err();
            assert_eq!(err.kind(), "apply_failure");
        }
        // Inputs survive failed transforms
        assert!(DOCUMENTS.contains(doc.token()));
        assert!(STYLESHEETS.contains(sheet.token()));
        let ok = compile_stylesheet(OUT.as_bytes()).unwrap();
        assert!(transform(&ok, &doc, NO_PARAMS).is_ok());
    }

    #[cfg(feature = "memory_tracking")]
    #[test]
    fn test_failing_transforms_do_not_grow_the_heap() {
        use std::sync::atomic::Ordering;

        let allocated = || crate::tracking::ALLOCATED.load(Ordering::SeqCst) as i64;
        let sheet = compile_stylesheet(
            br#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:param name="p"/><xsl:template match="/"><xsl:value-of select="$p + $undefined"/></xsl:template></xsl:stylesheet>"#,
        )
        .unwrap();
        let doc = parse_document(b"<r><a>text</a></r>").unwrap();
        let params = ["p", "1", "q", "'x'"];
        let run = |n: usize| {
            for _ in 0..n {
                let err = transform(&sheet, &doc, &params).unwrap_err();
                assert_eq!(err.kind(), "apply_failure");
            }
        };

        // Warm the parse cache
        run(50);

        // Other tests allocate concurrently; a leak grows the heap in every round
        let mut growth = Vec::new();
        for _ in 0..8 {
            let before = allocated();
            run(200);
            growth.push(allocated() - before);
        }
        assert!(
            growth.iter().any(|&g| g < 16 * 1024),
            "heap grew in every round: {:?}",
            growth
        );
    }

    #[test]
    fn test_document_reused_across_threads() {
        let sheet = compile_stylesheet(IDENTITY.as_bytes()).unwrap();
        let doc = parse_document(b"<shared><x/></shared>").unwrap();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let out = transform(&sheet, &doc, NO_PARAMS).unwrap();
                    assert!(out.contains("<shared><x/></shared>"));
                });
            }
        });
    }
}
