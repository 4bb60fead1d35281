//! ResourceArc Wrappers
//!
//! Host handles for parsed documents and compiled stylesheets. A handle
//! holds a registry token, never the resource itself; dropping the handle
//! (when the host collects it) releases the token exactly once.

use std::sync::Arc;

use rustler::ResourceArc;

use crate::dom::Document;
use crate::error::Result;
use crate::lifecycle::{drop_resource, Token, DOCUMENTS, STYLESHEETS};
use crate::xslt::Stylesheet;

/// Handle for a parsed input document
#[derive(Debug)]
pub struct DocumentResource {
    token: Token<Document>,
}

impl DocumentResource {
    /// Register `doc` and wrap its token
    pub fn new(doc: Document) -> Result<Self> {
        let token = DOCUMENTS.register(Arc::new(doc), drop_resource)?;
        Ok(DocumentResource { token })
    }

    /// Strong reference for the duration of a call
    pub fn acquire(&self) -> Result<Arc<Document>> {
        DOCUMENTS.acquire(self.token)
    }

    #[cfg(test)]
    pub fn token(&self) -> Token<Document> {
        self.token
    }
}

impl Drop for DocumentResource {
    fn drop(&mut self) {
        DOCUMENTS.release(self.token);
    }
}

#[rustler::resource_impl]
impl rustler::Resource for DocumentResource {}

/// Type alias for the ResourceArc
pub type DocumentRef = ResourceArc<DocumentResource>;

/// Handle for a compiled stylesheet (which owns its source document)
#[derive(Debug)]
pub struct StylesheetResource {
    token: Token<Stylesheet>,
}

impl StylesheetResource {
    pub fn new(stylesheet: Stylesheet) -> Result<Self> {
        let token = STYLESHEETS.register(Arc::new(stylesheet), drop_resource)?;
        Ok(StylesheetResource { token })
    }

    pub fn acquire(&self) -> Result<Arc<Stylesheet>> {
        STYLESHEETS.acquire(self.token)
    }

    #[cfg(test)]
    pub fn token(&self) -> Token<Stylesheet> {
        self.token
    }
}

impl Drop for StylesheetResource {
    fn drop(&mut self) {
        STYLESHEETS.release(self.token);
    }
}

#[rustler::resource_impl]
impl rustler::Resource for StylesheetResource {}

pub type StylesheetRef = ResourceArc<StylesheetResource>;
