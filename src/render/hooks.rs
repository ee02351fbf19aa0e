//! Page-level hooks supplied by the host application

use async_trait::async_trait;

use super::RenderContext;
use crate::error::Result;
use crate::exchange::Exchange;
use crate::html::Document;

/// Extension points of a root page render
///
/// Only full-page renders run the document hooks; fragments are served as
/// compiled. Every method has a no-op default.
#[async_trait]
pub trait RenderHooks: Send + Sync {
    /// Before any slot of the root template resolves
    async fn preprocess(&self, _doc: &mut Document, _ctx: &RenderContext) -> Result<()> {
        Ok(())
    }

    /// After all slots resolved, before serialization
    ///
    /// Nested template output is already grafted in as nodes.
    async fn postprocess(&self, _doc: &mut Document, _ctx: &RenderContext) -> Result<()> {
        Ok(())
    }

    /// On the serialized page
    fn postprocess_text(&self, html: String, _ctx: &RenderContext) -> String {
        html
    }

    /// Document title for a client-side navigation to `path`
    async fn title(&self, _path: &str, _exchange: &Exchange) -> Result<String> {
        Ok(String::new())
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl RenderHooks for NoHooks {}
