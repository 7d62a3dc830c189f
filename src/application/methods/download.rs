use async_trait::async_trait;

use super::{MethodFailure, RenderMethodHandler};
use crate::domain::{
    context::RenderContext,
    types::{RenderMethod, RenderedPage},
};

/// Last resort: offer the document for download.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadHandler;

#[async_trait]
impl RenderMethodHandler for DownloadHandler {
    fn method(&self) -> RenderMethod {
        RenderMethod::DownloadOnlyFallback
    }

    async fn render(&self, context: &mut RenderContext) -> Result<Vec<RenderedPage>, MethodFailure> {
        Ok(vec![RenderedPage::download(context.url.as_str())])
    }
}
