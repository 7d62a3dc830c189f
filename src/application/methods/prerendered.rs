use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::{MethodFailure, PageManifest, RenderMethodHandler, report_stage};
use crate::{
    application::progress::ProgressTracker,
    domain::{
        context::RenderContext,
        types::{ProgressStage, RenderMethod, RenderedPage},
    },
    infra::network::NetworkLayer,
};

pub const DEFAULT_MANIFEST_SUFFIX: &str = ".pages.json";

/// Loads page images published next to the document.
pub struct PreRenderedHandler {
    network: Arc<NetworkLayer>,
    progress: ProgressTracker,
    manifest_suffix: String,
}

impl PreRenderedHandler {
    pub fn new(
        network: Arc<NetworkLayer>,
        progress: ProgressTracker,
        manifest_suffix: impl Into<String>,
    ) -> Self {
        Self {
            network,
            progress,
            manifest_suffix: manifest_suffix.into(),
        }
    }

    /// `https://host/a/doc.pdf?sig=x` becomes `https://host/a/doc.pdf.pages.json`.
    pub fn manifest_url(&self, document: &Url) -> Url {
        let mut manifest = document.clone();
        manifest.set_query(None);
        manifest.set_fragment(None);
        let path = format!("{}{}", manifest.path(), self.manifest_suffix);
        manifest.set_path(&path);
        manifest
    }
}

#[async_trait]
impl RenderMethodHandler for PreRenderedHandler {
    fn method(&self) -> RenderMethod {
        RenderMethod::PreRenderedImageFallback
    }

    async fn render(&self, context: &mut RenderContext) -> Result<Vec<RenderedPage>, MethodFailure> {
        report_stage(&self.progress, context.session_id, ProgressStage::Fetching, 10.0);
        let manifest_url = self.manifest_url(&context.url);
        let fetched = self
            .network
            .fetch_once(
                &manifest_url,
                context.rendering_id,
                context.options.timeout,
                None,
            )
            .await?;
        report_stage(&self.progress, context.session_id, ProgressStage::Parsing, 30.0);
        let pages = PageManifest::from_slice(&fetched.data)?.into_rendered_pages(&manifest_url)?;
        report_stage(&self.progress, context.session_id, ProgressStage::Finalizing, 90.0);
        Ok(pages)
    }
}
