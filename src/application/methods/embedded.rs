use std::sync::Arc;

use async_trait::async_trait;

use super::{EngineFault, MethodFailure, RenderMethodHandler, report_stage};
use crate::{
    application::progress::ProgressTracker,
    domain::{
        context::RenderContext,
        types::{ProgressStage, RenderMethod, RenderedPage},
    },
    infra::network::{DOCUMENT_MAGIC, NetworkLayer},
};

/// Hands the URL to a native viewer once a ranged probe shows it serves a
/// document.
pub struct EmbeddedViewerHandler {
    network: Arc<NetworkLayer>,
    progress: ProgressTracker,
    enabled: bool,
}

impl EmbeddedViewerHandler {
    pub fn new(network: Arc<NetworkLayer>, progress: ProgressTracker, enabled: bool) -> Self {
        Self {
            network,
            progress,
            enabled,
        }
    }
}

#[async_trait]
impl RenderMethodHandler for EmbeddedViewerHandler {
    fn method(&self) -> RenderMethod {
        RenderMethod::EmbeddedNativeViewer
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn render(&self, context: &mut RenderContext) -> Result<Vec<RenderedPage>, MethodFailure> {
        report_stage(&self.progress, context.session_id, ProgressStage::Fetching, 10.0);
        let url = context.url.clone();
        let head = self.network.probe_header(&url, context).await?;
        if !head.starts_with(DOCUMENT_MAGIC) {
            return Err(EngineFault::Malformed {
                reason: "probe did not return a document header".to_string(),
            }
            .into());
        }
        report_stage(&self.progress, context.session_id, ProgressStage::Finalizing, 90.0);
        Ok(vec![RenderedPage::embedded(url.as_str())])
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use url::Url;

    use super::*;
    use crate::{
        application::progress::ProgressConfig,
        domain::{context::RenderOptions, types::PageContent},
        infra::network::NetworkConfig,
    };

    fn handler() -> EmbeddedViewerHandler {
        EmbeddedViewerHandler::new(
            Arc::new(NetworkLayer::new(NetworkConfig::default()).unwrap()),
            ProgressTracker::new(ProgressConfig::default()),
            true,
        )
    }

    #[tokio::test]
    async fn probe_uses_a_range_request() {
        let server = MockServer::start_async().await;
        let probe = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/viewer.pdf")
                    .header("range", "bytes=0-1023");
                then.status(206).body("%PDF-1.6\n%\u{e2}\u{e3}");
            })
            .await;

        let mut context = RenderContext::new(
            Url::parse(&server.url("/viewer.pdf")).unwrap(),
            RenderOptions::default(),
        );
        let pages = handler().render(&mut context).await.unwrap();

        probe.assert_async().await;
        assert_eq!(
            pages,
            vec![RenderedPage {
                number: 1,
                content: PageContent::Embedded {
                    url: server.url("/viewer.pdf"),
                },
            }]
        );
    }

    #[tokio::test]
    async fn non_document_body_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/viewer.pdf");
                then.status(200).body("<!doctype html>");
            })
            .await;

        let mut context = RenderContext::new(
            Url::parse(&server.url("/viewer.pdf")).unwrap(),
            RenderOptions::default(),
        );
        let err = handler().render(&mut context).await.unwrap_err();
        assert!(matches!(err, MethodFailure::Engine(EngineFault::Malformed { .. })));
    }

    #[test]
    fn disabled_viewer_is_unavailable() {
        let handler = EmbeddedViewerHandler::new(
            Arc::new(NetworkLayer::new(NetworkConfig::default()).unwrap()),
            ProgressTracker::new(ProgressConfig::default()),
            false,
        );
        assert!(!handler.is_available());
    }
}
