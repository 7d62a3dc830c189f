use std::sync::Arc;

use async_trait::async_trait;

use super::{
    MethodFailure, RenderMethodHandler,
    engine::{DocumentEngine, EngineFault},
    report_stage,
};
use crate::{
    application::{
        canvas::{CanvasFault, SharedCanvas},
        progress::{ProgressTracker, ProgressUpdate, calculate_progress_percentage},
    },
    domain::{
        context::RenderContext,
        types::{ProgressStage, RenderMethod, RenderedPage},
    },
    infra::network::{NetworkFault, NetworkLayer, ProgressFn},
    util::lock::mutex_lock,
};

const SOURCE: &str = "docrelay::application::methods::direct";

/// Fetches the document, parses it locally and draws every page onto a
/// managed surface.
pub struct DirectRenderHandler {
    network: Arc<NetworkLayer>,
    canvas: SharedCanvas,
    engine: Arc<dyn DocumentEngine>,
    progress: ProgressTracker,
}

impl DirectRenderHandler {
    pub fn new(
        network: Arc<NetworkLayer>,
        canvas: SharedCanvas,
        engine: Arc<dyn DocumentEngine>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            network,
            canvas,
            engine,
            progress,
        }
    }

    fn draw_pages(&self, context: &mut RenderContext) -> Result<Vec<RenderedPage>, MethodFailure> {
        let session_id = context.session_id;
        let document = context
            .document
            .as_ref()
            .ok_or_else(|| MethodFailure::Opaque("no parsed document to draw".to_string()))?;

        let mut canvas = mutex_lock(&self.canvas, SOURCE, "draw_pages");
        if context.surface.is_none() {
            let created = canvas.create_canvas(document.page_width, document.page_height)?;
            context.surface = Some(created);
        }
        let handle = context.surface.as_mut().ok_or(CanvasFault::Missing)?;

        let mut pages = Vec::with_capacity(document.page_count as usize);
        for page in 1..=document.page_count {
            canvas.validate_and_recreate_canvas(handle)?;
            let rgba = canvas.with_context(handle, |surface| {
                self.engine.draw_page(document, page, surface)?;
                Ok::<_, EngineFault>(surface.to_rgba())
            })??;
            pages.push(RenderedPage::pixels(
                page,
                handle.width(),
                handle.height(),
                rgba,
            ));
            report_stage(
                &self.progress,
                session_id,
                ProgressStage::Rendering,
                calculate_progress_percentage(
                    ProgressStage::Rendering,
                    u64::from(page),
                    Some(u64::from(document.page_count)),
                ),
            );
        }
        Ok(pages)
    }
}

#[async_trait]
impl RenderMethodHandler for DirectRenderHandler {
    fn method(&self) -> RenderMethod {
        RenderMethod::DirectParseAndDraw
    }

    async fn render(&self, context: &mut RenderContext) -> Result<Vec<RenderedPage>, MethodFailure> {
        let session_id = context.session_id;
        report_stage(
            &self.progress,
            session_id,
            ProgressStage::Fetching,
            calculate_progress_percentage(ProgressStage::Fetching, 0, None),
        );

        let progress = self.progress.clone();
        let on_progress: ProgressFn<'_> = &move |loaded: u64, total: Option<u64>| {
            progress.update_progress(
                session_id,
                ProgressUpdate::stage(ProgressStage::Fetching)
                    .percentage(calculate_progress_percentage(
                        ProgressStage::Fetching,
                        loaded,
                        total,
                    ))
                    .bytes(loaded, total),
            );
        };
        let url = context.url.clone();
        let fetched = self
            .network
            .fetch_document(&url, context, Some(on_progress))
            .await?;

        context.url = fetched.url.clone();
        if let Some(length) = fetched.content_length {
            context.options.content_length_hint = Some(length);
        }
        if fetched.is_partial
            && !self
                .network
                .can_render_partial_data(&fetched.data, fetched.content_length)
        {
            return Err(NetworkFault::Incomplete {
                received: fetched.bytes_received,
                expected: fetched.content_length,
            }
            .into());
        }

        report_stage(
            &self.progress,
            session_id,
            ProgressStage::Parsing,
            calculate_progress_percentage(ProgressStage::Parsing, 0, None),
        );
        let document = self.engine.parse(fetched.data, fetched.is_partial)?;
        context.document = Some(document);

        report_stage(
            &self.progress,
            session_id,
            ProgressStage::Rendering,
            calculate_progress_percentage(ProgressStage::Rendering, 0, None),
        );
        let pages = self.draw_pages(context)?;
        report_stage(
            &self.progress,
            session_id,
            ProgressStage::Finalizing,
            calculate_progress_percentage(ProgressStage::Finalizing, 0, None),
        );
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use url::Url;

    use super::*;
    use crate::{
        application::{
            canvas::{CanvasConfig, CanvasManager},
            methods::StructuralEngine,
            progress::ProgressConfig,
        },
        domain::{context::RenderOptions, types::PageContent},
        infra::network::NetworkConfig,
    };

    fn document(pages: usize) -> Vec<u8> {
        let mut body = String::from("%PDF-1.5\n1 0 obj << /Type /Pages >> endobj\n");
        for index in 0..pages {
            body.push_str(&format!(
                "{} 0 obj << /Type /Page /MediaBox [0 0 32 24] >> endobj\n",
                index + 2
            ));
        }
        body.push_str("%%EOF\n");
        body.into_bytes()
    }

    fn handler(canvas: SharedCanvas, progress: ProgressTracker) -> DirectRenderHandler {
        let network = NetworkLayer::new(NetworkConfig::default()).unwrap();
        DirectRenderHandler::new(
            Arc::new(network),
            canvas,
            Arc::new(StructuralEngine::default()),
            progress,
        )
    }

    #[tokio::test]
    async fn renders_every_page_onto_one_surface() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/doc.pdf");
                then.status(200).body(document(3));
            })
            .await;

        let canvas = CanvasManager::new(CanvasConfig::default()).into_shared();
        let progress = ProgressTracker::new(ProgressConfig::default());
        let handler = handler(canvas.clone(), progress.clone());
        let mut context = RenderContext::new(
            Url::parse(&server.url("/doc.pdf")).unwrap(),
            RenderOptions::default(),
        );
        progress.initialize_progress(context.session_id, ProgressStage::Initializing);

        let pages = handler.render(&mut context).await.unwrap();

        assert_eq!(pages.len(), 3);
        assert!(matches!(
            &pages[2].content,
            PageContent::Pixels { width: 32, height: 24, rgba } if rgba.len() == 32 * 24 * 4
        ));
        assert_eq!(context.document.as_ref().map(|doc| doc.page_count), Some(3));
        assert!(context.surface.is_some());
        assert_eq!(canvas.lock().unwrap().surface_count(), 1);
        assert!(context.options.content_length_hint.is_some());

        let state = progress.snapshot(context.session_id).unwrap();
        assert_eq!(state.stage, ProgressStage::Finalizing);
        assert_eq!(state.percentage, 90.0);
    }

    #[tokio::test]
    async fn html_error_page_is_corruption() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/doc.pdf");
                then.status(200).body("<html>link expired</html>");
            })
            .await;

        let canvas = CanvasManager::new(CanvasConfig::default()).into_shared();
        let handler = handler(canvas, ProgressTracker::new(ProgressConfig::default()));
        let mut context = RenderContext::new(
            Url::parse(&server.url("/doc.pdf")).unwrap(),
            RenderOptions::default(),
        );

        let err = handler.render(&mut context).await.unwrap_err();
        assert!(matches!(
            err,
            MethodFailure::Engine(EngineFault::Corrupted { .. })
        ));
        assert!(context.surface.is_none());
    }
}
