//! Remote conversion into page images, and the page-manifest format it
//! shares with pre-rendered fallbacks.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use imagesize::ImageError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use super::{MethodFailure, RenderMethodHandler, report_stage};
use crate::{
    application::progress::ProgressTracker,
    domain::{
        context::RenderContext,
        types::{PageContent, ProgressStage, RenderMethod, RenderedPage},
    },
};

const SOURCE: &str = "docrelay::application::methods::conversion";

#[derive(Debug, Error)]
pub enum ConversionFault {
    #[error("conversion endpoint answered HTTP {status}")]
    Status { status: u16 },
    #[error("conversion request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("conversion timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("invalid page manifest: {0}")]
    Manifest(String),
    #[error("page manifest lists no pages")]
    Empty,
}

/// `{"pages": [{"page": 1, "image_url": "...", "data_base64": "..."}]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageManifest {
    pub pages: Vec<ManifestPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPage {
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
}

impl PageManifest {
    pub fn from_slice(body: &[u8]) -> Result<Self, ConversionFault> {
        serde_json::from_slice(body).map_err(|err| ConversionFault::Manifest(err.to_string()))
    }

    /// Decode into image pages, resolving relative image URLs against `base`.
    pub fn into_rendered_pages(self, base: &Url) -> Result<Vec<RenderedPage>, ConversionFault> {
        if self.pages.is_empty() {
            return Err(ConversionFault::Empty);
        }
        let mut pages = self
            .pages
            .into_iter()
            .map(|page| page.into_rendered_page(base))
            .collect::<Result<Vec<_>, _>>()?;
        pages.sort_by_key(|page| page.number);
        Ok(pages)
    }
}

impl ManifestPage {
    fn into_rendered_page(self, base: &Url) -> Result<RenderedPage, ConversionFault> {
        let number = self.page;
        let url = self
            .image_url
            .map(|raw| {
                base.join(&raw)
                    .map(String::from)
                    .map_err(|err| ConversionFault::Manifest(format!("page {number}: {err}")))
            })
            .transpose()?;

        let content = match self.data_base64 {
            Some(encoded) => {
                let data = STANDARD.decode(encoded.trim()).map_err(|err| {
                    ConversionFault::Manifest(format!("page {number}: invalid base64: {err}"))
                })?;
                let size = imagesize::blob_size(&data).map_err(|err| {
                    let reason = match err {
                        ImageError::NotSupported => "unsupported image format".to_string(),
                        ImageError::CorruptedImage => "corrupted image".to_string(),
                        ImageError::IoError(err) => err.to_string(),
                    };
                    ConversionFault::Manifest(format!("page {number}: {reason}"))
                })?;
                PageContent::Image {
                    width: u32::try_from(size.width).ok(),
                    height: u32::try_from(size.height).ok(),
                    url,
                    data,
                }
            }
            None if url.is_some() => PageContent::Image {
                width: None,
                height: None,
                url,
                data: Vec::new(),
            },
            None => {
                return Err(ConversionFault::Manifest(format!(
                    "page {number} has neither image_url nor data_base64"
                )));
            }
        };
        Ok(RenderedPage { number, content })
    }
}

/// Server-side conversion of a document into page images.
#[async_trait]
pub trait ConversionService: Send + Sync {
    async fn convert(
        &self,
        document: &Url,
        timeout: Duration,
    ) -> Result<Vec<RenderedPage>, ConversionFault>;
}

#[derive(Serialize)]
struct ConversionRequest<'a> {
    url: &'a str,
}

/// `POST {"url": document}` to an endpoint answering with a page manifest.
#[derive(Clone, Debug)]
pub struct HttpConversionService {
    client: Client,
    endpoint: Url,
}

impl HttpConversionService {
    pub fn new(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ConversionService for HttpConversionService {
    async fn convert(
        &self,
        document: &Url,
        timeout: Duration,
    ) -> Result<Vec<RenderedPage>, ConversionFault> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(&ConversionRequest {
                url: document.as_str(),
            })
            .send()
            .await
            .map_err(|err| classify(err, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConversionFault::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(|err| classify(err, timeout))?;
        PageManifest::from_slice(&body)?.into_rendered_pages(&self.endpoint)
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> ConversionFault {
    if err.is_timeout() {
        ConversionFault::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        ConversionFault::Transport(err)
    }
}

pub struct ConversionHandler {
    service: Option<Arc<dyn ConversionService>>,
    progress: ProgressTracker,
}

impl ConversionHandler {
    pub fn new(service: Option<Arc<dyn ConversionService>>, progress: ProgressTracker) -> Self {
        Self { service, progress }
    }
}

#[async_trait]
impl RenderMethodHandler for ConversionHandler {
    fn method(&self) -> RenderMethod {
        RenderMethod::RemoteConversionService
    }

    fn is_available(&self) -> bool {
        self.service.is_some()
    }

    async fn render(&self, context: &mut RenderContext) -> Result<Vec<RenderedPage>, MethodFailure> {
        let service = self
            .service
            .as_ref()
            .ok_or(MethodFailure::Unavailable(RenderMethod::RemoteConversionService))?;
        report_stage(&self.progress, context.session_id, ProgressStage::Rendering, 50.0);
        let pages = service.convert(&context.url, context.options.timeout).await?;
        info!(
            target = SOURCE,
            op = "convert",
            result = "success",
            rendering_id = %context.rendering_id,
            pages = pages.len(),
        );
        report_stage(&self.progress, context.session_id, ProgressStage::Finalizing, 90.0);
        Ok(pages)
    }
}
