use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One strategy for turning a document URL into displayable pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMethod {
    DirectParseAndDraw,
    EmbeddedNativeViewer,
    RemoteConversionService,
    PreRenderedImageFallback,
    DownloadOnlyFallback,
}

impl RenderMethod {
    /// Fixed fallback order. The last entry always succeeds.
    pub const CHAIN: [RenderMethod; 5] = [
        RenderMethod::DirectParseAndDraw,
        RenderMethod::EmbeddedNativeViewer,
        RenderMethod::RemoteConversionService,
        RenderMethod::PreRenderedImageFallback,
        RenderMethod::DownloadOnlyFallback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RenderMethod::DirectParseAndDraw => "direct-parse-and-draw",
            RenderMethod::EmbeddedNativeViewer => "embedded-native-viewer",
            RenderMethod::RemoteConversionService => "remote-conversion-service",
            RenderMethod::PreRenderedImageFallback => "pre-rendered-image-fallback",
            RenderMethod::DownloadOnlyFallback => "download-only-fallback",
        }
    }

    /// Position of the method in [`RenderMethod::CHAIN`].
    pub fn position(self) -> usize {
        match self {
            RenderMethod::DirectParseAndDraw => 0,
            RenderMethod::EmbeddedNativeViewer => 1,
            RenderMethod::RemoteConversionService => 2,
            RenderMethod::PreRenderedImageFallback => 3,
            RenderMethod::DownloadOnlyFallback => 4,
        }
    }
}

impl fmt::Display for RenderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rendering method `{0}`")]
pub struct ParseRenderMethodError(pub String);

impl FromStr for RenderMethod {
    type Err = ParseRenderMethodError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        RenderMethod::CHAIN
            .into_iter()
            .find(|method| method.as_str() == normalized)
            .ok_or_else(|| ParseRenderMethodError(value.to_string()))
    }
}

/// Coarse document-size bucket keying learned method preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub const SMALL_LIMIT_BYTES: u64 = 1024 * 1024;
    pub const LARGE_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

    /// Buckets a content length; an unknown length counts as medium.
    pub fn from_content_length(content_length: Option<u64>) -> Self {
        match content_length {
            Some(len) if len < Self::SMALL_LIMIT_BYTES => SizeClass::Small,
            Some(len) if len > Self::LARGE_LIMIT_BYTES => SizeClass::Large,
            _ => SizeClass::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategyKind {
    NetworkRetry,
    UrlRefresh,
    CanvasRecreation,
    MemoryCleanup,
    TimeoutExtension,
    FallbackMethod,
}

impl RecoveryStrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategyKind::NetworkRetry => "network-retry",
            RecoveryStrategyKind::UrlRefresh => "url-refresh",
            RecoveryStrategyKind::CanvasRecreation => "canvas-recreation",
            RecoveryStrategyKind::MemoryCleanup => "memory-cleanup",
            RecoveryStrategyKind::TimeoutExtension => "timeout-extension",
            RecoveryStrategyKind::FallbackMethod => "fallback-method",
        }
    }
}

impl fmt::Display for RecoveryStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
