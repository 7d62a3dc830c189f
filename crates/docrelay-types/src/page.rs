use serde::{Deserialize, Serialize};

/// One displayable page produced by a rendering method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPage {
    pub number: u32,
    #[serde(flatten)]
    pub content: PageContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageContent {
    /// RGBA pixels drawn locally. The buffer itself is not serialised.
    Pixels {
        width: u32,
        height: u32,
        #[serde(skip_serializing, default)]
        rgba: Vec<u8>,
    },
    /// Hand the URL to a native viewer.
    Embedded { url: String },
    /// A page image produced elsewhere, either linked or inlined.
    Image {
        width: Option<u32>,
        height: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing, default)]
        data: Vec<u8>,
    },
    Download { url: String },
}

impl RenderedPage {
    pub fn pixels(number: u32, width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            number,
            content: PageContent::Pixels {
                width,
                height,
                rgba,
            },
        }
    }

    pub fn embedded(url: impl Into<String>) -> Self {
        Self {
            number: 1,
            content: PageContent::Embedded { url: url.into() },
        }
    }

    pub fn download(url: impl Into<String>) -> Self {
        Self {
            number: 1,
            content: PageContent::Download { url: url.into() },
        }
    }
}
