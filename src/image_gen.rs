use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::compositor::{self, CompositeError};
use crate::llm::preview;

#[derive(Debug, Error)]
pub enum ImageGenError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("image API returned status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("no image reference in synthesis response")]
    MissingImage,
    #[error("failed to download image: status={status}")]
    Download { status: u16 },
    #[error("invalid inline image data: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Remote text-to-image synthesis.
#[async_trait]
pub trait ImageSynthesis: Send + Sync {
    /// Returns encoded image bytes for `prompt`. `size` is `WIDTHxHEIGHT`.
    async fn generate_image(&self, prompt: &str, size: &str) -> Result<Vec<u8>, ImageGenError>;

    /// Grid composition lives next to synthesis but never touches the network.
    fn compose_grid(&self, images: &[Vec<u8>], title: &str) -> Result<Vec<u8>, CompositeError> {
        compositor::compose_grid(images, title)
    }
}

pub struct OpenAiImageClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    quality: String,
}

impl OpenAiImageClient {
    pub fn new(client: Client, api_key: String, base_url: String, model: String, quality: String) -> Self {
        Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model, quality }
    }

    async fn request_synthesis(&self, prompt: &str, size: &str) -> Result<ImageReference, ImageGenError> {
        let url = format!("{}/images/generations", self.base_url);
        let request_body = json!({
            "model": self.model,
            "prompt": prompt,
            "size": size,
            "quality": self.quality,
            "n": 1
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ImageGenError::Http(e.to_string()))?;

        let status = response.status();
        debug!("📥 Image API response status: {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Image API error response: {}", preview(&body, 300));
            return Err(ImageGenError::Status { status: status.as_u16(), body });
        }

        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| ImageGenError::Http(format!("unreadable synthesis response: {e}")))?;

        parsed.data.into_iter().find_map(ImageReference::from_datum).ok_or(ImageGenError::MissingImage)
    }

    async fn download(&self, image_url: &str) -> Result<Bytes, ImageGenError> {
        let response = self
            .client
            .get(image_url)
            .send()
            .await
            .map_err(|e| ImageGenError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            error!("❌ Failed to download image, status: {}", status);
            return Err(ImageGenError::Download { status: status.as_u16() });
        }
        response.bytes().await.map_err(|e| ImageGenError::Http(e.to_string()))
    }
}

#[async_trait]
impl ImageSynthesis for OpenAiImageClient {
    #[instrument(skip(self, prompt), fields(model = %self.model, size = %size))]
    async fn generate_image(&self, prompt: &str, size: &str) -> Result<Vec<u8>, ImageGenError> {
        debug!("🎨 Image prompt preview: {}", preview(prompt, 100));

        let bytes = match self.request_synthesis(prompt, size).await? {
            ImageReference::Url(image_url) => {
                debug!("🔗 Image available at {}", preview(&image_url, 50));
                self.download(&image_url).await?.to_vec()
            }
            ImageReference::Inline(b64) => base64::engine::general_purpose::STANDARD.decode(b64)?,
        };

        info!("✅ Image generated ({} bytes)", bytes.len());
        Ok(bytes)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum ImageReference {
    Url(String),
    Inline(String),
}

impl ImageReference {
    fn from_datum(datum: ImageDatum) -> Option<Self> {
        datum.url.map(Self::Url).or(datum.b64_json.map(Self::Inline))
    }
}
