use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use base64::Engine;
use futures::FutureExt;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::compositor::CompositeError;
use crate::config::{ConfigError, Settings};
use crate::image_gen::{ImageSynthesis, OpenAiImageClient};
use crate::llm::{OpenAiTextClient, TextCompletion};
use crate::models::{GenerationRequest, PipelineResult, PipelineState};
use crate::stages;

/// Failures that get past every stage-local fallback.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage ran without its {field} input")]
    MissingInput { stage: &'static str, field: &'static str },
    #[error("{images} images for {panels} panel descriptions")]
    LengthMismatch { images: usize, panels: usize },
    #[error("rendering failed: {0}")]
    Render(#[from] CompositeError),
    #[error("stage panicked: {0}")]
    Panicked(String),
}

/// Runs Scene Extraction → Panel Planning → Image Generation → Layout Assembly for one job.
///
/// Holds the two remote clients, built once and shared by every job; per-job state lives only
/// inside [`ComicPipeline::run`].
#[derive(Clone)]
pub struct ComicPipeline {
    llm: Arc<dyn TextCompletion>,
    images: Arc<dyn ImageSynthesis>,
    image_size: String,
}

impl ComicPipeline {
    pub fn new(llm: Arc<dyn TextCompletion>, images: Arc<dyn ImageSynthesis>) -> Self {
        Self { llm, images, image_size: Settings::default().image_size() }
    }

    pub fn with_image_size(mut self, size: impl Into<String>) -> Self {
        self.image_size = size.into();
        self
    }

    /// Builds the OpenAI-backed clients. A missing credential fails here, before any stage runs.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let api_key = settings.require_api_key()?.to_string();
        let http = Client::new();

        let llm = OpenAiTextClient::new(
            http.clone(),
            api_key.clone(),
            settings.openai_base_url.clone(),
            settings.text_model.clone(),
        );
        let images = OpenAiImageClient::new(
            http,
            api_key,
            settings.openai_base_url.clone(),
            settings.image_model.clone(),
            settings.image_quality.clone(),
        );
        info!(text_model = %settings.text_model, image_model = %settings.image_model, "🧠 Pipeline clients ready");

        Ok(Self::new(Arc::new(llm), Arc::new(images)).with_image_size(settings.image_size()))
    }

    /// Never fails: errors and panics from the stages come back as a result with `error` set.
    #[instrument(skip(self, request), fields(panels = request.panel_count, style = %request.style))]
    pub async fn run(&self, request: &GenerationRequest, job_id: Option<Uuid>) -> PipelineResult {
        let job_id = job_id.unwrap_or_else(Uuid::new_v4);
        debug!(%job_id, "🆔 Starting pipeline");

        let stages = AssertUnwindSafe(self.run_stages(PipelineState::new(request, job_id)));
        let outcome = match stages.catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PipelineError::Panicked(panic_message(panic))),
        };

        match outcome {
            Ok(state) => {
                info!(%job_id, images = state.images.len(), "✅ Pipeline completed");
                success_result(request, state)
            }
            Err(e) => {
                error!(%job_id, error = %e, "❌ Pipeline failed");
                failure_result(request, job_id, &e)
            }
        }
    }

    async fn run_stages(&self, state: PipelineState) -> Result<PipelineState, PipelineError> {
        let state = stages::extract_scene(state, self.llm.as_ref()).await?;
        let state = stages::plan_panels(state, self.llm.as_ref()).await?;
        let state = stages::generate_images(state, self.images.as_ref(), &self.image_size).await?;
        stages::assemble_layout(state, self.images.as_ref()).await
    }
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn success_result(request: &GenerationRequest, state: PipelineState) -> PipelineResult {
    let message = state
        .trace_messages
        .last()
        .cloned()
        .unwrap_or_else(|| "Pipeline completed".to_string());
    PipelineResult {
        job_id: state.job_id,
        prompt: request.prompt.clone(),
        style: request.style,
        panels: request.panel_count,
        scene: state.scene,
        panel_descriptions: state.panel_descriptions,
        images: state.images.iter().map(|img| encode(img)).collect(),
        comic_data: state.composite_image.as_deref().map(encode),
        messages: state.trace_messages,
        message,
        error: None,
    }
}

fn failure_result(request: &GenerationRequest, job_id: Uuid, err: &PipelineError) -> PipelineResult {
    PipelineResult {
        job_id,
        prompt: request.prompt.clone(),
        style: request.style,
        panels: request.panel_count,
        scene: None,
        panel_descriptions: Vec::new(),
        images: Vec::new(),
        comic_data: None,
        messages: Vec::new(),
        message: format!("Pipeline failed: {err}"),
        error: Some(err.to_string()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
