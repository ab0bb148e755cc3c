use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtStyle {
    #[serde(rename = "Graphic Novel")]
    GraphicNovel,
    Manga,
    Pixar,
    Noir,
}

impl ArtStyle {
    pub const ALL: [ArtStyle; 4] = [ArtStyle::GraphicNovel, ArtStyle::Manga, ArtStyle::Pixar, ArtStyle::Noir];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtStyle::GraphicNovel => "Graphic Novel",
            ArtStyle::Manga => "Manga",
            ArtStyle::Pixar => "Pixar",
            ArtStyle::Noir => "Noir",
        }
    }
}

impl fmt::Display for ArtStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownArtStyle(pub String);

impl fmt::Display for UnknownArtStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = ArtStyle::ALL.iter().map(|s| s.as_str()).collect();
        write!(f, "Invalid art style {:?}. Must be one of: {}", self.0, names.join(", "))
    }
}

impl std::error::Error for UnknownArtStyle {}

impl FromStr for ArtStyle {
    type Err = UnknownArtStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtStyle::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownArtStyle(s.to_string()))
    }
}

/// An accepted generation request. Validation against the configured panel bounds happens at the API edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub style: ArtStyle,
    pub panel_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub characters: Vec<String>,
    pub setting: String,
    pub actions: Vec<String>,
    pub mood: String,
    pub style_notes: String,
}

/// The record threaded through the four stages. Each stage consumes the previous value and returns the next.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub prompt: String,
    pub style: ArtStyle,
    pub panel_count: usize,
    pub job_id: Uuid,
    pub scene: Option<SceneDescription>,
    pub panel_descriptions: Vec<String>,
    pub images: Vec<Vec<u8>>,
    pub composite_image: Option<Vec<u8>>,
    pub trace_messages: Vec<String>,
}

impl PipelineState {
    pub fn new(request: &GenerationRequest, job_id: Uuid) -> Self {
        Self {
            prompt: request.prompt.clone(),
            style: request.style,
            panel_count: request.panel_count,
            job_id,
            scene: None,
            panel_descriptions: Vec::new(),
            images: Vec::new(),
            composite_image: None,
            trace_messages: Vec::new(),
        }
    }

    pub fn with_trace(mut self, message: impl Into<String>) -> Self {
        self.trace_messages.push(message.into());
        self
    }
}

/// A finished strip: the composite image and the job it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComicStrip {
    pub job_id: Uuid,
    pub image: Vec<u8>,
}

/// What the orchestrator hands back to its caller. Byte payloads are base64 (standard alphabet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub job_id: Uuid,
    pub prompt: String,
    pub style: ArtStyle,
    pub panels: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneDescription>,
    #[serde(default)]
    pub panel_descriptions: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comic_data: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn decode_images(&self) -> Result<Vec<Vec<u8>>, base64::DecodeError> {
        self.images
            .iter()
            .map(|b64| base64::engine::general_purpose::STANDARD.decode(b64))
            .collect()
    }

    pub fn decode_comic(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.comic_data
            .as_deref()
            .map(|b64| base64::engine::general_purpose::STANDARD.decode(b64))
            .transpose()
    }

    pub fn strip(&self) -> Result<Option<ComicStrip>, base64::DecodeError> {
        Ok(self.decode_comic()?.map(|image| ComicStrip { job_id: self.job_id, image }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub state: JobState,
    pub request: GenerationRequest,
    pub message: String,
    pub result: Option<PipelineResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(id: Uuid, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Pending,
            request,
            message: "Job created successfully".to_string(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_processing(&mut self) {
        self.state = JobState::Processing;
        self.message = "Generating comic...".to_string();
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, result: PipelineResult) {
        self.state = if result.is_success() { JobState::Done } else { JobState::Failed };
        self.message = result.message.clone();
        self.result = Some(result);
        self.updated_at = Utc::now();
    }
}

// --- HTTP schemas ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    pub style: String,
    pub panels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: JobState,
    pub message: Option<String>,
    pub comic_data: Option<String>,
    pub panel_images: Option<Vec<String>>,
    #[serde(default)]
    pub messages: Vec<String>,
    pub comic_url: Option<String>,
    pub pdf_url: Option<String>,
}

impl From<&JobRecord> for StatusResponse {
    fn from(job: &JobRecord) -> Self {
        let done = job.state == JobState::Done;
        let result = job.result.as_ref();
        Self {
            state: job.state,
            message: Some(job.message.clone()),
            comic_data: result.and_then(|r| r.comic_data.clone()),
            panel_images: result.map(|r| r.images.clone()).filter(|imgs| !imgs.is_empty()),
            messages: result.map(|r| r.messages.clone()).unwrap_or_default(),
            comic_url: done.then(|| format!("/comics/{}/comic.png", job.id)),
            pdf_url: done.then(|| format!("/comics/{}/comic.pdf", job.id)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
