//! The four pipeline stages, run strictly in order by [`crate::pipeline::ComicPipeline`].
//!
//! Every stage takes the previous [`PipelineState`] by value and returns the next one. Remote failures
//! never leave a stage: each one is `primary` or else `fallback` through [`with_fallback`], and the
//! trace records which path ran.

use std::fmt::Display;
use std::future::{ready, Future};

use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::compositor::{self, CompositeError};
use crate::image_gen::ImageSynthesis;
use crate::llm::{preview, LlmError, TextCompletion};
use crate::models::{ArtStyle, PipelineState, SceneDescription};
use crate::pipeline::PipelineError;

pub const TITLE_MAX_CHARS: usize = 50;

const CHARACTER_WORDS: [&str; 8] = ["kids", "children", "boy", "girl", "robot", "alien", "pirate", "ninja"];
const UNKNOWN_LOCATION: &str = "unknown location";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePath {
    Primary,
    Fallback,
}

#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub path: StagePath,
}

impl<T> Outcome<T> {
    pub fn used_fallback(&self) -> bool {
        self.path == StagePath::Fallback
    }
}

/// Runs `primary` once; if it fails, logs the error and returns `fallback()` instead.
pub async fn with_fallback<T, E, Fut, F>(stage: &'static str, primary: Fut, fallback: F) -> Outcome<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    F: FnOnce() -> T,
{
    match primary.await {
        Ok(value) => Outcome { value, path: StagePath::Primary },
        Err(e) => {
            warn!(stage, error = %e, "⚠️ Primary path failed, using fallback");
            Outcome { value: fallback(), path: StagePath::Fallback }
        }
    }
}

// --- Scene Extraction ---

#[instrument(skip_all, fields(job_id = %state.job_id))]
pub async fn extract_scene(state: PipelineState, llm: &dyn TextCompletion) -> Result<PipelineState, PipelineError> {
    let prompt = scene_prompt(&state.prompt, state.style);
    debug!("📝 Scene prompt: {}", preview(&prompt, 100));

    let primary = async {
        let value = llm.generate_structured(&prompt).await?;
        scene_from_structured(value)
    };
    let outcome = with_fallback("scene_extraction", primary, || fallback_scene(&state.prompt, state.style)).await;

    let tag = if outcome.used_fallback() { " (fallback)" } else { "" };
    let scene = outcome.value;
    let message = format!("Parsed scene{tag}: {} characters in {}", scene.characters.len(), scene.setting_label());
    info!("✅ {}", message);

    Ok(PipelineState { scene: Some(scene), ..state }.with_trace(message))
}

fn scene_prompt(prompt: &str, style: ArtStyle) -> String {
    format!(
        "Analyze this comic prompt and extract the key elements:\n\
         Prompt: \"{prompt}\"\n\
         Style: {style}\n\n\
         Return a JSON object with:\n\
         - characters: list of character names/descriptions\n\
         - setting: the location/environment\n\
         - actions: list of actions/events happening\n\
         - mood: the overall mood/tone\n\
         - style_notes: specific style requirements for {style}"
    )
}

#[derive(Debug, Deserialize)]
struct RawScene {
    #[serde(default)]
    characters: Value,
    #[serde(default)]
    setting: Value,
    #[serde(default)]
    actions: Value,
    #[serde(default)]
    mood: Value,
    #[serde(default)]
    style_notes: Value,
}

/// Reads the five scene keys out of a structured completion. Missing keys become empty values;
/// anything other than a JSON object is a parse error.
pub fn scene_from_structured(value: Value) -> Result<SceneDescription, LlmError> {
    let raw_text = value.to_string();
    // Going through a map first keeps derived Deserialize from reading an array by position.
    let object: Map<String, Value> =
        serde_json::from_value(value).map_err(|source| LlmError::Parse { raw: raw_text.clone(), source })?;
    let raw: RawScene =
        serde_json::from_value(Value::Object(object)).map_err(|source| LlmError::Parse { raw: raw_text, source })?;
    Ok(SceneDescription {
        characters: text_list(raw.characters),
        setting: text_value(raw.setting),
        actions: text_list(raw.actions),
        mood: text_value(raw.mood),
        style_notes: text_value(raw.style_notes),
    })
}

/// Keyword heuristic used when the LLM cannot describe the scene. Pure and deterministic.
pub fn fallback_scene(prompt: &str, style: ArtStyle) -> SceneDescription {
    let lowered = prompt.to_lowercase();

    let mut characters: Vec<String> = Vec::new();
    for word in lowered.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if CHARACTER_WORDS.contains(&word) && !characters.iter().any(|c| c == word) {
            characters.push(word.to_string());
        }
    }

    let setting = if lowered.contains("spaceship") {
        "spaceship"
    } else if lowered.contains("pizza") {
        "pizza place"
    } else {
        UNKNOWN_LOCATION
    };

    SceneDescription {
        characters,
        setting: setting.to_string(),
        actions: Vec::new(),
        mood: "neutral".to_string(),
        style_notes: format!("Draw in {style} style"),
    }
}

impl SceneDescription {
    pub fn setting_label(&self) -> &str {
        if self.setting.trim().is_empty() {
            UNKNOWN_LOCATION
        } else {
            &self.setting
        }
    }

    fn characters_label(&self) -> String {
        if self.characters.is_empty() {
            "someone".to_string()
        } else {
            self.characters.join(", ")
        }
    }

    fn actions_label(&self) -> String {
        if self.actions.is_empty() {
            "nothing in particular".to_string()
        } else {
            self.actions.join(", ")
        }
    }
}

fn text_value(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn text_list(value: Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(item_text).filter(|s| !s.is_empty()).collect(),
        other => vec![item_text(other)],
    }
}

/// Text for one list element; objects use their `name` or `description` field when present.
fn item_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Object(ref map) => ["name", "description"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => text_value(other),
    }
}

// --- Panel Planning ---

#[instrument(skip_all, fields(job_id = %state.job_id, panels = state.panel_count))]
pub async fn plan_panels(state: PipelineState, llm: &dyn TextCompletion) -> Result<PipelineState, PipelineError> {
    let scene = state
        .scene
        .clone()
        .ok_or(PipelineError::MissingInput { stage: "panel_planning", field: "scene" })?;
    let count = state.panel_count;
    let prompt = panel_prompt(&state.prompt, state.style, &scene, count);

    let primary = async {
        let value = llm.generate_structured(&prompt).await?;
        Ok::<_, LlmError>(panels_from_structured(value))
    };
    let outcome = with_fallback("panel_planning", primary, || fallback_panels(&scene, count)).await;

    let mut trace = Vec::new();
    let descriptions = match outcome.path {
        StagePath::Primary => {
            let raw_len = outcome.value.len();
            let reconciled = reconcile_panels(outcome.value, &scene, count);
            if raw_len != count {
                trace.push(format!("Adjusted panel plan from {raw_len} to {count} panels"));
            }
            trace.push(format!("Planned {} panels using LLM", reconciled.len()));
            reconciled
        }
        StagePath::Fallback => {
            trace.push(format!("Planned {count} panels (fallback)"));
            outcome.value
        }
    };
    debug!("📊 Final panel descriptions: {:?}", descriptions);
    info!("✅ Planned {} panels", descriptions.len());

    let next = PipelineState { panel_descriptions: descriptions, ..state };
    Ok(trace.into_iter().fold(next, |state, message| state.with_trace(message)))
}

fn panel_prompt(prompt: &str, style: ArtStyle, scene: &SceneDescription, count: usize) -> String {
    let scene_json = serde_json::to_string(scene).unwrap_or_default();
    format!(
        "Create {count} comic panel descriptions for this story:\n\
         Original prompt: \"{prompt}\"\n\
         Style: {style}\n\
         Scene: {scene_json}\n\n\
         Each panel should advance the story. Return a JSON array of {count} panel descriptions.\n\
         Each description should be detailed enough for image generation."
    )
}

/// A JSON array is used element by element, skipping blank entries; any other non-null value becomes a
/// single description.
pub fn panels_from_structured(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(item_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Value::Null => Vec::new(),
        other => vec![item_text(other)],
    }
}

/// Pads with synthesized descriptions or truncates so exactly `count` remain.
pub fn reconcile_panels(mut descriptions: Vec<String>, scene: &SceneDescription, count: usize) -> Vec<String> {
    while descriptions.len() < count {
        let k = descriptions.len() + 1;
        descriptions.push(format!("Panel {k}: {} in {}", scene.characters_label(), scene.setting_label()));
    }
    descriptions.truncate(count);
    descriptions
}

pub fn fallback_panels(scene: &SceneDescription, count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| {
            format!(
                "Panel {i}: {} in {} doing {}",
                scene.characters_label(),
                scene.setting_label(),
                scene.actions_label()
            )
        })
        .collect()
}

// --- Image Generation ---

#[instrument(skip_all, fields(job_id = %state.job_id, panels = state.panel_descriptions.len()))]
pub async fn generate_images(
    state: PipelineState,
    images: &dyn ImageSynthesis,
    size: &str,
) -> Result<PipelineState, PipelineError> {
    let scene = state
        .scene
        .as_ref()
        .ok_or(PipelineError::MissingInput { stage: "image_generation", field: "scene" })?;

    // Panels are independent; join_all keeps results in input order whatever finishes first.
    let requests = state.panel_descriptions.iter().enumerate().map(|(i, description)| {
        let prompt = image_prompt(description, state.style, scene);
        async move {
            let primary = async { images.generate_image(&prompt, size).await.map(Ok) };
            let outcome = with_fallback("image_generation", primary, || compositor::placeholder_panel(i + 1)).await;
            match &outcome.value {
                Ok(bytes) if !outcome.used_fallback() => debug!(panel = i + 1, bytes = bytes.len(), "✅ Panel image generated"),
                _ => warn!(panel = i + 1, "🔄 Using placeholder image"),
            }
            outcome
        }
    });
    let outcomes: Vec<Outcome<Result<Vec<u8>, CompositeError>>> = join_all(requests).await;

    let placeholders = outcomes.iter().filter(|o| o.used_fallback()).count();
    let generated = outcomes
        .into_iter()
        .map(|o| o.value)
        .collect::<Result<Vec<_>, CompositeError>>()?;

    let mut message = format!("Generated {} images in {} style", generated.len(), state.style);
    if placeholders > 0 {
        message.push_str(&format!(" ({placeholders} placeholder)"));
    }
    info!("✅ {}", message);

    Ok(PipelineState { images: generated, ..state }.with_trace(message))
}

pub fn image_prompt(description: &str, style: ArtStyle, scene: &SceneDescription) -> String {
    let mood = if scene.mood.trim().is_empty() { "neutral" } else { scene.mood.as_str() };
    format!(
        "Create a comic panel image: {description}\n\
         Style: {style}\n\
         Mood: {mood}\n\
         Style notes: {}\n\n\
         Make it visually appealing and clear. Comic book style, vibrant colors.",
        scene.style_notes
    )
}

// --- Layout Assembly ---

#[instrument(skip_all, fields(job_id = %state.job_id, images = state.images.len()))]
pub async fn assemble_layout(state: PipelineState, images: &dyn ImageSynthesis) -> Result<PipelineState, PipelineError> {
    let title = comic_title(&state.prompt);
    let job_id = state.job_id.to_string();

    // A grid whose panel count disagrees with the plan is not drawn; the fallback canvas is used instead.
    let grid = if state.images.len() != state.panel_descriptions.len() {
        Err(PipelineError::LengthMismatch {
            images: state.images.len(),
            panels: state.panel_descriptions.len(),
        })
    } else {
        images.compose_grid(&state.images, &title).map(Ok).map_err(PipelineError::Render)
    };
    let primary = ready(grid);
    let outcome = with_fallback("layout_assembly", primary, || compositor::fallback_canvas(&title, &job_id)).await;

    let message = if outcome.used_fallback() {
        "Comic assembled with fallback layout"
    } else {
        "Comic assembled successfully with real images"
    };
    let composite = outcome.value?;
    info!(bytes = composite.len(), "✅ {}", message);

    Ok(PipelineState { composite_image: Some(composite), ..state }.with_trace(message))
}

pub fn comic_title(prompt: &str) -> String {
    prompt.chars().take(TITLE_MAX_CHARS).collect()
}
