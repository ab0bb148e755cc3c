//! Prompt-to-Comic: a short prompt becomes a multi-panel comic strip.
//!
//! The [`pipeline::ComicPipeline`] chains scene extraction and panel planning (LLM), per-panel image
//! synthesis, and grid composition. [`routes`] wraps it in a small job-based HTTP API.

pub mod compositor;
pub mod config;
pub mod image_gen;
pub mod llm;
pub mod models;
pub mod pdf;
pub mod pipeline;
pub mod routes;
pub mod stages;

pub use config::{ConfigError, Settings};
pub use image_gen::{ImageGenError, ImageSynthesis};
pub use llm::{LlmError, TextCompletion};
pub use models::{ArtStyle, GenerationRequest, PipelineResult, SceneDescription};
pub use pipeline::{ComicPipeline, PipelineError};
