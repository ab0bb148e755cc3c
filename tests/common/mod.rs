//! In-process stand-ins for the LLM and image services.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use prompt_to_comic::compositor::encode_png;
use prompt_to_comic::{ComicPipeline, ImageGenError, ImageSynthesis, LlmError, TextCompletion};
use serde_json::Value;

pub const PROMPT: &str = "Two kids in a spaceship arguing about pizza";

/// LLM that is always unreachable.
pub struct OfflineLlm;

#[async_trait]
impl TextCompletion for OfflineLlm {
    async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Http("connection refused".into()))
    }

    async fn generate_structured(&self, _prompt: &str) -> Result<Value, LlmError> {
        Err(LlmError::Http("connection refused".into()))
    }
}

/// LLM that answers structured calls from a queue, in call order.
pub struct ScriptedLlm {
    answers: Mutex<Vec<Result<Value, LlmError>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(answers: Vec<Result<Value, LlmError>>) -> Self {
        let mut answers = answers;
        answers.reverse();
        Self { answers: Mutex::new(answers), prompts: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl TextCompletion for ScriptedLlm {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        Ok(format!("echo: {prompt}"))
    }

    async fn generate_structured(&self, prompt: &str) -> Result<Value, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        self.answers.lock().pop().unwrap_or(Err(LlmError::EmptyResponse))
    }
}

/// Image service that returns a solid PNG unless the prompt contains one of `fail_on`.
pub struct StubImages {
    fail_on: Vec<String>,
    pub calls: AtomicUsize,
}

impl StubImages {
    pub fn working() -> Self {
        Self::failing_on(&[])
    }

    pub fn failing_on(markers: &[&str]) -> Self {
        Self { fail_on: markers.iter().map(|m| m.to_string()).collect(), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSynthesis for StubImages {
    async fn generate_image(&self, prompt: &str, _size: &str) -> Result<Vec<u8>, ImageGenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.iter().any(|m| prompt.contains(m.as_str())) {
            return Err(ImageGenError::Download { status: 500 });
        }
        Ok(solid_png([40, 120, 200]))
    }
}

/// Image service that is always unreachable.
pub struct OfflineImages;

#[async_trait]
impl ImageSynthesis for OfflineImages {
    async fn generate_image(&self, _prompt: &str, _size: &str) -> Result<Vec<u8>, ImageGenError> {
        Err(ImageGenError::Http("connection refused".into()))
    }
}

pub fn solid_png(color: [u8; 3]) -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(64, 64, Rgb(color))).expect("encode test png")
}

pub fn pipeline(llm: impl TextCompletion + 'static, images: impl ImageSynthesis + 'static) -> ComicPipeline {
    ComicPipeline::new(Arc::new(llm), Arc::new(images))
}
