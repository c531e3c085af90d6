//! Request and Raw Response Types
//!
//! `AiRequest` is immutable once built. A failed logical attempt derives a new
//! request from the original prompt with a failure-context suffix; the
//! original is never mutated and context never stacks across attempts.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::Path;
use uuid::Uuid;

use crate::ai::validation::ParseFailure;
use crate::types::Result;

/// Image attached to a request
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// MIME type, e.g. `image/png`
    pub mime_type: String,
    /// Raw image bytes
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Read an image file, inferring the MIME type from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        Ok(Self::new(mime_for_extension(extension.as_deref()), data))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// `data:` URI form used by OpenAI-style APIs
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

fn mime_for_extension(extension: Option<&str>) -> &'static str {
    match extension {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// A single structured-output request
#[derive(Debug, Clone)]
pub struct AiRequest {
    id: Uuid,
    prompt: String,
    stage: String,
    images: Vec<ImagePayload>,
}

impl AiRequest {
    pub fn new(prompt: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            stage: stage.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImagePayload>) -> Self {
        self.images = images;
        self
    }

    /// Correlation id shared by every attempt derived from this request
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Diagnostic label; never interpreted
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn images(&self) -> &[ImagePayload] {
        &self.images
    }

    pub fn is_well_formed(&self) -> bool {
        !self.prompt.trim().is_empty()
    }

    /// Derive the re-prompt for logical retry number `retry` (1-based).
    pub fn with_failure_context(&self, failure: &ParseFailure, retry: u32) -> Self {
        let prompt = format!(
            "{}\n\n---\nYOUR PREVIOUS RESPONSE COULD NOT BE USED (retry {}): {}.\n\
             Respond again with ONE complete, syntactically valid JSON object and nothing else. \
             Fix structural JSON errors: balance every brace and bracket, separate elements with \
             commas, remove trailing commas, and close every string. Do not wrap the JSON in \
             markdown code fences.",
            self.prompt, retry, failure
        );

        Self {
            id: self.id,
            prompt,
            stage: self.stage.clone(),
            images: self.images.clone(),
        }
    }
}

/// What a backend returned for one successful network attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// Raw text payload (possibly empty)
    pub text: String,
    /// True iff the backend stopped because of its output-length limit
    pub truncated: bool,
    /// Output-token ceiling configured for this provider instance
    pub token_limit: u32,
    /// Backend-reported finish/stop reason
    pub finish_reason: Option<String>,
}

impl RawResponse {
    pub fn new(text: impl Into<String>, token_limit: u32) -> Self {
        Self {
            text: text.into(),
            truncated: false,
            token_limit,
            finish_reason: None,
        }
    }

    pub fn with_finish_reason(mut self, reason: Option<String>, truncated: bool) -> Self {
        self.finish_reason = reason;
        self.truncated = truncated;
        self
    }
}
