//! Job identity, generation parameters and prompt normalisation.
//!
//! A job carries no status field. Its progress is derived from which
//! artifacts exist on disk, see [`crate::layout`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default classifier-free guidance scale.
pub const DEFAULT_GUIDANCE: f32 = 3.5;
/// Default image guidance scale.
pub const DEFAULT_IMAGE_GUIDANCE: f32 = 1.0;
/// Default text guidance scale.
pub const DEFAULT_TEXT_GUIDANCE: f32 = 1.0;
/// Prompt enhancement is on unless the caller opts out.
pub const DEFAULT_ENHANCE_PROMPT: bool = true;

// ---------------------------------------------------------------------------
// Job identity
// ---------------------------------------------------------------------------

/// Opaque, globally unique job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh identifier. Never reuses a previous value.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::Validation(format!("'{s}' is not a valid request ID")))
    }
}

// ---------------------------------------------------------------------------
// Artifact roles
// ---------------------------------------------------------------------------

/// The two artifacts a job can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    Input,
    Output,
}

impl ArtifactRole {
    /// File-name suffix for this role, e.g. `input` in `{id}_input.png`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Caller-supplied parameters for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Raw prompt text as submitted (not yet normalised).
    pub prompt: String,
    /// Whether to rewrite the prompt through the captioning service first.
    pub enhance_prompt: bool,
    pub guidance: f32,
    pub image_guidance: f32,
    pub text_guidance: f32,
}

impl GenerationParams {
    /// Parameters with the service defaults for everything but the prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            enhance_prompt: DEFAULT_ENHANCE_PROMPT,
            guidance: DEFAULT_GUIDANCE,
            image_guidance: DEFAULT_IMAGE_GUIDANCE,
            text_guidance: DEFAULT_TEXT_GUIDANCE,
        }
    }

    /// Reject guidance values the pipeline cannot use.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("guidance", self.guidance),
            ("i_guidance", self.image_guidance),
            ("t_guidance", self.text_guidance),
        ] {
            if !value.is_finite() {
                return Err(CoreError::Validation(format!(
                    "'{name}' must be a finite number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Strip surrounding whitespace and every newline / carriage return.
///
/// Applied to the raw prompt before enhancement and again to whatever the
/// enhancer returns, so the inference collaborator only ever sees a single
/// line of text.
pub fn normalize_prompt(text: &str) -> String {
    text.trim().chars().filter(|c| !matches!(c, '\n' | '\r')).collect()
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One generation request's unit of tracked work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub params: GenerationParams,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}
