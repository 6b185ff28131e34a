//! Job domain types for page rendering work.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::DocumentMetadata;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
///
/// Only the worker thread moves a job out of `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page rotation in clockwise quarter turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    None,
    Quarter,
    Half,
    ThreeQuarters,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarters => 270,
        }
    }

    /// Whether width and height swap under this rotation.
    pub fn is_sideways(&self) -> bool {
        matches!(self, Rotation::Quarter | Rotation::ThreeQuarters)
    }
}

/// Descriptor for rendering a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page index.
    pub page_index: u32,
    /// Scale factor applied to the page's natural size.
    pub scale: f64,
    /// Rotation applied after scaling.
    #[serde(default)]
    pub rotation: Rotation,
    /// Caller-chosen identifier echoed back on the completion record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl PageRequest {
    /// Request a page at its natural size.
    pub fn new(page_index: u32) -> Self {
        Self {
            page_index,
            scale: 1.0,
            rotation: Rotation::None,
            tag: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Attach the caller's callback identifier.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Check the render parameters before the request is queued.
    pub fn validate(&self) -> Result<(), String> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(format!("scale must be a positive number, got {}", self.scale));
        }
        Ok(())
    }
}

/// Size of a rendered page in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: u32,
    pub height: u32,
}

impl PageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Apply a render request's scale and rotation.
    pub fn transformed(&self, scale: f64, rotation: Rotation) -> Self {
        let width = (self.width as f64 * scale).round() as u32;
        let height = (self.height as f64 * scale).round() as u32;
        if rotation.is_sideways() {
            Self::new(height, width)
        } else {
            Self::new(width, height)
        }
    }
}

/// Output of a successfully executed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    /// The document was loaded and its metadata is now available.
    Loaded { metadata: Box<DocumentMetadata> },
    /// A page was rendered.
    Page {
        page_index: u32,
        dimensions: PageDimensions,
    },
    /// Anything else, with optional structured output as JSON.
    Custom {
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
}

impl JobOutput {
    pub fn custom(summary: impl Into<String>) -> Self {
        JobOutput::Custom {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        JobOutput::Custom {
            summary: summary.into(),
            output: Some(output),
        }
    }

    pub fn page(page_index: u32, dimensions: PageDimensions) -> Self {
        JobOutput::Page {
            page_index,
            dimensions,
        }
    }

    /// Page dimensions, when this output describes a rendered page.
    pub fn dimensions(&self) -> Option<PageDimensions> {
        match self {
            JobOutput::Page { dimensions, .. } => Some(*dimensions),
            _ => None,
        }
    }
}
