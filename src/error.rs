//! Engine Errors
//!
//! Every failure is raised where it is detected and never retried here.
//! Stop and Cancel are control flow, not errors: see [`crate::registry::StepFlow`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown deferred value kind: {kind}")]
    UnknownExpressionKind { kind: String },

    #[error("Missing required parameter '{parameter}' for {context}")]
    MissingParameter { context: String, parameter: String },

    #[error("Invalid parameter '{parameter}': expected {expected}, found {found}")]
    InvalidParameter {
        parameter: String,
        expected: String,
        found: String,
    },

    #[error("Deferred value did not resolve within {limit} steps")]
    ResolutionOverflow { limit: usize },

    #[error("Template cycle detected: {}", .chain.join(" -> "))]
    TemplateCycle { chain: Vec<String> },

    #[error("Duplicate template label: {0}")]
    DuplicateLabel(String),

    #[error("Template not found: {0}")]
    UnknownTemplate(String),

    #[error("Cannot register a card face without a label as a template")]
    UnlabelledTemplate,

    #[error("Duplicate {registry} registration for tag: {tag}")]
    DuplicateRegistration { registry: &'static str, tag: String },

    #[error("Unknown step kind: {kind}")]
    UnknownStepKind { kind: String },

    #[error("Key already exists in {} cache: {key}", cache_name(.global))]
    CacheKeyConflict { key: String, global: bool },

    #[error("Key not found in {} cache: {key}", cache_name(.global))]
    CacheKeyMissing { key: String, global: bool },

    #[error("Unrecognised cache write mode: {0}")]
    UnknownWriteMode(String),

    #[error("Calculation '{op}' failed: {message}")]
    Calculation { op: String, message: String },

    #[error("Unknown calculation: {0}")]
    UnknownOperation(String),

    #[error("Image error: {0}")]
    Raster(#[from] image::ImageError),

    #[error("Failed to load font {path}: {message}")]
    Font { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "Step {index} ({kind}) of card face '{}' failed: {source}",
        .face.as_deref().unwrap_or("<unlabelled>")
    )]
    Step {
        face: Option<String>,
        index: usize,
        kind: String,
        #[source]
        source: Box<EngineError>,
    },
}

fn cache_name(global: &bool) -> &'static str {
    if *global {
        "global"
    } else {
        "local"
    }
}

impl EngineError {
    pub fn missing(context: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self::MissingParameter {
            context: context.into(),
            parameter: parameter.into(),
        }
    }

    pub fn invalid(
        parameter: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn calculation(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Calculation {
            op: op.into(),
            message: message.into(),
        }
    }

    /// The innermost error, looking through step wrappers.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            EngineError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
