//! Card Definitions - loading a deck and generating it
//!
//! A definitions file is a JSON array of card faces. Every labelled face is
//! available as a template; every face that is not a template and not skipped
//! is generated in file order. One face failing does not stop the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::cardface::CardFace;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::hashing::compute_definition_hash;
use crate::pool::TemplatePool;
use crate::registry::Capabilities;
use crate::scheduler::GenerationRun;
use crate::value::Value;
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read definitions {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One face as written in a definitions file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CardDefinition {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub size: Option<[u32; 2]>,
    #[serde(default)]
    pub templates: Vec<String>,
    /// Single-template shorthand; appended after `templates`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub steps: Vec<Value>,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub do_skip_generation: bool,
}

pub fn load_definitions(path: &Path) -> Result<Vec<CardDefinition>, DefinitionError> {
    let content = fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

impl CardFace {
    pub fn from_definition(definition: &CardDefinition) -> Self {
        let mut templates = definition.templates.clone();
        if let Some(template) = &definition.template {
            if !templates.contains(template) {
                templates.push(template.clone());
            }
        }
        Self {
            label: definition.label.clone(),
            templates_labels: templates,
            steps: definition.steps.clone(),
            size: definition.size.map(|[w, h]| (w, h)),
            is_template: definition.is_template,
            do_skip_generation: definition.do_skip_generation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FaceOutcome {
    Rendered { width: u32, height: u32 },
    /// No size, explicit or inherited.
    Unrenderable,
    Cancelled,
    /// A template, or marked `do_skip_generation`.
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceReport {
    pub index: usize,
    pub label: Option<String>,
    pub definition_hash: String,
    #[serde(flatten)]
    pub outcome: FaceOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: String,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub definitions_hash: String,
    pub faces: Vec<FaceReport>,
}

impl GenerationReport {
    pub fn failures(&self) -> impl Iterator<Item = &FaceReport> {
        self.faces
            .iter()
            .filter(|f| matches!(f.outcome, FaceOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// The result of composing one face without rendering it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceComposition {
    pub index: usize,
    pub label: Option<String>,
    pub is_template: bool,
    pub templates: Vec<String>,
    pub size: Option<[u32; 2]>,
    pub steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Card faces built from definitions, owned for the life of the deck.
#[derive(Debug, Clone)]
pub struct Deck {
    definitions: Vec<CardDefinition>,
    faces: Vec<CardFace>,
}

impl Deck {
    pub fn from_definitions(definitions: Vec<CardDefinition>) -> Self {
        let faces = definitions.iter().map(CardFace::from_definition).collect();
        Self { definitions, faces }
    }

    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        Ok(Self::from_definitions(load_definitions(path)?))
    }

    pub fn definitions(&self) -> &[CardDefinition] {
        &self.definitions
    }

    pub fn faces(&self) -> &[CardFace] {
        &self.faces
    }

    /// Every labelled face, registered under its label.
    pub fn pool(&self) -> Result<TemplatePool<'_>, EngineError> {
        let mut pool = TemplatePool::new();
        for face in self.faces.iter().filter(|f| f.label.is_some()) {
            pool.register(face)?;
        }
        Ok(pool)
    }

    /// Compose every face, collecting errors instead of stopping at the first.
    pub fn validate(&self) -> Result<Vec<FaceComposition>, EngineError> {
        let pool = self.pool()?;
        Ok(self
            .faces
            .iter()
            .enumerate()
            .map(|(index, face)| {
                let mut entry = FaceComposition {
                    index,
                    label: face.label.clone(),
                    is_template: face.is_template,
                    templates: Vec::new(),
                    size: None,
                    steps: 0,
                    error: None,
                };
                match pool.compose(face) {
                    Ok(composition) => {
                        entry.templates = composition
                            .template_labels()
                            .into_iter()
                            .map(str::to_string)
                            .collect();
                        entry.size = composition.size.map(|(w, h)| [w, h]);
                        entry.steps = composition.steps.len();
                    }
                    Err(err) => entry.error = Some(err.to_string()),
                }
                entry
            })
            .collect())
    }

    /// Generate every eligible face in one run with a shared global cache.
    pub fn generate_all(
        &self,
        capabilities: &Capabilities,
        config: &EngineConfig,
    ) -> Result<GenerationReport, DefinitionError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        let definitions_hash = compute_definition_hash(&self.definitions)?;
        let pool = self.pool()?;
        let run = GenerationRun::new(capabilities, &pool, config);

        tracing::info!(run_id = %run_id, faces = self.faces.len(), "Starting generation run");

        let mut faces = Vec::with_capacity(self.faces.len());
        for (index, (face, definition)) in self.faces.iter().zip(&self.definitions).enumerate() {
            let outcome = if face.is_template || face.do_skip_generation {
                FaceOutcome::Skipped
            } else {
                generate_one(&run, &pool, face)
            };
            if let FaceOutcome::Failed { error } = &outcome {
                tracing::error!(
                    index,
                    label = face.display_label(),
                    error = %error,
                    "Card face failed"
                );
            }
            faces.push(FaceReport {
                index,
                label: face.label.clone(),
                definition_hash: compute_definition_hash(definition)?,
                outcome,
            });
        }

        let report = GenerationReport {
            run_id,
            engine_version: ENGINE_VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
            definitions_hash,
            faces,
        };
        tracing::info!(
            run_id = %report.run_id,
            failures = report.failures().count(),
            "Generation run finished"
        );
        Ok(report)
    }
}

fn generate_one(run: &GenerationRun<'_>, pool: &TemplatePool<'_>, face: &CardFace) -> FaceOutcome {
    match pool.compose(face) {
        Ok(composition) if composition.size.is_none() => return FaceOutcome::Unrenderable,
        Ok(_) => {}
        Err(err) => return FaceOutcome::Failed { error: err.to_string() },
    }
    match run.generate(face) {
        Ok(Some(canvas)) => FaceOutcome::Rendered {
            width: canvas.width(),
            height: canvas.height(),
        },
        Ok(None) => FaceOutcome::Cancelled,
        Err(err) => FaceOutcome::Failed { error: err.to_string() },
    }
}
