//! CardComposer Core - Declarative Card Face Rendering
//!
//! # How a face is drawn
//! 1. Definitions Are Data: faces, steps and expressions are plain JSON
//! 2. Templates Compose: a face inherits every step of its templates, dependencies first
//! 3. Values Are Deferred: expressions resolve at the moment a step needs them
//! 4. Steps Are Ordered: by priority, then by position, or by position alone
//! 5. Capabilities Are Fixed: extensions register once, duplicates are rejected
//! 6. State Is Per Generation: caches and canvases never outlive one `generate`

pub mod calc;
pub mod cardface;
pub mod config;
pub mod definitions;
pub mod error;
pub mod hashing;
pub mod pool;
pub mod raster;
pub mod registry;
pub mod resolve;
pub mod scheduler;
pub mod steps;
pub mod value;
pub mod values;

pub use cardface::{CardFace, FaceContext};
pub use config::{ConfigError, EngineConfig};
pub use definitions::{
    load_definitions, CardDefinition, Deck, DefinitionError, FaceComposition, FaceOutcome,
    FaceReport, GenerationReport,
};
pub use error::{EngineError, EngineResult};
pub use hashing::{canonical_json, compute_definition_hash, seed_from_value};
pub use pool::{Composition, TemplatePool};
pub use raster::{Anchor, Canvas, FontHandle, TextAlign, TextStyle};
pub use registry::{Capabilities, Extension, Resolver, StepFlow, StepHandler};
pub use scheduler::{priority_order, GenerationRun};
pub use steps::PresetSteps;
pub use value::{Handle, Mapping, Value, DEFERRED_KEY};
pub use values::PresetValues;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
