//! Capability Registries - tag to function dispatch
//!
//! Resolvers and step handlers are contributed by [`Extension`]s and merged
//! once at startup. A tag may only be registered once across every
//! extension; conflicts fail composition instead of shadowing.

use std::collections::BTreeMap;
use std::fmt;

use crate::cardface::FaceContext;
use crate::error::{EngineError, EngineResult};
use crate::raster::Canvas;
use crate::value::{Mapping, Value};

/// Turns one deferred expression into its next value.
pub type Resolver = fn(&Mapping, &FaceContext<'_>) -> EngineResult<Value>;

/// Applies one step to the working canvas.
pub type StepHandler = fn(Canvas, &Mapping, &FaceContext<'_>) -> EngineResult<StepFlow>;

/// What the scheduler does after a step handler returns.
#[derive(Debug, Clone)]
pub enum StepFlow {
    /// Carry on with this canvas.
    Continue(Canvas),
    /// Skip the remaining steps and return this canvas.
    Stop(Canvas),
    /// Abandon the generation; the face produces nothing.
    Cancel,
}

/// A read-only mapping from tag to function.
#[derive(Clone)]
pub struct Registry<F> {
    kind: &'static str,
    entries: BTreeMap<String, F>,
}

impl<F: Copy> Registry<F> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tag: &str, entry: F) -> EngineResult<()> {
        if self.entries.contains_key(tag) {
            return Err(EngineError::DuplicateRegistration {
                registry: self.kind,
                tag: tag.to_string(),
            });
        }
        self.entries.insert(tag.to_string(), entry);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<F> {
        self.entries.get(tag).copied()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F> fmt::Debug for Registry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("tags", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub type ResolverRegistry = Registry<Resolver>;
pub type StepHandlerRegistry = Registry<StepHandler>;

/// A pluggable set of resolvers and step handlers.
pub trait Extension {
    fn name(&self) -> &'static str;

    fn resolvers(&self) -> Vec<(&'static str, Resolver)> {
        vec![]
    }

    fn step_handlers(&self) -> Vec<(&'static str, StepHandler)> {
        vec![]
    }
}

/// The composed registries every generation dispatches through.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub resolvers: ResolverRegistry,
    pub step_handlers: StepHandlerRegistry,
}

impl Capabilities {
    /// The core set, before any extension. Nothing is built in.
    pub fn empty() -> Self {
        Self {
            resolvers: Registry::new("resolver"),
            step_handlers: Registry::new("step handler"),
        }
    }

    /// A new registry pair holding `base` plus every extension's contributions.
    pub fn compose(base: &Capabilities, extensions: &[&dyn Extension]) -> EngineResult<Self> {
        let mut composed = base.clone();
        for extension in extensions {
            for (tag, resolver) in extension.resolvers() {
                composed.resolvers.register(tag, resolver)?;
            }
            for (tag, handler) in extension.step_handlers() {
                composed.step_handlers.register(tag, handler)?;
            }
            tracing::debug!(extension = extension.name(), "Composed extension");
        }
        Ok(composed)
    }

    /// Empty core plus the preset values and preset steps.
    pub fn standard() -> EngineResult<Self> {
        Self::compose(
            &Self::empty(),
            &[&crate::values::PresetValues, &crate::steps::PresetSteps],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(_: &Mapping, _: &FaceContext<'_>) -> EngineResult<Value> {
        Ok(Value::Number(42.0))
    }

    fn passthrough(canvas: Canvas, _: &Mapping, _: &FaceContext<'_>) -> EngineResult<StepFlow> {
        Ok(StepFlow::Continue(canvas))
    }

    struct Answer;

    impl Extension for Answer {
        fn name(&self) -> &'static str {
            "answer"
        }

        fn resolvers(&self) -> Vec<(&'static str, Resolver)> {
            vec![("answer", answer as Resolver)]
        }
    }

    struct ClashingCached;

    impl Extension for ClashingCached {
        fn name(&self) -> &'static str {
            "clashing"
        }

        fn resolvers(&self) -> Vec<(&'static str, Resolver)> {
            vec![("cached", answer as Resolver)]
        }
    }

    struct ClashingSave;

    impl Extension for ClashingSave {
        fn name(&self) -> &'static str {
            "clashing steps"
        }

        fn step_handlers(&self) -> Vec<(&'static str, StepHandler)> {
            vec![("save", passthrough as StepHandler)]
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry: ResolverRegistry = Registry::new("resolver");
        registry.register("answer", answer).unwrap();
        let err = registry.register("answer", answer).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRegistration { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_standard_set_is_populated() {
        let caps = Capabilities::standard().unwrap();
        for tag in ["cached", "calc", "seeded", "image_from_template", "self", "parent"] {
            assert!(caps.resolvers.contains(tag), "missing resolver {tag}");
        }
        for tag in ["write_to_cache", "paste_image", "write_text", "save", "stop", "cancel"] {
            assert!(caps.step_handlers.contains(tag), "missing step handler {tag}");
        }
    }

    #[test]
    fn test_compose_adds_extension() {
        let standard = Capabilities::standard().unwrap();
        let composed = Capabilities::compose(&standard, &[&Answer]).unwrap();
        assert!(composed.resolvers.contains("answer"));
        assert!(!standard.resolvers.contains("answer"));
    }

    #[test]
    fn test_compose_fails_fast_on_conflict() {
        let standard = Capabilities::standard().unwrap();
        assert!(Capabilities::compose(&standard, &[&ClashingCached]).is_err());
        assert!(Capabilities::compose(&standard, &[&ClashingSave]).is_err());
        assert!(Capabilities::compose(&Capabilities::empty(), &[&Answer, &Answer]).is_err());
    }

    #[test]
    fn test_capabilities_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Capabilities>();
    }
}
