//! Step Scheduler - one generation, start to finish
//!
//! A [`GenerationRun`] carries everything shared by the faces rendered
//! together: capabilities, the template pool, configuration and the global
//! cache. Steps run strictly one after another on the calling thread.
//!
//! The global cache sits in a `RefCell`, so a run cannot be shared between
//! threads. Parallel callers give each thread its own run; sharing one global
//! cache between concurrent writers is the caller's problem.

use std::cell::{Ref, RefCell};
use std::cmp::Ordering;

use crate::calc::compare_values;
use crate::cardface::{CardFace, FaceContext};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::pool::TemplatePool;
use crate::raster::Canvas;
use crate::registry::{Capabilities, StepFlow};
use crate::resolve::TYPE_KEY;
use crate::value::{Mapping, Value};

pub const PRIORITY_KEY: &str = "priority";
pub const DO_STEP_KEY: &str = "do_step";

pub struct GenerationRun<'r> {
    capabilities: &'r Capabilities,
    pool: &'r TemplatePool<'r>,
    config: &'r EngineConfig,
    global_cache: RefCell<Mapping>,
}

impl<'r> GenerationRun<'r> {
    pub fn new(
        capabilities: &'r Capabilities,
        pool: &'r TemplatePool<'r>,
        config: &'r EngineConfig,
    ) -> Self {
        Self {
            capabilities,
            pool,
            config,
            global_cache: RefCell::new(Mapping::new()),
        }
    }

    pub fn with_global_cache(mut self, cache: Mapping) -> Self {
        self.global_cache = RefCell::new(cache);
        self
    }

    pub fn capabilities(&self) -> &'r Capabilities {
        self.capabilities
    }

    pub fn pool(&self) -> &'r TemplatePool<'r> {
        self.pool
    }

    pub fn config(&self) -> &'r EngineConfig {
        self.config
    }

    pub fn global_cache(&self) -> Ref<'_, Mapping> {
        self.global_cache.borrow()
    }

    pub(crate) fn global_cache_mut(&self) -> std::cell::RefMut<'_, Mapping> {
        self.global_cache.borrow_mut()
    }

    pub fn into_global_cache(self) -> Mapping {
        self.global_cache.into_inner()
    }

    /// A fresh context for `face`, composed against this run's pool.
    pub fn context_for<'a>(
        &'a self,
        face: &'a CardFace,
        parent: Option<&'a FaceContext<'a>>,
    ) -> EngineResult<FaceContext<'a>> {
        let composition = self.pool.compose(face)?;
        Ok(FaceContext::new(self, face, composition, parent))
    }

    /// Render a face. `Ok(None)` when it has no size or a step cancelled it.
    pub fn generate(&self, face: &CardFace) -> EngineResult<Option<Canvas>> {
        self.generate_nested(face, None)
    }

    /// Render a face on behalf of `parent`, which becomes visible to its expressions.
    pub fn generate_nested<'a>(
        &'a self,
        face: &'a CardFace,
        parent: Option<&'a FaceContext<'a>>,
    ) -> EngineResult<Option<Canvas>> {
        if let Some(parent) = parent {
            if parent.is_generating(face) {
                let mut chain = parent.lineage();
                chain.push(face.display_label().to_string());
                return Err(EngineError::TemplateCycle { chain });
            }
        }

        let ctx = self.context_for(face, parent)?;
        let Some((width, height)) = ctx.size() else {
            tracing::debug!(label = face.display_label(), "Card face has no size, skipping");
            return Ok(None);
        };

        tracing::info!(label = face.display_label(), width, height, "Generating card face");
        let mut canvas = Canvas::new(width, height);

        for (index, step) in order_steps(&ctx)? {
            let wrap = |kind: &str, source: EngineError| EngineError::Step {
                face: face.label.clone(),
                index,
                kind: kind.to_string(),
                source: Box::new(source),
            };
            let params = step.expect_mapping("step").map_err(|e| wrap("step", e))?;
            let kind = ctx
                .param(params, TYPE_KEY)
                .and_then(|kind| kind.expect_str(TYPE_KEY).map(str::to_string))
                .map_err(|e| wrap("step", e))?;

            let do_step = ctx
                .param_or(params, DO_STEP_KEY, Value::Bool(true))
                .map_err(|e| wrap(&kind, e))?;
            if !do_step.is_truthy() {
                tracing::debug!(index, kind = %kind, "Skipping step");
                continue;
            }

            let handler = self
                .capabilities
                .step_handlers
                .get(&kind)
                .ok_or_else(|| wrap(&kind, EngineError::UnknownStepKind { kind: kind.clone() }))?;

            tracing::debug!(index, kind = %kind, "Processing step");
            ctx.set_working_canvas(Some(canvas.clone()));
            match handler(canvas, params, &ctx).map_err(|e| wrap(&kind, e))? {
                StepFlow::Continue(next) => canvas = next,
                StepFlow::Stop(last) => {
                    tracing::info!(index, "Step requested stop, finishing early");
                    canvas = last;
                    break;
                }
                StepFlow::Cancel => {
                    tracing::info!(label = face.display_label(), index, "Generation cancelled");
                    return Ok(None);
                }
            }
        }

        tracing::info!(label = face.display_label(), "Card face generated");
        Ok(Some(canvas))
    }
}

/// Cumulative steps in execution order, with their declaration indices.
fn order_steps<'s>(ctx: &FaceContext<'s>) -> EngineResult<Vec<(usize, &'s Value)>> {
    let steps = &ctx.composition().steps;
    let mut priorities = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let priority = match step.get(PRIORITY_KEY) {
            Some(raw) => ctx.resolve(raw).map_err(|source| EngineError::Step {
                face: ctx.face().label.clone(),
                index,
                kind: PRIORITY_KEY.to_string(),
                source: Box::new(source),
            })?,
            None => Value::Null,
        };
        priorities.push(priority);
    }

    let order = priority_order(&priorities);
    if order.len() > 1 && !all_comparable(&priorities) {
        tracing::warn!(
            label = ctx.face().display_label(),
            "Step priorities are not comparable, using declaration order"
        );
    }
    Ok(order.into_iter().map(|i| (i, steps[i])).collect())
}

/// Indices sorted by `(priority, index)`, or declaration order when any two
/// priorities cannot be compared.
pub fn priority_order(priorities: &[Value]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..priorities.len()).collect();
    if all_comparable(priorities) {
        order.sort_by(|&a, &b| {
            compare_priority(&priorities[a], &priorities[b])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
    }
    order
}

fn all_comparable(priorities: &[Value]) -> bool {
    priorities.iter().enumerate().all(|(i, a)| {
        priorities[i + 1..]
            .iter()
            .all(|b| compare_priority(a, b).is_some())
    })
}

/// Ordering between two priorities. Unset (null) sorts after every set
/// priority; numbers, strings and sequences only compare within their kind.
pub fn compare_priority(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Greater),
        (_, Value::Null) => Some(Ordering::Less),
        _ => compare_values(a, b),
    }
}
