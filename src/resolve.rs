//! Deferred Value Resolution
//!
//! Every resolver and step handler calls [`FaceContext::resolve`] on its own
//! parameters, so expressions nest to any depth.

use crate::cardface::FaceContext;
use crate::error::{EngineError, EngineResult};
use crate::value::{Mapping, Value, DEFERRED_KEY};

/// Key carrying a step's kind.
pub const TYPE_KEY: &str = "type";
/// Optional flag enabling logging for one expression or step.
pub const DO_LOG_KEY: &str = "do_log";

impl FaceContext<'_> {
    /// Resolve a value tree. The input is never modified.
    pub fn resolve(&self, value: &Value) -> EngineResult<Value> {
        self.resolve_owned(value.clone())
    }

    fn resolve_owned(&self, value: Value) -> EngineResult<Value> {
        let config = self.run().config();
        let depth = self.depth().get();
        if depth >= config.max_resolution_depth {
            return Err(EngineError::ResolutionOverflow {
                limit: config.max_resolution_depth,
            });
        }
        self.depth().set(depth + 1);
        let result = self.unwrap_and_descend(value);
        self.depth().set(depth);
        result
    }

    fn unwrap_and_descend(&self, mut working: Value) -> EngineResult<Value> {
        let limit = self.run().config().max_resolution_chain;
        let mut chain = 0;

        while let Value::Mapping(params) = &working {
            let Some(kind) = working.deferred_kind()? else {
                break;
            };
            if chain == limit {
                return Err(EngineError::ResolutionOverflow { limit });
            }
            chain += 1;

            let resolver = self
                .run()
                .capabilities()
                .resolvers
                .get(kind)
                .ok_or_else(|| EngineError::UnknownExpressionKind {
                    kind: kind.to_string(),
                })?;
            working = resolver(params, self)?;
        }

        match working {
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve_owned(item))
                .collect::<EngineResult<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => map
                .into_iter()
                .map(|(key, item)| Ok((key, self.resolve_owned(item)?)))
                .collect::<EngineResult<Mapping>>()
                .map(Value::Mapping),
            other => Ok(other),
        }
    }

    /// A required parameter, resolved.
    pub fn param(&self, params: &Mapping, name: &str) -> EngineResult<Value> {
        self.resolve(raw_param(params, name)?)
    }

    /// An optional parameter, resolved, falling back to `default` when absent.
    pub fn param_or(&self, params: &Mapping, name: &str, default: Value) -> EngineResult<Value> {
        match params.get(name) {
            Some(value) => self.resolve(value),
            None => Ok(default),
        }
    }

    /// An optional parameter, resolved. An explicit null counts as absent.
    pub fn param_opt(&self, params: &Mapping, name: &str) -> EngineResult<Option<Value>> {
        match params.get(name) {
            Some(value) => {
                let resolved = self.resolve(value)?;
                Ok((!resolved.is_null()).then_some(resolved))
            }
            None => Ok(None),
        }
    }

    /// Whether this expression or step asked to be logged.
    pub fn should_log(&self, params: &Mapping) -> EngineResult<bool> {
        if self.run().config().do_log_all {
            return Ok(true);
        }
        Ok(self
            .param_opt(params, DO_LOG_KEY)?
            .is_some_and(|flag| flag.is_truthy()))
    }
}

/// A required parameter left unresolved.
pub fn raw_param<'p>(params: &'p Mapping, name: &str) -> EngineResult<&'p Value> {
    params
        .get(name)
        .ok_or_else(|| EngineError::missing(context_name(params), name))
}

/// The expression kind or step type a parameter mapping belongs to.
pub fn context_name(params: &Mapping) -> String {
    params
        .get(DEFERRED_KEY)
        .or_else(|| params.get(TYPE_KEY))
        .and_then(Value::as_str)
        .unwrap_or("step")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cardface::CardFace;
    use crate::config::EngineConfig;
    use crate::pool::TemplatePool;
    use crate::registry::Capabilities;
    use crate::scheduler::GenerationRun;
    use serde_json::json;

    fn with_context<T>(config: EngineConfig, f: impl FnOnce(&FaceContext<'_>) -> T) -> T {
        let caps = Capabilities::standard().unwrap();
        let pool = TemplatePool::new();
        let run = GenerationRun::new(&caps, &pool, &config);
        let face = CardFace::new().with_size(10, 20);
        let ctx = run.context_for(&face, None).unwrap();
        f(&ctx)
    }

    #[test]
    fn test_plain_values_are_returned_unchanged() {
        with_context(EngineConfig::default(), |ctx| {
            let value = Value::from(json!({"a": [1, "two", {"b": null}], "c": true}));
            assert_eq!(ctx.resolve(&value).unwrap(), value);
        });
    }

    #[test]
    fn test_nested_expressions_inside_plain_containers() {
        with_context(EngineConfig::default(), |ctx| {
            let value = Value::from(json!({
                "size": [{"deferred": "card_dim", "dimension": "width"},
                         {"deferred": "card_dim", "dimension": "height"}],
                "label": "x"
            }));
            let resolved = ctx.resolve(&value).unwrap();
            assert_eq!(resolved.to_json(), json!({"size": [10, 20], "label": "x"}));
        });
    }

    #[test]
    fn test_input_is_not_mutated() {
        with_context(EngineConfig::default(), |ctx| {
            let value = Value::from(json!([{"deferred": "calc", "op": "+", "args": [1, 2]}]));
            let before = value.clone();
            let _ = ctx.resolve(&value).unwrap();
            assert_eq!(value, before);
        });
    }

    #[test]
    fn test_unknown_kind_fails() {
        with_context(EngineConfig::default(), |ctx| {
            let value = Value::from(json!({"deferred": "nope"}));
            assert!(matches!(
                ctx.resolve(&value),
                Err(EngineError::UnknownExpressionKind { ref kind }) if kind == "nope"
            ));
        });
    }

    #[test]
    fn test_self_referencing_cache_entry_overflows() {
        with_context(EngineConfig::default(), |ctx| {
            ctx.cache_mut().insert(
                "loop".into(),
                Value::from(json!({"deferred": "cached", "key": "loop"})),
            );
            let value = Value::from(json!({"deferred": "cached", "key": "loop"}));
            assert!(matches!(
                ctx.resolve(&value),
                Err(EngineError::ResolutionOverflow { .. })
            ));
        });
    }

    #[test]
    fn test_recursive_cache_entry_hits_depth_limit() {
        let config = EngineConfig {
            max_resolution_depth: 16,
            ..EngineConfig::default()
        };
        with_context(config, |ctx| {
            ctx.cache_mut().insert(
                "n".into(),
                Value::from(json!({"deferred": "calc", "op": "+",
                                   "args": [{"deferred": "cached", "key": "n"}, 1]})),
            );
            let value = Value::from(json!({"deferred": "cached", "key": "n"}));
            assert!(matches!(
                ctx.resolve(&value),
                Err(EngineError::ResolutionOverflow { limit: 16 })
            ));
            assert_eq!(ctx.depth().get(), 0);
        });
    }

    #[test]
    fn test_missing_parameter_names_expression() {
        with_context(EngineConfig::default(), |ctx| {
            let value = Value::from(json!({"deferred": "card_dim"}));
            match ctx.resolve(&value) {
                Err(EngineError::MissingParameter { context, parameter }) => {
                    assert_eq!(context, "card_dim");
                    assert_eq!(parameter, "dimension");
                }
                other => panic!("unexpected {other:?}"),
            }
        });
    }

    #[test]
    fn test_param_opt_treats_null_as_absent() {
        with_context(EngineConfig::default(), |ctx| {
            let params = Value::from(json!({"a": null, "b": 3}));
            let params = params.expect_mapping("params").unwrap();
            assert_eq!(ctx.param_opt(params, "a").unwrap(), None);
            assert_eq!(ctx.param_opt(params, "missing").unwrap(), None);
            assert_eq!(ctx.param_opt(params, "b").unwrap(), Some(Value::Number(3.0)));
        });
    }
}
