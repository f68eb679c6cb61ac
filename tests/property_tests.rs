//! # Property-Based Tests
//!
//! These tests ensure determinism and identity invariants of resolution.

use cardcomposer_core::calc::calculate;
use cardcomposer_core::{
    priority_order, Capabilities, CardFace, EngineConfig, GenerationRun, TemplatePool, Value,
};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::json;

// =============================================================================
// STRATEGIES
// =============================================================================

/// JSON-shaped data that contains no deferred expressions.
fn plain_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-10_000i64..10_000).prop_map(|n| Value::Number(n as f64)),
        (-1000.0f64..1000.0).prop_map(Value::Number),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 64, 6, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..6).prop_map(Value::Sequence),
            btree_map("k[a-z]{0,5}", inner, 0..6).prop_map(Value::Mapping),
        ]
    })
}

fn with_context<T>(f: impl FnOnce(&cardcomposer_core::FaceContext<'_>) -> T) -> T {
    let caps = Capabilities::standard().expect("capabilities");
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);
    let face = CardFace::new().with_size(10, 10);
    let ctx = run.context_for(&face, None).expect("context");
    f(&ctx)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Resolving data without expressions returns it unchanged.
    #[test]
    fn resolution_of_plain_data_is_identity(value in plain_value()) {
        let resolved = with_context(|ctx| ctx.resolve(&value).expect("resolve"));
        prop_assert_eq!(resolved, value);
    }

    /// Same seed and skip count always give the same draw, inside [0, 1).
    #[test]
    fn seeded_values_are_deterministic(seed in "[a-z0-9]{1,16}", n in 0usize..32) {
        let expr = Value::from(json!({"deferred": "seeded", "seed": seed, "n": n}));
        let first = with_context(|ctx| ctx.resolve(&expr).expect("resolve"));
        let second = with_context(|ctx| ctx.resolve(&expr).expect("resolve"));
        prop_assert_eq!(&first, &second);

        let draw = first.as_f64().expect("number");
        prop_assert!((0.0..1.0).contains(&draw));
    }

    /// Ordering is always a permutation of the step indices.
    #[test]
    fn priority_order_is_permutation(priorities in vec(plain_value(), 0..12)) {
        let mut order = priority_order(&priorities);
        order.sort_unstable();
        prop_assert_eq!(order, (0..priorities.len()).collect::<Vec<_>>());
    }

    /// Numeric priorities sort ascending, ties keeping declaration order.
    #[test]
    fn numeric_priorities_sort_stably(raw in vec(prop::option::of(-5i64..5), 0..12)) {
        let priorities: Vec<Value> = raw
            .iter()
            .map(|p| p.map_or(Value::Null, |n| Value::Number(n as f64)))
            .collect();
        let order = priority_order(&priorities);

        let key = |i: usize| (raw[i].is_none(), raw[i].unwrap_or(0), i);
        for pair in order.windows(2) {
            prop_assert!(key(pair[0]) < key(pair[1]));
        }
    }

    /// Integer addition matches the host arithmetic.
    #[test]
    fn calc_addition_matches_integers(
        a in -1_000_000i64..1_000_000,
        b in -1_000_000i64..1_000_000
    ) {
        let sum = calculate("+", &[Value::Number(a as f64), Value::Number(b as f64)])
            .expect("calculate");
        prop_assert_eq!(sum, Value::Number((a + b) as f64));
    }
}
