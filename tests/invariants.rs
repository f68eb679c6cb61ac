//! Engine Invariant Tests
//!
//! These tests verify the guarantees every generation relies on.

use cardcomposer_core::{
    priority_order, Canvas, Capabilities, CardFace, Deck, EngineConfig, EngineError,
    FaceOutcome, GenerationRun, Mapping, TemplatePool, Value,
};
use image::{Rgba, RgbaImage};
use serde_json::json;
use tempfile::TempDir;

fn value(json: serde_json::Value) -> Value {
    Value::from(json)
}

fn steps(json: serde_json::Value) -> Vec<Value> {
    match value(json) {
        Value::Sequence(steps) => steps,
        other => panic!("steps must be a list, got {other}"),
    }
}

fn dot(dir: &TempDir) -> String {
    let path = dir.path().join("dot.png");
    Canvas::from_image(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 255, 255])))
        .save(&path)
        .unwrap();
    path.display().to_string()
}

fn paste_dot(src: &str, x: u32) -> serde_json::Value {
    json!({"type": "paste_image", "image": {"deferred": "image_from_file", "src": src},
           "position": [x, 0]})
}

#[test]
fn invariant_resolving_plain_data_is_identity() {
    let caps = Capabilities::standard().unwrap();
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);
    let face = CardFace::new().with_size(1, 1);
    let ctx = run.context_for(&face, None).unwrap();

    let plain = value(json!({
        "title": "Ace",
        "ranks": [1, 2.5, -3, null, true],
        "nested": {"deep": {"list": [[], {}], "type": "not a step"}}
    }));
    assert_eq!(ctx.resolve(&plain).unwrap(), plain);
}

#[test]
fn invariant_cache_write_modes() {
    let caps = Capabilities::standard().unwrap();
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);

    let write = |mode: &str, key: &str, v: i32| {
        json!({"type": "write_to_cache", "key": key, "value": v, "mode": mode, "is_global": true})
    };

    let conflict = CardFace::new()
        .with_size(1, 1)
        .with_steps(steps(json!([write("add", "a", 1), write("add", "a", 2)])));
    assert!(matches!(
        run.generate(&conflict).unwrap_err().root_cause(),
        EngineError::CacheKeyConflict { .. }
    ));

    let missing = CardFace::new()
        .with_size(1, 1)
        .with_steps(steps(json!([write("update", "never", 1)])));
    assert!(matches!(
        run.generate(&missing).unwrap_err().root_cause(),
        EngineError::CacheKeyMissing { .. }
    ));

    let lenient = CardFace::new().with_size(1, 1).with_steps(steps(json!([
        write("add_or_update", "b", 1),
        write("add_or_update", "b", 2),
        write("add_or_skip", "c", 3),
        write("add_or_skip", "c", 4)
    ])));
    let fresh = GenerationRun::new(&caps, &pool, &config);
    assert!(fresh.generate(&lenient).unwrap().is_some());
    let global = fresh.into_global_cache();
    assert_eq!(global.get("b"), Some(&Value::Number(2.0)));
    assert_eq!(global.get("c"), Some(&Value::Number(3.0)));
}

#[test]
fn invariant_seeded_values_are_reproducible() {
    let caps = Capabilities::standard().unwrap();
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);
    let face = CardFace::new().with_size(1, 1);

    let draw = |n: usize| {
        let ctx = run.context_for(&face, None).unwrap();
        ctx.resolve(&value(json!({"deferred": "seeded", "seed": [1, "deck"], "n": n})))
            .unwrap()
    };

    let sequence: Vec<Value> = (0..5).map(draw).collect();
    let again: Vec<Value> = (0..5).map(draw).collect();
    assert_eq!(sequence, again);
    for pair in sequence.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[test]
fn invariant_size_inheritance() {
    let small = CardFace::new().with_label("small").with_size(10, 10);
    let large = CardFace::new().with_label("large").with_size(50, 70);
    let mut pool = TemplatePool::new();
    pool.register(&small).unwrap();
    pool.register(&large).unwrap();

    let inherits = CardFace::new().with_templates(["small", "large"]);
    assert_eq!(pool.compose(&inherits).unwrap().size, Some((50, 70)));

    let reversed = CardFace::new().with_templates(["large", "small"]);
    assert_eq!(pool.compose(&reversed).unwrap().size, Some((10, 10)));

    let explicit = CardFace::new()
        .with_templates(["small", "large"])
        .with_size(3, 4);
    assert_eq!(pool.compose(&explicit).unwrap().size, Some((3, 4)));
}

#[test]
fn invariant_step_ordering() {
    let order = |priorities: serde_json::Value| match value(priorities) {
        Value::Sequence(p) => priority_order(&p),
        _ => unreachable!(),
    };

    assert_eq!(order(json!([null, 2, null, 1])), vec![3, 1, 0, 2]);
    assert_eq!(order(json!([5, "a"])), vec![0, 1]);
    assert_eq!(order(json!([3, 2, "a", 1])), vec![0, 1, 2, 3]);
}

#[test]
fn invariant_steps_run_in_priority_order() {
    let caps = Capabilities::standard().unwrap();
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);

    let face = CardFace::new().with_size(1, 1).with_steps(steps(json!([
        {"type": "write_to_cache", "key": "log", "value": "late", "mode": "add_or_update",
         "is_global": true},
        {"type": "write_to_cache", "key": "log", "value": "early", "mode": "add_or_update",
         "is_global": true, "priority": 0}
    ])));
    run.generate(&face).unwrap();
    assert_eq!(run.global_cache().get("log"), Some(&Value::from("late")));
}

#[test]
fn invariant_template_cycle_is_detected() {
    let a = CardFace::new().with_label("A").with_templates(["B"]).with_size(1, 1);
    let b = CardFace::new().with_label("B").with_templates(["A"]);
    let mut pool = TemplatePool::new();
    pool.register(&a).unwrap();
    pool.register(&b).unwrap();

    match pool.compose(&a) {
        Err(EngineError::TemplateCycle { chain }) => assert_eq!(chain, vec!["A", "B", "A"]),
        other => panic!("expected a cycle, got {other:?}"),
    }

    let caps = Capabilities::standard().unwrap();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);
    assert!(matches!(
        run.generate(&a),
        Err(EngineError::TemplateCycle { .. })
    ));
}

#[test]
fn invariant_stop_keeps_prior_steps_only() {
    let dir = TempDir::new().unwrap();
    let src = dot(&dir);
    let caps = Capabilities::standard().unwrap();
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);

    let face = CardFace::new().with_size(5, 1).with_steps(steps(json!([
        paste_dot(&src, 0),
        paste_dot(&src, 1),
        {"type": "stop"},
        paste_dot(&src, 3),
        paste_dot(&src, 4)
    ])));
    let canvas = run.generate(&face).unwrap().unwrap();
    assert_eq!(canvas.pixel(0, 0), Some([0, 0, 255, 255]));
    assert_eq!(canvas.pixel(1, 0), Some([0, 0, 255, 255]));
    assert_eq!(canvas.pixel(3, 0), Some([0, 0, 0, 0]));
    assert_eq!(canvas.pixel(4, 0), Some([0, 0, 0, 0]));
}

#[test]
fn invariant_cancel_returns_nothing_but_keeps_side_effects() {
    let dir = TempDir::new().unwrap();
    let src = dot(&dir);
    let caps = Capabilities::standard().unwrap();
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);

    let face = CardFace::new().with_size(5, 1).with_steps(steps(json!([
        paste_dot(&src, 0),
        {"type": "write_to_cache", "key": "written", "value": true, "is_global": true},
        {"type": "cancel"},
        paste_dot(&src, 1)
    ])));
    assert!(run.generate(&face).unwrap().is_none());
    assert_eq!(run.global_cache().get("written"), Some(&Value::Bool(true)));
}

#[test]
fn invariant_end_to_end_template_inheritance() {
    let template = CardFace::new()
        .with_label("T")
        .with_size(100, 100)
        .as_template()
        .with_steps(steps(json!([
            {"type": "write_to_cache", "key": "x", "value": 10}
        ])));
    let face = CardFace::new()
        .with_label("F")
        .with_templates(["T"])
        .with_steps(steps(json!([
            {"type": "write_to_cache", "key": "y",
             "value": {"deferred": "calc", "op": "+",
                       "args": [{"deferred": "cached", "key": "x"}, 5]}},
            {"type": "write_to_cache", "key": "resolved_y", "is_lazy": false, "is_global": true,
             "value": {"deferred": "cached", "key": "y"}}
        ])));
    let mut pool = TemplatePool::new();
    pool.register(&template).unwrap();
    pool.register(&face).unwrap();

    let caps = Capabilities::standard().unwrap();
    let config = EngineConfig::default();
    let run = GenerationRun::new(&caps, &pool, &config);
    let canvas = run.generate(&face).unwrap().unwrap();

    assert_eq!(canvas.size(), (100, 100));
    assert_eq!(run.global_cache().get("resolved_y"), Some(&Value::Number(15.0)));
}

#[test]
fn invariant_failed_face_does_not_affect_others() {
    let deck = Deck::from_definitions(
        serde_json::from_value(json!([
            {"label": "bad", "size": [1, 1], "steps": [
                {"type": "write_to_cache", "key": "k", "value": {"deferred": "nope"},
                 "is_lazy": false}
            ]},
            {"label": "good", "size": [2, 2]}
        ]))
        .unwrap(),
    );
    let caps = Capabilities::standard().unwrap();
    let report = deck.generate_all(&caps, &EngineConfig::default()).unwrap();

    match &report.faces[0].outcome {
        FaceOutcome::Failed { error } => {
            assert!(error.contains("bad"));
            assert!(error.contains("write_to_cache"));
            assert!(error.contains("nope"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.faces[1].outcome, FaceOutcome::Rendered { width: 2, height: 2 });
}

#[test]
fn invariant_duplicate_registration_is_rejected() {
    let err = Capabilities::compose(
        &Capabilities::empty(),
        &[
            &cardcomposer_core::PresetValues,
            &cardcomposer_core::PresetValues,
        ],
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRegistration { .. }));
}

#[test]
fn invariant_global_cache_round_trips() {
    let caps = Capabilities::standard().unwrap();
    let pool = TemplatePool::new();
    let config = EngineConfig::default();
    let mut seed = Mapping::new();
    seed.insert("edition".into(), Value::from("first"));

    let run = GenerationRun::new(&caps, &pool, &config).with_global_cache(seed.clone());
    assert_eq!(run.into_global_cache(), seed);
}
