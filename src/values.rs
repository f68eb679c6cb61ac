//! Preset Values - the standard deferred expression kinds
//!
//! Each resolver receives the raw expression mapping and resolves only the
//! parameters it needs. Returning another expression is fine: resolution keeps
//! unwrapping until a plain value comes back.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::calc;
use crate::cardface::FaceContext;
use crate::error::{EngineError, EngineResult};
use crate::hashing::seed_from_value;
use crate::raster::{Anchor, Canvas, FontHandle, TextAlign, TextStyle, DEFAULT_FONT_SIZE};
use crate::registry::{Extension, Resolver};
use crate::value::{Handle, Mapping, Value, DEFERRED_KEY};

pub struct PresetValues;

impl Extension for PresetValues {
    fn name(&self) -> &'static str {
        "preset values"
    }

    fn resolvers(&self) -> Vec<(&'static str, Resolver)> {
        vec![
            ("self", resolve_self as Resolver),
            ("parent", resolve_parent),
            ("config", resolve_config),
            ("cached", resolve_cached),
            ("calc", resolve_calculation),
            ("seeded", resolve_seeded_random),
            ("mapped", resolve_mapped),
            ("card_dim", resolve_card_dimension),
            ("working_image", resolve_working_image),
            ("image_from_file", resolve_image_from_file),
            ("blank_image", resolve_blank_image),
            ("image_from_template", resolve_image_from_template),
            ("font", resolve_font),
            ("text_length", resolve_text_length),
            ("text_bbox", resolve_text_bbox),
        ]
    }
}

/// Cache keys are strings; numbers and booleans are accepted in their text form.
pub(crate) fn cache_key(key: &Value) -> EngineResult<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(_) | Value::Bool(_) => Ok(key.to_string()),
        other => Err(EngineError::invalid("key", "string", other.type_name())),
    }
}

fn resolve_self(_: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    Ok(ctx.snapshot())
}

fn resolve_parent(_: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    Ok(ctx.parent().map_or(Value::Null, |parent| parent.snapshot()))
}

fn resolve_config(_: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    Ok(Value::Mapping(ctx.run().config().values.clone()))
}

/// The stored value comes back unresolved, so lazy entries evaluate on every read.
fn resolve_cached(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let key = cache_key(&ctx.param(params, "key")?)?;
    if let Some(value) = ctx.cache().get(&key) {
        return Ok(value.clone());
    }
    match params.get("default") {
        Some(default) => Ok(default.clone()),
        None => Err(EngineError::CacheKeyMissing { key, global: false }),
    }
}

fn resolve_calculation(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let op = ctx.param(params, "op")?;
    let op = op.expect_str("op")?;
    let args = ctx.param(params, "args")?;
    let args = args.expect_sequence("args")?;

    let result = calc::calculate(op, args)?;
    if ctx.should_log(params)? {
        let shown = Value::Sequence(args.to_vec());
        tracing::info!(
            op,
            args = %shown,
            result = %result,
            "Performing calculation"
        );
    }
    Ok(result)
}

/// A float in [0, 1): the (n+1)th draw from an RNG seeded by `seed`.
fn resolve_seeded_random(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let seed = ctx.param(params, "seed")?;
    let skip = ctx
        .param_or(params, "n", Value::Number(0.0))?
        .expect_usize("n")?;

    let mut rng = StdRng::seed_from_u64(seed_from_value(&seed));
    for _ in 0..skip {
        rng.gen::<f64>();
    }
    Ok(Value::Number(rng.gen::<f64>()))
}

/// One copy of `map_to` per value, each with `key` set to that value.
fn resolve_mapped(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let map_to = ctx.param(params, "map_to")?;
    let template = map_to.expect_mapping("map_to")?;
    let key = cache_key(&ctx.param(params, "key")?)?;
    let values = ctx.param(params, "values")?;
    let values = values.expect_sequence("values")?;
    let tag = ctx.param_opt(params, "map_deferred_type")?;

    let mapped = values
        .iter()
        .map(|value| {
            let mut copy = template.clone();
            copy.insert(key.clone(), value.clone());
            if let Some(tag) = &tag {
                copy.insert(DEFERRED_KEY.to_string(), tag.clone());
            }
            Value::Mapping(copy)
        })
        .collect();
    Ok(Value::Sequence(mapped))
}

fn resolve_card_dimension(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let dimension = ctx.param(params, "dimension")?;
    let (width, height) = ctx
        .size()
        .ok_or_else(|| EngineError::invalid("dimension", "a sized card face", "no size"))?;
    match dimension.expect_str("dimension")? {
        "width" => Ok(Value::Number(width.into())),
        "height" => Ok(Value::Number(height.into())),
        other => Err(EngineError::invalid("dimension", "width or height", other)),
    }
}

fn resolve_working_image(_: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    Ok(Value::from(ctx.working_canvas()))
}

fn resolve_image_from_file(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let src = ctx.param(params, "src")?;
    Ok(Value::from(Canvas::load(Path::new(src.expect_str("src")?))?))
}

fn resolve_blank_image(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let (width, height) = ctx.param(params, "size")?.expect_size("size")?;
    Ok(Value::from(Canvas::new(width, height)))
}

/// Generates a pool member with this face as its parent.
fn resolve_image_from_template(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let label = ctx.param(params, "label")?;
    let label = label.expect_str("label")?;
    let run = ctx.run();
    let template = run
        .pool()
        .lookup(label)
        .ok_or_else(|| EngineError::UnknownTemplate(label.to_string()))?;
    Ok(Value::from(run.generate_nested(template, Some(ctx))?))
}

fn resolve_font(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let src = ctx.param(params, "src")?;
    let font_type = ctx.param_or(params, "type", Value::from("truetype"))?;
    if font_type.expect_str("type")? != "truetype" {
        return Err(EngineError::invalid("type", "truetype", font_type.to_string()));
    }
    let size = match ctx.param_opt(params, "size")? {
        Some(size) => size.expect_f64("size")? as f32,
        None => DEFAULT_FONT_SIZE,
    };
    let index = match ctx.param_opt(params, "index")? {
        Some(index) => index.expect_u32("index")?,
        None => 0,
    };

    let font = FontHandle::load(Path::new(src.expect_str("src")?), size, index)?;
    Ok(Value::Handle(Handle::Font(font)))
}

fn resolve_text_length(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let text = ctx.param(params, "text")?;
    let font = ctx.param(params, "font")?;
    let width = font.expect_font("font")?.measure(text.expect_str("text")?);
    Ok(Value::Number(width.into()))
}

fn resolve_text_bbox(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Value> {
    let text = ctx.param(params, "text")?;
    let font = ctx.param(params, "font")?;
    let position = match ctx.param_opt(params, "position")? {
        Some(position) => position.expect_point("position")?,
        None => (0.0, 0.0),
    };
    let style = text_style(params, ctx)?;

    let bbox = font
        .expect_font("font")?
        .bbox(text.expect_str("text")?, position, &style);
    Ok(Value::Sequence(bbox.into_iter().map(Value::Number).collect()))
}

/// `spacing`, `align`, `anchor` and `stroke_width`, shared by `text_bbox` and `write_text`.
pub(crate) fn text_style(params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<TextStyle> {
    let mut style = TextStyle::default();
    if let Some(spacing) = ctx.param_opt(params, "spacing")? {
        style.spacing = spacing.expect_f64("spacing")? as f32;
    }
    if let Some(align) = ctx.param_opt(params, "align")? {
        style.align = TextAlign::parse(align.expect_str("align")?)?;
    }
    if let Some(anchor) = ctx.param_opt(params, "anchor")? {
        style.anchor = Anchor::parse(anchor.expect_str("anchor")?)?;
    }
    if let Some(width) = ctx.param_opt(params, "stroke_width")? {
        style.stroke_width = width.expect_u32("stroke_width")?;
    }
    Ok(style)
}
