//! Preset Steps - the standard step kinds
//!
//! A handler takes ownership of the working canvas and hands back the next
//! one, or tells the scheduler to stop or cancel.

use std::fs;
use std::path::PathBuf;

use crate::cardface::FaceContext;
use crate::error::{EngineError, EngineResult};
use crate::raster::Canvas;
use crate::registry::{Extension, StepFlow, StepHandler};
use crate::resolve::raw_param;
use crate::value::{Handle, Mapping, Value};
use crate::values::{cache_key, text_style};

pub const DEFAULT_EXTENSION: &str = ".tif";
pub const DEFAULT_FILENAME: &str = "card";

pub struct PresetSteps;

impl Extension for PresetSteps {
    fn name(&self) -> &'static str {
        "preset steps"
    }

    fn step_handlers(&self) -> Vec<(&'static str, StepHandler)> {
        vec![
            ("write_to_cache", step_write_to_cache as StepHandler),
            ("paste_image", step_paste_image),
            ("write_text", step_write_text),
            ("save", step_save),
            ("stop", step_stop),
            ("cancel", step_cancel),
        ]
    }
}

/// How `write_to_cache` treats keys that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the key exists.
    Add,
    /// Fail if the key does not exist.
    Update,
    AddOrUpdate,
    /// Leave existing keys alone.
    AddOrSkip,
}

impl WriteMode {
    pub fn parse(name: &str) -> EngineResult<Self> {
        match name {
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            "add_or_update" => Ok(Self::AddOrUpdate),
            "add_or_skip" => Ok(Self::AddOrSkip),
            other => Err(EngineError::UnknownWriteMode(other.to_string())),
        }
    }

    /// Whether to write `key`, given whether it already exists in the cache being checked.
    fn admits(self, key: &str, exists: bool, global: bool) -> EngineResult<bool> {
        match (self, exists) {
            (Self::Add, true) => Err(EngineError::CacheKeyConflict {
                key: key.to_string(),
                global,
            }),
            (Self::Update, false) => Err(EngineError::CacheKeyMissing {
                key: key.to_string(),
                global,
            }),
            (Self::AddOrSkip, true) => Ok(false),
            _ => Ok(true),
        }
    }
}

fn flag(ctx: &FaceContext<'_>, params: &Mapping, name: &str, default: bool) -> EngineResult<bool> {
    Ok(ctx.param_or(params, name, Value::Bool(default))?.is_truthy())
}

/// Values are stored unresolved unless `is_lazy` is false.
fn step_write_to_cache(
    canvas: Canvas,
    params: &Mapping,
    ctx: &FaceContext<'_>,
) -> EngineResult<StepFlow> {
    let mode = WriteMode::parse(
        ctx.param_or(params, "mode", Value::from("add"))?
            .expect_str("mode")?,
    )?;
    let is_lazy = flag(ctx, params, "is_lazy", true)?;
    let is_global = flag(ctx, params, "is_global", false)?;
    let do_log = ctx.should_log(params)?;

    let entries: Vec<(String, Value)> = match params.get("entries") {
        Some(entries) if !entries.is_null() => {
            if params.contains_key("key") || params.contains_key("value") {
                return Err(EngineError::invalid(
                    "entries",
                    "either entries or key and value",
                    "both",
                ));
            }
            entries
                .expect_mapping("entries")?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
        _ => {
            let key = cache_key(&ctx.param(params, "key")?)?;
            vec![(key, raw_param(params, "value")?.clone())]
        }
    };

    for (key, value) in entries {
        let exists = ctx.cache().contains_key(&key);
        if !mode.admits(&key, exists, false)? {
            if do_log {
                tracing::info!(key = %key, "Skipping cache entry, key already exists");
            }
            continue;
        }
        if is_global {
            let exists = ctx.run().global_cache().contains_key(&key);
            if !mode.admits(&key, exists, true)? {
                if do_log {
                    tracing::info!(key = %key, "Skipping cache entry, key already exists globally");
                }
                continue;
            }
        }

        let value = if is_lazy { value } else { ctx.resolve(&value)? };
        if do_log {
            tracing::info!(
                key = %key,
                value = %value,
                ?mode,
                is_lazy,
                is_global,
                "Writing to cache"
            );
        }
        if is_global {
            ctx.run().global_cache_mut().insert(key.clone(), value.clone());
        }
        ctx.cache_mut().insert(key, value);
    }

    Ok(StepFlow::Continue(canvas))
}

fn step_paste_image(
    canvas: Canvas,
    params: &Mapping,
    ctx: &FaceContext<'_>,
) -> EngineResult<StepFlow> {
    let image = ctx.param(params, "image")?;
    let layer = manipulate(image.expect_image("image")?.clone(), params, ctx)?;
    let position = ctx.param(params, "position")?.expect_point("position")?;
    Ok(StepFlow::Continue(place(canvas, &layer, position, params, ctx)?))
}

/// Text is drawn on a layer cropped to its bounding box. `position` is that
/// layer's top-left corner, so `anchor` only changes what `text_bbox` reports.
fn step_write_text(
    canvas: Canvas,
    params: &Mapping,
    ctx: &FaceContext<'_>,
) -> EngineResult<StepFlow> {
    let position = ctx.param(params, "position")?.expect_point("position")?;
    let text = ctx.param(params, "text")?;
    let fill = colour(&ctx.param(params, "fill")?)?;
    let font = ctx.param(params, "font")?;
    let stroke_fill = match ctx.param_opt(params, "stroke_fill")? {
        Some(stroke_fill) => colour(&stroke_fill)?,
        None => fill,
    };
    let style = text_style(params, ctx)?;

    let layer = font
        .expect_font("font")?
        .render(text.expect_str("text")?, fill, stroke_fill, &style);
    let layer = manipulate(layer, params, ctx)?;
    Ok(StepFlow::Continue(place(canvas, &layer, position, params, ctx)?))
}

/// Composite `layer` at `position`, which is its centre when `is_position_centre` is set.
fn place(
    canvas: Canvas,
    layer: &Canvas,
    (mut x, mut y): (f64, f64),
    params: &Mapping,
    ctx: &FaceContext<'_>,
) -> EngineResult<Canvas> {
    if flag(ctx, params, "is_position_centre", false)? {
        x -= f64::from(layer.width()) / 2.0;
        y -= f64::from(layer.height()) / 2.0;
    }
    Ok(canvas.paste(layer, x.round_ties_even() as i64, y.round_ties_even() as i64))
}

/// One axis of a `scale` or `resize_to` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    /// `false`: keep this dimension.
    Keep,
    /// `true`: follow the other axis.
    Follow,
    Amount(f64),
}

fn axis_pair(value: &Value, parameter: &str) -> EngineResult<Option<(Axis, Axis)>> {
    let axis = |v: &Value| -> EngineResult<Axis> {
        Ok(match v {
            Value::Bool(false) => Axis::Keep,
            Value::Bool(true) => Axis::Follow,
            other => Axis::Amount(other.expect_f64(parameter)?),
        })
    };
    match value.expect_sequence(parameter)? {
        [a, b] => {
            let pair = (axis(a)?, axis(b)?);
            // Two booleans give nothing to scale by.
            let numeric = matches!(pair, (Axis::Amount(_), _) | (_, Axis::Amount(_)));
            Ok(numeric.then_some(pair))
        }
        other => Err(EngineError::invalid(
            parameter,
            "pair of numbers or booleans",
            format!("sequence of {}", other.len()),
        )),
    }
}

fn dimension(n: f64) -> u32 {
    n.round_ties_even().max(1.0) as u32
}

/// Crop, scale, resize, rotate and fade, in that order, as the step asks.
fn manipulate(mut image: Canvas, params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<Canvas> {
    if let Some(crop) = ctx.param_opt(params, "crop")? {
        match crop.expect_sequence("crop")? {
            [] => {}
            [l, t, r, b] => {
                image = image.crop(
                    l.expect_u32("crop")?,
                    t.expect_u32("crop")?,
                    r.expect_u32("crop")?,
                    b.expect_u32("crop")?,
                )
            }
            other => {
                return Err(EngineError::invalid(
                    "crop",
                    "[left, top, right, bottom]",
                    format!("sequence of {}", other.len()),
                ))
            }
        }
    }

    if let Some(scale) = ctx.param_opt(params, "scale")? {
        if let Some((sx, sy)) = axis_pair(&scale, "scale")? {
            let (w, h) = (f64::from(image.width()), f64::from(image.height()));
            let factor = |own: Axis, other: Axis| match (own, other) {
                (Axis::Amount(a), _) | (Axis::Follow, Axis::Amount(a)) => a,
                _ => 1.0,
            };
            image = image.resize(dimension(w * factor(sx, sy)), dimension(h * factor(sy, sx)));
        }
    }

    if let Some(resize_to) = ctx.param_opt(params, "resize_to")? {
        if let Some((rw, rh)) = axis_pair(&resize_to, "resize_to")? {
            let (w, h) = (f64::from(image.width()), f64::from(image.height()));
            let width = match (rw, rh) {
                (Axis::Amount(a), _) => a,
                (Axis::Follow, Axis::Amount(target)) => w * (target / h.max(1.0)),
                _ => w,
            };
            let height = match (rh, rw) {
                (Axis::Amount(a), _) => a,
                (Axis::Follow, Axis::Amount(target)) => h * (target / w.max(1.0)),
                _ => h,
            };
            image = image.resize(dimension(width), dimension(height));
        }
    }

    if let Some(degrees) = ctx.param_opt(params, "rotate")? {
        let degrees = degrees.expect_f64("rotate")?;
        if degrees != 0.0 {
            image = image.rotate(degrees);
        }
    }

    if let Some(opacity) = ctx.param_opt(params, "opacity")? {
        image = image.blend(opacity.expect_f64("opacity")?);
    }

    Ok(image)
}

/// `[r, g, b]`, `[r, g, b, a]`, or `#rrggbb` / `#rrggbbaa`.
fn colour(value: &Value) -> EngineResult<[u8; 4]> {
    let channel = |v: &Value| -> EngineResult<u8> {
        Ok(v.expect_f64("fill")?.clamp(0.0, 255.0).round() as u8)
    };
    match value {
        Value::Sequence(items) => match items.as_slice() {
            [r, g, b] => Ok([channel(r)?, channel(g)?, channel(b)?, 255]),
            [r, g, b, a] => Ok([channel(r)?, channel(g)?, channel(b)?, channel(a)?]),
            other => Err(EngineError::invalid(
                "fill",
                "3 or 4 channels",
                format!("sequence of {}", other.len()),
            )),
        },
        Value::String(hex) => {
            let digits = hex.strip_prefix('#').unwrap_or(hex);
            let parsed: Option<Vec<u8>> = (0..digits.len())
                .step_by(2)
                .map(|i| digits.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
                .collect();
            match parsed.as_deref() {
                Some(&[r, g, b]) => Ok([r, g, b, 255]),
                Some(&[r, g, b, a]) => Ok([r, g, b, a]),
                _ => Err(EngineError::invalid("fill", "#rrggbb or #rrggbbaa", hex.clone())),
            }
        }
        other => Err(EngineError::invalid("fill", "colour", other.type_name())),
    }
}

/// Replace characters that are unsafe in file names.
pub fn sanitise_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_end_matches(['.', ' ']).trim();
    if cleaned.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Write the canvas, or `data`, to `path/filename+extension`, replacing any existing file.
fn step_save(canvas: Canvas, params: &Mapping, ctx: &FaceContext<'_>) -> EngineResult<StepFlow> {
    let dir = match ctx.param_opt(params, "path")? {
        Some(path) => PathBuf::from(path.expect_str("path")?),
        None => PathBuf::from(&ctx.run().config().output_dir),
    };
    let filename = match ctx.param_opt(params, "filename")? {
        Some(name) => name.to_string(),
        None => ctx
            .face()
            .label
            .clone()
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
    };
    let extension = ctx.param_or(params, "extension", Value::from(DEFAULT_EXTENSION))?;
    let file_name = format!(
        "{}{}",
        sanitise_filename(&filename),
        extension.expect_str("extension")?
    );

    fs::create_dir_all(&dir)?;
    let full_path = dir.join(&file_name);
    match ctx.param_opt(params, "data")? {
        None => canvas.save(&full_path)?,
        Some(Value::Handle(Handle::Image(image))) => image.save(&full_path)?,
        Some(Value::String(text)) => fs::write(&full_path, text)?,
        Some(other) => {
            return Err(EngineError::invalid("data", "image or string", other.type_name()))
        }
    }

    tracing::info!(
        label = ctx.face().display_label(),
        path = %full_path.display(),
        "Card face saved"
    );
    Ok(StepFlow::Continue(canvas))
}

fn step_stop(canvas: Canvas, _: &Mapping, _: &FaceContext<'_>) -> EngineResult<StepFlow> {
    Ok(StepFlow::Stop(canvas))
}

fn step_cancel(_: Canvas, _: &Mapping, _: &FaceContext<'_>) -> EngineResult<StepFlow> {
    Ok(StepFlow::Cancel)
}
