//! Raster Collaborator
//!
//! The only module that touches pixels. Everything above it deals in
//! [`Canvas`] and [`FontHandle`] values and their sizes.

use ab_glyph::{Font, FontArc, FontVec, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// PIL's default font size; kept so existing definitions measure the same.
pub const DEFAULT_FONT_SIZE: f32 = 10.0;
/// Extra pixels between lines of multi-line text.
pub const DEFAULT_LINE_SPACING: f32 = 4.0;

/// An RGBA image. Clones share pixels until one of them is modified.
#[derive(Clone)]
pub struct Canvas(Arc<RgbaImage>);

impl Canvas {
    /// A fully transparent canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self(Arc::new(RgbaImage::new(width, height)))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self(Arc::new(image))
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        Ok(Self::from_image(image::open(path)?.to_rgba8()))
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        self.0.save(path)?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.0.get_pixel_checked(x, y).map(|p| p.0)
    }

    pub fn same_as(&self, other: &Canvas) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Alpha-aware "over" of `layer` with its top-left at (x, y), clipped to this canvas.
    pub fn paste(mut self, layer: &Canvas, x: i64, y: i64) -> Self {
        imageops::overlay(Arc::make_mut(&mut self.0), layer.image(), x, y);
        self
    }

    /// Alpha-aware "over" of a same-origin overlay.
    pub fn composite(self, overlay: &Canvas) -> Self {
        self.paste(overlay, 0, 0)
    }

    /// Crop to the box (left, top, right, bottom), clamped to the image.
    pub fn crop(&self, left: u32, top: u32, right: u32, bottom: u32) -> Self {
        let right = right.min(self.width());
        let bottom = bottom.min(self.height());
        let left = left.min(right);
        let top = top.min(bottom);
        Self::from_image(
            imageops::crop_imm(self.image(), left, top, right - left, bottom - top).to_image(),
        )
    }

    pub fn resize(&self, width: u32, height: u32) -> Self {
        Self::from_image(imageops::resize(self.image(), width, height, FilterType::Lanczos3))
    }

    /// Counter-clockwise rotation in degrees about the centre; size is kept.
    pub fn rotate(&self, degrees: f64) -> Self {
        let radians = -(degrees.to_radians()) as f32;
        Self::from_image(rotate_about_center(
            self.image(),
            radians,
            Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
        ))
    }

    /// Scale the alpha channel by `alpha` (clamped to 0..=1).
    pub fn blend(mut self, alpha: f64) -> Self {
        let alpha = alpha.clamp(0.0, 1.0);
        for pixel in Arc::make_mut(&mut self.0).pixels_mut() {
            pixel.0[3] = (f64::from(pixel.0[3]) * alpha).round() as u8;
        }
        self
    }
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Canvas({}x{})", self.width(), self.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl TextAlign {
    pub fn parse(name: &str) -> EngineResult<Self> {
        match name {
            "left" => Ok(Self::Left),
            "center" | "centre" => Ok(Self::Center),
            "right" => Ok(Self::Right),
            other => Err(EngineError::invalid("align", "left, center or right", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum HorizontalAnchor {
    #[default]
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum VerticalAnchor {
    #[default]
    Ascender,
    Top,
    Middle,
    Baseline,
    Bottom,
    Descender,
}

/// Which point of a text block `position` refers to, as a two-letter code:
/// `l`, `m` or `r` across, then `a`, `t`, `m`, `s`, `b` or `d` down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Anchor {
    horizontal: HorizontalAnchor,
    vertical: VerticalAnchor,
}

impl Anchor {
    pub fn parse(code: &str) -> EngineResult<Self> {
        let invalid = || EngineError::invalid("anchor", "a two-letter anchor such as 'la'", code);
        let mut chars = code.chars();
        let (Some(h), Some(v), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(invalid());
        };
        let horizontal = match h {
            'l' => HorizontalAnchor::Left,
            'm' => HorizontalAnchor::Middle,
            'r' => HorizontalAnchor::Right,
            _ => return Err(invalid()),
        };
        let vertical = match v {
            'a' => VerticalAnchor::Ascender,
            't' => VerticalAnchor::Top,
            'm' => VerticalAnchor::Middle,
            's' => VerticalAnchor::Baseline,
            'b' => VerticalAnchor::Bottom,
            'd' => VerticalAnchor::Descender,
            _ => return Err(invalid()),
        };
        Ok(Self {
            horizontal,
            vertical,
        })
    }
}

/// Layout options shared by measuring and drawing text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub spacing: f32,
    pub align: TextAlign,
    pub anchor: Anchor,
    pub stroke_width: u32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            spacing: DEFAULT_LINE_SPACING,
            align: TextAlign::default(),
            anchor: Anchor::default(),
            stroke_width: 0,
        }
    }
}

/// A loaded font at a fixed pixel size.
#[derive(Clone)]
pub struct FontHandle {
    font: Arc<FontArc>,
    size: f32,
}

impl FontHandle {
    pub fn load(path: &Path, size: f32, index: u32) -> EngineResult<Self> {
        let data = fs::read(path)?;
        let font = FontVec::try_from_vec_and_index(data, index).map_err(|e| EngineError::Font {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            font: Arc::new(FontArc::new(font)),
            size,
        })
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn same_as(&self, other: &FontHandle) -> bool {
        Arc::ptr_eq(&self.font, &other.font) && self.size == other.size
    }

    fn scale(&self) -> PxScale {
        PxScale::from(self.size)
    }

    fn line_height(&self) -> f32 {
        let scaled = self.font.as_scaled(self.scale());
        scaled.ascent() - scaled.descent()
    }

    /// Advance width of a single line, including kerning.
    pub fn line_width(&self, text: &str) -> f32 {
        let scaled = self.font.as_scaled(self.scale());
        let mut width = 0.0;
        let mut previous = None;
        for c in text.chars() {
            let glyph = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, glyph);
            }
            width += scaled.h_advance(glyph);
            previous = Some(glyph);
        }
        width
    }

    /// Widest line of possibly multi-line text.
    pub fn measure(&self, text: &str) -> f32 {
        text.lines().map(|line| self.line_width(line)).fold(0.0, f32::max)
    }

    /// Width and height of the glyph block, before any stroke.
    fn block_size(&self, text: &str, spacing: f32) -> (f32, f32) {
        let lines = text.lines().count().max(1) as f32;
        let height = lines * self.line_height() + (lines - 1.0) * spacing;
        (self.measure(text), height)
    }

    /// Offset of the anchor point from the block's top-left corner.
    fn anchor_offset(&self, anchor: Anchor, width: f32, height: f32) -> (f32, f32) {
        let x = match anchor.horizontal {
            HorizontalAnchor::Left => 0.0,
            HorizontalAnchor::Middle => width / 2.0,
            HorizontalAnchor::Right => width,
        };
        let y = match anchor.vertical {
            VerticalAnchor::Ascender | VerticalAnchor::Top => 0.0,
            VerticalAnchor::Middle => height / 2.0,
            VerticalAnchor::Baseline => self.font.as_scaled(self.scale()).ascent(),
            VerticalAnchor::Bottom | VerticalAnchor::Descender => height,
        };
        (x, y)
    }

    /// Bounding box (x0, y0, x1, y1) of text whose anchor sits at `position`.
    pub fn bbox(&self, text: &str, position: (f64, f64), style: &TextStyle) -> [f64; 4] {
        let (width, height) = self.block_size(text, style.spacing);
        let (ax, ay) = self.anchor_offset(style.anchor, width, height);
        let stroke = style.stroke_width as f32;
        let (x, y) = position;
        let x0 = x - f64::from(ax + stroke);
        let y0 = y - f64::from(ay + stroke);
        [
            x0,
            y0,
            x0 + f64::from(width + 2.0 * stroke),
            y0 + f64::from(height + 2.0 * stroke),
        ]
    }

    /// Render text onto a transparent layer sized exactly to its bounding box.
    /// A stroke is drawn in `stroke_fill` underneath the glyphs.
    pub fn render(
        &self,
        text: &str,
        fill: [u8; 4],
        stroke_fill: [u8; 4],
        style: &TextStyle,
    ) -> Canvas {
        let (block_width, block_height) = self.block_size(text, style.spacing);
        let stroke = style.stroke_width as i32;
        let width = (block_width + 2.0 * stroke as f32).ceil().max(1.0) as u32;
        let height = (block_height + 2.0 * stroke as f32).ceil().max(1.0) as u32;
        let mut layer = RgbaImage::new(width, height);

        for dy in -stroke..=stroke {
            for dx in -stroke..=stroke {
                if (dx, dy) != (0, 0) && dx * dx + dy * dy <= stroke * stroke {
                    let origin = (stroke + dx, stroke + dy);
                    self.draw_block(&mut layer, text, stroke_fill, origin, block_width, style);
                }
            }
        }
        self.draw_block(&mut layer, text, fill, (stroke, stroke), block_width, style);
        Canvas::from_image(layer)
    }

    fn draw_block(
        &self,
        layer: &mut RgbaImage,
        text: &str,
        colour: [u8; 4],
        (left, top): (i32, i32),
        block_width: f32,
        style: &TextStyle,
    ) {
        let step = self.line_height() + style.spacing;
        for (i, line) in text.lines().enumerate() {
            let slack = block_width - self.line_width(line);
            let x = match style.align {
                TextAlign::Left => 0.0,
                TextAlign::Center => slack / 2.0,
                TextAlign::Right => slack,
            };
            imageproc::drawing::draw_text_mut(
                layer,
                Rgba(colour),
                left + x.round() as i32,
                top + (i as f32 * step).round() as i32,
                self.scale(),
                &*self.font,
                line,
            );
        }
    }
}

impl fmt::Debug for FontHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FontHandle({}px)", self.size)
    }
}
