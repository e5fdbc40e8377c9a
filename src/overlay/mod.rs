//! Detection overlay rendering.
//!
//! Each detection becomes a translucent rectangle over its denormalized
//! bounding box with a text caption such as `"Person 87%, Dog 12%"` drawn
//! inside it. Rendering only touches the frame it is given.

pub mod font;

use image::{Rgba, RgbaImage};
use tracing::instrument;

use crate::capture::Frame;
use crate::detect::{BoundingBox, DetectionResult, Label};
use crate::OverlayConfig;

/// Rectangle in pixel coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Scale a normalized box to a `width` x `height` frame, clipped to its bounds.
    pub fn denormalize(bbox: &BoundingBox, width: u32, height: u32) -> Self {
        let (fw, fh) = (width as f32, height as f32);
        let left = (bbox.x * fw).round().clamp(0.0, fw);
        let top = (bbox.y * fh).round().clamp(0.0, fh);
        let right = ((bbox.x + bbox.width) * fw).round().clamp(left, fw);
        let bottom = ((bbox.y + bbox.height) * fh).round().clamp(top, fh);
        Self {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        }
    }
}

/// One drawn detection, recorded on the frame after rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRegion {
    pub bounds: PixelRect,
    pub label: String,
}

/// Draws detection boxes and captions onto frames.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    config: OverlayConfig,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

impl OverlayRenderer {
    pub fn new(config: OverlayConfig) -> Self {
        Self { config }
    }

    /// Draw every result into `frame` and return it.
    #[instrument(skip_all, fields(detections = results.len()))]
    pub fn render(&self, results: &[DetectionResult], mut frame: Frame) -> Frame {
        let (width, height) = frame.image.dimensions();
        for result in results {
            let bounds = PixelRect::denormalize(&result.bounding_box, width, height);
            let label = format_labels(result.labels(), self.config.max_labels);

            fill_rect(&mut frame.image, bounds, Rgba(self.config.fill_color));
            draw_text(
                &mut frame.image,
                bounds,
                &label,
                self.config.text_scale.max(1),
                Rgba(self.config.text_color),
            );
            frame.meta.overlays.push(OverlayRegion { bounds, label });
        }
        frame
    }
}

/// `"<Identifier> <percent>%"` for the first `max` labels, joined by `", "`.
pub fn format_labels(labels: &[Label], max: usize) -> String {
    labels
        .iter()
        .take(max)
        .map(|label| {
            let percent = (label.confidence.clamp(0.0, 1.0) * 100.0).round() as u32;
            format!("{} {}%", capitalize_words(&label.identifier), percent)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Upper-case the first letter of each word and lower-case the rest.
pub fn capitalize_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let alpha = src.0[3] as u32;
    for c in 0..3 {
        let mixed = (src.0[c] as u32 * alpha + dst.0[c] as u32 * (255 - alpha) + 127) / 255;
        dst.0[c] = mixed as u8;
    }
}

fn fill_rect(image: &mut RgbaImage, rect: PixelRect, color: Rgba<u8>) {
    let right = (rect.x + rect.width).min(image.width());
    let bottom = (rect.y + rect.height).min(image.height());
    for y in rect.y..bottom {
        for x in rect.x..right {
            blend(image.get_pixel_mut(x, y), color);
        }
    }
}

/// Lay `text` out inside `rect`, wrapping per character and clipping at the
/// rectangle's bottom edge.
fn draw_text(image: &mut RgbaImage, rect: PixelRect, text: &str, scale: u32, color: Rgba<u8>) {
    let advance = font::ADVANCE * scale;
    let line_height = font::LINE_HEIGHT * scale;
    let per_line = (rect.width / advance) as usize;
    if per_line == 0 || rect.height < font::GLYPH_HEIGHT * scale {
        return;
    }

    let chars: Vec<char> = text.chars().collect();
    for (line, chunk) in chars.chunks(per_line).enumerate() {
        let top = rect.y + line as u32 * line_height;
        if top + font::GLYPH_HEIGHT * scale > rect.y + rect.height {
            break;
        }
        for (col, ch) in chunk.iter().enumerate() {
            let left = rect.x + col as u32 * advance;
            draw_glyph(image, left, top, *ch, scale, color);
        }
    }
}

fn draw_glyph(image: &mut RgbaImage, left: u32, top: u32, ch: char, scale: u32, color: Rgba<u8>) {
    let Some(rows) = font::glyph(ch) else { return };
    for (row, pattern) in rows.iter().enumerate() {
        for col in 0..font::GLYPH_WIDTH {
            if (pattern >> (font::GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let px = left + col * scale + dx;
                    let py = top + row as u32 * scale + dy;
                    if px < image.width() && py < image.height() {
                        image.put_pixel(px, py, color);
                    }
                }
            }
        }
    }
}
