//! Raster composition for comic strips.
//!
//! Everything here is pure: bytes in, PNG bytes out. No network access.

use std::io::Cursor;

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use thiserror::Error;
use tracing::debug;

pub const PANEL_WIDTH: u32 = 300;
pub const PANEL_HEIGHT: u32 = 300;
pub const MARGIN: u32 = 20;
pub const TITLE_BAR: u32 = 100;
pub const MAX_COLUMNS: usize = 3;

pub const PLACEHOLDER_SIZE: u32 = 512;
pub const FALLBACK_WIDTH: u32 = 1024;
pub const FALLBACK_HEIGHT: u32 = 768;

const GLYPH: u32 = 8;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GRAY: Rgb<u8> = Rgb([128, 128, 128]);
const LIGHT_GRAY: Rgb<u8> = Rgb([211, 211, 211]);
const RED: Rgb<u8> = Rgb([220, 20, 20]);

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("no images provided")]
    NoImages,
    #[error("panel {panel} could not be decoded: {source}")]
    Decode {
        panel: usize,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode PNG: {0}")]
    Encode(#[source] image::ImageError),
}

/// Grid geometry for `panels` thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
}

impl GridLayout {
    pub fn for_panels(panels: usize) -> Option<Self> {
        if panels == 0 {
            return None;
        }
        let columns = panels.min(MAX_COLUMNS);
        let rows = panels.div_ceil(columns);
        Some(Self { columns: columns as u32, rows: rows as u32 })
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        let width = self.columns * PANEL_WIDTH + (self.columns + 1) * MARGIN;
        let height = self.rows * PANEL_HEIGHT + (self.rows + 1) * MARGIN + TITLE_BAR;
        (width, height)
    }

    /// Top-left corner of panel `index` (row-major, below the title bar).
    pub fn origin(&self, index: usize) -> (u32, u32) {
        let row = index as u32 / self.columns;
        let col = index as u32 % self.columns;
        let x = MARGIN + col * (PANEL_WIDTH + MARGIN);
        let y = MARGIN + TITLE_BAR + row * (PANEL_HEIGHT + MARGIN);
        (x, y)
    }
}

/// Lays encoded images out on a white grid with a title bar and numbered panels.
pub fn compose_grid(images: &[Vec<u8>], title: &str) -> Result<Vec<u8>, CompositeError> {
    let layout = GridLayout::for_panels(images.len()).ok_or(CompositeError::NoImages)?;
    let (width, height) = layout.canvas_size();
    debug!(
        "📐 Layout grid {}x{} on {}x{} canvas for {} panels",
        layout.rows,
        layout.columns,
        width,
        height,
        images.len()
    );

    let mut canvas = RgbImage::from_pixel(width, height, WHITE);
    draw_text(&mut canvas, MARGIN, MARGIN, title, title_scale(title, width), BLACK);

    for (i, bytes) in images.iter().enumerate() {
        let panel = image::load_from_memory(bytes)
            .map_err(|source| CompositeError::Decode { panel: i + 1, source })?
            .to_rgb8();
        let thumb = imageops::resize(&panel, PANEL_WIDTH, PANEL_HEIGHT, FilterType::Lanczos3);
        let (x, y) = layout.origin(i);
        imageops::replace(&mut canvas, &thumb, i64::from(x), i64::from(y));

        let label = format!("Panel {}", i + 1);
        draw_text(&mut canvas, x + 6, y + 6, &label, 2, BLACK);
        draw_text(&mut canvas, x + 5, y + 5, &label, 2, WHITE);
    }

    encode_png(&canvas)
}

/// Double-size title when it fits between the side margins, otherwise the base 8px font.
fn title_scale(title: &str, canvas_width: u32) -> u32 {
    let room = canvas_width.saturating_sub(2 * MARGIN) as usize;
    if title.chars().count() * (GLYPH as usize) * 2 > room {
        1
    } else {
        2
    }
}

/// Stand-in for a panel whose image could not be synthesized.
pub fn placeholder_panel(panel_number: usize) -> Result<Vec<u8>, CompositeError> {
    let mut img = RgbImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, LIGHT_GRAY);
    draw_text(&mut img, 50, 200, &format!("Panel {panel_number}"), 3, BLACK);
    draw_text(&mut img, 50, 250, "Image generation failed", 2, RED);
    encode_png(&img)
}

/// Blank canvas used when the grid cannot be assembled.
pub fn fallback_canvas(title: &str, job_id: &str) -> Result<Vec<u8>, CompositeError> {
    let mut canvas = RgbImage::from_pixel(FALLBACK_WIDTH, FALLBACK_HEIGHT, WHITE);
    draw_text(&mut canvas, 50, 50, &format!("Comic: {title}"), 2, BLACK);
    draw_text(&mut canvas, 50, 100, &format!("Job ID: {job_id}"), 2, GRAY);
    draw_text(&mut canvas, 50, 150, "Layout assembly failed - using fallback", 2, RED);
    encode_png(&canvas)
}

/// Stamps `text` with the 8x8 bitmap font, each font pixel drawn as a `scale`x`scale` block.
/// Characters outside basic Latin render as `?`; anything past the canvas edge is clipped.
pub fn draw_text(canvas: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1);
    let (width, height) = canvas.dimensions();

    for (n, ch) in text.chars().enumerate() {
        let glyph_x = x + n as u32 * GLYPH * scale;
        if glyph_x >= width {
            break;
        }
        let Some(rows) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        for (row, bits) in rows.iter().enumerate() {
            for bit in 0..GLYPH {
                if bits & (1 << bit) == 0 {
                    continue;
                }
                let px = glyph_x + bit * scale;
                let py = y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (cx, cy) = (px + dx, py + dy);
                        if cx < width && cy < height {
                            canvas.put_pixel(cx, cy, color);
                        }
                    }
                }
            }
        }
    }
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, CompositeError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(CompositeError::Encode)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn solid_png(w: u32, h: u32, color: [u8; 3]) -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(w, h, Rgb(color))).unwrap()
    }

    #[test]
    fn grid_geometry_follows_panel_count() {
        let cases = [(1, 1, 1), (2, 2, 1), (3, 3, 1), (4, 3, 2), (5, 3, 2), (6, 3, 2), (7, 3, 3)];
        for (panels, columns, rows) in cases {
            assert_eq!(GridLayout::for_panels(panels), Some(GridLayout { columns, rows }), "panels={panels}");
        }
        assert_eq!(GridLayout::for_panels(0), None);
    }

    #[test]
    fn canvas_size_includes_margins_and_title_bar() {
        let layout = GridLayout::for_panels(4).unwrap();
        assert_eq!(layout.canvas_size(), (3 * 300 + 4 * 20, 2 * 300 + 3 * 20 + 100));
        assert_eq!(layout.origin(0), (20, 120));
        assert_eq!(layout.origin(3), (20, 440));
        assert_eq!(layout.origin(2), (660, 120));
    }

    #[test]
    fn compose_grid_places_resized_panels() {
        let images = vec![solid_png(64, 64, [255, 0, 0]), solid_png(1024, 512, [0, 0, 255])];
        let out = compose_grid(&images, "Test strip").unwrap();
        let composite = image::load_from_memory(&out).unwrap().to_rgb8();

        assert_eq!(composite.dimensions(), (2 * 300 + 3 * 20, 300 + 2 * 20 + 100));
        // Sample the middle of each thumbnail, away from its label.
        let Rgb([r, g, b]) = *composite.get_pixel(20 + 150, 120 + 150);
        assert!(r > 245 && g < 10 && b < 10, "first panel should be red, got {r},{g},{b}");
        let Rgb([r, g, b]) = *composite.get_pixel(340 + 150, 120 + 150);
        assert!(r < 10 && g < 10 && b > 245, "second panel should be blue, got {r},{g},{b}");
        // Margins stay white.
        assert_eq!(*composite.get_pixel(5, composite.height() - 5), WHITE);
    }

    #[test]
    fn long_titles_shrink_to_fit_narrow_grids() {
        let (narrow, _) = GridLayout::for_panels(2).unwrap().canvas_size();
        assert_eq!(title_scale("Short title", narrow), 2);
        assert_eq!(title_scale(&"W".repeat(50), narrow), 1);

        let images = vec![solid_png(8, 8, [255, 255, 255]), solid_png(8, 8, [255, 255, 255])];
        let out = compose_grid(&images, &"W".repeat(50)).unwrap();
        let composite = image::load_from_memory(&out).unwrap().to_rgb8();
        let right_edge_inked = (narrow - MARGIN..narrow)
            .flat_map(|x| (MARGIN..MARGIN + 2 * GLYPH).map(move |y| (x, y)))
            .any(|(x, y)| *composite.get_pixel(x, y) == BLACK);
        assert!(!right_edge_inked, "title ran into the right margin");
    }

    #[test]
    fn compose_grid_rejects_empty_and_undecodable_input() {
        assert!(matches!(compose_grid(&[], "t"), Err(CompositeError::NoImages)));
        let images = vec![solid_png(8, 8, [0, 0, 0]), b"not an image".to_vec()];
        assert!(matches!(compose_grid(&images, "t"), Err(CompositeError::Decode { panel: 2, .. })));
    }

    #[test]
    fn placeholder_is_deterministic_light_gray_png() {
        let a = placeholder_panel(3).unwrap();
        let b = placeholder_panel(3).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, placeholder_panel(4).unwrap());

        let img = image::load_from_memory(&a).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE));
        assert_eq!(*img.get_pixel(5, 5), LIGHT_GRAY);
    }

    #[test]
    fn fallback_canvas_stamps_text() {
        let bytes = fallback_canvas("A title", "job-123").unwrap();
        let img = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (FALLBACK_WIDTH, FALLBACK_HEIGHT));
        let red_pixels = img.pixels().filter(|p| **p == RED).count();
        assert!(red_pixels > 0);
    }

    #[test]
    fn draw_text_clips_at_canvas_edge() {
        let mut img = RgbImage::from_pixel(20, 10, WHITE);
        draw_text(&mut img, 15, 5, "WWWW ünïcode", 3, BLACK);
        assert!(img.pixels().any(|p| *p == BLACK));
    }
}
