//! PDF report rendering for `/download`.
//!
//! Rendering happens in two steps. [`layout`] places the title, date line,
//! word-wrapped body and optional image onto US Letter pages; [`render_pdf`]
//! turns those placements into a PDF with `printpdf`. Text widths are
//! estimated from an average Helvetica glyph width, which is close enough for
//! wrapping and centering prose.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, Rgb, RgbImage, Rgba};
use once_cell::sync::Lazy;
use printpdf::{BuiltinFont, Image, ImageTransform, Mm, PdfDocument};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::storage::EphemeralFile;

pub const REPORT_TITLE: &str = "Plant Analysis Report";

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const TITLE_SIZE: f32 = 24.0;
const DATE_SIZE: f32 = 24.0;
const BODY_SIZE: f32 = 14.0;
const LEADING: f32 = 1.2;
const AVG_GLYPH_EM: f32 = 0.5;

/// Images are scaled to fit this box (points), keeping their aspect ratio.
pub const IMAGE_FIT: (f32, f32) = (500.0, 300.0);

static DATA_URI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/\w+;base64,").unwrap());

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("PDF rendering failed: {0}")]
    Pdf(String),

    #[error("failed to write report file: {0}")]
    Write(#[source] std::io::Error),

    #[error("rendering task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Body of a `/download` request: the analysis text and, optionally, the
/// data URI returned by `/analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub result: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Everything that ends up on the page.
#[derive(Debug, Clone)]
pub struct ReportContent {
    pub title: String,
    pub date: String,
    pub body: String,
    pub image: Option<DynamicImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
}

/// One positioned element. Coordinates are PDF points from the bottom-left
/// corner; `y` is the text baseline or the image's bottom edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Placed {
    Text {
        text: String,
        size: f32,
        x: f32,
        y: f32,
    },
    Image {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

pub type PageLayout = Vec<Placed>;

/// Strip a `data:image/<subtype>;base64,` prefix if there is one and decode
/// the rest.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ReportError> {
    let payload = DATA_URI_PREFIX.replace(uri, "");
    STANDARD
        .decode(payload.trim().as_bytes())
        .map_err(|e| ReportError::InvalidImage(format!("bad base64: {e}")))
}

/// Date line text, e.g. `Date: 3/7/2026`.
pub fn date_line(now: chrono::DateTime<chrono::Local>) -> String {
    format!("Date: {}", now.format("%-m/%-d/%Y"))
}

/// Render the request into a PDF stored as an ephemeral file. The returned
/// file is fully written and synced.
pub async fn generate(request: &ReportRequest, temp_dir: &Path) -> Result<EphemeralFile, ReportError> {
    // An empty image string means the report has no image.
    let image_bytes = request
        .image
        .as_deref()
        .filter(|uri| !uri.trim().is_empty())
        .map(decode_data_uri)
        .transpose()?;
    let body = request.result.clone();
    let date = date_line(chrono::Local::now());

    let pdf = tokio::task::spawn_blocking(move || {
        let image = image_bytes
            .map(|bytes| {
                image::load_from_memory(&bytes)
                    .map_err(|e| ReportError::InvalidImage(e.to_string()))
            })
            .transpose()?;

        render_pdf(&ReportContent {
            title: REPORT_TITLE.to_string(),
            date,
            body,
            image,
        })
    })
    .await??;

    let file = EphemeralFile::write_in(temp_dir, "plant_analysis_", ".pdf", &pdf)
        .await
        .map_err(ReportError::Write)?;
    tracing::info!(bytes = pdf.len(), path = %file.path().display(), "Report written");
    Ok(file)
}

/// Place the report's elements on pages.
pub fn layout(title: &str, date: &str, body: &str, image_size: Option<(u32, u32)>) -> Vec<PageLayout> {
    let mut cursor = Cursor::new();

    cursor.line(title, TITLE_SIZE, Align::Center);
    cursor.move_down(TITLE_SIZE);
    cursor.line(date, DATE_SIZE, Align::Left);
    cursor.move_down(DATE_SIZE);
    for line in wrap_text(body, BODY_SIZE, CONTENT_WIDTH) {
        cursor.line(&line, BODY_SIZE, Align::Left);
    }

    if let Some((px_width, px_height)) = image_size {
        cursor.move_down(BODY_SIZE);
        let (width, height) = fit_within(px_width, px_height, IMAGE_FIT);
        cursor.image_in_box(width, height, IMAGE_FIT);
    }

    cursor.finish()
}

/// Render content straight to PDF bytes.
pub fn render_pdf(content: &ReportContent) -> Result<Vec<u8>, ReportError> {
    let image_size = content.image.as_ref().map(|img| (img.width(), img.height()));
    let pages = layout(&content.title, &content.date, &content.body, image_size);

    let (doc, first_page, first_layer) = PdfDocument::new(
        content.title.as_str(),
        pt(PAGE_WIDTH),
        pt(PAGE_HEIGHT),
        "Layer 1",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ReportError::Pdf(e.to_string()))?;

    for (index, page) in pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page_index, layer_index) = doc.add_page(pt(PAGE_WIDTH), pt(PAGE_HEIGHT), "Layer 1");
            doc.get_page(page_index).get_layer(layer_index)
        };

        for element in page {
            match element {
                Placed::Text { text, size, x, y } => {
                    layer.use_text(text.as_str(), *size, pt(*x), pt(*y), &font);
                }
                Placed::Image { x, y, width, .. } => {
                    let Some(source) = content.image.as_ref() else {
                        continue;
                    };
                    // printpdf has no alpha support for embedded images
                    let rgb = DynamicImage::ImageRgb8(flatten_on_white(source));
                    // At 72 dpi one pixel is one point, so the scale is the fitted width over pixels.
                    let scale = *width / rgb.width() as f32;
                    Image::from_dynamic_image(&rgb).add_to_layer(
                        layer.clone(),
                        ImageTransform {
                            translate_x: Some(pt(*x)),
                            translate_y: Some(pt(*y)),
                            scale_x: Some(scale),
                            scale_y: Some(scale),
                            dpi: Some(72.0),
                            ..Default::default()
                        },
                    );
                }
            }
        }
    }

    doc.save_to_bytes().map_err(|e| ReportError::Pdf(e.to_string()))
}

/// Composite any transparency over a white page background.
pub fn flatten_on_white(source: &DynamicImage) -> RgbImage {
    let rgba = source.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let blend = |c: u8| ((c as u32 * a as u32 + 255 * (255 - a as u32) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn pt(points: f32) -> Mm {
    Mm(points * 25.4 / 72.0)
}

struct Cursor {
    pages: Vec<PageLayout>,
    y: f32,
}

impl Cursor {
    fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn ensure_room(&mut self, height: f32) {
        let page_has_content = self.pages.last().is_some_and(|p| !p.is_empty());
        if self.y - height < MARGIN && page_has_content {
            self.pages.push(Vec::new());
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    fn place(&mut self, element: Placed) {
        if let Some(page) = self.pages.last_mut() {
            page.push(element);
        }
    }

    fn line(&mut self, text: &str, size: f32, align: Align) {
        let height = size * LEADING;
        self.ensure_room(height);
        if !text.is_empty() {
            let x = match align {
                Align::Left => MARGIN,
                Align::Center => MARGIN + ((CONTENT_WIDTH - text_width(text, size)) / 2.0).max(0.0),
            };
            self.place(Placed::Text {
                text: text.to_string(),
                size,
                x,
                y: self.y - size,
            });
        }
        self.y -= height;
    }

    fn move_down(&mut self, size: f32) {
        self.y -= size * LEADING;
    }

    /// Reserve a `bounds` box at the left margin and center the image inside it.
    fn image_in_box(&mut self, width: f32, height: f32, bounds: (f32, f32)) {
        self.ensure_room(bounds.1);
        self.place(Placed::Image {
            x: MARGIN + (bounds.0 - width) / 2.0,
            y: self.y - (bounds.1 - height) / 2.0 - height,
            width,
            height,
        });
        self.y -= bounds.1;
    }

    fn finish(self) -> Vec<PageLayout> {
        self.pages
    }
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * AVG_GLYPH_EM
}

/// Scale `(width, height)` to fit inside `bounds`, preserving aspect ratio.
pub fn fit_within(width: u32, height: u32, bounds: (f32, f32)) -> (f32, f32) {
    if width == 0 || height == 0 {
        return (0.0, 0.0);
    }
    let (w, h) = (width as f32, height as f32);
    let scale = (bounds.0 / w).min(bounds.1 / h);
    (w * scale, h * scale)
}

/// Greedy word wrap. Paragraph breaks and blank lines are kept; words wider
/// than a full line are split.
pub fn wrap_text(text: &str, size: f32, max_width: f32) -> Vec<String> {
    let max_chars = ((max_width / (size * AVG_GLYPH_EM)).floor() as usize).max(1);
    let text = normalize_text(text);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            let needed = if current.is_empty() {
                word.len()
            } else {
                current.chars().count() + 1 + word.len()
            };
            if needed > max_chars && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.extend(word);
        }
        lines.push(current);
    }

    lines
}

/// Map text into what the built-in PDF fonts can show.
fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .filter_map(|c| match c {
            '\r' => None,
            '\t' => Some(' '),
            '\u{2018}' | '\u{2019}' => Some('\''),
            '\u{201C}' | '\u{201D}' => Some('"'),
            '\u{2013}' | '\u{2014}' => Some('-'),
            '\u{2022}' => Some('*'),
            '\u{2026}' => Some('.'),
            c if (c as u32) < 0x100 => Some(c),
            _ => Some('?'),
        })
        .collect()
}
