// Print layout composition for photo booth prints

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;
use rusttype::{Font, Scale};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::ComposeError;

// Constants for a 4x6" print at 300 DPI
const PRINT_WIDTH: u32 = 1200;
const PRINT_HEIGHT: u32 = 1800;
const MARGIN: u32 = 40;
const FOOTER_HEIGHT: u32 = 160;

// Photos are cropped to 3:2 before placement
const PHOTO_ASPECT_W: u32 = 3;
const PHOTO_ASPECT_H: u32 = 2;

const STRIP_ROWS: u32 = 3;
const JPEG_QUALITY: u8 = 95;
const CAPTION_SCALE: f32 = 56.0;
const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Canvas geometry and decoration for a print.
#[derive(Debug, Clone)]
pub struct LayoutSpec {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub margin: u32,
    pub footer_height: u32,
    pub columns: u32,
    pub background_color: Rgba<u8>,
    pub text_color: Rgba<u8>,
    pub background_mask: Option<PathBuf>,
    pub base_mask: Option<PathBuf>,
    pub caption: Option<String>,
    pub font_path: Option<PathBuf>,
}

impl Default for LayoutSpec {
    fn default() -> Self {
        LayoutSpec {
            canvas_width: PRINT_WIDTH,
            canvas_height: PRINT_HEIGHT,
            margin: MARGIN,
            footer_height: FOOTER_HEIGHT,
            columns: 1,
            background_color: Rgba([255, 255, 255, 255]),
            text_color: Rgba([50, 50, 50, 255]),
            background_mask: None,
            base_mask: None,
            caption: None,
            font_path: None,
        }
    }
}

impl LayoutSpec {
    pub fn from_config(config: &Config) -> Self {
        LayoutSpec {
            columns: config.layout.columns.clamp(1, 2),
            background_mask: config.background_mask_path(),
            base_mask: config.base_mask_path(),
            caption: config.layout.caption.clone(),
            font_path: config.layout.font_path.clone(),
            ..Default::default()
        }
    }

    /// Same proportions on a different canvas size.
    pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
        self.margin = MARGIN * width / PRINT_WIDTH;
        self.footer_height = FOOTER_HEIGHT * height / PRINT_HEIGHT;
        self.canvas_width = width;
        self.canvas_height = height;
        self
    }

    /// Photo slots grouped by row. Each photo is drawn into every slot of
    /// its row, so a dual-column layout repeats it left and right.
    ///
    /// One photo gets a single large slot, centred horizontally and placed at
    /// 40% of the free vertical space. Two or three photos use three evenly
    /// spaced rows; rows without a photo stay empty.
    pub fn slot_rows(&self, photo_count: usize) -> Vec<Vec<Rect>> {
        if photo_count == 1 {
            let width = self.canvas_width.saturating_sub(2 * self.margin);
            let height = width * PHOTO_ASPECT_H / PHOTO_ASPECT_W;
            let x = (self.canvas_width - width) / 2;
            let free = self.canvas_height.saturating_sub(height);
            let y = (free as f32 * 0.4) as u32;
            return vec![vec![Rect { x, y, width, height }]];
        }

        let columns = self.columns.max(1);
        let column_width = self.canvas_width / columns;
        let usable_height = self.canvas_height.saturating_sub(self.footer_height);

        let height_by_rows =
            usable_height.saturating_sub(self.margin * (STRIP_ROWS + 1)) / STRIP_ROWS;
        let height_by_width =
            column_width.saturating_sub(2 * self.margin) * PHOTO_ASPECT_H / PHOTO_ASPECT_W;
        let slot_height = height_by_rows.min(height_by_width);
        let slot_height = slot_height - slot_height % PHOTO_ASPECT_H;
        let slot_width = slot_height * PHOTO_ASPECT_W / PHOTO_ASPECT_H;
        let gap = usable_height.saturating_sub(slot_height * STRIP_ROWS) / (STRIP_ROWS + 1);

        (0..STRIP_ROWS)
            .map(|row| {
                let y = gap + row * (slot_height + gap);
                (0..columns)
                    .map(|column| Rect {
                        x: column * column_width + (column_width - slot_width) / 2,
                        y,
                        width: slot_width,
                        height: slot_height,
                    })
                    .collect()
            })
            .collect()
    }
}

/// Builds the composed print from captured photos. Inputs are only read.
pub struct Composer {
    spec: LayoutSpec,
}

impl Composer {
    pub fn new(spec: LayoutSpec) -> Self {
        Composer { spec }
    }

    pub fn spec(&self) -> &LayoutSpec {
        &self.spec
    }

    pub fn compose(&self, photos: &[PathBuf], destination: &Path) -> Result<PathBuf, ComposeError> {
        if photos.is_empty() {
            return Err(ComposeError::NoPhotos);
        }

        let loaded = photos
            .iter()
            .take(STRIP_ROWS as usize)
            .map(|path| load_photo(path))
            .collect::<Result<Vec<_>, _>>()?;

        let canvas = self.compose_canvas(&loaded)?;
        save_jpeg(&canvas, destination)?;

        info!(
            "Composed {} photo(s) into {:?}",
            loaded.len(),
            destination
        );
        Ok(destination.to_path_buf())
    }

    fn compose_canvas(&self, photos: &[RgbaImage]) -> Result<RgbaImage, ComposeError> {
        let spec = &self.spec;
        if spec.canvas_width == 0 || spec.canvas_height == 0 {
            return Err(ComposeError::InvalidDimensions(format!(
                "canvas {}x{}",
                spec.canvas_width, spec.canvas_height
            )));
        }

        // 1. Neutral fill, then the background decoration
        let mut canvas =
            RgbaImage::from_pixel(spec.canvas_width, spec.canvas_height, spec.background_color);
        if let Some(mask) = spec.background_mask.as_deref() {
            self.apply_mask(&mut canvas, mask);
        }

        // 2. Photos, cropped to fill their slots
        for (photo, row) in photos.iter().zip(spec.slot_rows(photos.len())) {
            for slot in row {
                let fitted = crop_to_fill(photo, slot.width, slot.height)?;
                imageops::overlay(&mut canvas, &fitted, slot.x as i64, slot.y as i64);
            }
        }

        // 3. Caption in the footer band
        if let Some(caption) = spec.caption.as_deref() {
            self.add_caption(&mut canvas, caption);
        }

        // 4. Foreground decoration frames everything drawn so far
        if let Some(mask) = spec.base_mask.as_deref() {
            self.apply_mask(&mut canvas, mask);
        }

        Ok(canvas)
    }

    fn apply_mask(&self, canvas: &mut RgbaImage, mask_path: &Path) {
        let mask = match image::open(mask_path) {
            Ok(mask) => mask.to_rgba8(),
            Err(e) => {
                warn!("Could not apply mask {:?}: {}", mask_path, e);
                return;
            }
        };
        let scaled = imageops::resize(
            &mask,
            canvas.width(),
            canvas.height(),
            FilterType::Lanczos3,
        );
        imageops::overlay(canvas, &scaled, 0, 0);
    }

    fn add_caption(&self, canvas: &mut RgbaImage, caption: &str) {
        let font_path = self
            .spec
            .font_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FONT));
        let font_data = match std::fs::read(&font_path) {
            Ok(data) => data,
            Err(e) => {
                warn!("Font {:?} not found ({}), skipping caption", font_path, e);
                return;
            }
        };
        let font = match Font::try_from_vec(font_data) {
            Some(f) => f,
            None => {
                warn!("Failed to parse font {:?}, skipping caption", font_path);
                return;
            }
        };

        let scale_factor = self.spec.canvas_height as f32 / PRINT_HEIGHT as f32;
        let scale = Scale::uniform(CAPTION_SCALE * scale_factor);
        let text_width = measure_text_width(&font, caption, scale);
        let x = self.spec.canvas_width.saturating_sub(text_width) / 2;
        let band_top = self.spec.canvas_height - self.spec.footer_height;
        let y = band_top + self.spec.footer_height.saturating_sub(scale.y as u32) / 2;

        draw_text_mut(
            canvas,
            self.spec.text_color,
            x as i32,
            y as i32,
            scale,
            &font,
            caption,
        );
    }
}

fn load_photo(path: &Path) -> Result<RgbaImage, ComposeError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|e| ComposeError::ImageLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Centre-crop to the target aspect ratio, then resize to exactly
/// `width` x `height`. Never letterboxes.
fn crop_to_fill(photo: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage, ComposeError> {
    let (pw, ph) = photo.dimensions();
    if pw == 0 || ph == 0 || width == 0 || height == 0 {
        return Err(ComposeError::InvalidDimensions(format!(
            "photo {}x{} into slot {}x{}",
            pw, ph, width, height
        )));
    }

    let (crop_w, crop_h) = if pw as u64 * height as u64 > ph as u64 * width as u64 {
        ((ph as u64 * width as u64 / height as u64) as u32, ph)
    } else {
        (pw, (pw as u64 * height as u64 / width as u64) as u32)
    };
    let crop_w = crop_w.clamp(1, pw);
    let crop_h = crop_h.clamp(1, ph);

    let cropped = imageops::crop_imm(photo, (pw - crop_w) / 2, (ph - crop_h) / 2, crop_w, crop_h)
        .to_image();
    Ok(imageops::resize(&cropped, width, height, FilterType::Lanczos3))
}

fn measure_text_width(font: &Font, text: &str, scale: Scale) -> u32 {
    font.layout(text, scale, rusttype::point(0.0, 0.0))
        .last()
        .and_then(|g| g.pixel_bounding_box())
        .map_or(0, |bb| bb.max.x.max(0) as u32)
}

fn save_jpeg(canvas: &RgbaImage, destination: &Path) -> Result<(), ComposeError> {
    let save_error = |reason: String| ComposeError::Save {
        path: destination.display().to_string(),
        reason,
    };

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| save_error(e.to_string()))?;
    }

    let rgb = DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
    let file = std::fs::File::create(destination).map_err(|e| save_error(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| save_error(e.to_string()))?;
    writer.flush().map_err(|e| save_error(e.to_string()))?;
    Ok(())
}
