//! Image pipeline for print-image: base64 payload → pixels → 1-bpp raster.

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

use crate::error::DriverError;

/// Standard alphabet, padding optional, as sent by mobile web views.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Row-major ARGB pixels (`0xAARRGGBB`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgbImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// Decode a base64 payload, with or without a `data:image/...;base64,`
/// prefix. Whitespace and line breaks inside the payload are ignored.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DriverError> {
    let trimmed = payload.trim();
    let body = if trimmed.starts_with("data:") {
        trimmed
            .split_once(',')
            .map(|(_, b)| b)
            .ok_or_else(|| DriverError::Decode("data URL without payload".into()))?
    } else {
        trimmed
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(DriverError::Decode("empty image payload".into()));
    }
    PAYLOAD_ENGINE
        .decode(compact.as_bytes())
        .map_err(|e| DriverError::Decode(format!("base64: {e}")))
}

/// Decode a base64 encoded PNG/JPEG into ARGB pixels.
pub fn decode_image(payload: &str) -> Result<ArgbImage, DriverError> {
    let bytes = decode_base64(payload)?;
    let decoded =
        image::load_from_memory(&bytes).map_err(|e| DriverError::Decode(format!("image: {e}")))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(DriverError::Decode("image has no pixels".into()));
    }
    let pixels = rgba
        .pixels()
        .map(|Rgba([r, g, b, a])| {
            (u32::from(*a) << 24) | (u32::from(*r) << 16) | (u32::from(*g) << 8) | u32::from(*b)
        })
        .collect();
    Ok(ArgbImage {
        width,
        height,
        pixels,
    })
}

fn to_rgba(image: &ArgbImage) -> RgbaImage {
    RgbaImage::from_fn(image.width, image.height, |x, y| {
        let p = image.pixels[(y * image.width + x) as usize];
        Rgba([(p >> 16) as u8, (p >> 8) as u8, p as u8, (p >> 24) as u8])
    })
}

/// Resize to `width` × `height`. A zero dimension keeps the aspect ratio
/// from the other one; both zero keeps the source size. Callers bound the
/// target with [`fit_size`] first.
pub fn resize(image: &ArgbImage, width: u32, height: u32) -> ArgbImage {
    let (target_w, target_h) = match (width, height) {
        (0, 0) => return image.clone(),
        (w, 0) => (w, clamp_u32(scaled(image.height, w, image.width))),
        (0, h) => (clamp_u32(scaled(image.width, h, image.height)), h),
        (w, h) => (w, h),
    };
    if target_w == image.width && target_h == image.height {
        return image.clone();
    }
    let resized = image::imageops::resize(&to_rgba(image), target_w, target_h, FilterType::Triangle);
    ArgbImage {
        width: target_w,
        height: target_h,
        pixels: resized
            .pixels()
            .map(|Rgba([r, g, b, a])| {
                (u32::from(*a) << 24)
                    | (u32::from(*r) << 16)
                    | (u32::from(*g) << 8)
                    | u32::from(*b)
            })
            .collect(),
    }
}

fn scaled(len: u32, target: u32, reference: u32) -> u64 {
    let reference = u64::from(reference.max(1));
    ((u64::from(len) * u64::from(target) + reference / 2) / reference).max(1)
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// Tallest raster `GS v 0` can describe.
pub const MAX_RASTER_HEIGHT: u32 = u16::MAX as u32;

/// Resolve a requested print size for a `source_w` × `source_h` image,
/// following the same zero rules as [`resize`]. Both zero keeps the source
/// size (the printer scales wide images down itself). Otherwise the result
/// must fit `max_width` dots across and [`MAX_RASTER_HEIGHT`] rows.
pub fn fit_size(
    source_w: u32,
    source_h: u32,
    width: u32,
    height: u32,
    max_width: u32,
) -> Result<(u32, u32), DriverError> {
    let (w, h) = match (width, height) {
        (0, 0) => return Ok((source_w, source_h)),
        (w, 0) => (u64::from(w), scaled(source_h, w, source_w)),
        (0, h) => (scaled(source_w, h, source_h), u64::from(h)),
        (w, h) => (u64::from(w), u64::from(h)),
    };
    if w > u64::from(max_width) {
        return Err(DriverError::InvalidParameter(format!(
            "image width {w} exceeds {max_width} dots"
        )));
    }
    if h > u64::from(MAX_RASTER_HEIGHT) {
        return Err(DriverError::InvalidParameter(format!(
            "image height {h} exceeds {MAX_RASTER_HEIGHT} dots"
        )));
    }
    Ok((w as u32, h as u32))
}

/// Gray level of an ARGB pixel composited over white paper.
fn luma(argb: u32) -> f32 {
    let a = ((argb >> 24) & 0xFF) as f32 / 255.0;
    let r = ((argb >> 16) & 0xFF) as f32;
    let g = ((argb >> 8) & 0xFF) as f32;
    let b = (argb & 0xFF) as f32;
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    y * a + 255.0 * (1.0 - a)
}

/// A packed raster ready for `GS v 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoRaster {
    pub width_bytes: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

/// Convert ARGB pixels to 1 bit per pixel (MSB first, 1 = black). With
/// `dither` the quantisation error is diffused Floyd-Steinberg style,
/// otherwise a fixed threshold is used.
pub fn to_monochrome(
    argb: &[u32],
    width: u32,
    height: u32,
    dither: bool,
) -> Result<MonoRaster, DriverError> {
    let expected = (width as usize) * (height as usize);
    if width == 0 || height == 0 || argb.len() != expected {
        return Err(DriverError::InvalidParameter(format!(
            "image {width}x{height} with {} pixels",
            argb.len()
        )));
    }
    let height_u16 = u16::try_from(height)
        .map_err(|_| DriverError::InvalidParameter(format!("image height {height}")))?;
    let width_bytes = width.div_ceil(8);
    let width_bytes_u16 = u16::try_from(width_bytes)
        .map_err(|_| DriverError::InvalidParameter(format!("image width {width}")))?;

    let w = width as usize;
    let mut gray: Vec<f32> = argb.iter().map(|&p| luma(p)).collect();
    let mut data = vec![0u8; (width_bytes as usize) * (height as usize)];

    for y in 0..height as usize {
        for x in 0..w {
            let idx = y * w + x;
            let old = gray[idx];
            let black = if dither { old < 128.0 } else { old < 160.0 };
            if black {
                data[y * width_bytes as usize + x / 8] |= 0x80 >> (x % 8);
            }
            if dither {
                let err = old - if black { 0.0 } else { 255.0 };
                if x + 1 < w {
                    gray[idx + 1] += err * 7.0 / 16.0;
                }
                if y + 1 < height as usize {
                    if x > 0 {
                        gray[idx + w - 1] += err * 3.0 / 16.0;
                    }
                    gray[idx + w] += err * 5.0 / 16.0;
                    if x + 1 < w {
                        gray[idx + w + 1] += err * 1.0 / 16.0;
                    }
                }
            }
        }
    }

    Ok(MonoRaster {
        width_bytes: width_bytes_u16,
        height: height_u16,
        data,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
