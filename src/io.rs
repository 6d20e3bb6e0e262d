use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageEncoder, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{CanvasState, blend_pixel};
use crate::error::Result;

/// Default JPEG quality of exports.
pub const DEFAULT_EXPORT_QUALITY: u8 = 85;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

// ============================================================================
// FLATTEN
// ============================================================================

/// Composite every visible layer in z-order over white at device resolution,
/// then downsample to the logical canvas size.  Hidden layers are skipped.
pub fn flatten(state: &CanvasState) -> RgbaImage {
    let (bw, bh) = state.buffer_size();
    let mut out = RgbaImage::from_pixel(bw, bh, WHITE);
    let row = bw as usize * 4;

    for idx in state.z_order() {
        let layer = &state.layers[idx];
        if !layer.visible || layer.opacity <= 0.0 || layer.pixels.chunk_count() == 0 {
            continue;
        }
        let top = layer.pixels.to_rgba_image();
        let (mode, opacity) = (layer.blend_mode, layer.opacity);
        let dst: &mut [u8] = &mut out;
        dst.par_chunks_mut(row).zip(top.as_raw().par_chunks(row)).for_each(|(d_row, s_row)| {
            for (d, s) in d_row.chunks_exact_mut(4).zip(s_row.chunks_exact(4)) {
                if s[3] == 0 {
                    continue;
                }
                let (under, over) = (Rgba([d[0], d[1], d[2], d[3]]), Rgba([s[0], s[1], s[2], s[3]]));
                let blended = blend_pixel(under, over, mode, opacity);
                d.copy_from_slice(&blended.0);
            }
        });
    }

    let (lw, lh) = (state.size.width.max(1), state.size.height.max(1));
    if (lw, lh) == (bw, bh) {
        out
    } else {
        imageops::resize(&out, lw, lh, FilterType::Triangle)
    }
}

// ============================================================================
// ENCODE / DECODE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Jpeg,
    Png,
}

impl ExportFormat {
    /// Format implied by a file extension; anything unrecognised exports as JPEG.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref() {
            Some("png") => ExportFormat::Png,
            _ => ExportFormat::Jpeg,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Png => "png",
        }
    }
}

fn write_encoded<W: Write>(
    image: &RgbaImage,
    writer: W,
    format: ExportFormat,
    quality: u8,
) -> Result<()> {
    match format {
        ExportFormat::Jpeg => {
            // JPEG has no alpha; flattened exports are opaque anyway
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut writer = writer;
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
        ExportFormat::Png => {
            PngEncoder::new(writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
    }
    Ok(())
}

pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    write_encoded(image, &mut buf, ExportFormat::Jpeg, quality)?;
    Ok(buf.into_inner())
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    write_encoded(image, &mut buf, ExportFormat::Png, DEFAULT_EXPORT_QUALITY)?;
    Ok(buf.into_inner())
}

/// Flatten and encode as base64 JPEG (no `data:` prefix).
pub fn export_base64(state: &CanvasState, quality: u8) -> Result<String> {
    let jpeg = encode_jpeg(&flatten(state), quality)?;
    Ok(BASE64.encode(jpeg))
}

/// Encode and write an image to a file.
pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: ExportFormat,
    quality: u8,
) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_encoded(image, &mut writer, format, quality)?;
    writer.flush()?;
    Ok(())
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Decode a base64 image, with or without a `data:image/...;base64,` prefix.
pub fn decode_base64_image(data: &str) -> Result<RgbaImage> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let bytes = BASE64.decode(payload.trim())?;
    decode_image(&bytes)
}

/// Synchronously load any raster format the `image` crate supports.
pub fn load_image_sync(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasSize;

    #[test]
    fn empty_canvas_flattens_to_white() {
        let state = CanvasState::new(CanvasSize::new(8, 6), 2.0);
        let flat = flatten(&state);
        assert_eq!(flat.dimensions(), (8, 6));
        assert!(flat.pixels().all(|p| p.0.iter().all(|&c| c >= 254)));
    }

    #[test]
    fn hidden_layers_contribute_nothing() {
        let mut state = CanvasState::new(CanvasSize::new(4, 4), 1.0);
        let id = state.active_layer.clone();
        state.layer_mut(&id).unwrap().pixels.fill(Rgba([255, 0, 0, 255]));
        state.layer_mut(&id).unwrap().visible = false;
        assert!(flatten(&state).pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn half_opacity_blends_over_white() {
        let mut state = CanvasState::new(CanvasSize::new(4, 4), 1.0);
        let id = state.active_layer.clone();
        state.layer_mut(&id).unwrap().pixels.fill(Rgba([0, 0, 0, 255]));
        state.layer_mut(&id).unwrap().opacity = 0.5;
        assert_eq!(*flatten(&state).get_pixel(1, 1), Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn base64_export_decodes_as_jpeg() {
        let state = CanvasState::new(CanvasSize::new(16, 16), 2.0);
        let b64 = export_base64(&state, DEFAULT_EXPORT_QUALITY).unwrap();
        assert!(!b64.starts_with("data:"));
        let bytes = BASE64.decode(&b64).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let img = decode_base64_image(&format!("data:image/jpeg;base64,{}", b64)).unwrap();
        assert_eq!(img.dimensions(), (16, 16));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a/b.PNG")), ExportFormat::Png);
        assert_eq!(ExportFormat::from_path(Path::new("out.jpeg")), ExportFormat::Jpeg);
        assert_eq!(ExportFormat::from_path(Path::new("noext")), ExportFormat::Jpeg);
    }

    #[test]
    fn writes_png_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        encode_and_write(&img, &path, ExportFormat::Png, DEFAULT_EXPORT_QUALITY).unwrap();
        assert_eq!(load_image_sync(&path).unwrap(), img);
    }
}
