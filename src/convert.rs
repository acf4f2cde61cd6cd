//! Pixel conversion for captured buffers.
//!
//! Capture devices hand over whatever layout the hardware produces. Everything
//! downstream of the pipeline works on packed RGB24, so each buffer is normalized
//! here and then rotated into the output orientation.

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Layout of an undecoded capture buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R, A (alpha ignored).
    Bgra32,
    /// Full-resolution Y plane followed by interleaved half-resolution UV.
    Nv12,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
}

/// Orientation of frames leaving the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Landscape buffers are rotated 90° clockwise so height >= width.
    #[default]
    Portrait,
    /// Buffers are passed through as captured.
    Native,
}

pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            check_len(pixels, width, height, 3, "RGB")?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Bgra32 => {
            check_len(pixels, width, height, 4, "BGRA")?;
            let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
            for px in pixels.chunks_exact(4) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            Ok(rgb)
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
    }
}

/// Rotate a packed RGB24 image into `orientation`.
///
/// Returns the pixels with the resulting `(width, height)`.
pub fn apply_orientation(
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    orientation: Orientation,
) -> (Vec<u8>, u32, u32) {
    match orientation {
        Orientation::Portrait if width > height => {
            let (w, h) = (width as usize, height as usize);
            let mut rotated = vec![0u8; rgb.len()];
            // Output is h pixels wide and w pixels tall.
            for y in 0..h {
                for x in 0..w {
                    let src = (y * w + x) * 3;
                    let dst = (x * h + (h - 1 - y)) * 3;
                    rotated[dst..dst + 3].copy_from_slice(&rgb[src..src + 3]);
                }
            }
            (rotated, height, width)
        }
        _ => (rgb, width, height),
    }
}

fn check_len(pixels: &[u8], width: u32, height: u32, bpp: u32, label: &str) -> Result<()> {
    let expected = width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(bpp))
        .ok_or_else(|| anyhow!("{} frame dimensions overflow", label))? as usize;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    // Chroma is subsampled 2x2; odd edges round up to a full sample.
    let uv_stride = w.div_ceil(2) * 2;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = uv_stride
        .checked_mul(h.div_ceil(2))
        .and_then(|uv_plane| uv_plane.checked_add(y_plane))
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * uv_stride + (i / 2) * 2;
            let offset = (j * w + i) * 3;
            write_yuv(
                &mut rgb[offset..offset + 3],
                pixels[j * w + i],
                pixels[uv_index],
                pixels[uv_index + 1],
            );
        }
    }

    Ok(rgb)
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", width));
    }
    check_len(pixels, width, height, 2, "YUYV")?;

    let mut rgb = vec![0u8; pixels.len() / 2 * 3];
    for (pair, out) in pixels.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (pair[0], pair[1], pair[2], pair[3]);
        write_yuv(&mut out[0..3], y0, u, v);
        write_yuv(&mut out[3..6], y1, u, v);
    }
    Ok(rgb)
}

// BT.601 full range.
fn write_yuv(out: &mut [u8], y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    out[0] = clamp_to_u8(y + 1.402_f32 * v);
    out[1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
    out[2] = clamp_to_u8(y + 1.772_f32 * u);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
