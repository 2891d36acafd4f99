use anyhow::{anyhow, Result};

/// Pixel layouts accepted from image sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    /// Y plane followed by interleaved U/V at quarter resolution.
    Nv12,
    /// Y plane followed by interleaved V/U; the usual camera preview format.
    Nv21,
}

/// Convert a raw sensor buffer to packed RGB24.
pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = (width as usize)
                .checked_mul(height as usize)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
            if pixels.len() != expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => semi_planar_to_rgb(pixels, width, height, false),
        PixelFormat::Nv21 => semi_planar_to_rgb(pixels, width, height, true),
    }
}

fn semi_planar_to_rgb(pixels: &[u8], width: u32, height: u32, v_first: bool) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("YUV frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("YUV frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "YUV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }
    if w % 2 != 0 || h % 2 != 0 {
        return Err(anyhow!("YUV frames need even dimensions, got {}x{}", w, h));
    }

    let (u_off, v_off) = if v_first { (1, 0) } else { (0, 1) };
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index + u_off] as f32 - 128.0;
            let v = pixels[uv_index + v_off] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
