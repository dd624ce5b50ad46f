//! Mask compositing
//!
//! Pure pixel math with no model or worker dependency: resample the
//! foreground mask to the original resolution and write it into the alpha
//! channel, leaving R/G/B untouched.

use crate::error::{Error, Result};
use crate::types::Mask;

/// Composite a foreground mask into an RGBA image's alpha channel
///
/// The mask is resampled to `(width, height)` with bilinear filtering (a
/// no-op when dimensions already match), each sample is clamped to `[0, 1]`,
/// and alpha is written as `round(sample * 255)`. R/G/B bytes are copied
/// verbatim from `pixels`.
///
/// # Errors
/// Returns [`Error::Transfer`] when `pixels` does not hold exactly
/// `width * height` RGBA pixels.
pub fn composite(pixels: &[u8], width: u32, height: u32, mask: &Mask) -> Result<Vec<u8>> {
    let pixel_count = (width as usize) * (height as usize);
    if pixels.len() != pixel_count * 4 {
        return Err(Error::transfer(format!(
            "input buffer length {} does not match {}x{}",
            pixels.len(),
            width,
            height
        )));
    }

    let alpha = resample_bilinear(mask, width, height);

    let mut output = Vec::with_capacity(pixels.len());
    for (index, value) in alpha.iter().enumerate() {
        let offset = index * 4;
        let rgb = pixels
            .get(offset..offset + 3)
            .ok_or_else(|| Error::transfer("input buffer truncated mid-pixel"))?;
        output.extend_from_slice(rgb);
        output.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
    }
    Ok(output)
}

/// Resample a mask grid to the target resolution with bilinear filtering
///
/// Sample positions align pixel centers between the two grids, so equal
/// dimensions reproduce the source values exactly. Values are returned
/// unclamped; callers clamp at the point of numeric use.
#[must_use]
pub fn resample_bilinear(mask: &Mask, out_width: u32, out_height: u32) -> Vec<f32> {
    let (src_w, src_h) = (mask.width(), mask.height());
    let mut output = Vec::with_capacity((out_width as usize) * (out_height as usize));

    if src_w == 0 || src_h == 0 || out_width == 0 || out_height == 0 {
        output.resize((out_width as usize) * (out_height as usize), 0.0);
        return output;
    }

    let scale_x = src_w as f32 / out_width as f32;
    let scale_y = src_h as f32 / out_height as f32;

    for y in 0..out_height {
        // Center-aligned source coordinate, clamped to the grid
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = src_y.floor() as u32;
        let y1 = (y0 + 1).min(src_h - 1);
        let ty = src_y - y0 as f32;

        for x in 0..out_width {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = src_x.floor() as u32;
            let x1 = (x0 + 1).min(src_w - 1);
            let tx = src_x - x0 as f32;

            let top = lerp(mask.get(x0, y0), mask.get(x1, y0), tx);
            let bottom = lerp(mask.get(x0, y1), mask.get(x1, y1), tx);
            output.push(lerp(top, bottom, ty));
        }
    }
    output
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
