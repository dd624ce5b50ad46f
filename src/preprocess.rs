//! Image preprocessing for model inference
//!
//! Shapes a decoded RGBA image into the normalized NCHW tensor the
//! segmentation model expects. The model contract is a plain resize to its
//! input resolution (no letterboxing), which keeps the output mask in the
//! same coordinate space as the stretched input and lets the compositor map
//! it back with a single bilinear resize.

use crate::error::{Error, Result};
use crate::models::PreprocessorConfig;
use image::RgbaImage;
use ndarray::Array4;

/// Stateless image-to-tensor conversion
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Convert an RGBA image into a normalized `[1, 3, H, W]` tensor
    ///
    /// Alpha is dropped; channels are scaled to `[0, 1]` and normalized with
    /// the model's per-channel mean and standard deviation.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a degenerate target size.
    pub fn to_tensor(image: &RgbaImage, config: &PreprocessorConfig) -> Result<Array4<f32>> {
        let [target_w, target_h] = config.target_size;
        if target_w == 0 || target_h == 0 {
            return Err(Error::invalid_config(format!(
                "Degenerate model input size {target_w}x{target_h}"
            )));
        }

        let resized = if image.dimensions() == (target_w, target_h) {
            image.clone()
        } else {
            image::imageops::resize(
                image,
                target_w,
                target_h,
                image::imageops::FilterType::Triangle,
            )
        };

        let (width, height) = (target_w as usize, target_h as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, height, width));

        #[allow(clippy::indexing_slicing)]
        // Tensor dimensions are pre-allocated to match the resized image
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                let scaled = f32::from(pixel[channel]) / 255.0;
                tensor[[0, channel, y, x]] = (scaled - config.normalization_mean[channel])
                    / config.normalization_std[channel];
            }
        }

        Ok(tensor)
    }
}
