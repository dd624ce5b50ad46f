//! Core data types for the background removal pipeline

use crate::error::{Error, Result};
use image::{DynamicImage, RgbaImage};
use std::path::Path;

/// A decoded image queued for background removal
///
/// Owns its RGBA8 pixel buffer exclusively. Submitting the job moves the
/// buffer into the worker channel; the sender keeps no alias, so cross-thread
/// handoff is a move rather than a shared mutable reference.
#[derive(Debug)]
pub struct ImageJob {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    source_id: String,
}

impl ImageJob {
    /// Create a job from a raw RGBA8 buffer
    ///
    /// # Errors
    /// Returns [`Error::Transfer`] when the buffer length does not match
    /// `width * height * 4`.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        source_id: impl Into<String>,
    ) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(Error::transfer(format!(
                "RGBA buffer length {} does not match {}x{} ({} bytes expected)",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            source_id: source_id.into(),
        })
    }

    /// Decode encoded image bytes (PNG, JPEG, WebP) into a job
    ///
    /// # Errors
    /// Returns [`Error::Decode`] when the bytes are not a readable image.
    pub fn from_bytes(bytes: &[u8], source_id: impl Into<String>) -> Result<Self> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::from_image(&image, source_id))
    }

    /// Build a job from an already decoded image
    #[must_use]
    pub fn from_image(image: &DynamicImage, source_id: impl Into<String>) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            pixels: rgba.into_raw(),
            width,
            height,
            source_id: source_id.into(),
        }
    }

    /// Image width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Identifier of the submission source (file name, upload id, ...)
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Borrow the RGBA pixel buffer
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Consume the job, yielding the buffer and its dimensions
    pub(crate) fn into_parts(self) -> (Vec<u8>, u32, u32, String) {
        (self.pixels, self.width, self.height, self.source_id)
    }
}

/// Single-channel foreground probability grid at the model's native resolution
///
/// Values are conceptually probabilities in `[0, 1]`, but raw model output may
/// stray outside that range; consumers clamp before any numeric use.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    data: Vec<f32>,
    width: u32,
    height: u32,
}

impl Mask {
    /// Create a mask from row-major probability values
    ///
    /// # Errors
    /// Returns [`Error::Transfer`] when the data length does not match
    /// `width * height`.
    pub fn new(data: Vec<f32>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(Error::transfer(format!(
                "mask length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Mask width in samples
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mask height in samples
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Borrow the raw probability values, row-major
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Sample the raw (unclamped) value at integer coordinates
    ///
    /// Coordinates are clamped to the grid edges.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let y = y.min(self.height.saturating_sub(1)) as usize;
        self.data
            .get(y * self.width as usize + x)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Final RGBA8 image with the background mask written into the alpha channel
///
/// R/G/B are identical to the input at every pixel; only alpha differs.
/// Ownership of the buffer transfers out of the worker with the `Complete`
/// event.
#[derive(Debug, Clone)]
pub struct ResultImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl ResultImage {
    /// Wrap a raw RGBA8 buffer
    ///
    /// # Errors
    /// Returns [`Error::Transfer`] when the buffer length does not match the
    /// dimensions.
    pub fn from_raw(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(Error::transfer(format!(
                "result buffer length {} does not match {}x{}",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Image width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Borrow the RGBA pixel buffer
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Consume the result, yielding the raw buffer
    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.pixels
    }

    /// Convert into an [`RgbaImage`] for further processing
    ///
    /// # Errors
    /// Returns [`Error::Transfer`] if the buffer cannot back an image of the
    /// recorded dimensions; unreachable for values built via
    /// [`from_raw`](Self::from_raw).
    pub fn into_rgba_image(self) -> Result<RgbaImage> {
        let (width, height) = (self.width, self.height);
        RgbaImage::from_raw(width, height, self.pixels)
            .ok_or_else(|| Error::transfer("result buffer rejected by image container"))
    }

    /// Encode as PNG bytes (the only container here that keeps alpha lossless)
    ///
    /// # Errors
    /// Returns [`Error::Decode`] on encoder failure.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let image = RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| Error::transfer("result buffer rejected by image container"))?;
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        DynamicImage::ImageRgba8(image).write_to(&mut cursor, image::ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Save as a PNG file
    ///
    /// # Errors
    /// Returns [`Error::Io`] or [`Error::Decode`] on write or encode failure.
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_png_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
