use std::fmt;

use image::RgbaImage;

use crate::error::{Failure, Result};

pub const CHANNELS: usize = 4;

/// Where a raster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageOrigin {
    Render,
    FallbackPattern,
    LoadedFromDisk,
    Generated,
}

impl ImageOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageOrigin::Render => "render",
            ImageOrigin::FallbackPattern => "fallback-pattern",
            ImageOrigin::LoadedFromDisk => "loaded-from-disk",
            ImageOrigin::Generated => "generated",
        }
    }
}

impl fmt::Display for ImageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-major 8-bit RGBA pixels with non-zero dimensions.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    origin: ImageOrigin,
}

impl RasterImage {
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>, origin: ImageOrigin) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Failure::decode(format!(
                "raster dimensions must be positive, got {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(Failure::decode(format!(
                "raster {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            origin,
        })
    }

    /// Builds a raster from normalized float channels, clamped to `0.0..=1.0`.
    pub fn from_normalized(
        width: u32,
        height: u32,
        channels: &[f32],
        origin: ImageOrigin,
    ) -> Result<Self> {
        let pixels = channels.iter().map(|value| unit_to_byte(*value)).collect();
        Self::from_rgba(width, height, pixels, origin)
    }

    pub fn from_image(image: RgbaImage, origin: ImageOrigin) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgba(width, height, image.into_raw(), origin)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn with_origin(mut self, origin: ImageOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.pixels[offset..offset + CHANNELS]);
        Some(out)
    }

    pub fn to_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            Failure::encode(format!(
                "pixel buffer does not fit {}x{}",
                self.width, self.height
            ))
        })
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("origin", &self.origin)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

pub fn unit_to_byte(value: f32) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
