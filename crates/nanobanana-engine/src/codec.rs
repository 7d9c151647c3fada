use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;

use crate::error::{Failure, Result};
use crate::raster::{ImageOrigin, RasterImage};

pub const PNG_MIME: &str = "image/png";

/// Encodes to PNG, which is lossless for 8-bit RGBA.
pub fn encode_png(image: &RasterImage) -> Result<Vec<u8>> {
    let buffer = image.to_image()?;
    let mut out = Cursor::new(Vec::new());
    buffer
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| Failure::encode(format!("PNG encode failed: {err}")))?;
    Ok(out.into_inner())
}

/// Decodes any container the `image` crate recognizes (PNG, JPEG, WebP)
/// into RGBA8.
pub fn decode(bytes: &[u8], origin: ImageOrigin) -> Result<RasterImage> {
    if bytes.is_empty() {
        return Err(Failure::decode("image payload is empty"));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| Failure::decode(format!("image decode failed: {err}")))?;
    RasterImage::from_image(decoded.to_rgba8(), origin)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim().as_bytes())
        .map_err(|err| Failure::decode(format!("base64 decode failed: {err}")))
}

/// PNG bytes wrapped as base64 text for JSON transport.
pub fn encode_png_base64(image: &RasterImage) -> Result<String> {
    Ok(encode_base64(&encode_png(image)?))
}

pub fn decode_base64_image(text: &str, origin: ImageOrigin) -> Result<RasterImage> {
    decode(&decode_base64(text)?, origin)
}

pub fn load_file(path: &Path) -> Result<RasterImage> {
    let bytes = std::fs::read(path)
        .map_err(|err| Failure::decode(format!("failed reading {}: {err}", path.display())))?;
    decode(&bytes, ImageOrigin::LoadedFromDisk)
}

pub fn mime_for_bytes(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => PNG_MIME,
    }
}
