//! Decoded overlay imagery.
//!
//! The pipeline hands image bytes to [`decode_image`] on a blocking worker
//! and shares the resulting [`DecodedImage`] between every mapping that ends
//! up texturing with it. Decoding always produces tightly-packed RGBA8; the
//! consistency check in [`DecodedImage::is_consistent`] exists for images
//! constructed by overlay sources directly.

use bytes::Bytes;

use crate::error::OverlayError;

/// A decoded, CPU-side overlay image.
///
/// Shared via `Arc` between the owning tile, renderer preparation, and any
/// deduplicated sibling requests. Pixels are row-major with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    channels: u8,
    bytes_per_channel: u8,
    pixels: Bytes,
}

impl DecodedImage {
    /// Creates an image from raw components. No validation is performed
    /// here; the load pipeline checks [`is_consistent`](Self::is_consistent)
    /// before accepting an image.
    pub fn new(width: u32, height: u32, channels: u8, bytes_per_channel: u8, pixels: Bytes) -> Self {
        Self {
            width,
            height,
            channels,
            bytes_per_channel,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn bytes_per_channel(&self) -> u8 {
        self.bytes_per_channel
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// Bytes required by the declared dimensions and channel layout.
    pub fn required_bytes(&self) -> u64 {
        u64::from(self.width)
            * u64::from(self.height)
            * u64::from(self.channels)
            * u64::from(self.bytes_per_channel)
    }

    /// True if the image has positive dimensions and enough pixel data to
    /// back them. Images failing this check are rejected by the pipeline.
    pub fn is_consistent(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() as u64 >= self.required_bytes()
    }

    /// Size of the pixel buffer in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.pixels.len() as u64
    }
}

/// Decodes compressed image bytes (PNG, JPEG, ...) into RGBA8.
pub fn decode_image(data: &[u8]) -> Result<DecodedImage, OverlayError> {
    if data.is_empty() {
        return Err(OverlayError::Decode("empty image data".to_string()));
    }

    let decoded = image::load_from_memory(data)
        .map_err(|e| OverlayError::Decode(e.to_string()))?
        .to_rgba8();

    let (width, height) = decoded.dimensions();
    Ok(DecodedImage::new(
        width,
        height,
        4,
        1,
        Bytes::from(decoded.into_raw()),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encodes a solid-color PNG for use as fake network payload in tests.
    pub(crate) fn encode_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([64, 128, 192, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encoding test PNG");
        out.into_inner()
    }

    #[test]
    fn test_decode_round_trip() {
        let png = encode_test_png(8, 4);
        let decoded = decode_image(&png).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 4);
        assert_eq!(decoded.channels(), 4);
        assert_eq!(decoded.bytes_per_channel(), 1);
        assert!(decoded.is_consistent());
        assert_eq!(decoded.size_bytes(), 8 * 4 * 4);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_image(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(result, Err(OverlayError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_empty() {
        let result = decode_image(&[]);
        assert!(matches!(result, Err(OverlayError::Decode(_))));
    }

    #[test]
    fn test_consistency_check() {
        let good = DecodedImage::new(2, 2, 4, 1, Bytes::from(vec![0u8; 16]));
        assert!(good.is_consistent());

        let truncated = DecodedImage::new(2, 2, 4, 1, Bytes::from(vec![0u8; 15]));
        assert!(!truncated.is_consistent());

        let zero_sized = DecodedImage::new(0, 0, 4, 1, Bytes::new());
        assert!(!zero_sized.is_consistent());
    }
}
