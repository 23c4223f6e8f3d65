//! Conditional re-encoding of uploaded images.
//!
//! Jpeg and webp come out as jpeg at the requested quality, png is re-packed losslessly at
//! maximum compression. A result that is not smaller than the input is thrown away, except
//! for webp, which is always normalised to jpeg.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};

use crate::config::DEFAULT_IMAGE_QUALITY;
use crate::error::CompressError;
use crate::filename::extension_lowercase;

/// outcome of one compression attempt
#[derive(Debug, Clone)]
pub struct CompressResult {
    pub data: Bytes,
    /// extension of `data`, lower case with the dot
    pub extension: String,
    pub did_compress: bool,
    pub original_size: u64,
    pub new_size: u64,
}

impl CompressResult {
    fn unchanged(data: Bytes, extension: String) -> Self {
        let size = data.len() as u64;
        Self {
            data,
            extension,
            did_compress: false,
            original_size: size,
            new_size: size,
        }
    }
}

/// image formats the pipeline knows how to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    WebP,
}

impl ImageKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            ".jpg" | ".jpeg" => Some(ImageKind::Jpeg),
            ".png" => Some(ImageKind::Png),
            ".webp" => Some(ImageKind::WebP),
            _ => None,
        }
    }

    pub fn from_filename(name: &str) -> Option<Self> {
        Self::from_extension(&extension_lowercase(name))
    }

    fn input_format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
            ImageKind::WebP => ImageFormat::WebP,
        }
    }

    /// extension of what we write back out
    pub fn output_extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg | ImageKind::WebP => ".jpg",
            ImageKind::Png => ".png",
        }
    }

    fn decode(self, data: &[u8]) -> image::ImageResult<DynamicImage> {
        image::load_from_memory_with_format(data, self.input_format())
    }

    fn encode(self, img: &DynamicImage, quality: u8) -> image::ImageResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            ImageKind::Jpeg | ImageKind::WebP => {
                // jpeg has no alpha channel
                img.to_rgb8()
                    .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
            }
            ImageKind::Png => {
                img.write_with_encoder(PngEncoder::new_with_quality(
                    &mut buf,
                    CompressionType::Best,
                    FilterType::Adaptive,
                ))?;
            }
        }
        Ok(buf)
    }
}

/// whether `filename` is one of the formats we try to shrink
pub fn is_compressible_image(filename: &str) -> bool {
    ImageKind::from_filename(filename).is_some()
}

/// quality outside 1..=100 means "use the default"
pub fn effective_quality(quality: i32) -> u8 {
    if (1..=100).contains(&quality) {
        quality as u8
    } else {
        DEFAULT_IMAGE_QUALITY as u8
    }
}

/// try to re-encode `data` smaller. Errors mean the caller must keep the original bytes.
pub fn compress_image(
    data: Bytes,
    filename: &str,
    quality: i32,
) -> Result<CompressResult, CompressError> {
    let extension = extension_lowercase(filename);
    let Some(kind) = ImageKind::from_extension(&extension) else {
        return Ok(CompressResult::unchanged(data, extension));
    };

    let quality = effective_quality(quality);
    let original_size = data.len() as u64;

    let img = kind.decode(&data).map_err(|source| CompressError::Decode {
        extension: extension.clone(),
        source,
    })?;

    let encoded = kind
        .encode(&img, quality)
        .map_err(|source| CompressError::Encode {
            extension: extension.clone(),
            source,
        })?;
    let new_size = encoded.len() as u64;

    if new_size >= original_size && kind != ImageKind::WebP {
        tracing::debug!(
            "Compression did not reduce size for {} ({} >= {}), keeping original",
            filename,
            new_size,
            original_size
        );
        return Ok(CompressResult::unchanged(data, extension));
    }

    Ok(CompressResult {
        data: Bytes::from(encoded),
        extension: kind.output_extension().to_string(),
        did_compress: true,
        original_size,
        new_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::webp::WebPEncoder;
    use image::{ImageBuffer, Rgb, RgbImage};

    // deterministic noise so jpeg has something to throw away
    fn noisy(width: u32, height: u32) -> RgbImage {
        let mut seed: u32 = 0x1234_5678;
        ImageBuffer::from_fn(width, height, |_, _| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [r, g, b, _] = seed.to_le_bytes();
            Rgb([r, g, b])
        })
    }

    fn jpeg_bytes(img: &RgbImage, quality: u8) -> Bytes {
        let mut buf = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
            .unwrap();
        Bytes::from(buf)
    }

    fn png_bytes(img: &RgbImage, compression: CompressionType, filter: FilterType) -> Bytes {
        let mut buf = Vec::new();
        img.write_with_encoder(PngEncoder::new_with_quality(&mut buf, compression, filter))
            .unwrap();
        Bytes::from(buf)
    }

    #[test]
    fn non_images_pass_through() {
        let data = Bytes::from_static(b"%PDF-1.7");
        let result = compress_image(data.clone(), "Doc.PDF", 50).unwrap();
        assert!(!result.did_compress);
        assert_eq!(result.data, data);
        assert_eq!(result.extension, ".pdf");
    }

    #[test]
    fn eligibility_is_case_insensitive() {
        assert!(is_compressible_image("a.JPG"));
        assert!(is_compressible_image("a.jpeg"));
        assert!(is_compressible_image("a.Png"));
        assert!(is_compressible_image("a.webp"));
        assert!(!is_compressible_image("a.gif"));
        assert!(!is_compressible_image("jpg"));
    }

    #[test]
    fn out_of_range_quality_uses_default() {
        assert_eq!(effective_quality(0), 80);
        assert_eq!(effective_quality(150), 80);
        assert_eq!(effective_quality(-3), 80);
        assert_eq!(effective_quality(1), 1);
        assert_eq!(effective_quality(100), 100);
    }

    #[test]
    fn jpeg_at_max_quality_shrinks() {
        let data = jpeg_bytes(&noisy(64, 64), 100);
        let result = compress_image(data.clone(), "shot.jpeg", 40).unwrap();

        assert!(result.did_compress);
        assert_eq!(result.extension, ".jpg");
        assert!(result.new_size < result.original_size);
        assert_eq!(result.original_size, data.len() as u64);
        assert!(image::load_from_memory_with_format(&result.data, ImageFormat::Jpeg).is_ok());
    }

    #[test]
    fn quality_150_matches_quality_80() {
        let data = jpeg_bytes(&noisy(48, 48), 100);
        let clamped = compress_image(data.clone(), "a.jpg", 150).unwrap();
        let explicit = compress_image(data, "a.jpg", 80).unwrap();
        assert_eq!(clamped.data, explicit.data);
        assert_eq!(clamped.did_compress, explicit.did_compress);
    }

    #[test]
    fn png_that_does_not_shrink_is_kept() {
        // already written the way we would write it
        let data = png_bytes(&noisy(16, 16), CompressionType::Best, FilterType::Adaptive);
        let result = compress_image(data.clone(), "icon.PNG", 80).unwrap();

        assert!(!result.did_compress);
        assert_eq!(result.data, data);
        assert_eq!(result.extension, ".png");
    }

    #[test]
    fn flat_png_is_repacked_smaller() {
        let flat: RgbImage = ImageBuffer::from_pixel(256, 256, Rgb([10, 200, 30]));
        let data = png_bytes(&flat, CompressionType::Fast, FilterType::NoFilter);
        let result = compress_image(data.clone(), "flat.png", 80).unwrap();

        assert!(result.did_compress);
        assert_eq!(result.extension, ".png");
        assert!(result.data.len() < data.len());
    }

    #[test]
    fn webp_always_becomes_jpeg() {
        let flat: RgbImage = ImageBuffer::from_pixel(8, 8, Rgb([255, 255, 255]));
        let mut buf = Vec::new();
        flat.write_with_encoder(WebPEncoder::new_lossless(&mut buf))
            .unwrap();

        let result = compress_image(Bytes::from(buf), "photo.webp", 95).unwrap();
        assert!(result.did_compress);
        assert_eq!(result.extension, ".jpg");
        assert!(image::load_from_memory_with_format(&result.data, ImageFormat::Jpeg).is_ok());
    }

    #[test]
    fn garbage_reports_decode_error_with_extension() {
        let err = compress_image(Bytes::from_static(b"not an image"), "x.JPG", 80).unwrap_err();
        match err {
            CompressError::Decode { extension, .. } => assert_eq!(extension, ".jpg"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
