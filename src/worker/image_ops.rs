use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageResult, Rgb, RgbImage};

use crate::models::job::ImageSize;

/// Decoded input after it has been made ready for the model.
#[derive(Debug)]
pub struct PreparedImage {
    pub image: DynamicImage,
    pub original_size: ImageSize,
    /// Downscaled because the longest side exceeded the working limit.
    pub resized: bool,
    /// Alpha channel composited onto white.
    pub flattened: bool,
}

pub fn size_of(image: &DynamicImage) -> ImageSize {
    ImageSize {
        width: image.width(),
        height: image.height(),
    }
}

/// Decode, bound the working size and drop transparency.
pub fn prepare(data: &[u8], max_dimension: u32) -> ImageResult<PreparedImage> {
    let image = image::load_from_memory(data)?;
    let original_size = size_of(&image);

    let (image, resized) = match downscale_to_fit(&image, max_dimension) {
        Some(smaller) => (smaller, true),
        None => (image, false),
    };
    let (image, flattened) = match flatten_alpha(&image) {
        Some(opaque) => (opaque, true),
        None => (image, false),
    };

    Ok(PreparedImage {
        image,
        original_size,
        resized,
        flattened,
    })
}

/// Bilinear downscale keeping aspect ratio, or `None` when already small enough.
pub fn downscale_to_fit(image: &DynamicImage, max_dimension: u32) -> Option<DynamicImage> {
    if max_dimension == 0 || image.width().max(image.height()) <= max_dimension {
        return None;
    }
    Some(image.resize(max_dimension, max_dimension, FilterType::Triangle))
}

/// Composite onto a white background, or `None` for images without alpha.
pub fn flatten_alpha(image: &DynamicImage) -> Option<DynamicImage> {
    if !image.color().has_alpha() {
        return None;
    }
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    Some(DynamicImage::ImageRgb8(out))
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(&rgb)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_small_image_passes_through() {
        let data = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(100, 80)));
        let prepared = prepare(&data, 512).unwrap();
        assert!(!prepared.resized);
        assert!(!prepared.flattened);
        assert_eq!(prepared.original_size, ImageSize { width: 100, height: 80 });
        assert_eq!(size_of(&prepared.image), prepared.original_size);
    }

    #[test]
    fn test_large_image_is_bounded_keeping_aspect() {
        let data = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(2048, 1024)));
        let prepared = prepare(&data, 512).unwrap();
        assert!(prepared.resized);
        assert_eq!(prepared.original_size.width, 2048);
        assert_eq!(size_of(&prepared.image), ImageSize { width: 512, height: 256 });
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let mut rgba = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        let flat = flatten_alpha(&DynamicImage::ImageRgba8(rgba)).unwrap().to_rgb8();
        assert_eq!(flat.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(flat.get_pixel(1, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_opaque_image_is_not_flattened() {
        assert!(flatten_alpha(&DynamicImage::ImageRgb8(RgbImage::new(2, 2))).is_none());
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(prepare(b"definitely not an image", 512).is_err());
    }

    #[test]
    fn test_jpeg_output_decodes_with_same_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([200, 10, 10])));
        let jpeg = encode_jpeg(&image, 90).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }
}
