//! Synthetic images for end-to-end runs

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

/// One generated upload and what the pipeline should make of it.
#[derive(Debug, Clone)]
pub struct TestImageFixture {
    pub filename: &'static str,
    pub width: u32,
    pub height: u32,
    pub alpha: bool,
    pub format: ImageFormat,
    pub description: &'static str,
}

impl TestImageFixture {
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// Encoded gradient image of the fixture's size.
    pub fn bytes(&self) -> Vec<u8> {
        let image = if self.alpha {
            DynamicImage::ImageRgba8(RgbaImage::from_fn(self.width, self.height, |x, y| {
                Rgba([(x % 256) as u8, (y % 256) as u8, 90, ((x + y) % 256) as u8])
            }))
        } else {
            DynamicImage::ImageRgb8(RgbImage::from_fn(self.width, self.height, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, 90])
            }))
        };
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), self.format)
            .expect("fixture encodes");
        bytes
    }

    /// Output size for a given scale factor and working-size limit.
    pub fn expected_output(&self, scale: u32, max_dimension: u32) -> (u32, u32) {
        let longest = self.width.max(self.height);
        let (w, h) = if longest > max_dimension {
            let ratio = max_dimension as f64 / longest as f64;
            (
                ((self.width as f64 * ratio).round() as u32).max(1),
                ((self.height as f64 * ratio).round() as u32).max(1),
            )
        } else {
            (self.width, self.height)
        };
        (w * scale, h * scale)
    }
}

pub const TEST_FIXTURES: &[TestImageFixture] = &[
    TestImageFixture {
        filename: "square.png",
        width: 100,
        height: 100,
        alpha: false,
        format: ImageFormat::Png,
        description: "100x100 RGB PNG",
    },
    TestImageFixture {
        filename: "photo.jpg",
        width: 160,
        height: 90,
        alpha: false,
        format: ImageFormat::Jpeg,
        description: "160x90 JPEG",
    },
    TestImageFixture {
        filename: "logo.png",
        width: 64,
        height: 64,
        alpha: true,
        format: ImageFormat::Png,
        description: "64x64 PNG with transparency",
    },
    TestImageFixture {
        filename: "banner.png",
        width: 1024,
        height: 256,
        alpha: false,
        format: ImageFormat::Png,
        description: "1024x256 PNG, downscaled before upscaling",
    },
];
