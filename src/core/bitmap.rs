use image::{DynamicImage, GenericImageView, RgbaImage};
use std::sync::Arc;

/// Decoded, immutable bitmap shared between the cache and its consumers.
///
/// Cloning only bumps a reference count.
#[derive(Clone, Debug)]
pub struct Bitmap {
    pixels: Arc<RgbaImage>,
    width: u32,
    height: u32,
}

impl Bitmap {
    pub fn new(image: DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: Arc::new(image.into_rgba8()),
            width,
            height,
        }
    }

    pub fn from_rgba(pixels: RgbaImage) -> Self {
        let (width, height) = pixels.dimensions();
        Self {
            pixels: Arc::new(pixels),
            width,
            height,
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// True when both handles point at the same decoded pixels.
    pub fn ptr_eq(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.pixels)
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.pixels == other.pixels
    }
}
