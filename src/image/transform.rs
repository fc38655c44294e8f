use crate::utils::error::LoaderError;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingMode {
    Fill,
    #[default]
    Fit,
    Stretch,
}

impl FromStr for ScalingMode {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fill" => Ok(Self::Fill),
            "fit" => Ok(Self::Fit),
            "stretch" => Ok(Self::Stretch),
            other => Err(LoaderError::InvalidScaling(other.to_string())),
        }
    }
}

impl ScalingMode {
    pub fn scale(
        &self,
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
    ) -> DynamicImage {
        let (width, height) = image.dimensions();
        match self {
            ScalingMode::Stretch => {
                image.resize_exact(target_width, target_height, FilterType::Lanczos3)
            }
            ScalingMode::Fit => {
                let ratio =
                    (target_width as f64 / width as f64).min(target_height as f64 / height as f64);
                Self::resize_by(image, ratio)
            }
            ScalingMode::Fill => {
                let ratio =
                    (target_width as f64 / width as f64).max(target_height as f64 / height as f64);
                Self::resize_by(image, ratio)
            }
        }
    }

    /// Downscales `image` into the bound, leaving images that already fit untouched.
    pub fn constrain(&self, image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
        let (width, height) = image.dimensions();
        if width <= max_width && height <= max_height {
            return image;
        }
        self.scale(&image, max_width, max_height)
    }

    fn resize_by(image: &DynamicImage, ratio: f64) -> DynamicImage {
        let (width, height) = image.dimensions();
        let new_width = ((width as f64 * ratio) as u32).max(1);
        let new_height = ((height as f64 * ratio) as u32).max(1);

        image.resize_exact(new_width, new_height, FilterType::Lanczos3)
    }
}
