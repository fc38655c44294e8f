use crate::{
    core::bitmap::Bitmap,
    image::transform::ScalingMode,
    utils::error::{LoadError, LoadResult},
};
use image::{GenericImageView, ImageError, ImageReader};
use log::debug;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub max_size: Option<(u32, u32)>,
    pub scaling: ScalingMode,
}

pub struct ImageLoader;

impl ImageLoader {
    /// Decodes encoded image bytes fetched for `id`.
    ///
    /// CPU bound; callers on an async runtime should run it off the reactor.
    pub fn decode(id: &str, bytes: &[u8], options: &DecodeOptions) -> LoadResult<Bitmap> {
        if bytes.is_empty() {
            return Err(LoadError::decode(id, "empty response body"));
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| LoadError::decode(id, e.to_string()))?;

        if reader.format().is_none() {
            return Err(LoadError::decode(id, "unrecognized image format"));
        }

        let img = reader.decode().map_err(|e| Self::map_error(id, e))?;
        let (width, height) = img.dimensions();
        debug!("Decoded {} ({}x{})", id, width, height);

        let img = match options.max_size {
            Some((max_width, max_height)) => {
                options.scaling.constrain(img, max_width, max_height)
            }
            None => img,
        };

        Ok(Bitmap::new(img))
    }

    fn map_error(id: &str, err: ImageError) -> LoadError {
        match err {
            ImageError::Unsupported(e) => LoadError::decode(id, format!("unsupported: {e}")),
            ImageError::Limits(e) => LoadError::decode(id, format!("limits exceeded: {e}")),
            other => LoadError::decode(id, other.to_string()),
        }
    }
}
