use image::{DynamicImage, ImageReader};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use std::path::Path;

use super::model::InferenceError;

pub const INPUT_SIZE: u32 = 64;
pub const INPUT_CHANNELS: usize = 3;
/// Batch-of-one NHWC layout expected by the classifier.
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, INPUT_CHANNELS];

/// Decodes by content rather than extension, since stored names may have
/// lost theirs during sanitization.
pub fn decode_file(path: &Path) -> Result<DynamicImage, InferenceError> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(img)
}

pub fn load_tensor(path: &Path) -> Result<Array4<f32>, InferenceError> {
    let img = decode_file(path)?;
    Ok(to_tensor(&img))
}

/// Resizes to 64x64 RGB with nearest-neighbour sampling. Pixel values stay on
/// the raw 0..=255 scale the model was trained on.
pub fn to_tensor(img: &DynamicImage) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Nearest);

    Array4::from_shape_fn(INPUT_SHAPE, |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32
    })
}
