//! Coarse image-quality heuristic for uploaded scans.
//!
//! Combines global contrast (intensity standard deviation) with sharpness
//! (variance of the Laplacian response) into a 0..=100 score. Not calibrated
//! against any ground truth.

use image::{DynamicImage, GrayImage, Luma};
use ndarray::Array2;
use std::path::Path;

use super::preprocess::decode_file;

const CONTRAST_SCALE: f64 = 255.0;
const SHARPNESS_SCALE: f64 = 1000.0;
const COMPONENT_WEIGHT: f64 = 50.0;
const MAX_SCORE: f64 = 100.0;

/// BT.601 luma weights, as used by OpenCV's grayscale decode.
const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Scores the image stored at `path`. Undecodable files score 0.
pub fn quality_score(path: &Path) -> f64 {
    match decode_file(path) {
        Ok(img) => score_gray(&to_gray(&img)),
        Err(e) => {
            log::warn!("Quality check could not decode {}: {}", path.display(), e);
            0.0
        }
    }
}

/// Grayscale with BT.601 weights. `DynamicImage::to_luma8` uses Rec. 709,
/// which shifts contrast on colour scans.
pub fn to_gray(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let pixel = rgb.get_pixel(x, y);
        let luma: f32 = pixel
            .0
            .iter()
            .zip(LUMA_WEIGHTS)
            .map(|(&channel, weight)| channel as f32 * weight)
            .sum();
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

pub fn score_gray(gray: &GrayImage) -> f64 {
    let intensities = to_array(gray);
    if intensities.is_empty() {
        return 0.0;
    }
    combine(contrast(&intensities), laplacian_variance(&intensities))
}

fn to_array(gray: &GrayImage) -> Array2<f64> {
    let (width, height) = gray.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        gray.get_pixel(x as u32, y as u32)[0] as f64
    })
}

/// Population standard deviation of pixel intensities.
pub fn contrast(intensities: &Array2<f64>) -> f64 {
    intensities.std(0.0)
}

/// Variance of the 4-neighbour Laplacian, with mirrored borders that do not
/// repeat the edge pixel.
pub fn laplacian_variance(intensities: &Array2<f64>) -> f64 {
    let (rows, cols) = intensities.dim();
    let at = |y: isize, x: isize| intensities[[reflect101(y, rows), reflect101(x, cols)]];

    let response = Array2::from_shape_fn((rows, cols), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        at(y - 1, x) + at(y + 1, x) + at(y, x - 1) + at(y, x + 1) - 4.0 * at(y, x)
    });
    response.var(0.0)
}

fn reflect101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mirrored = if i < 0 {
        -i
    } else if i > last {
        2 * last - i
    } else {
        i
    };
    mirrored.clamp(0, last) as usize
}

fn combine(contrast: f64, sharpness: f64) -> f64 {
    let raw = contrast / CONTRAST_SCALE * COMPONENT_WEIGHT
        + sharpness / SHARPNESS_SCALE * COMPONENT_WEIGHT;
    round2(raw.clamp(0.0, MAX_SCORE))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
