use candle_core::{Device, Tensor};
use image::{imageops::FilterType, DynamicImage, GrayImage};

use super::error::ModelError;

/// Converts an image to single-channel and resizes it to `(height, width)`.
///
/// Triangle (bilinear) filtering matches what the training set was resized with.
pub fn to_model_gray(img: &DynamicImage, height: usize, width: usize) -> GrayImage {
    let gray = img.to_luma8();
    if gray.dimensions() == (width as u32, height as u32) {
        return gray;
    }
    image::imageops::resize(&gray, width as u32, height as u32, FilterType::Triangle)
}

/// Scales 8-bit intensities into `[0, 1]`, row-major.
pub fn unit_pixels(gray: &GrayImage) -> Vec<f32> {
    gray.pixels().map(|p| p[0] as f32 / 255.0).collect()
}

/// Full inference preprocessing: gray, resize, scale, add batch and channel axes.
///
/// Returns a `(1, 1, height, width)` tensor.
pub fn image_to_tensor(
    img: &DynamicImage,
    height: usize,
    width: usize,
    device: &Device,
) -> Result<Tensor, ModelError> {
    let gray = to_model_gray(img, height, width);
    let data = unit_pixels(&gray);
    Ok(Tensor::from_vec(data, (1, 1, height, width), device)?)
}

/// Decodes PNG/JPEG bytes, as returned by an element screenshot.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ModelError> {
    Ok(image::load_from_memory(bytes)?)
}
