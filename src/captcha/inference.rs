//! Model loading and CAPTCHA solving.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use image::DynamicImage;
use std::path::Path;

use super::error::ModelError;
use super::model::{CaptchaCnn, ModelShape};
use super::preprocess::{decode_image, image_to_tensor};
use super::vocab::Vocabulary;

/// Decoded CAPTCHA text with the soft-max probability of each chosen character.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub text: String,
    pub confidences: Vec<f32>,
}

impl Prediction {
    /// Confidence of the least certain position.
    pub fn min_confidence(&self) -> f32 {
        self.confidences.iter().copied().fold(1.0, f32::min)
    }
}

/// Anything that turns a captured CAPTCHA image into text.
pub trait SolveCaptcha {
    fn solve_bytes(&self, image_bytes: &[u8]) -> Result<Prediction, ModelError>;
}

impl<T: SolveCaptcha + ?Sized> SolveCaptcha for &T {
    fn solve_bytes(&self, image_bytes: &[u8]) -> Result<Prediction, ModelError> {
        (**self).solve_bytes(image_bytes)
    }
}

/// A loaded classifier. Immutable after load and reusable for any number of solves.
pub struct CaptchaSolver {
    model: CaptchaCnn,
    vocab: Vocabulary,
    device: Device,
}

/// Loads trained weights into a freshly constructed network of `shape`.
///
/// Fails with `ModelNotFound` when the file is absent, `ShapeMismatch` when
/// the stored head does not split into `shape.num_positions` positions, and
/// `ModelCorrupt` when the file cannot be read or any layer's shape differs.
pub fn load_model(path: &Path, shape: ModelShape, vocab: Vocabulary) -> Result<CaptchaSolver, ModelError> {
    if !path.exists() {
        return Err(ModelError::ModelNotFound(path.to_path_buf()));
    }
    if vocab.len() != shape.vocab_size {
        return Err(ModelError::ShapeMismatch {
            output: shape.output_width(),
            positions: shape.num_positions,
            vocab_size: vocab.len(),
        });
    }

    let device = Device::cuda_if_available(0)?;
    let tensors = candle_core::safetensors::load(path, &device)
        .map_err(|e| ModelError::ModelCorrupt(format!("{}: {}", path.display(), e)))?;

    let head = tensors
        .get("fc2.weight")
        .ok_or_else(|| ModelError::ModelCorrupt("missing output layer fc2.weight".to_string()))?;
    let (head_rows, _) = head
        .dims2()
        .map_err(|_| ModelError::ModelCorrupt("fc2.weight is not a matrix".to_string()))?;
    check_split(head_rows, shape)?;

    let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
    let model = CaptchaCnn::new(shape, vb).map_err(|e| ModelError::ModelCorrupt(e.to_string()))?;

    log::info!(
        "CAPTCHA model loaded from {} ({} positions x {} classes, {}x{} input, {:?})",
        path.display(),
        shape.num_positions,
        shape.vocab_size,
        shape.height,
        shape.width,
        device
    );

    Ok(CaptchaSolver { model, vocab, device })
}

impl CaptchaSolver {
    pub fn shape(&self) -> ModelShape {
        self.model.shape()
    }

    /// Gray, resize, scale to `[0, 1]`, forward without dropout, then
    /// arg-max per position.
    pub fn solve(&self, img: &DynamicImage) -> Result<Prediction, ModelError> {
        let shape = self.model.shape();
        let input = image_to_tensor(img, shape.height, shape.width, &self.device)?;
        let logits = self.model.forward_t(&input, false)?.detach();
        let prediction = decode_scores(&logits, shape, &self.vocab)?;
        log::info!(
            "CAPTCHA solved: {} (min confidence {:.2})",
            prediction.text,
            prediction.min_confidence()
        );
        Ok(prediction)
    }
}

impl SolveCaptcha for CaptchaSolver {
    fn solve_bytes(&self, image_bytes: &[u8]) -> Result<Prediction, ModelError> {
        let img = decode_image(image_bytes)?;
        self.solve(&img)
    }
}

/// Ensures an output width divides exactly into the expected positions.
fn check_split(output: usize, shape: ModelShape) -> Result<(), ModelError> {
    let vocab_size = shape.vocab_size;
    if vocab_size == 0 || output % vocab_size != 0 || output / vocab_size != shape.num_positions {
        return Err(ModelError::ShapeMismatch {
            output,
            positions: shape.num_positions,
            vocab_size,
        });
    }
    Ok(())
}

/// Turns a `(1, positions × vocab)` score row into text and confidences.
pub(crate) fn decode_scores(
    logits: &Tensor,
    shape: ModelShape,
    vocab: &Vocabulary,
) -> Result<Prediction, ModelError> {
    let output = logits.elem_count();
    check_split(output, shape)?;

    let per_position = logits.reshape((shape.num_positions, shape.vocab_size))?;
    let indices = per_position.argmax(D::Minus1)?.to_vec1::<u32>()?;
    let confidences = candle_nn::ops::softmax(&per_position, D::Minus1)?
        .max(D::Minus1)?
        .to_vec1::<f32>()?;
    let text = vocab.decode(&indices)?;

    Ok(Prediction { text, confidences })
}
