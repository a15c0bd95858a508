//! Classifier training from a labelled dataset.
//!
//! Loss is the sum over positions of per-position cross-entropy. Weights are
//! written to the output file whenever exact-match accuracy improves.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::seq::SliceRandom;
use std::path::Path;
use std::time::Instant;

use super::dataset::LabelSet;
use super::error::ModelError;
use super::model::{CaptchaCnn, ModelShape};
use super::preprocess::{to_model_gray, unit_pixels};
use super::vocab::Vocabulary;

/// Training hyperparameters.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub height: usize,
    pub width: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 64,
            learning_rate: 0.001,
            height: 60,
            width: 120,
        }
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub shape: ModelShape,
    pub samples: usize,
    pub epochs_run: usize,
    /// Best exact-match accuracy in `[0, 1]`
    pub best_accuracy: f32,
}

/// Images and targets held as whole-dataset tensors.
struct TrainingSet {
    /// `(n, 1, height, width)` in `[0, 1]`
    images: Tensor,
    /// `(n, num_positions)` class indices
    targets: Tensor,
    len: usize,
}

fn load_training_set(
    labels: &LabelSet,
    image_dir: &Path,
    vocab: &Vocabulary,
    shape: ModelShape,
    device: &Device,
) -> Result<TrainingSet, ModelError> {
    let n = labels.len();
    let mut pixels = Vec::with_capacity(n * shape.height * shape.width);
    let mut targets = Vec::with_capacity(n * shape.num_positions);

    for sample in &labels.samples {
        let img = image::open(image_dir.join(&sample.image_name))?;
        let gray = to_model_gray(&img, shape.height, shape.width);
        pixels.extend(unit_pixels(&gray));
        targets.extend(vocab.encode(&sample.label)?);
    }

    Ok(TrainingSet {
        images: Tensor::from_vec(pixels, (n, 1, shape.height, shape.width), device)?,
        targets: Tensor::from_vec(targets, (n, shape.num_positions), device)?,
        len: n,
    })
}

/// Sum over positions of cross-entropy, averaged over the batch.
fn sequence_loss(logits: &Tensor, targets: &Tensor, shape: ModelShape) -> Result<Tensor, ModelError> {
    let batch = targets.dims()[0];
    let flat_logits = logits.reshape((batch * shape.num_positions, shape.vocab_size))?;
    let flat_targets = targets.reshape(batch * shape.num_positions)?;
    let mean = loss::cross_entropy(&flat_logits, &flat_targets)?;
    Ok(mean.affine(shape.num_positions as f64, 0.0)?)
}

/// Fraction of samples whose every position is predicted correctly.
fn exact_match_accuracy(
    model: &CaptchaCnn,
    set: &TrainingSet,
    shape: ModelShape,
    batch_size: usize,
) -> Result<f32, ModelError> {
    let mut correct = 0.0f32;
    let mut start = 0;
    while start < set.len {
        let len = batch_size.min(set.len - start);
        let images = set.images.narrow(0, start, len)?;
        let targets = set.targets.narrow(0, start, len)?;
        let logits = model.forward_t(&images, false)?;
        let predicted = logits
            .reshape((len, shape.num_positions, shape.vocab_size))?
            .argmax(D::Minus1)?;
        correct += predicted
            .eq(&targets)?
            .min(D::Minus1)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        start += len;
    }
    Ok(correct / set.len as f32)
}

/// Trains a new classifier and saves the best weights to `output`.
pub fn train(
    labels: &LabelSet,
    image_dir: &Path,
    vocab: &Vocabulary,
    config: &TrainConfig,
    output: &Path,
) -> Result<TrainingReport, ModelError> {
    let num_positions = labels.num_positions()?;
    let shape = ModelShape::new(num_positions, vocab.len(), config.height, config.width)?;
    let device = Device::cuda_if_available(0)?;
    log::info!("Training on {:?}: {} samples, shape {:?}", device, labels.len(), shape);

    let set = load_training_set(labels, image_dir, vocab, shape, &device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = CaptchaCnn::new(shape, vb)?;
    let params = ParamsAdamW {
        lr: config.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(varmap.all_vars(), params)?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let batch_size = config.batch_size.max(1);
    let mut order: Vec<u32> = (0..set.len as u32).collect();
    let mut rng = rand::thread_rng();
    let mut best: Option<f32> = None;

    for epoch in 1..=config.epochs {
        let started = Instant::now();
        order.shuffle(&mut rng);
        let mut epoch_loss = 0.0f32;
        let mut batches = 0usize;

        for (step, chunk) in order.chunks(batch_size).enumerate() {
            let index = Tensor::from_slice(chunk, chunk.len(), &device)?;
            let images = set.images.index_select(&index, 0)?;
            let targets = set.targets.index_select(&index, 0)?;

            let logits = model.forward_t(&images, true)?;
            let batch_loss = sequence_loss(&logits, &targets, shape)?;
            optimizer.backward_step(&batch_loss)?;

            let value = batch_loss.to_scalar::<f32>()?;
            epoch_loss += value;
            batches += 1;
            if (step + 1) % 10 == 0 {
                log::debug!("Epoch {}/{} step {}: loss {:.4}", epoch, config.epochs, step + 1, value);
            }
        }

        let accuracy = exact_match_accuracy(&model, &set, shape, batch_size)?;
        log::info!(
            "Epoch {}/{}: mean loss {:.4}, accuracy {:.2}% ({:.1}s)",
            epoch,
            config.epochs,
            epoch_loss / batches.max(1) as f32,
            accuracy * 100.0,
            started.elapsed().as_secs_f32()
        );

        if best.is_none_or(|b| accuracy > b) {
            best = Some(accuracy);
            varmap.save(output)?;
            log::info!("Saved model with accuracy {:.2}% to {}", accuracy * 100.0, output.display());
        }
    }

    Ok(TrainingReport {
        shape,
        samples: set.len,
        epochs_run: config.epochs,
        best_accuracy: best.unwrap_or(0.0),
    })
}
