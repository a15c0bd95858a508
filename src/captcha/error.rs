use std::path::PathBuf;

use super::vocab::VocabError;

/// Errors from the CAPTCHA model, its dataset and inference.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model weights not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("model weights are corrupt or incompatible: {0}")]
    ModelCorrupt(String),

    /// Input tensor does not have the shape the network was built for
    #[error("input dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Output width is not `num_positions × vocab_size`
    #[error("output width {output} does not split into {positions} positions of {vocab_size} classes")]
    ShapeMismatch {
        output: usize,
        positions: usize,
        vocab_size: usize,
    },

    #[error("insufficient training data: {} has no labelled samples", .0.display())]
    InsufficientTrainingData(PathBuf),

    #[error("invalid label '{label}' on row {row}: {reason}")]
    InvalidLabel {
        row: usize,
        label: String,
        reason: String,
    },

    #[error("invalid image dimensions {height}x{width}: both must be at least 8")]
    InvalidImageSize { height: usize, width: usize },

    #[error(transparent)]
    Vocab(#[from] VocabError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
