//! Fixed-length multi-character CAPTCHA classifier.
//!
//! Three conv → ReLU → 2×2 max-pool stages (32, 64, 128 channels) followed by
//! a 512-wide hidden layer with dropout and a linear head producing
//! `num_positions × vocab_size` scores per image.

use candle_core::Tensor;
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Dropout, Linear, VarBuilder};

use super::error::ModelError;

pub const CONV_CHANNELS: [usize; 3] = [32, 64, 128];
pub const HIDDEN_WIDTH: usize = 512;
pub const DROPOUT_RATE: f32 = 0.5;

/// Smallest side the three pooling stages can reduce without hitting zero.
const MIN_SIDE: usize = 8;

/// Dimensions a network instance is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelShape {
    pub num_positions: usize,
    pub vocab_size: usize,
    pub height: usize,
    pub width: usize,
}

impl ModelShape {
    pub fn new(
        num_positions: usize,
        vocab_size: usize,
        height: usize,
        width: usize,
    ) -> Result<Self, ModelError> {
        if height < MIN_SIDE || width < MIN_SIDE {
            return Err(ModelError::InvalidImageSize { height, width });
        }
        if num_positions == 0 || vocab_size == 0 {
            return Err(ModelError::ShapeMismatch {
                output: num_positions * vocab_size,
                positions: num_positions,
                vocab_size,
            });
        }
        Ok(Self {
            num_positions,
            vocab_size,
            height,
            width,
        })
    }

    /// Length of the flat score vector.
    pub fn output_width(&self) -> usize {
        self.num_positions * self.vocab_size
    }

    pub fn flattened_features(&self) -> usize {
        flattened_feature_size(self.height, self.width)
    }
}

/// Size of the conv output fed to the first linear layer.
///
/// Padding keeps each convolution size-preserving and each pooling stage
/// floors the side in half, so three stages give `floor(side / 8)`.
pub fn flattened_feature_size(height: usize, width: usize) -> usize {
    let last_channels = CONV_CHANNELS[CONV_CHANNELS.len() - 1];
    let (mut h, mut w) = (height, width);
    for _ in CONV_CHANNELS {
        h /= 2;
        w /= 2;
    }
    last_channels * h * w
}

pub struct CaptchaCnn {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    fc1: Linear,
    dropout: Dropout,
    fc2: Linear,
    shape: ModelShape,
}

impl CaptchaCnn {
    /// Builds the network, pulling parameters from `vb`.
    ///
    /// With a freshly created `VarMap` behind `vb` this initialises new
    /// weights; with loaded tensors it fails if any stored shape differs.
    pub fn new(shape: ModelShape, vb: VarBuilder) -> Result<Self, ModelError> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let [c1, c2, c3] = CONV_CHANNELS;
        let conv1 = conv2d(1, c1, 3, cfg, vb.pp("conv1"))?;
        let conv2 = conv2d(c1, c2, 3, cfg, vb.pp("conv2"))?;
        let conv3 = conv2d(c2, c3, 3, cfg, vb.pp("conv3"))?;
        let fc1 = linear(shape.flattened_features(), HIDDEN_WIDTH, vb.pp("fc1"))?;
        let fc2 = linear(HIDDEN_WIDTH, shape.output_width(), vb.pp("fc2"))?;

        Ok(Self {
            conv1,
            conv2,
            conv3,
            fc1,
            dropout: Dropout::new(DROPOUT_RATE),
            fc2,
            shape,
        })
    }

    pub fn shape(&self) -> ModelShape {
        self.shape
    }

    /// Runs the network on a `(batch, 1, height, width)` tensor.
    ///
    /// Dropout is only applied when `train` is set.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, ModelError> {
        self.check_input(xs)?;
        let xs = self.features(xs)?;
        let xs = xs.flatten_from(1)?;
        let xs = xs.apply(&self.fc1)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        Ok(xs.apply(&self.fc2)?)
    }

    fn features(&self, xs: &Tensor) -> Result<Tensor, ModelError> {
        let xs = xs.apply(&self.conv1)?.relu()?.max_pool2d(2)?;
        let xs = xs.apply(&self.conv2)?.relu()?.max_pool2d(2)?;
        let xs = xs.apply(&self.conv3)?.relu()?.max_pool2d(2)?;
        Ok(xs)
    }

    fn check_input(&self, xs: &Tensor) -> Result<(), ModelError> {
        let dims = xs.dims();
        let ok = dims.len() == 4
            && dims[1] == 1
            && dims[2] == self.shape.height
            && dims[3] == self.shape.width;
        if ok {
            return Ok(());
        }
        let batch = dims.first().copied().unwrap_or(1);
        Err(ModelError::DimensionMismatch {
            expected: vec![batch, 1, self.shape.height, self.shape.width],
            actual: dims.to_vec(),
        })
    }
}
