//! CAPTCHA recognition: vocabulary, dataset, network, inference and training.

mod dataset;
mod error;
mod inference;
mod model;
mod preprocess;
mod training;
mod vocab;

pub use dataset::{append_label, init_labels_file, LabelSet, LabeledSample, LABELS_HEADER};
pub use error::ModelError;
pub use inference::{load_model, CaptchaSolver, Prediction, SolveCaptcha};
pub use model::{flattened_feature_size, CaptchaCnn, ModelShape};
pub use preprocess::{decode_image, image_to_tensor, to_model_gray};
pub use training::{train, TrainConfig, TrainingReport};
pub use vocab::{VocabError, Vocabulary, DEFAULT_ALPHABET};
