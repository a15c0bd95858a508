//! Labelled CAPTCHA dataset stored as `image_name,label` CSV.
//!
//! The runtime only reads this file to learn `num_positions`; the training
//! command also loads the images it names.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::error::ModelError;
use super::vocab::Vocabulary;

/// CSV header row.
pub const LABELS_HEADER: &str = "image_name,label";

/// One labelled image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledSample {
    pub image_name: String,
    pub label: String,
}

/// All samples from a labels file. Every label has the same length and only
/// uses vocabulary characters.
#[derive(Debug, Clone)]
pub struct LabelSet {
    pub path: PathBuf,
    pub samples: Vec<LabeledSample>,
}

impl LabelSet {
    /// Loads and validates a labels file.
    ///
    /// A first line equal to the header, ignoring ASCII case, is skipped, as
    /// are blank lines. A missing file has no samples to offer and reports
    /// `InsufficientTrainingData`.
    pub fn from_csv(path: &Path, vocab: &Vocabulary) -> Result<Self, ModelError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelError::InsufficientTrainingData(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut samples: Vec<LabeledSample> = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                continue;
            }
            if line_num == 0 && trimmed.eq_ignore_ascii_case(LABELS_HEADER) {
                continue;
            }

            let row = line_num + 1;
            let sample = Self::parse_line(trimmed, row)?;

            if let Err(e) = vocab.encode(&sample.label) {
                return Err(ModelError::InvalidLabel {
                    row,
                    label: sample.label,
                    reason: e.to_string(),
                });
            }
            if let Some(first) = samples.first() {
                let expected = first.label.chars().count();
                let actual = sample.label.chars().count();
                if actual != expected {
                    return Err(ModelError::InvalidLabel {
                        row,
                        label: sample.label,
                        reason: format!("length {} differs from dataset length {}", actual, expected),
                    });
                }
            }

            samples.push(sample);
        }

        Ok(LabelSet {
            path: path.to_path_buf(),
            samples,
        })
    }

    fn parse_line(line: &str, row: usize) -> Result<LabeledSample, ModelError> {
        let Some((name, label)) = line.split_once(',') else {
            return Err(ModelError::InvalidLabel {
                row,
                label: line.to_string(),
                reason: "expected 2 columns".to_string(),
            });
        };
        let image_name = name.trim().to_string();
        let label = label.trim().to_string();

        if image_name.is_empty() || label.is_empty() || label.contains(',') {
            return Err(ModelError::InvalidLabel {
                row,
                label,
                reason: "expected non-empty image_name and label".to_string(),
            });
        }

        Ok(LabeledSample { image_name, label })
    }

    /// Character count shared by every label.
    pub fn num_positions(&self) -> Result<usize, ModelError> {
        self.samples
            .first()
            .map(|s| s.label.chars().count())
            .ok_or_else(|| ModelError::InsufficientTrainingData(self.path.clone()))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Creates the labels file with its header if it doesn't exist or is empty.
pub fn init_labels_file(path: &Path) -> Result<(), ModelError> {
    if path.exists() {
        let file = File::open(path)?;
        if BufReader::new(file).lines().next().is_some() {
            return Ok(());
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    writeln!(file, "{}", LABELS_HEADER)?;
    Ok(())
}

/// Appends one `image_name,label` row, opening the file per write.
pub fn append_label(path: &Path, image_name: &str, label: &str) -> Result<(), ModelError> {
    init_labels_file(path)?;
    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{},{}", image_name, label)?;
    Ok(())
}
