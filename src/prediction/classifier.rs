// src/prediction/classifier.rs
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters, SplitCriterion,
};
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::config::ModelConfig;
use crate::error::PredictionError;
use crate::models::{FeatureImportance, FeatureVector, TrainingReport, TrainingSample};

/// Bump whenever the artifact schema changes so `load` rejects incompatible
/// files instead of misinterpreting them.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

const FEATURE_COUNT: usize = 3;

type BreachTree = DecisionTreeClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples: usize,
    pub seed: u64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples: 50,
            seed: 42,
        }
    }
}

impl From<&ModelConfig> for ClassifierParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            n_trees: config.n_trees,
            max_depth: config.max_depth,
            min_samples: config.min_training_samples,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub run_id: String,
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
    pub accuracy: f64,
    pub seed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelPayload {
    trees: Vec<BreachTree>,
    importances: [f64; FEATURE_COUNT],
}

/// On-disk artifact. The model payload is kept as an opaque JSON string so the
/// checksum covers the exact bytes that will be re-parsed on load.
#[derive(Serialize, Deserialize)]
struct ArtifactEnvelope {
    format_version: u32,
    metadata: ModelMetadata,
    checksum: String,
    model: String,
}

#[derive(Debug)]
struct FittedState {
    payload: ModelPayload,
    metadata: ModelMetadata,
}

/// A bagged ensemble of decision trees predicting SLA breach probability as
/// the fraction of trees voting "breach". The tree-splitting work itself is
/// smartcore's; this wrapper owns resampling, the holdout evaluation,
/// permutation importances and artifact persistence.
#[derive(Debug)]
pub struct BreachClassifier {
    params: ClassifierParams,
    fitted: Option<FittedState>,
}

impl BreachClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.fitted.as_ref().map(|f| &f.metadata)
    }

    /// Fits the forest. Deterministic for a fixed `params.seed`: the shuffle
    /// split, every bootstrap resample and the importance permutations all
    /// draw from the same seeded generator.
    pub fn fit(&mut self, samples: &[TrainingSample]) -> Result<TrainingReport, PredictionError> {
        if samples.len() < self.params.min_samples {
            return Err(PredictionError::InsufficientData {
                got: samples.len(),
                min: self.params.min_samples,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut indices: Vec<usize> = (0..samples.len()).collect();
        indices.shuffle(&mut rng);

        // 80/20 train/holdout split; the holdout slice feeds the reported
        // accuracy and the permutation importances.
        let holdout_len = (samples.len() / 5).max(1);
        let (holdout_idx, train_idx) = indices.split_at(holdout_len);

        let train_rows: Vec<Vec<f64>> = train_idx
            .iter()
            .map(|&i| samples[i].features.as_row())
            .collect();
        let train_labels: Vec<u32> = train_idx
            .iter()
            .map(|&i| samples[i].breached as u32)
            .collect();

        let mut trees: Vec<BreachTree> = Vec::with_capacity(self.params.n_trees);
        for tree_index in 0..self.params.n_trees {
            let mut rows = Vec::with_capacity(train_rows.len());
            let mut labels = Vec::with_capacity(train_rows.len());
            for _ in 0..train_rows.len() {
                let pick = rng.gen_range(0..train_rows.len());
                rows.push(train_rows[pick].clone());
                labels.push(train_labels[pick]);
            }
            let x = DenseMatrix::from_2d_vec(&rows);
            let tree = DecisionTreeClassifier::fit(&x, &labels, tree_parameters(self.params.max_depth))
                .map_err(|e| {
                    PredictionError::Internal(anyhow!("fit of tree {} failed: {}", tree_index, e))
                })?;
            trees.push(tree);
        }

        let holdout_rows: Vec<Vec<f64>> = holdout_idx
            .iter()
            .map(|&i| samples[i].features.as_row())
            .collect();
        let holdout_labels: Vec<u32> = holdout_idx
            .iter()
            .map(|&i| samples[i].breached as u32)
            .collect();

        let accuracy = forest_accuracy(&trees, &holdout_rows, &holdout_labels)?;
        let importances =
            permutation_importances(&trees, &holdout_rows, &holdout_labels, accuracy, &mut rng)?;

        let metadata = ModelMetadata {
            run_id: Uuid::new_v4().to_string(),
            trained_at: Utc::now(),
            samples: samples.len(),
            accuracy,
            seed: self.params.seed,
        };
        let report = TrainingReport {
            run_id: metadata.run_id.clone(),
            samples_used: metadata.samples,
            accuracy,
            trained_at: metadata.trained_at,
        };

        info!(
            "Fitted breach forest: {} trees on {} samples, holdout accuracy {:.2}%",
            self.params.n_trees,
            samples.len(),
            accuracy * 100.0
        );

        self.fitted = Some(FittedState {
            payload: ModelPayload {
                trees,
                importances,
            },
            metadata,
        });
        Ok(report)
    }

    /// Breach probability for a single feature vector, in [0, 1].
    pub fn predict_probability(&self, vector: &FeatureVector) -> Result<f64, PredictionError> {
        let fitted = self.fitted.as_ref().ok_or(PredictionError::ModelNotTrained)?;
        forest_probability(&fitted.payload.trees, &vector.as_row())
    }

    pub fn feature_importance(&self) -> Result<FeatureImportance, PredictionError> {
        let fitted = self.fitted.as_ref().ok_or(PredictionError::ModelNotTrained)?;
        Ok(FeatureImportance::from_weights(fitted.payload.importances))
    }

    /// Serializes the fitted state plus metadata as a versioned, checksummed
    /// artifact.
    pub fn save(&self, path: &Path) -> Result<(), PredictionError> {
        let fitted = self.fitted.as_ref().ok_or(PredictionError::ModelNotTrained)?;

        let model = serde_json::to_string(&fitted.payload)
            .context("failed to serialize model payload")?;
        let envelope = ArtifactEnvelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            metadata: fitted.metadata.clone(),
            checksum: hex::encode(Sha256::digest(model.as_bytes())),
            model,
        };
        let serialized = serde_json::to_string_pretty(&envelope)
            .context("failed to serialize model artifact")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create artifact directory {}", parent.display())
                })?;
            }
        }
        fs::write(path, &serialized)
            .with_context(|| format!("failed to write model artifact to {}", path.display()))?;

        info!(
            "Saved model artifact to {} ({} trees, {} bytes)",
            path.display(),
            fitted.payload.trees.len(),
            serialized.len()
        );
        Ok(())
    }

    /// Restores a classifier from an artifact. Structural problems (bad JSON,
    /// unknown format version, checksum mismatch, empty forest) are all
    /// `CorruptArtifact`; an unreadable file is an I/O error for the caller to
    /// interpret.
    pub fn load(path: &Path, params: ClassifierParams) -> Result<Self, PredictionError> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read model artifact {}", path.display()))?;

        let envelope: ArtifactEnvelope = serde_json::from_str(&raw).map_err(|e| {
            PredictionError::CorruptArtifact(format!("unparseable artifact: {}", e))
        })?;
        if envelope.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(PredictionError::CorruptArtifact(format!(
                "unsupported artifact format version {} (expected {})",
                envelope.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        let checksum = hex::encode(Sha256::digest(envelope.model.as_bytes()));
        if checksum != envelope.checksum {
            return Err(PredictionError::CorruptArtifact(
                "model payload checksum mismatch".to_string(),
            ));
        }
        let payload: ModelPayload = serde_json::from_str(&envelope.model).map_err(|e| {
            PredictionError::CorruptArtifact(format!("undecodable model payload: {}", e))
        })?;
        if payload.trees.is_empty() {
            return Err(PredictionError::CorruptArtifact(
                "artifact contains no trees".to_string(),
            ));
        }

        debug!(
            "Loaded model artifact from {}: {} trees, trained {} on {} samples",
            path.display(),
            payload.trees.len(),
            envelope.metadata.trained_at,
            envelope.metadata.samples
        );
        Ok(Self {
            params,
            fitted: Some(FittedState {
                payload,
                metadata: envelope.metadata,
            }),
        })
    }
}

fn tree_parameters(max_depth: u16) -> DecisionTreeClassifierParameters {
    DecisionTreeClassifierParameters::default()
        .with_criterion(SplitCriterion::Gini)
        .with_max_depth(max_depth)
        .with_min_samples_split(5)
        .with_min_samples_leaf(2)
}

/// Fraction of trees voting "breach" for one feature row.
fn forest_probability(trees: &[BreachTree], row: &[f64]) -> Result<f64, PredictionError> {
    let x = DenseMatrix::from_2d_vec(&vec![row.to_vec()]);
    let mut votes = 0usize;
    for tree in trees {
        let prediction = tree.predict(&x).map_err(|e| {
            PredictionError::CorruptArtifact(format!("tree prediction failed: {}", e))
        })?;
        votes += (prediction[0] == 1) as usize;
    }
    Ok(votes as f64 / trees.len() as f64)
}

fn forest_accuracy(
    trees: &[BreachTree],
    rows: &[Vec<f64>],
    labels: &[u32],
) -> Result<f64, PredictionError> {
    if rows.is_empty() {
        return Ok(0.0);
    }
    let mut correct = 0usize;
    for (row, label) in rows.iter().zip(labels) {
        let probability = forest_probability(trees, row)?;
        let predicted = (probability >= 0.5) as u32;
        correct += (predicted == *label) as usize;
    }
    Ok(correct as f64 / rows.len() as f64)
}

/// Permutation importance over the holdout slice: shuffle one feature column,
/// measure the accuracy drop. Raw drops below zero are clamped; normalization
/// to a unit sum happens when the importances are read.
fn permutation_importances(
    trees: &[BreachTree],
    rows: &[Vec<f64>],
    labels: &[u32],
    base_accuracy: f64,
    rng: &mut StdRng,
) -> Result<[f64; FEATURE_COUNT], PredictionError> {
    let mut importances = [0.0; FEATURE_COUNT];
    if rows.is_empty() {
        return Ok(importances);
    }
    for feature in 0..FEATURE_COUNT {
        let mut column: Vec<f64> = rows.iter().map(|row| row[feature]).collect();
        column.shuffle(rng);
        let mut permuted = rows.to_vec();
        for (row, value) in permuted.iter_mut().zip(column) {
            row[feature] = value;
        }
        let permuted_accuracy = forest_accuracy(trees, &permuted, labels)?;
        importances[feature] = (base_accuracy - permuted_accuracy).max(0.0);
    }
    Ok(importances)
}
