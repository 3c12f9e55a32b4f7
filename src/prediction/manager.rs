// src/prediction/manager.rs
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::PredictionError;
use crate::models::{TrainingReport, TrainingSample};
use crate::prediction::classifier::{BreachClassifier, ClassifierParams};
use crate::storage::db_connect::PgPool;
use crate::storage::queries;

/// Lifecycle state of the single active model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelState {
    Uninitialized,
    Trained,
    /// Eligible for retraining; never blocks predictions.
    Stale,
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Trained => "TRAINED",
            Self::Stale => "STALE",
        };
        f.write_str(s)
    }
}

/// Snapshot of the manager for health and ops logging.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub state: ModelState,
    pub trained_at: Option<DateTime<Utc>>,
    pub samples: Option<usize>,
    pub accuracy: Option<f64>,
    pub model_path: PathBuf,
}

struct ManagerInner {
    classifier: Option<Arc<BreachClassifier>>,
    state: ModelState,
}

/// Owns the single active classifier and its lifecycle
/// (UNINITIALIZED → TRAINED → STALE → TRAINED → …).
///
/// The classifier handle is replaced wholesale under a write lock, so scoring
/// readers observe either the fully-old or fully-new model, never a partial
/// one. Retraining runs on a blocking task and does not stop the previous
/// model from serving.
pub struct ModelManager {
    config: ModelConfig,
    inner: RwLock<ManagerInner>,
}

pub type SharedModelManager = Arc<ModelManager>;

impl ModelManager {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(ManagerInner {
                classifier: None,
                state: ModelState::Uninitialized,
            }),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Startup path: load the persisted artifact if one exists. Absence and
    /// corruption both leave the manager untrained (predictions refused until
    /// an explicit training run); corruption is logged, never fatal here.
    pub fn init(&self) -> Result<ModelState, PredictionError> {
        let path = &self.config.model_path;
        if !path.exists() {
            warn!(
                "No model artifact at {}; predictions disabled until a training run completes",
                path.display()
            );
            return Ok(ModelState::Uninitialized);
        }
        match BreachClassifier::load(path, ClassifierParams::from(&self.config)) {
            Ok(classifier) => {
                let trained_at = classifier.metadata().map(|m| m.trained_at);
                self.install(classifier);
                info!(
                    "Loaded model artifact from {} (trained {:?})",
                    path.display(),
                    trained_at
                );
                Ok(ModelState::Trained)
            }
            Err(PredictionError::CorruptArtifact(reason)) => {
                warn!(
                    "Model artifact at {} is corrupt ({}); starting untrained",
                    path.display(),
                    reason
                );
                Ok(ModelState::Uninitialized)
            }
            Err(e) => Err(e),
        }
    }

    /// Operator-requested load. Unlike `init`, a corrupt artifact here is a
    /// hard error: the operator expected the load to succeed.
    pub fn load_from_artifact(&self) -> Result<ModelStatus, PredictionError> {
        let classifier =
            BreachClassifier::load(&self.config.model_path, ClassifierParams::from(&self.config))?;
        self.install(classifier);
        Ok(self.status())
    }

    /// Current classifier handle for scoring, or `ModelNotTrained`.
    pub fn classifier(&self) -> Result<Arc<BreachClassifier>, PredictionError> {
        let inner = self.inner.read().unwrap();
        inner
            .classifier
            .as_ref()
            .map(Arc::clone)
            .ok_or(PredictionError::ModelNotTrained)
    }

    pub fn state(&self) -> ModelState {
        self.inner.read().unwrap().state
    }

    pub fn status(&self) -> ModelStatus {
        let inner = self.inner.read().unwrap();
        let metadata = inner.classifier.as_ref().and_then(|c| c.metadata().cloned());
        ModelStatus {
            state: inner.state,
            trained_at: metadata.as_ref().map(|m| m.trained_at),
            samples: metadata.as_ref().map(|m| m.samples),
            accuracy: metadata.as_ref().map(|m| m.accuracy),
            model_path: self.config.model_path.clone(),
        }
    }

    /// Explicit retrain: fetch the terminal-state history and fit a fresh
    /// model. Only the storage query filters samples; everything it returns is
    /// labeled and terminal by construction.
    pub async fn retrain(&self, pool: &PgPool) -> Result<TrainingReport, PredictionError> {
        info!("Retraining requested; fetching terminal-state history...");
        let samples = queries::fetch_datos_entrenamiento(pool, self.config.max_training_samples)
            .await
            .context("failed to fetch training data")?;
        info!("Fetched {} training samples", samples.len());
        self.retrain_from_samples(samples).await
    }

    /// Fits on a blocking task bounded by the configured timeout, persists the
    /// artifact and swaps the active classifier. Any failure (insufficient
    /// data, timeout, fit error) leaves the prior classifier serving and the
    /// state untouched.
    pub async fn retrain_from_samples(
        &self,
        samples: Vec<TrainingSample>,
    ) -> Result<TrainingReport, PredictionError> {
        let params = ClassifierParams::from(&self.config);
        let timeout = Duration::from_secs(self.config.train_timeout_secs);

        let fit_task = tokio::task::spawn_blocking(move || {
            let mut classifier = BreachClassifier::new(params);
            classifier.fit(&samples).map(|report| (classifier, report))
        });

        let (classifier, report) = match tokio::time::timeout(timeout, fit_task).await {
            Err(_) => {
                return Err(PredictionError::TrainingTimeout(
                    self.config.train_timeout_secs,
                ))
            }
            Ok(Err(join_err)) => {
                return Err(PredictionError::Internal(anyhow!(
                    "training task failed: {}",
                    join_err
                )))
            }
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Ok(Ok(fitted))) => fitted,
        };

        classifier.save(&self.config.model_path)?;
        self.install(classifier);
        info!(
            "Model retrained: {} samples, accuracy {:.2}%, run {}",
            report.samples_used,
            report.accuracy * 100.0,
            report.run_id
        );
        Ok(report)
    }

    /// Scheduler-invoked staleness probe. TRAINED flips to STALE when the
    /// artifact is old enough or enough new terminal solicitudes have landed
    /// since training; STALE only flags retrain eligibility.
    pub async fn check_staleness(&self, pool: &PgPool) -> Result<ModelState, PredictionError> {
        let (state, trained_at) = {
            let inner = self.inner.read().unwrap();
            let trained_at = inner
                .classifier
                .as_ref()
                .and_then(|c| c.metadata().map(|m| m.trained_at));
            (inner.state, trained_at)
        };
        let trained_at = match (state, trained_at) {
            (ModelState::Uninitialized, _) | (_, None) => return Ok(ModelState::Uninitialized),
            (ModelState::Stale, _) => return Ok(ModelState::Stale),
            (ModelState::Trained, Some(trained_at)) => trained_at,
        };

        let new_terminales = queries::count_terminales_desde(pool, trained_at)
            .await
            .context("failed to count new terminal solicitudes")?;

        if evaluate_staleness(trained_at, Utc::now(), new_terminales, &self.config) {
            let mut inner = self.inner.write().unwrap();
            inner.state = ModelState::Stale;
            warn!(
                "Model flagged STALE (trained {}, {} new terminal solicitudes since)",
                trained_at, new_terminales
            );
            return Ok(ModelState::Stale);
        }
        Ok(ModelState::Trained)
    }

    fn install(&self, classifier: BreachClassifier) {
        let mut inner = self.inner.write().unwrap();
        inner.classifier = Some(Arc::new(classifier));
        inner.state = ModelState::Trained;
    }
}

/// Pure staleness rule: strictly older than the configured age, or strictly
/// more new terminal samples than the configured threshold.
pub fn evaluate_staleness(
    trained_at: DateTime<Utc>,
    now: DateTime<Utc>,
    new_terminal_count: i64,
    config: &ModelConfig,
) -> bool {
    (now - trained_at).num_days() > config.staleness_days
        || new_terminal_count > config.new_sample_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureVector;
    use chrono::Duration as ChronoDuration;
    use std::fs;

    fn test_config(dir: &tempfile::TempDir) -> ModelConfig {
        ModelConfig {
            model_path: dir.path().join("sla_model.json"),
            n_trees: 10,
            seed: 7,
            ..ModelConfig::default()
        }
    }

    fn samples(n: usize) -> Vec<TrainingSample> {
        let thresholds = [5.0, 10.0, 20.0, 35.0];
        (0..n)
            .map(|i| {
                let threshold_days = thresholds[i % thresholds.len()];
                let days_elapsed = ((i * 7) % 50) as f64;
                TrainingSample {
                    features: FeatureVector {
                        days_elapsed,
                        threshold_days,
                        role_id: (i % 3) as i32 + 1,
                    },
                    breached: days_elapsed > threshold_days,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_insufficient_data_leaves_manager_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(test_config(&dir));

        let err = manager.retrain_from_samples(samples(40)).await.unwrap_err();
        assert!(matches!(err, PredictionError::InsufficientData { .. }));
        assert_eq!(manager.state(), ModelState::Uninitialized);
        assert!(matches!(
            manager.classifier(),
            Err(PredictionError::ModelNotTrained)
        ));
    }

    #[tokio::test]
    async fn test_retrain_persists_and_serves() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let manager = ModelManager::new(config.clone());

        let report = manager.retrain_from_samples(samples(160)).await.unwrap();
        assert_eq!(report.samples_used, 160);
        assert_eq!(manager.state(), ModelState::Trained);
        assert!(config.model_path.exists());
        manager.classifier().unwrap();
    }

    #[tokio::test]
    async fn test_failed_retrain_keeps_prior_model_serving() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(test_config(&dir));
        manager.retrain_from_samples(samples(160)).await.unwrap();

        let probe = FeatureVector {
            days_elapsed: 48.0,
            threshold_days: 5.0,
            role_id: 1,
        };
        let before = manager
            .classifier()
            .unwrap()
            .predict_probability(&probe)
            .unwrap();
        let trained_at_before = manager.status().trained_at;

        let err = manager.retrain_from_samples(samples(30)).await.unwrap_err();
        assert!(matches!(err, PredictionError::InsufficientData { .. }));

        let after = manager
            .classifier()
            .unwrap()
            .predict_probability(&probe)
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(manager.status().trained_at, trained_at_before);
        assert_eq!(manager.state(), ModelState::Trained);
    }

    #[tokio::test]
    async fn test_training_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            train_timeout_secs: 0,
            n_trees: 50,
            ..test_config(&dir)
        };
        let manager = ModelManager::new(config);
        let err = manager.retrain_from_samples(samples(400)).await.unwrap_err();
        assert!(matches!(err, PredictionError::TrainingTimeout(0)));
        assert_eq!(manager.state(), ModelState::Uninitialized);
    }

    #[tokio::test]
    async fn test_init_without_artifact_stays_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(test_config(&dir));
        assert_eq!(manager.init().unwrap(), ModelState::Uninitialized);
    }

    #[tokio::test]
    async fn test_init_with_corrupt_artifact_degrades_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        fs::write(&config.model_path, "{ broken").unwrap();

        let manager = ModelManager::new(config);
        assert_eq!(manager.init().unwrap(), ModelState::Uninitialized);

        // The explicit operator load of the same artifact must fail loudly.
        assert!(matches!(
            manager.load_from_artifact(),
            Err(PredictionError::CorruptArtifact(_))
        ));
    }

    #[tokio::test]
    async fn test_init_reloads_persisted_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let trainer = ModelManager::new(config.clone());
        trainer.retrain_from_samples(samples(160)).await.unwrap();

        let fresh = ModelManager::new(config);
        assert_eq!(fresh.init().unwrap(), ModelState::Trained);
        fresh.classifier().unwrap();
    }

    #[test]
    fn test_staleness_rule() {
        let config = ModelConfig::default();
        let now = Utc::now();

        let fresh = now - ChronoDuration::days(5);
        let old = now - ChronoDuration::days(31);
        let boundary = now - ChronoDuration::days(30);

        assert!(!evaluate_staleness(fresh, now, 0, &config));
        assert!(evaluate_staleness(old, now, 0, &config));
        assert!(!evaluate_staleness(boundary, now, 0, &config));
        assert!(evaluate_staleness(fresh, now, 101, &config));
        assert!(!evaluate_staleness(fresh, now, 100, &config));
    }
}
