// src/config.rs
use log::{info, warn};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Per-SLA-code threshold table (`codigo_sla -> dias_umbral`). Normally
/// refreshed from the `config_sla` table at startup; the env fallback keeps
/// the engine usable in tests and offline runs.
#[derive(Debug, Clone)]
pub struct SlaThresholds {
    umbrales: HashMap<String, f64>,
}

impl SlaThresholds {
    pub fn new(umbrales: HashMap<String, f64>) -> Self {
        Self { umbrales }
    }

    /// Parses `SLA_UMBRALES` in `CODE:days,CODE:days` form, e.g.
    /// `SLA1:3,SLA2:5`. Entries with a non-positive threshold are dropped.
    pub fn from_env() -> Self {
        let raw = env::var("SLA_UMBRALES").unwrap_or_default();
        let mut umbrales = HashMap::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            match entry.split_once(':') {
                Some((code, days)) => match days.trim().parse::<f64>() {
                    Ok(days) if days > 0.0 => {
                        umbrales.insert(code.trim().to_uppercase(), days);
                    }
                    _ => warn!("Ignoring SLA threshold entry with bad days: '{}'", entry),
                },
                None => warn!("Ignoring malformed SLA threshold entry: '{}'", entry),
            }
        }
        if umbrales.is_empty() {
            umbrales = Self::default_table();
        }
        Self { umbrales }
    }

    fn default_table() -> HashMap<String, f64> {
        [
            ("SLA1", 3.0),
            ("SLA2", 5.0),
            ("SLA3", 10.0),
            ("SLA4", 15.0),
            ("SLA5", 20.0),
            ("SLA6", 30.0),
        ]
        .iter()
        .map(|(code, days)| (code.to_string(), *days))
        .collect()
    }

    pub fn get(&self, codigo_sla: &str) -> Option<f64> {
        self.umbrales.get(&codigo_sla.trim().to_uppercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.umbrales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.umbrales.is_empty()
    }

    pub fn log_config(&self) {
        info!("SLA threshold table loaded with {} codes", self.umbrales.len());
    }
}

/// Model and retraining knobs, read from the environment the same way the
/// rest of the service configuration is.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub min_training_samples: usize,
    pub max_training_samples: i64,
    pub n_trees: usize,
    pub max_depth: u16,
    pub seed: u64,
    /// Artifact age, in days, after which the model is flagged stale.
    pub staleness_days: i64,
    /// Newly terminal solicitudes since the last training that flag staleness.
    pub new_sample_threshold: i64,
    pub train_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/sla_model.json"),
            min_training_samples: 50,
            max_training_samples: 10_000,
            n_trees: 100,
            max_depth: 10,
            seed: 42,
            staleness_days: 30,
            new_sample_threshold: 100,
            train_timeout_secs: 300,
        }
    }
}

impl ModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            min_training_samples: parse_env("MIN_TRAINING_SAMPLES", defaults.min_training_samples),
            max_training_samples: parse_env("MAX_TRAINING_SAMPLES", defaults.max_training_samples),
            n_trees: parse_env("MODEL_N_TREES", defaults.n_trees),
            max_depth: parse_env("MODEL_MAX_DEPTH", defaults.max_depth),
            seed: parse_env("MODEL_SEED", defaults.seed),
            staleness_days: parse_env("MODEL_STALENESS_DAYS", defaults.staleness_days),
            new_sample_threshold: parse_env(
                "MODEL_NEW_SAMPLE_THRESHOLD",
                defaults.new_sample_threshold,
            ),
            train_timeout_secs: parse_env("TRAIN_TIMEOUT_SECS", defaults.train_timeout_secs),
        }
    }

    pub fn log_config(&self) {
        info!("🤖 Model configuration:");
        info!("   Artifact path: {}", self.model_path.display());
        info!(
            "   Forest: {} trees, max depth {}, seed {}",
            self.n_trees, self.max_depth, self.seed
        );
        info!(
            "   Training: min {} samples, max {}, timeout {}s",
            self.min_training_samples, self.max_training_samples, self.train_timeout_secs
        );
        info!(
            "   Staleness: {} days or {} new terminal solicitudes",
            self.staleness_days, self.new_sample_threshold
        );
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_from_env_string() {
        env::set_var("SLA_UMBRALES", "SLA1:3, sla2:5.5 ,BAD,SLA9:-1");
        let table = SlaThresholds::from_env();
        assert_eq!(table.get("SLA1"), Some(3.0));
        assert_eq!(table.get("sla2"), Some(5.5));
        assert_eq!(table.get("SLA9"), None);
        assert_eq!(table.len(), 2);
        env::remove_var("SLA_UMBRALES");
    }

    #[test]
    fn test_thresholds_default_when_unset() {
        env::remove_var("SLA_UMBRALES");
        let table = SlaThresholds::from_env();
        assert_eq!(table.get("SLA1"), Some(3.0));
        assert_eq!(table.get("SLA6"), Some(30.0));
        assert!(table.get("SLA99").is_none());
    }

    #[test]
    fn test_model_config_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.min_training_samples, 50);
        assert_eq!(config.n_trees, 100);
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.staleness_days, 30);
        assert_eq!(config.new_sample_threshold, 100);
    }
}
