// src/models/core_models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a solicitud, read straight off the storage row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstadoSolicitud {
    EnProceso,
    Completada,
    Cancelada,
}

impl EstadoSolicitud {
    /// Parses the raw `estado_solicitud` column. Anything that is not a closed
    /// state counts as in-progress.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "COMPLETADA" => Self::Completada,
            "CANCELADA" => Self::Cancelada,
            _ => Self::EnProceso,
        }
    }
}

/// SLA compliance state. The raw column carries values such as
/// `CUMPLE_SLA3`, `NO_CUMPLE_SLA1` or `EN_PROCESO_SLA2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstadoCumplimiento {
    EnProceso,
    Cumple,
    NoCumple,
}

impl EstadoCumplimiento {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_uppercase();
        if raw.starts_with("NO_CUMPLE") {
            Self::NoCumple
        } else if raw.starts_with("CUMPLE") {
            Self::Cumple
        } else {
            Self::EnProceso
        }
    }

    /// Terminal states are the only ones eligible for training data.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cumple | Self::NoCumple)
    }
}

/// A raw solicitud row joined with its SLA code and role. Owned by the storage
/// collaborator; the core treats it as immutable input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolicitudRecord {
    pub id_solicitud: i64,
    pub codigo_sla: String,
    pub id_rol: i32,
    pub nombre_rol: Option<String>,
    pub fecha_solicitud: NaiveDate,
    pub fecha_cierre: Option<NaiveDate>,
    pub estado_solicitud: EstadoSolicitud,
    pub estado_cumplimiento: EstadoCumplimiento,
}

/// The fixed three-feature input consumed by the classifier.
///
/// `percent_used` is derived for banding and factor derivation only; it is
/// never fed to the model, so probabilities stay comparable across SLA types
/// with different absolute day scales.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub days_elapsed: f64,
    pub threshold_days: f64,
    pub role_id: i32,
}

impl FeatureVector {
    pub fn percent_used(&self) -> f64 {
        (self.days_elapsed / self.threshold_days) * 100.0
    }

    /// May be negative once the deadline has passed.
    pub fn days_remaining(&self) -> f64 {
        self.threshold_days - self.days_elapsed
    }

    pub fn as_row(&self) -> Vec<f64> {
        vec![self.days_elapsed, self.threshold_days, self.role_id as f64]
    }
}

/// Discrete risk band derived from the breach probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NivelRiesgo {
    Bajo,
    Medio,
    Alto,
    Critico,
}

impl NivelRiesgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bajo => "BAJO",
            Self::Medio => "MEDIO",
            Self::Alto => "ALTO",
            Self::Critico => "CRITICO",
        }
    }
}

impl std::fmt::Display for NivelRiesgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored solicitud. Created fresh on every scoring call and never
/// persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediccion {
    pub id_solicitud: i64,
    pub codigo_sla: Option<String>,
    pub nombre_rol: Option<String>,
    pub probabilidad_incumplimiento: f64,
    pub nivel_riesgo: NivelRiesgo,
    pub dias_restantes: f64,
    pub factores_riesgo: Vec<String>,
    pub fecha_prediccion: DateTime<Utc>,
}

/// A labeled historical observation. Only terminal-state solicitudes may
/// become samples; the storage query enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub breached: bool,
}

/// Outcome of a successful fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: String,
    pub samples_used: usize,
    pub accuracy: f64,
    pub trained_at: DateTime<Utc>,
}

/// One named feature weight with its derived impact tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub descripcion: String,
    pub peso: f64,
    pub impacto: String,
}

/// Normalized feature contributions; weights are non-negative and sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub features: Vec<FeatureWeight>,
}

pub const FEATURE_NAMES: [(&str, &str); 3] = [
    ("dias_transcurridos", "Días transcurridos desde la creación"),
    ("dias_umbral", "Días límite definidos por el SLA"),
    ("id_rol", "Rol responsable de la solicitud"),
];

impl FeatureImportance {
    /// Builds the importance mapping from raw per-feature weights,
    /// renormalizing so they sum to 1. Raw weights that are all zero (a model
    /// whose holdout slice was too small to differentiate) fall back to a
    /// uniform split.
    pub fn from_weights(raw: [f64; 3]) -> Self {
        let clamped: Vec<f64> = raw.iter().map(|w| w.max(0.0)).collect();
        let total: f64 = clamped.iter().sum();
        let normalized: Vec<f64> = if total > 0.0 {
            clamped.iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / 3.0; 3]
        };

        let features = FEATURE_NAMES
            .iter()
            .zip(normalized)
            .map(|((name, descripcion), peso)| FeatureWeight {
                feature: name.to_string(),
                descripcion: descripcion.to_string(),
                peso,
                impacto: impact_tier(peso).to_string(),
            })
            .collect();

        Self { features }
    }

    pub fn total_weight(&self) -> f64 {
        self.features.iter().map(|f| f.peso).sum()
    }
}

fn impact_tier(peso: f64) -> &'static str {
    if peso >= 0.5 {
        "alto"
    } else if peso >= 0.25 {
        "medio"
    } else {
        "bajo"
    }
}
