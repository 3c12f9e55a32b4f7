// src/features.rs
use chrono::NaiveDate;
use log::debug;

use crate::config::SlaThresholds;
use crate::error::PredictionError;
use crate::models::{FeatureVector, SolicitudRecord};

/// Converts raw solicitud rows into the fixed feature vector consumed by the
/// classifier. Active requests are evaluated against "today"; historical rows
/// against their recorded completion date.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    thresholds: SlaThresholds,
}

impl FeatureExtractor {
    pub fn new(thresholds: SlaThresholds) -> Self {
        Self { thresholds }
    }

    pub fn extract(
        &self,
        record: &SolicitudRecord,
        evaluation_date: NaiveDate,
    ) -> Result<FeatureVector, PredictionError> {
        let threshold_days = self.thresholds.get(&record.codigo_sla).ok_or_else(|| {
            PredictionError::invalid_record(
                record.id_solicitud,
                format!("unknown SLA code '{}'", record.codigo_sla),
            )
        })?;

        let days_elapsed = (evaluation_date - record.fecha_solicitud).num_days();
        if days_elapsed < 0 {
            // Creation date after the evaluation instant is a data-integrity
            // violation; report it rather than clamping.
            return Err(PredictionError::invalid_record(
                record.id_solicitud,
                format!(
                    "fecha_solicitud {} is after the evaluation date {}",
                    record.fecha_solicitud, evaluation_date
                ),
            ));
        }

        let vector = FeatureVector {
            days_elapsed: days_elapsed as f64,
            threshold_days,
            role_id: record.id_rol,
        };
        debug!(
            "Extracted features for solicitud {}: elapsed={:.0}, umbral={:.0}, rol={}",
            record.id_solicitud, vector.days_elapsed, vector.threshold_days, vector.role_id
        );
        Ok(vector)
    }
}
