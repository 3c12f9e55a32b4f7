// src/aggregation.rs
//
// Batch orchestration over the scoring core: pagination, the critical-subset
// view, the dashboard summary and the concurrent bulk path. Per-record
// failures are collected, never propagated; only systemic conditions (no
// trained model with work to do) abort a batch.
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::PredictionError;
use crate::features::FeatureExtractor;
use crate::models::{
    FeatureVector, NivelRiesgo, Prediccion, PrediccionBatchResponse, ResumenPrediccion,
    ScoringError, SolicitudRecord,
};
use crate::prediction::{factors, risk, BreachClassifier, SharedModelManager};

/// Percent-of-threshold cutoff for the critical subset, applied in union with
/// the ALTO/CRITICO band filter.
const CRITICAL_PERCENT_CUTOFF: f64 = 70.0;

pub struct AggregationService {
    manager: SharedModelManager,
    extractor: FeatureExtractor,
}

impl AggregationService {
    pub fn new(manager: SharedModelManager, extractor: FeatureExtractor) -> Self {
        Self { manager, extractor }
    }

    pub fn score_one(
        &self,
        record: &SolicitudRecord,
        today: NaiveDate,
    ) -> Result<Prediccion, PredictionError> {
        let classifier = self.manager.classifier()?;
        score_record(&self.extractor, &classifier, record, today).map(|(prediccion, _)| prediccion)
    }

    /// Scores a raw feature triple directly, for ad-hoc what-if queries that
    /// have no backing solicitud row.
    pub fn score_features(
        &self,
        features: &FeatureVector,
    ) -> Result<(f64, NivelRiesgo, Vec<String>), PredictionError> {
        let classifier = self.manager.classifier()?;
        let probabilidad = classifier.predict_probability(features)?;
        let nivel = risk::band(probabilidad)?;
        let factores = factors::explain(features, probabilidad);
        Ok((probabilidad, nivel, factores))
    }

    /// Scores one page of the population. Pagination metadata always reflects
    /// the full population; a page beyond the last yields empty `data` with
    /// the totals intact. An empty population never touches the model, so it
    /// succeeds even before the first training run.
    pub fn score_page(
        &self,
        records: &[SolicitudRecord],
        pagina: usize,
        tamano_pagina: usize,
        today: NaiveDate,
    ) -> Result<PrediccionBatchResponse, PredictionError> {
        let pagina = pagina.max(1);
        let tamano_pagina = tamano_pagina.max(1);
        let total_registros = records.len();
        let total_paginas = if total_registros == 0 {
            0
        } else {
            (total_registros + tamano_pagina - 1) / tamano_pagina
        };

        let start = (pagina - 1).saturating_mul(tamano_pagina);
        let slice = if start < total_registros {
            &records[start..(start + tamano_pagina).min(total_registros)]
        } else {
            &[]
        };

        let mut data = Vec::with_capacity(slice.len());
        let mut errores = Vec::new();
        if !slice.is_empty() {
            let classifier = self.manager.classifier()?;
            for record in slice {
                match score_record(&self.extractor, &classifier, record, today) {
                    Ok((prediccion, _)) => data.push(prediccion),
                    Err(e) => errores.push(ScoringError {
                        id_solicitud: record.id_solicitud,
                        error: e.to_string(),
                    }),
                }
            }
        }
        debug!(
            "Scored page {}/{} ({} ok, {} failed)",
            pagina,
            total_paginas,
            data.len(),
            errores.len()
        );

        Ok(PrediccionBatchResponse {
            data,
            pagina,
            tamano_pagina,
            total_registros,
            total_paginas,
            errores,
        })
    }

    /// The dashboard's attention queue: requests past 70% of their threshold
    /// OR already banded ALTO/CRITICO, most probable breaches first.
    pub fn score_critical(
        &self,
        records: &[SolicitudRecord],
        limite: usize,
        today: NaiveDate,
    ) -> Result<Vec<Prediccion>, PredictionError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let classifier = self.manager.classifier()?;
        let mut scored = Vec::with_capacity(records.len());
        let mut skipped = 0usize;
        for record in records {
            match score_record(&self.extractor, &classifier, record, today) {
                Ok(pair) => scored.push(pair),
                Err(e) => {
                    debug!(
                        "Skipping solicitud {} in critical scan: {}",
                        record.id_solicitud, e
                    );
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!("Critical scan skipped {} unscorable records", skipped);
        }
        Ok(select_critical(scored, limite))
    }

    /// KPI summary over the whole population. Lifecycle counts come from the
    /// raw rows; risk-band counts only from records that scored successfully.
    pub fn summarize(
        &self,
        records: &[SolicitudRecord],
        today: NaiveDate,
    ) -> Result<ResumenPrediccion, PredictionError> {
        let mut resumen = ResumenPrediccion {
            total_analizadas: records.len(),
            ..ResumenPrediccion::default()
        };
        if records.is_empty() {
            return Ok(resumen);
        }

        for record in records {
            use crate::models::EstadoSolicitud::*;
            match record.estado_solicitud {
                EnProceso => resumen.en_proceso += 1,
                Completada => resumen.completadas += 1,
                Cancelada => resumen.canceladas += 1,
            }
        }

        let classifier = self.manager.classifier()?;
        let mut suma_probabilidad = 0.0;
        let mut scored = 0usize;
        let mut skipped = 0usize;
        for record in records {
            let (prediccion, _) =
                match score_record(&self.extractor, &classifier, record, today) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(
                            "Skipping solicitud {} in summary: {}",
                            record.id_solicitud, e
                        );
                        skipped += 1;
                        continue;
                    }
                };
            match prediccion.nivel_riesgo {
                NivelRiesgo::Critico => resumen.criticas += 1,
                NivelRiesgo::Alto => resumen.altas += 1,
                NivelRiesgo::Medio => resumen.medias += 1,
                NivelRiesgo::Bajo => resumen.bajas += 1,
            }
            suma_probabilidad += prediccion.probabilidad_incumplimiento;
            scored += 1;
        }
        if skipped > 0 {
            warn!("Summary skipped {} unscorable records", skipped);
        }
        if scored > 0 {
            resumen.promedio_riesgo =
                ((suma_probabilidad / scored as f64) * 100.0 * 10.0).round() / 10.0;
        }
        Ok(resumen)
    }

    /// Scores the entire population on blocking worker tasks, one chunk per
    /// core, preserving input order. Used by the refresh pipeline where the
    /// population can run to tens of thousands of rows.
    pub async fn score_all_concurrent(
        &self,
        records: Vec<SolicitudRecord>,
        today: NaiveDate,
    ) -> Result<(Vec<Prediccion>, Vec<ScoringError>), PredictionError> {
        if records.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let classifier = self.manager.classifier()?;
        let workers = num_cpus::get().max(1);
        let chunk_size = (records.len() / workers).max(1);
        let total = records.len();

        let handles: Vec<_> = records
            .chunks(chunk_size)
            .map(|chunk| {
                let chunk = chunk.to_vec();
                let classifier = Arc::clone(&classifier);
                let extractor = self.extractor.clone();
                tokio::task::spawn_blocking(move || {
                    let mut ok = Vec::with_capacity(chunk.len());
                    let mut failed = Vec::new();
                    for record in &chunk {
                        match score_record(&extractor, &classifier, record, today) {
                            Ok((prediccion, _)) => ok.push(prediccion),
                            Err(e) => failed.push(ScoringError {
                                id_solicitud: record.id_solicitud,
                                error: e.to_string(),
                            }),
                        }
                    }
                    (ok, failed)
                })
            })
            .collect();

        let mut predicciones = Vec::with_capacity(total);
        let mut errores = Vec::new();
        // buffered() yields chunk results in submission order.
        let mut results = stream::iter(handles).buffered(workers);
        while let Some(joined) = results.next().await {
            let (ok, failed) = joined
                .map_err(|e| anyhow::anyhow!("scoring worker panicked: {}", e))
                .map_err(PredictionError::Internal)?;
            predicciones.extend(ok);
            errores.extend(failed);
        }

        info!(
            "Concurrent scoring complete: {} scored, {} failed of {} records",
            predicciones.len(),
            errores.len(),
            total
        );
        Ok((predicciones, errores))
    }
}

/// Scores a single record: extract, predict, band, explain. Returns the
/// prediction plus the percent-of-threshold figure the critical filter needs.
/// Banding and factor derivation use the raw probability; only the DTO value
/// is rounded.
pub fn score_record(
    extractor: &FeatureExtractor,
    classifier: &BreachClassifier,
    record: &SolicitudRecord,
    today: NaiveDate,
) -> Result<(Prediccion, f64), PredictionError> {
    let evaluation_date = record.fecha_cierre.unwrap_or(today);
    let features = extractor.extract(record, evaluation_date)?;
    let probabilidad = classifier.predict_probability(&features)?;
    let nivel_riesgo = risk::band(probabilidad)?;
    let factores_riesgo = factors::explain(&features, probabilidad);

    let prediccion = Prediccion {
        id_solicitud: record.id_solicitud,
        codigo_sla: Some(record.codigo_sla.clone()),
        nombre_rol: record.nombre_rol.clone(),
        probabilidad_incumplimiento: (probabilidad * 10_000.0).round() / 10_000.0,
        nivel_riesgo,
        dias_restantes: features.days_remaining(),
        factores_riesgo,
        fecha_prediccion: Utc::now(),
    };
    Ok((prediccion, features.percent_used()))
}

/// Pure critical-subset rule over already-scored records: keep anything past
/// the percent cutoff or banded ALTO/CRITICO, order by probability descending
/// with fewer remaining days breaking ties, then truncate.
pub fn select_critical(scored: Vec<(Prediccion, f64)>, limite: usize) -> Vec<Prediccion> {
    let mut criticas: Vec<Prediccion> = scored
        .into_iter()
        .filter(|(prediccion, percent_used)| {
            *percent_used > CRITICAL_PERCENT_CUTOFF
                || matches!(
                    prediccion.nivel_riesgo,
                    NivelRiesgo::Alto | NivelRiesgo::Critico
                )
        })
        .map(|(prediccion, _)| prediccion)
        .collect();

    criticas.sort_by(|a, b| {
        b.probabilidad_incumplimiento
            .partial_cmp(&a.probabilidad_incumplimiento)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.dias_restantes
                    .partial_cmp(&b.dias_restantes)
                    .unwrap_or(Ordering::Equal)
            })
    });
    criticas.truncate(limite);
    criticas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, SlaThresholds};
    use crate::models::{
        EstadoCumplimiento, EstadoSolicitud, FeatureVector, TrainingSample,
    };
    use crate::prediction::ModelManager;
    use std::collections::HashMap;

    fn thresholds() -> SlaThresholds {
        SlaThresholds::new(HashMap::from([
            ("SLA1".to_string(), 5.0),
            ("SLA2".to_string(), 35.0),
        ]))
    }

    fn training_samples(n: usize) -> Vec<TrainingSample> {
        let umbrales = [5.0, 10.0, 20.0, 35.0];
        (0..n)
            .map(|i| {
                let threshold_days = umbrales[i % umbrales.len()];
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

    async fn trained_service(dir: &tempfile::TempDir) -> AggregationService {
        let config = ModelConfig {
            model_path: dir.path().join("sla_model.json"),
            n_trees: 10,
            seed: 7,
            ..ModelConfig::default()
        };
        let manager = Arc::new(ModelManager::new(config));
        manager
            .retrain_from_samples(training_samples(160))
            .await
            .unwrap();
        AggregationService::new(manager, FeatureExtractor::new(thresholds()))
    }

    fn untrained_service() -> AggregationService {
        let manager = Arc::new(ModelManager::new(ModelConfig::default()));
        AggregationService::new(manager, FeatureExtractor::new(thresholds()))
    }

    fn record(id: i64, codigo_sla: &str, dias_transcurridos: i64) -> SolicitudRecord {
        let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        SolicitudRecord {
            id_solicitud: id,
            codigo_sla: codigo_sla.to_string(),
            id_rol: 1,
            nombre_rol: Some("Analista".to_string()),
            fecha_solicitud: today - chrono::Duration::days(dias_transcurridos),
            fecha_cierre: None,
            estado_solicitud: EstadoSolicitud::EnProceso,
            estado_cumplimiento: EstadoCumplimiento::EnProceso,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    fn prediccion(id: i64, probabilidad: f64, dias_restantes: f64) -> Prediccion {
        Prediccion {
            id_solicitud: id,
            codigo_sla: Some("SLA2".to_string()),
            nombre_rol: None,
            probabilidad_incumplimiento: probabilidad,
            nivel_riesgo: risk::band(probabilidad).unwrap(),
            dias_restantes,
            factores_riesgo: Vec::new(),
            fecha_prediccion: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_score_page_pagination_math() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let records: Vec<SolicitudRecord> =
            (0..7).map(|i| record(i, "SLA2", i + 1)).collect();

        let page = service.score_page(&records, 2, 3, today()).unwrap();
        assert_eq!(page.pagina, 2);
        assert_eq!(page.total_registros, 7);
        assert_eq!(page.total_paginas, 3);
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.data[0].id_solicitud, 3);

        let last = service.score_page(&records, 3, 3, today()).unwrap();
        assert_eq!(last.data.len(), 1);

        let beyond = service.score_page(&records, 9, 3, today()).unwrap();
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.total_registros, 7);
        assert_eq!(beyond.total_paginas, 3);
    }

    #[tokio::test]
    async fn test_score_page_collects_bad_records() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let records = vec![
            record(1, "SLA2", 10),
            record(2, "SLA_DESCONOCIDO", 10),
            record(3, "SLA2", 20),
        ];

        let page = service.score_page(&records, 1, 10, today()).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.errores.len(), 1);
        assert_eq!(page.errores[0].id_solicitud, 2);
    }

    #[test]
    fn test_empty_population_never_touches_the_model() {
        let service = untrained_service();
        let page = service.score_page(&[], 1, 50, today()).unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total_paginas, 0);

        let resumen = service.summarize(&[], today()).unwrap();
        assert_eq!(resumen.total_analizadas, 0);
        assert_eq!(resumen.promedio_riesgo, 0.0);
    }

    #[test]
    fn test_untrained_model_refuses_nonempty_batch() {
        let service = untrained_service();
        let records = vec![record(1, "SLA2", 10)];
        assert!(matches!(
            service.score_page(&records, 1, 10, today()),
            Err(PredictionError::ModelNotTrained)
        ));
    }

    #[test]
    fn test_select_critical_union_filter_and_ordering() {
        // 95% of threshold used, moderate probability: in via percent cutoff.
        let a = (prediccion(1, 0.3, 0.5), 95.0);
        // Banded ALTO on probability alone, plenty of time left: in via band.
        let b = (prediccion(2, 0.72, 21.0), 40.0);
        // Neither condition holds.
        let c = (prediccion(3, 0.3, 31.5), 10.0);
        // Critical probability and nearly out of time.
        let d = (prediccion(4, 0.9, 1.0), 95.0);

        let criticas = select_critical(vec![a, b, c, d], 2);
        assert_eq!(criticas.len(), 2);
        assert_eq!(criticas[0].id_solicitud, 4);
        assert_eq!(criticas[1].id_solicitud, 2);
    }

    #[tokio::test]
    async fn test_score_critical_skips_unscorable_records() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let records = vec![
            record(1, "SLA1", 4),
            record(2, "SLA_DESCONOCIDO", 4),
            record(3, "SLA1", 5),
        ];

        let criticas = service.score_critical(&records, 10, today()).unwrap();
        assert!(criticas.iter().all(|p| p.id_solicitud != 2));
    }

    #[test]
    fn test_select_critical_ties_break_on_days_remaining() {
        let a = (prediccion(1, 0.8, 5.0), 80.0);
        let b = (prediccion(2, 0.8, 1.0), 90.0);
        let criticas = select_critical(vec![a, b], 10);
        assert_eq!(criticas[0].id_solicitud, 2);
        assert_eq!(criticas[1].id_solicitud, 1);
    }

    #[tokio::test]
    async fn test_score_features_direct_triple() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let features = FeatureVector {
            days_elapsed: 48.0,
            threshold_days: 5.0,
            role_id: 1,
        };
        let (probabilidad, nivel, factores) = service.score_features(&features).unwrap();
        assert!((0.0..=1.0).contains(&probabilidad));
        assert_eq!(nivel, risk::band(probabilidad).unwrap());
        // 960% of the threshold used: the elapsed-time factor must be present.
        assert!(factores
            .iter()
            .any(|f| f == "Tiempo casi agotado (>90%)"));
    }

    #[tokio::test]
    async fn test_summarize_counts_and_average() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let mut records = vec![
            record(1, "SLA1", 1),
            record(2, "SLA2", 34),
            record(3, "SLA2", 10),
        ];
        records[1].estado_solicitud = EstadoSolicitud::Completada;
        records[1].fecha_cierre = Some(today());

        let resumen = service.summarize(&records, today()).unwrap();
        assert_eq!(resumen.total_analizadas, 3);
        assert_eq!(resumen.en_proceso, 2);
        assert_eq!(resumen.completadas, 1);
        assert_eq!(
            resumen.criticas + resumen.altas + resumen.medias + resumen.bajas,
            3
        );
        assert!(resumen.promedio_riesgo >= 0.0 && resumen.promedio_riesgo <= 100.0);
    }

    #[tokio::test]
    async fn test_summarize_skips_unscorable_records() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let records = vec![
            record(1, "SLA1", 1),
            record(2, "SLA_DESCONOCIDO", 1),
            record(3, "SLA2", 10),
        ];

        let resumen = service.summarize(&records, today()).unwrap();
        // Lifecycle counts cover every input row; band counts only the
        // records that scored.
        assert_eq!(resumen.total_analizadas, 3);
        assert_eq!(resumen.en_proceso, 3);
        assert_eq!(
            resumen.criticas + resumen.altas + resumen.medias + resumen.bajas,
            2
        );
    }

    #[tokio::test]
    async fn test_concurrent_scoring_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let records: Vec<SolicitudRecord> =
            (0..40).map(|i| record(i, "SLA2", (i % 30) + 1)).collect();

        let (predicciones, errores) = service
            .score_all_concurrent(records.clone(), today())
            .await
            .unwrap();
        assert!(errores.is_empty());
        assert_eq!(predicciones.len(), 40);
        let ids: Vec<i64> = predicciones.iter().map(|p| p.id_solicitud).collect();
        let expected: Vec<i64> = (0..40).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_concurrent_scoring_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let service = trained_service(&dir).await;
        let records: Vec<SolicitudRecord> =
            (0..12).map(|i| record(i, "SLA2", (i % 30) + 1)).collect();

        let sequential: Vec<f64> = records
            .iter()
            .map(|r| {
                service
                    .score_one(r, today())
                    .unwrap()
                    .probabilidad_incumplimiento
            })
            .collect();
        let (concurrent, _) = service
            .score_all_concurrent(records, today())
            .await
            .unwrap();
        let concurrent: Vec<f64> = concurrent
            .iter()
            .map(|p| p.probabilidad_incumplimiento)
            .collect();
        assert_eq!(sequential, concurrent);
    }
}
