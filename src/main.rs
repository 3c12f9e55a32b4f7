// src/main.rs
use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use prediccion_lib::aggregation::AggregationService;
use prediccion_lib::config::{ModelConfig, SlaThresholds};
use prediccion_lib::features::FeatureExtractor;
use prediccion_lib::prediction::{ModelManager, ModelState};
use prediccion_lib::storage::db_connect::{connect, get_pool_status};
use prediccion_lib::storage::queries;
use prediccion_lib::utils::env::load_env;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const CRITICAL_LIMIT: usize = 10;
const TREND_MONTHS: i32 = 6;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting SLA risk prediction refresh pipeline");
    load_env();

    let model_config = ModelConfig::from_env();
    model_config.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    info!("Successfully connected to the database");

    let mut phase_times = HashMap::new();

    // Phase 1: SLA threshold table (DB first, env/default fallback)
    let phase1_start = Instant::now();
    let thresholds = match queries::fetch_sla_umbrales(&pool).await {
        Ok(umbrales) if !umbrales.is_empty() => {
            info!("Loaded {} SLA thresholds from config_sla", umbrales.len());
            SlaThresholds::new(umbrales)
        }
        Ok(_) => {
            warn!("config_sla returned no active thresholds; falling back to environment");
            SlaThresholds::from_env()
        }
        Err(e) => {
            warn!("Failed to load SLA thresholds from DB ({}); falling back to environment", e);
            SlaThresholds::from_env()
        }
    };
    thresholds.log_config();
    let phase1_duration = phase1_start.elapsed();
    phase_times.insert("sla_thresholds", phase1_duration);

    // Phase 2: Model lifecycle (load, staleness check, retrain as needed)
    let phase2_start = Instant::now();
    let manager = Arc::new(ModelManager::new(model_config));
    let mut state = manager.init().context("Failed to initialize model manager")?;

    if state == ModelState::Trained {
        state = manager
            .check_staleness(&pool)
            .await
            .context("Failed to check model staleness")?;
    }
    match state {
        ModelState::Uninitialized => {
            info!("No usable model artifact; running initial training");
            let report = manager
                .retrain(&pool)
                .await
                .context("Initial training failed")?;
            info!(
                "Initial training complete: {} samples, accuracy {:.2}%",
                report.samples_used,
                report.accuracy * 100.0
            );
        }
        ModelState::Stale => {
            info!("Model is stale; retraining in place");
            // A failed refresh is not fatal: the stale model keeps serving.
            match manager.retrain(&pool).await {
                Ok(report) => info!(
                    "Retraining complete: {} samples, accuracy {:.2}%",
                    report.samples_used,
                    report.accuracy * 100.0
                ),
                Err(e) => warn!("Retraining failed, continuing with stale model: {}", e),
            }
        }
        ModelState::Trained => info!("Model is current; skipping retraining"),
    }
    let phase2_duration = phase2_start.elapsed();
    phase_times.insert("model_lifecycle", phase2_duration);

    // Phase 3: Fetch and score the active population
    let phase3_start = Instant::now();
    let service = AggregationService::new(Arc::clone(&manager), FeatureExtractor::new(thresholds));
    let today = Utc::now().date_naive();

    let records = queries::fetch_solicitudes_activas(&pool, false, None)
        .await
        .context("Failed to fetch active solicitudes")?;
    let (predicciones, errores) = service
        .score_all_concurrent(records.clone(), today)
        .await
        .context("Failed to score active solicitudes")?;
    if !errores.is_empty() {
        warn!("{} records could not be scored:", errores.len());
        for error in errores.iter().take(10) {
            warn!("  solicitud {}: {}", error.id_solicitud, error.error);
        }
    }
    let phase3_duration = phase3_start.elapsed();
    phase_times.insert("scoring", phase3_duration);

    // Phase 4: Aggregated dashboard views
    let phase4_start = Instant::now();
    let resumen = service
        .summarize(&records, today)
        .context("Failed to build prediction summary")?;
    let criticas = service
        .score_critical(&records, CRITICAL_LIMIT, today)
        .context("Failed to build critical subset")?;
    let tendencias = queries::fetch_tendencias_historicas(&pool, TREND_MONTHS)
        .await
        .context("Failed to fetch compliance trends")?;
    let phase4_duration = phase4_start.elapsed();
    phase_times.insert("aggregation", phase4_duration);

    // Comprehensive summary
    let total_time = phase1_duration + phase2_duration + phase3_duration + phase4_duration;

    info!("=== Pipeline Summary ===");
    info!("Model status: {:?}", manager.status());
    info!("Solicitudes scored: {} ({} failed)", predicciones.len(), errores.len());
    info!(
        "Risk bands: {} criticas, {} altas, {} medias, {} bajas (promedio {:.1}%)",
        resumen.criticas, resumen.altas, resumen.medias, resumen.bajas, resumen.promedio_riesgo
    );
    info!("Critical attention queue ({} max):", CRITICAL_LIMIT);
    for prediccion in &criticas {
        info!(
            "  solicitud {} [{}] p={:.4}, {:.1} días restantes",
            prediccion.id_solicitud,
            prediccion.nivel_riesgo,
            prediccion.probabilidad_incumplimiento,
            prediccion.dias_restantes
        );
    }
    info!("Compliance trend (last {} months):", TREND_MONTHS);
    for item in &tendencias {
        info!(
            "  {}: {}/{} incumplidas ({:.1}%)",
            item.periodo, item.incumplidas, item.total_solicitudes, item.tasa_incumplimiento
        );
    }
    if let Ok(classifier) = manager.classifier() {
        if let Ok(importance) = classifier.feature_importance() {
            info!("=== Feature Importance ===");
            for weight in &importance.features {
                info!(
                    "  {}: {:.3} ({})",
                    weight.feature, weight.peso, weight.impacto
                );
            }
        }
    }
    info!("=== Timing Breakdown ===");
    info!("Phase 1 (SLA thresholds): {:.2?}", phase1_duration);
    info!("Phase 2 (Model lifecycle): {:.2?}", phase2_duration);
    info!("Phase 3 (Scoring): {:.2?}", phase3_duration);
    info!("Phase 4 (Aggregation): {:.2?}", phase4_duration);
    info!("Total execution time: {:.2?}", total_time);

    let (pool_size, available_connections, in_use_connections) = get_pool_status(&pool);
    info!(
        "Final DB Connection Pool Status: Total: {}, Available: {}, In Use: {}",
        pool_size, available_connections, in_use_connections
    );

    info!("Pipeline completed successfully!");
    Ok(())
}
