// src/storage/queries.rs
//
// The storage collaborator boundary: raw solicitud/SLA/role rows in, nothing
// scored ever written back. All compliance-state filtering for training data
// lives here, in SQL, so the core only ever sees labeled terminal rows.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use tokio_postgres::types::ToSql;

use super::db_connect::PgPool;
use crate::models::{
    EstadoCumplimiento, EstadoSolicitud, FeatureVector, SolicitudRecord, TendenciaItem,
    TrainingSample,
};

/// Fetches the population to score: active solicitudes joined with their SLA
/// configuration and role. `incluir_historicas` also pulls closed rows for
/// the full dashboard table; `codigo_sla` narrows to one SLA type.
pub async fn fetch_solicitudes_activas(
    pool: &PgPool,
    incluir_historicas: bool,
    codigo_sla: Option<&str>,
) -> Result<Vec<SolicitudRecord>> {
    let mut sql = String::from(
        "SELECT s.id_solicitud, s.fecha_solicitud, s.fecha_cierre,
                s.estado_solicitud, s.estado_cumplimiento_sla,
                c.codigo_sla, r.id_rol_registro, r.nombre_rol
         FROM solicitud s
         JOIN config_sla c ON s.id_sla = c.id_sla
         JOIN rol_registro r ON s.id_rol_registro = r.id_rol_registro
         WHERE c.es_activo",
    );
    if !incluir_historicas {
        sql.push_str(" AND s.estado_solicitud NOT IN ('COMPLETADA', 'CANCELADA')");
    }

    let codigo_filter: Option<String> = codigo_sla.map(|s| s.trim().to_uppercase());
    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
    if let Some(ref code) = codigo_filter {
        params.push(code);
        sql.push_str(&format!(" AND c.codigo_sla = ${}", params.len()));
    }

    // Most urgent first so the dashboard sees a mix of SLA types.
    sql.push_str(" ORDER BY (c.dias_umbral - (CURRENT_DATE - s.fecha_solicitud)) ASC, c.codigo_sla");

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for fetch_solicitudes_activas")?;
    let rows = conn
        .query(&sql, &params)
        .await
        .context("Failed to query active solicitudes")?;

    let records = rows
        .into_iter()
        .map(|row| {
            let estado_solicitud: String = row.get("estado_solicitud");
            let estado_cumplimiento: Option<String> = row.get("estado_cumplimiento_sla");
            SolicitudRecord {
                id_solicitud: row.get("id_solicitud"),
                codigo_sla: row.get("codigo_sla"),
                id_rol: row.get("id_rol_registro"),
                nombre_rol: row.get("nombre_rol"),
                fecha_solicitud: row.get("fecha_solicitud"),
                fecha_cierre: row.get("fecha_cierre"),
                estado_solicitud: EstadoSolicitud::parse(&estado_solicitud),
                estado_cumplimiento: estado_cumplimiento
                    .map(|s| EstadoCumplimiento::parse(&s))
                    .unwrap_or(EstadoCumplimiento::EnProceso),
            }
        })
        .collect::<Vec<_>>();

    info!("Fetched {} solicitudes for scoring", records.len());
    Ok(records)
}

/// Fetches the labeled training history. Only terminal compliance states
/// qualify; the `NOT LIKE 'EN_PROCESO%'` filter is the hard training-data
/// rule, not an optimization.
pub async fn fetch_datos_entrenamiento(
    pool: &PgPool,
    limite: i64,
) -> Result<Vec<TrainingSample>> {
    const SQL: &str = "
        SELECT COALESCE(s.num_dias_sla,
                        (COALESCE(s.fecha_cierre, CURRENT_DATE) - s.fecha_solicitud))::float8
                   AS dias_transcurridos,
               c.dias_umbral::float8 AS dias_umbral,
               s.id_rol_registro AS id_rol,
               (s.estado_cumplimiento_sla LIKE 'NO_CUMPLE%') AS incumplio
        FROM solicitud s
        JOIN config_sla c ON s.id_sla = c.id_sla
        WHERE s.estado_cumplimiento_sla IS NOT NULL
          AND s.estado_cumplimiento_sla NOT LIKE 'EN_PROCESO%'
        ORDER BY s.creado_en DESC
        LIMIT $1";

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for fetch_datos_entrenamiento")?;
    let rows = conn
        .query(SQL, &[&limite])
        .await
        .context("Failed to query training data")?;

    let mut skipped = 0usize;
    let mut samples = Vec::with_capacity(rows.len());
    for row in rows {
        let days_elapsed: f64 = row.get("dias_transcurridos");
        let threshold_days: f64 = row.get("dias_umbral");
        if threshold_days <= 0.0 || days_elapsed < 0.0 {
            skipped += 1;
            continue;
        }
        samples.push(TrainingSample {
            features: FeatureVector {
                days_elapsed,
                threshold_days,
                role_id: row.get("id_rol"),
            },
            breached: row.get("incumplio"),
        });
    }
    if skipped > 0 {
        warn!("Skipped {} training rows with invalid day values", skipped);
    }
    info!("Fetched {} training samples", samples.len());
    Ok(samples)
}

/// Counts terminal-state solicitudes closed since the given instant. Feeds
/// the volume half of the staleness rule.
pub async fn count_terminales_desde(pool: &PgPool, since: DateTime<Utc>) -> Result<i64> {
    const SQL: &str = "
        SELECT COUNT(*) AS total
        FROM solicitud s
        WHERE s.estado_cumplimiento_sla IS NOT NULL
          AND s.estado_cumplimiento_sla NOT LIKE 'EN_PROCESO%'
          AND s.fecha_cierre >= $1";

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for count_terminales_desde")?;
    let row = conn
        .query_one(SQL, &[&since.date_naive()])
        .await
        .context("Failed to count terminal solicitudes")?;
    Ok(row.get("total"))
}

/// Monthly compliance history for the dashboard trend chart.
pub async fn fetch_tendencias_historicas(
    pool: &PgPool,
    meses: i32,
) -> Result<Vec<TendenciaItem>> {
    const SQL: &str = "
        SELECT to_char(s.fecha_solicitud, 'YYYY-MM') AS periodo,
               COUNT(*) AS total_solicitudes,
               SUM(CASE WHEN s.estado_cumplimiento_sla LIKE 'NO_CUMPLE%' THEN 1 ELSE 0 END)
                   AS incumplidas,
               (SUM(CASE WHEN s.estado_cumplimiento_sla LIKE 'NO_CUMPLE%' THEN 1.0 ELSE 0.0 END)
                    * 100.0 / NULLIF(COUNT(*), 0))::float8 AS tasa_incumplimiento
        FROM solicitud s
        WHERE s.fecha_solicitud >= (CURRENT_DATE - make_interval(months => $1))::date
          AND s.estado_cumplimiento_sla IS NOT NULL
          AND s.estado_cumplimiento_sla NOT LIKE 'EN_PROCESO%'
        GROUP BY to_char(s.fecha_solicitud, 'YYYY-MM')
        ORDER BY periodo DESC";

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for fetch_tendencias_historicas")?;
    let rows = conn
        .query(SQL, &[&meses])
        .await
        .context("Failed to query compliance trends")?;

    Ok(rows
        .into_iter()
        .map(|row| TendenciaItem {
            periodo: row.get("periodo"),
            total_solicitudes: row.get("total_solicitudes"),
            incumplidas: row.get("incumplidas"),
            tasa_incumplimiento: row
                .get::<_, Option<f64>>("tasa_incumplimiento")
                .unwrap_or(0.0),
        })
        .collect())
}

/// Refreshes the per-SLA-code threshold table from `config_sla`.
pub async fn fetch_sla_umbrales(pool: &PgPool) -> Result<HashMap<String, f64>> {
    const SQL: &str = "
        SELECT c.codigo_sla, c.dias_umbral::float8 AS dias_umbral
        FROM config_sla c
        WHERE c.es_activo";

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for fetch_sla_umbrales")?;
    let rows = conn
        .query(SQL, &[])
        .await
        .context("Failed to query SLA thresholds")?;

    let mut umbrales = HashMap::new();
    for row in rows {
        let codigo: String = row.get("codigo_sla");
        let dias: f64 = row.get("dias_umbral");
        if dias > 0.0 {
            umbrales.insert(codigo, dias);
        } else {
            warn!("Ignoring SLA '{}' with non-positive threshold {}", codigo, dias);
        }
    }
    Ok(umbrales)
}
