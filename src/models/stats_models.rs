// src/models/stats_models.rs
use serde::{Deserialize, Serialize};

use super::core_models::Prediccion;

/// A record that could not be scored. Bad records never abort the batch; they
/// are reported here alongside the successful results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringError {
    pub id_solicitud: i64,
    pub error: String,
}

/// Paginated scoring output plus the pagination metadata the dashboard table
/// needs. Totals are computed from the full input population, not the slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrediccionBatchResponse {
    pub data: Vec<Prediccion>,
    pub pagina: usize,
    pub tamano_pagina: usize,
    pub total_registros: usize,
    pub total_paginas: usize,
    pub errores: Vec<ScoringError>,
}

/// KPI summary for the dashboard header cards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumenPrediccion {
    pub total_analizadas: usize,
    pub criticas: usize,
    pub altas: usize,
    pub medias: usize,
    pub bajas: usize,
    /// Mean breach probability expressed as a percentage; 0 for an empty
    /// population.
    pub promedio_riesgo: f64,
    pub en_proceso: usize,
    pub completadas: usize,
    pub canceladas: usize,
}

/// One month of historical compliance for the trend chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TendenciaItem {
    /// `yyyy-MM`
    pub periodo: String,
    pub total_solicitudes: i64,
    pub incumplidas: i64,
    pub tasa_incumplimiento: f64,
}
