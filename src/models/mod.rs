// src/models/mod.rs
pub mod core_models;
pub mod stats_models;

pub use core_models::{
    EstadoCumplimiento, EstadoSolicitud, FeatureImportance, FeatureVector, FeatureWeight,
    NivelRiesgo, Prediccion, SolicitudRecord, TrainingReport, TrainingSample,
};
pub use stats_models::{PrediccionBatchResponse, ResumenPrediccion, ScoringError, TendenciaItem};
