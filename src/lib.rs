// src/lib.rs
pub mod aggregation;
pub mod config;
pub mod error;
pub mod features;
pub mod models;
pub mod prediction;
pub mod storage;
pub mod utils;
