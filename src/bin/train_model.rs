// src/bin/train_model.rs
use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use prediccion_lib::config::ModelConfig;
use prediccion_lib::prediction::{BreachClassifier, ClassifierParams, ModelManager};
use prediccion_lib::storage::db_connect::connect;
use prediccion_lib::storage::queries;
use prediccion_lib::utils::env::load_env;

/// Fits the SLA breach classifier from terminal-state history and persists the
/// versioned artifact.
#[derive(Parser, Debug)]
#[command(name = "train_model")]
struct Args {
    /// Fit and report without writing the artifact.
    #[arg(long)]
    dry_run: bool,

    /// Cap on training rows fetched, newest first. Defaults to the configured
    /// maximum.
    #[arg(long)]
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    load_env();
    let args = Args::parse();
    if args.dry_run {
        warn!("DRY RUN MODE: no artifact will be written and no model swapped.");
    }

    let config = ModelConfig::from_env();
    config.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    let limite = args.limit.unwrap_or(config.max_training_samples);
    let samples = queries::fetch_datos_entrenamiento(&pool, limite)
        .await
        .context("Failed to fetch training data")?;

    let artifact_line;
    let report = if args.dry_run {
        let mut classifier = BreachClassifier::new(ClassifierParams::from(&config));
        let report = classifier.fit(&samples).context("Training failed")?;
        artifact_line = "(dry run, not persisted)".to_string();
        report
    } else {
        let manager = ModelManager::new(config.clone());
        let report = manager
            .retrain_from_samples(samples)
            .await
            .context("Training failed")?;
        artifact_line = config.model_path.display().to_string();
        report
    };

    println!("\n=== SLA MODEL TRAINING SUMMARY ===");
    println!("Run ID: {}", report.run_id);
    println!("Samples Used: {}", report.samples_used);
    println!("Holdout Accuracy: {:.2}%", report.accuracy * 100.0);
    println!("Trained At: {}", report.trained_at);
    println!("Artifact: {}", artifact_line);
    println!("\nThe prediction service picks up the new artifact on its next start.");
    Ok(())
}
