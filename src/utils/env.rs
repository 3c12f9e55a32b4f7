// src/utils/env.rs
use dotenv::dotenv;
use log::info;

/// Loads `.env` if present. Missing files are fine; real deployments inject
/// the environment directly.
pub fn load_env() {
    match dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(_) => info!("No .env file found, using process environment"),
    }
}
