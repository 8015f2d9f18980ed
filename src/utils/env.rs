// src/utils/env.rs

use log::{debug, warn};

/// Loads variables from `.env` (or the file named by `DEDUP_ENV_FILE`) without
/// overriding variables already present in the process environment.
pub fn load_env() {
    let result = match std::env::var("DEDUP_ENV_FILE") {
        Ok(path) => dotenv::from_filename(path),
        Err(_) => dotenv::dotenv(),
    };
    match result {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) => warn!(
            "No .env file loaded ({}). Proceeding with system environment variables.",
            e
        ),
    }
}
