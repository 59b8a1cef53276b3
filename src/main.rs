//! pointcheck - batch runner
//!
//! Validates candidate proxies, assigns them to credentials, and (when an
//! embedder has wired in a browser layer) orchestrates the login/check
//! batch. Inputs are plain line files.
//!
//! Environment variables:
//! - `POINTCHECK_PROXIES` - candidate proxy list file (default: "proxies.txt")
//! - `POINTCHECK_CREDENTIALS` - credential secrets file (default: "credentials.txt")

use std::path::Path;

use tracing::{info, warn};

use pointcheck::runner::Pipeline;
use pointcheck::store::TaskStore;
use pointcheck::{browser, AppConfig};

/// Read one entry per line, skipping blanks and `#` comments.
fn read_lines(path: &str) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = pointcheck::init_logging();

    info!("Starting pointcheck (batch mode)");
    if let Some(dir) = pointcheck::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let config = AppConfig::load();

    let proxies_file =
        std::env::var("POINTCHECK_PROXIES").unwrap_or_else(|_| "proxies.txt".to_string());
    let credentials_file =
        std::env::var("POINTCHECK_CREDENTIALS").unwrap_or_else(|_| "credentials.txt".to_string());

    let proxies = read_lines(&proxies_file)?;
    let secrets = read_lines(&credentials_file)?;
    info!(
        "Loaded {} proxies from {} and {} credentials from {}",
        proxies.len(),
        proxies_file,
        secrets.len(),
        credentials_file
    );

    // Validate the extension location once, up front; the browser layer
    // receives it at construction instead of re-checking at run time.
    if let Some(dir) = &config.extension_dir {
        match browser::validate_extension_dir(Path::new(dir)) {
            Ok(info) => info!("Login-helper extension ready at {}", info.dir.display()),
            Err(e) => warn!("Configured extension unusable: {}", e),
        }
    }

    // Store initialization is the one fatal setup error.
    let store = TaskStore::open(&config.db_path).await?;

    let pipeline = Pipeline::new(store, config);
    let summary = pipeline.run(proxies, secrets).await?;

    info!(
        "Run summary: {} succeeded, {} failed, {} skipped, {} crashed ({} proxies reachable, {} not)",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.crashed,
        summary.proxies_reachable,
        summary.proxies_unreachable
    );

    Ok(())
}
