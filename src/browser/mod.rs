//! Browser session contract
//!
//! The login/check work itself happens in an external browser/extension
//! layer. This module defines the capability surface that layer implements:
//! a session factory that produces isolated, proxy-bound sessions, and the
//! session handle the orchestrator holds while driving a pair.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Browser-related errors
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch session: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Session reset failed: {0}")]
    ResetFailed(String),

    #[error("Extension not usable: {0}")]
    ExtensionInvalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Handle to one live browser session.
///
/// A session is bound to exactly one profile directory and one proxy for its
/// whole lifetime. Factory implementations key any live browser state they
/// hold by `id`.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub profile_path: PathBuf,
    pub proxy: String,
}

impl Session {
    /// Create a handle for a session scoped to the given profile and proxy.
    pub fn new(profile_path: &Path, proxy: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            profile_path: profile_path.to_path_buf(),
            proxy: proxy.to_string(),
        }
    }
}

/// Factory for browser sessions, implemented by the external browser layer.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Launch a session using the given profile directory, routed through
    /// the given proxy. The factory owns creation of the profile directory.
    async fn create_session(&self, profile_path: &Path, proxy: &str)
        -> Result<Session, BrowserError>;

    /// Reset the session's browsing context to a clean tab state. Called on
    /// every exit path before the handle is dropped.
    async fn reset_session(&self, session: &Session) -> Result<(), BrowserError>;
}

/// Validated location of the unpacked login-helper extension.
///
/// Computed once at startup and handed to whichever session factory needs
/// it; nothing re-checks or mutates this after construction.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    pub dir: PathBuf,
}

/// Check that `dir` contains an unpacked extension (a `manifest.json`).
pub fn validate_extension_dir(dir: &Path) -> Result<ExtensionInfo, BrowserError> {
    let manifest = dir.join("manifest.json");
    if !manifest.exists() {
        return Err(BrowserError::ExtensionInvalid(format!(
            "manifest.json not found at: {}",
            manifest.display()
        )));
    }

    info!("Found extension at: {}", dir.display());
    Ok(ExtensionInfo { dir: dir.to_path_buf() })
}

/// Find the login-helper extension directory.
/// Searches in order: next to executable, current working directory.
pub fn find_extension_dir() -> Option<ExtensionInfo> {
    let candidates = vec![
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("extensions").join("login-helper"))),
        Some(PathBuf::from("extensions/login-helper")),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Ok(info) = validate_extension_dir(&candidate) {
            return Some(info);
        }
    }

    warn!("Login-helper extension not found in any search path");
    None
}
