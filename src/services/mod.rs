//! Service capability layer
//!
//! Each external service the bot can log into is represented by one
//! `ServiceClient` implementation. Clients are registered by name in an
//! explicit registry built at startup; looking up an unknown name is a typed
//! error, never a silent null.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::browser::{BrowserError, Session};

/// Service-dispatch errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unknown service: {0}")]
    NotFound(String),
}

/// What a check reported for a logged-in credential.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// The service explicitly refused the check. Terminal for the task.
    Denied,
    /// The raw value the service reported. Coerced to a point payload.
    Value(serde_json::Value),
}

/// One external service's login/check operations, driven through a browser
/// session. Implementations live in the external browser layer; the
/// orchestrator only sees this trait.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Attempt a login. `Ok(false)` means the service rejected the
    /// credentials; `Err` means the attempt itself broke. Both count as a
    /// failed attempt against the retry budget.
    async fn login(&self, session: &Session, secret: &str, proxy: &str)
        -> Result<bool, BrowserError>;

    /// Perform one check for an already-logged-in session. Never retried.
    async fn check(&self, session: &Session, secret: &str, proxy: &str)
        -> Result<CheckOutcome, BrowserError>;
}

/// Registry of service clients, keyed by service name.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn ServiceClient>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self { services: HashMap::new() }
    }

    /// Register a client under a service name. Last registration wins.
    pub fn register(&mut self, name: &str, client: Arc<dyn ServiceClient>) {
        self.services.insert(name.to_string(), client);
    }

    /// Look up the client for a service name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ServiceClient>, ServiceError> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }

    /// Registered service names, for startup logging.
    pub fn names(&self) -> Vec<&str> {
        self.services.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Coerce a raw check value to a point payload.
///
/// Integers pass through, floats truncate, numeric strings parse; anything
/// else (including "N/A"-style markers) becomes 0.
pub fn coerce_point(value: &serde_json::Value) -> i64 {
    if let Some(n) = value.as_i64() {
        return n;
    }
    if let Some(f) = value.as_f64() {
        return f as i64;
    }
    if let Some(s) = value.as_str() {
        if let Ok(f) = s.trim().parse::<f64>() {
            return f as i64;
        }
    }
    0
}

impl CheckOutcome {
    /// The point payload this outcome carries (0 unless a numeric value).
    pub fn point(&self) -> i64 {
        match self {
            CheckOutcome::Denied => 0,
            CheckOutcome::Value(v) => coerce_point(v),
        }
    }
}
