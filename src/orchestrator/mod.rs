//! Task orchestrator.
//!
//! Drives one login/check cycle per credential/proxy pair against a service,
//! bounded by a login retry budget, and records the outcome in the task
//! store. Tasks already in a terminal state are skipped outright. Business
//! failures (login budget exhausted, check denied) are terminal; an
//! infrastructure crash leaves the task pending so the next full run picks
//! it up again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{BrowserError, Session, SessionFactory};
use crate::report::{FailureLog, FailureRecord};
use crate::services::{coerce_point, CheckOutcome, ServiceClient, ServiceRegistry};
use crate::stats::RunStats;
use crate::store::{AssignedPair, TaskState, TaskStore};

/// Default bound on login attempts per pair per run.
pub const MAX_LOGIN_RETRIES: u32 = 2;

/// Orchestrator configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Login attempts allowed per pair before the task fails.
    pub max_login_retries: u32,
    /// Base directory for per-pair browser profiles.
    pub profiles_dir: PathBuf,
    /// Delete the pair's profile directory after an infrastructure crash.
    pub delete_profile_on_crash: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_login_retries: MAX_LOGIN_RETRIES,
            profiles_dir: std::env::temp_dir().join("pointcheck").join("profiles"),
            delete_profile_on_crash: false,
        }
    }
}

/// How one pair's unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// Task was already terminal; nothing ran.
    Skipped,
    /// Login and check completed; task is now terminal success.
    Succeeded { point: i64 },
    /// Business failure; task is now terminal failed.
    Failed,
    /// Infrastructure error; task left pending for a future run.
    Crashed,
}

enum AttemptResult {
    Succeeded { point: i64, attempts: u32 },
    LoginExhausted { attempts: u32 },
    CheckDenied { attempts: u32 },
}

pub struct Orchestrator {
    store: TaskStore,
    registry: Arc<ServiceRegistry>,
    sessions: Arc<dyn SessionFactory>,
    failures: Arc<FailureLog>,
    stats: Arc<RunStats>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: TaskStore,
        registry: Arc<ServiceRegistry>,
        sessions: Arc<dyn SessionFactory>,
        failures: Arc<FailureLog>,
        stats: Arc<RunStats>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { store, registry, sessions, failures, stats, config }
    }

    /// Run one pair's unit to completion. Never propagates an error to the
    /// caller; every outcome is logged and counted.
    pub async fn run_pair(&self, pair: &AssignedPair, service: &str) -> PairOutcome {
        self.store.ensure_task(pair.credential_id, &pair.proxy, service).await;

        if let Some(state) = self.store.task_state(pair.credential_id, &pair.proxy, service).await
        {
            if state.is_terminal() {
                debug!(
                    credential_id = pair.credential_id,
                    proxy = %pair.proxy,
                    state = state.as_str(),
                    "Task already terminal, skipping"
                );
                self.stats.record_skipped();
                return PairOutcome::Skipped;
            }
        }

        let client = match self.registry.get(service) {
            Ok(c) => c,
            Err(e) => {
                error!(credential_id = pair.credential_id, "{}", e);
                self.stats.record_crashed();
                return PairOutcome::Crashed;
            }
        };

        let profile = pair_profile_dir(&self.config.profiles_dir, pair.credential_id, &pair.proxy);

        let session = match self.sessions.create_session(&profile, &pair.proxy).await {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    credential_id = pair.credential_id,
                    proxy = %pair.proxy,
                    "Session launch failed, task stays pending: {}",
                    e
                );
                self.discard_profile(&profile);
                self.stats.record_crashed();
                return PairOutcome::Crashed;
            }
        };

        let result = self.drive_attempts(&session, client.as_ref(), pair).await;

        let outcome = match result {
            Ok(AttemptResult::Succeeded { point, attempts }) => {
                self.store
                    .set_task_state(
                        pair.credential_id,
                        &pair.proxy,
                        service,
                        TaskState::Success,
                        point,
                        attempts,
                    )
                    .await;
                info!(
                    credential_id = pair.credential_id,
                    proxy = %pair.proxy,
                    point,
                    "Task succeeded"
                );
                self.stats.record_succeeded();
                PairOutcome::Succeeded { point }
            }
            Ok(AttemptResult::LoginExhausted { attempts }) => {
                warn!(
                    credential_id = pair.credential_id,
                    proxy = %pair.proxy,
                    attempts,
                    "Login retries exhausted, task failed"
                );
                self.record_failure(pair, service, attempts).await;
                PairOutcome::Failed
            }
            Ok(AttemptResult::CheckDenied { attempts }) => {
                warn!(
                    credential_id = pair.credential_id,
                    proxy = %pair.proxy,
                    "Check denied, task failed"
                );
                self.record_failure(pair, service, attempts).await;
                PairOutcome::Failed
            }
            Err(e) => {
                warn!(
                    credential_id = pair.credential_id,
                    proxy = %pair.proxy,
                    "Fatal error mid-attempt, task stays pending: {}",
                    e
                );
                self.discard_profile(&profile);
                self.stats.record_crashed();
                PairOutcome::Crashed
            }
        };

        // Clean tab state before teardown, on every exit path.
        if let Err(e) = self.sessions.reset_session(&session).await {
            warn!(session_id = %session.id, "Session reset failed: {}", e);
        }

        outcome
    }

    /// Login (retried up to the budget) then exactly one check. A login
    /// `Ok(false)` or `Err` both burn an attempt; a check error is fatal and
    /// bubbles up, while an explicit denial is a business failure.
    async fn drive_attempts(
        &self,
        session: &Session,
        client: &dyn ServiceClient,
        pair: &AssignedPair,
    ) -> Result<AttemptResult, BrowserError> {
        let max_attempts = self.config.max_login_retries.max(1);
        let mut attempts = 0u32;

        let logged_in = loop {
            attempts += 1;
            match client.login(session, &pair.secret_value, &pair.proxy).await {
                Ok(true) => break true,
                Ok(false) => {
                    warn!(
                        credential_id = pair.credential_id,
                        attempt = attempts,
                        "Login rejected"
                    );
                }
                Err(e) => {
                    warn!(
                        credential_id = pair.credential_id,
                        attempt = attempts,
                        "Login attempt errored: {}",
                        e
                    );
                }
            }
            if attempts >= max_attempts {
                break false;
            }
        };

        if !logged_in {
            return Ok(AttemptResult::LoginExhausted { attempts });
        }

        match client.check(session, &pair.secret_value, &pair.proxy).await? {
            CheckOutcome::Denied => Ok(AttemptResult::CheckDenied { attempts }),
            CheckOutcome::Value(value) => {
                let point = coerce_point(&value);
                debug!(raw = %value, point, "Check value coerced");
                Ok(AttemptResult::Succeeded { point, attempts })
            }
        }
    }

    async fn record_failure(&self, pair: &AssignedPair, service: &str, attempts: u32) {
        self.store
            .set_task_state(
                pair.credential_id,
                &pair.proxy,
                service,
                TaskState::Failed,
                0,
                attempts,
            )
            .await;
        self.failures
            .append(FailureRecord::new(&pair.secret_value, &pair.proxy, service));
        self.stats.record_failed();
    }

    fn discard_profile(&self, profile: &Path) {
        if !self.config.delete_profile_on_crash || !profile.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(profile) {
            warn!("Failed to delete profile {}: {}", profile.display(), e);
        }
    }
}

/// Deterministic per-pair profile directory, so cookies and extension state
/// never leak between pairs and crash-path deletion hits the right place.
pub fn pair_profile_dir(base: &Path, credential_id: i64, proxy: &str) -> PathBuf {
    base.join(format!("cred{}", credential_id)).join(sanitize_proxy(proxy))
}

fn sanitize_proxy(proxy: &str) -> String {
    if let Ok(parsed) = Url::parse(proxy) {
        if let Some(host) = parsed.host_str() {
            return match parsed.port() {
                Some(port) => format!("{}_{}", host, port),
                None => host.to_string(),
            };
        }
    }
    proxy
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}
