//! End-to-end batch pipeline.
//!
//! Wires the stages together for one run: probe the candidate proxies,
//! persist the results, assign proxies to credentials, then drive every
//! assigned pair through the orchestrator with staggered starts. The run
//! always completes and logs a summary; individual pair or probe failures
//! never abort the batch. Only store initialization and a validator-pool
//! crash are fatal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::assign::AssignmentStage;
use crate::browser::SessionFactory;
use crate::orchestrator::Orchestrator;
use crate::proxy::ProxyValidator;
use crate::report::FailureLog;
use crate::scheduler::run_staggered;
use crate::services::{ServiceClient, ServiceRegistry};
use crate::stats::{RunStats, RunStatsSnapshot};
use crate::store::TaskStore;
use crate::AppConfig;

/// One configured batch pipeline.
///
/// The browser layer is plugged in by the embedder: without a session
/// factory the run stops after assignment (probe and assignment results are
/// still persisted and reported).
pub struct Pipeline {
    store: TaskStore,
    config: AppConfig,
    registry: ServiceRegistry,
    sessions: Option<Arc<dyn SessionFactory>>,
    stats: Arc<RunStats>,
}

impl Pipeline {
    pub fn new(store: TaskStore, config: AppConfig) -> Self {
        Self {
            store,
            config,
            registry: ServiceRegistry::new(),
            sessions: None,
            stats: Arc::new(RunStats::new()),
        }
    }

    /// Register a service client under a service name.
    pub fn with_service(mut self, name: &str, client: Arc<dyn ServiceClient>) -> Self {
        self.registry.register(name, client);
        self
    }

    /// Plug in the external browser layer's session factory.
    pub fn with_session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.sessions = Some(factory);
        self
    }

    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    /// Run the whole batch: validate → persist → assign → orchestrate.
    pub async fn run(&self, proxies: Vec<String>, secrets: Vec<String>) -> Result<RunStatsSnapshot> {
        info!(
            "Starting batch run: {} candidate proxies, {} credentials, service '{}'",
            proxies.len(),
            secrets.len(),
            self.config.service
        );

        // Validator pool. A worker crash aborts here, before any store write.
        let validator = ProxyValidator::new(self.config.probe_config());
        let probe_results = validator.validate(&proxies).await?;

        let reachable = probe_results.iter().filter(|r| !r.success.is_empty()).count() as u64;
        self.stats
            .record_probes(reachable, probe_results.len() as u64 - reachable);

        self.store.replace_probe_results(&probe_results).await?;

        // Assignment stage.
        let stage = AssignmentStage::new(&self.store, self.config.proxies_per_credential)
            .with_flagged_report(self.config.flagged_proxies_path());
        stage.run(&secrets, &probe_results).await?;

        // Orchestration over every assigned pair, this run's and earlier ones'.
        self.orchestrate().await?;

        let snapshot = self.stats.snapshot();
        info!(
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            crashed = snapshot.crashed,
            proxies_reachable = snapshot.proxies_reachable,
            proxies_unreachable = snapshot.proxies_unreachable,
            elapsed_secs = snapshot.elapsed_secs,
            "Batch run complete"
        );
        Ok(snapshot)
    }

    async fn orchestrate(&self) -> Result<()> {
        let factory = match &self.sessions {
            Some(f) => f.clone(),
            None => {
                info!("No session factory wired in; skipping task orchestration");
                return Ok(());
            }
        };

        if let Err(e) = self.registry.get(&self.config.service) {
            error!("{}; skipping task orchestration", e);
            return Ok(());
        }

        let pairs = self.store.list_assigned_pairs().await?;
        if pairs.is_empty() {
            info!("No assigned pairs to orchestrate");
            return Ok(());
        }

        let orchestrator = Arc::new(Orchestrator::new(
            self.store.clone(),
            Arc::new(self.registry.clone()),
            factory,
            Arc::new(FailureLog::new(&self.config.failure_log_path())),
            self.stats.clone(),
            self.config.orchestrator_config(),
        ));
        let service = self.config.service.clone();

        run_staggered(
            pairs,
            Duration::from_secs(self.config.stagger_secs),
            move |pair| {
                let orchestrator = orchestrator.clone();
                let service = service.clone();
                async move {
                    let outcome = orchestrator.run_pair(&pair, &service).await;
                    debug!(
                        credential_id = pair.credential_id,
                        proxy = %pair.proxy,
                        ?outcome,
                        "Unit finished"
                    );
                }
            },
        )
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserError, Session};
    use crate::services::CheckOutcome;
    use crate::store::TaskState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;

    struct AlwaysOnClient;

    #[async_trait]
    impl ServiceClient for AlwaysOnClient {
        async fn login(&self, _: &Session, _: &str, _: &str) -> Result<bool, BrowserError> {
            Ok(true)
        }
        async fn check(&self, _: &Session, _: &str, _: &str) -> Result<CheckOutcome, BrowserError> {
            Ok(CheckOutcome::Value(json!(11)))
        }
    }

    struct LocalFactory;

    #[async_trait]
    impl SessionFactory for LocalFactory {
        async fn create_session(&self, profile: &Path, proxy: &str) -> Result<Session, BrowserError> {
            std::fs::create_dir_all(profile)?;
            Ok(Session::new(profile, proxy))
        }
        async fn reset_session(&self, _: &Session) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            service: "portal".into(),
            // Probes go nowhere fast: reserved port, short timeout.
            probe_target: "http://example.com/".into(),
            probe_timeout_secs: 2,
            stagger_secs: 0,
            profiles_dir: Some(dir.path().join("profiles").to_string_lossy().into_owned()),
            failure_log: Some(dir.path().join("failed_tasks.json").to_string_lossy().into_owned()),
            flagged_proxies: Some(dir.path().join("flagged.json").to_string_lossy().into_owned()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_pipeline_drives_assigned_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = TaskStore::open(db_path.to_str().unwrap()).await.unwrap();

        let pipeline = Pipeline::new(store.clone(), test_config(&dir))
            .with_service("portal", Arc::new(AlwaysOnClient))
            .with_session_factory(Arc::new(LocalFactory));

        let proxies = vec!["http://127.0.0.1:1".to_string(), "http://127.0.0.1:2".to_string()];
        let secrets = vec!["alice-secret".to_string()];

        let snapshot = pipeline.run(proxies, secrets).await.unwrap();
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.proxies_unreachable, 2);

        let pairs = store.list_assigned_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);
        let task = store
            .get_task(pairs[0].credential_id, &pairs[0].proxy, "portal")
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::Success);
        assert_eq!(task.point, 11);
    }

    #[tokio::test]
    async fn second_run_skips_terminal_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = TaskStore::open(db_path.to_str().unwrap()).await.unwrap();

        let proxies = vec!["http://127.0.0.1:1".to_string()];
        let secrets = vec!["alice-secret".to_string()];

        let first = Pipeline::new(store.clone(), test_config(&dir))
            .with_service("portal", Arc::new(AlwaysOnClient))
            .with_session_factory(Arc::new(LocalFactory));
        first.run(proxies.clone(), secrets.clone()).await.unwrap();

        let second = Pipeline::new(store.clone(), test_config(&dir))
            .with_service("portal", Arc::new(AlwaysOnClient))
            .with_session_factory(Arc::new(LocalFactory));
        let snapshot = second.run(proxies, secrets).await.unwrap();

        assert_eq!(snapshot.succeeded, 0);
        assert_eq!(snapshot.skipped, 1);
    }

    #[tokio::test]
    async fn missing_session_factory_still_completes_prepare_stages() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = TaskStore::open(db_path.to_str().unwrap()).await.unwrap();

        let pipeline = Pipeline::new(store.clone(), test_config(&dir));
        let snapshot = pipeline
            .run(vec!["http://127.0.0.1:1".to_string()], vec!["alice-secret".to_string()])
            .await
            .unwrap();

        assert_eq!(snapshot.succeeded + snapshot.failed + snapshot.crashed, 0);
        assert_eq!(store.list_assigned_pairs().await.unwrap().len(), 1);
        assert_eq!(store.probe_results().await.unwrap().len(), 1);
    }
}
