//! Proxy assignment stage.
//!
//! Binds each credential to a bounded number of proxies drawn greedily from
//! the front of the validated candidate list, persists the mapping, and
//! reports probe-failing proxies for operator review. Assignment ignores
//! probe history on purpose: a proxy that failed every probe stays eligible
//! unless the caller filtered it out beforehand.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, warn};

use crate::proxy::ProbeResult;
use crate::report;
use crate::store::TaskStore;

/// Default number of proxies bound to one credential.
pub const DEFAULT_PROXIES_PER_CREDENTIAL: usize = 1;

/// Planned proxy set for one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAssignment {
    pub secret_value: String,
    pub proxies: Vec<String>,
}

/// Greedily consume candidates from the front of the list, in input order,
/// up to `per_credential` proxies each. Once the pool runs out, remaining
/// credentials get an empty set; no wraparound, no reuse.
pub fn plan_assignments(
    secrets: &[String],
    candidates: &[ProbeResult],
    per_credential: usize,
) -> Vec<PlannedAssignment> {
    let mut pool = candidates.iter();

    secrets
        .iter()
        .map(|secret| PlannedAssignment {
            secret_value: secret.clone(),
            proxies: pool
                .by_ref()
                .take(per_credential)
                .map(|r| r.proxy.clone())
                .collect(),
        })
        .collect()
}

/// Assignment stage: plan, persist, report.
pub struct AssignmentStage<'a> {
    store: &'a TaskStore,
    per_credential: usize,
    flagged_report: Option<PathBuf>,
}

impl<'a> AssignmentStage<'a> {
    pub fn new(store: &'a TaskStore, per_credential: usize) -> Self {
        Self { store, per_credential, flagged_report: None }
    }

    /// Write probe-failing proxies to this path after persisting.
    pub fn with_flagged_report(mut self, path: PathBuf) -> Self {
        self.flagged_report = Some(path);
        self
    }

    /// Persist credentials and their planned proxies, then report flagged
    /// proxies. Returns the plan that was persisted.
    pub async fn run(
        &self,
        secrets: &[String],
        candidates: &[ProbeResult],
    ) -> Result<Vec<PlannedAssignment>> {
        let plans = plan_assignments(secrets, candidates, self.per_credential);

        let mut assigned = 0usize;
        for plan in &plans {
            let credential_id = self.store.upsert_credential(&plan.secret_value).await?;
            for proxy in &plan.proxies {
                self.store.insert_assignment(credential_id, proxy).await?;
                assigned += 1;
            }
        }

        let unassigned = plans.iter().filter(|p| p.proxies.is_empty()).count();
        info!(
            "Assigned {} proxies across {} credentials ({} credentials without proxies)",
            assigned,
            plans.len(),
            unassigned
        );

        if let Some(path) = &self.flagged_report {
            let flagged = candidates.iter().filter(|r| !r.fail.is_empty()).count();
            if flagged > 0 {
                if let Err(e) = report::write_flagged_proxies(path, candidates) {
                    warn!("Failed to write flagged-proxy report: {}", e);
                } else {
                    info!("Flagged {} proxies for review at {}", flagged, path.display());
                }
            }
        }

        Ok(plans)
    }
}
