//! SQLite-backed task store.
//!
//! Holds credentials, credential-to-proxy assignments, the latest proxy
//! probe results, and one task-monitoring row per credential/proxy/service
//! combination. The store assumes a single logical writer: no two
//! orchestrator processes may run against the same database file.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::warn;

use crate::proxy::ProbeResult;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    secret_value TEXT    NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS assignments (
    credential_id INTEGER NOT NULL,
    proxy         TEXT    NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS proxy_probe_results (
    proxy   TEXT PRIMARY KEY,
    success TEXT NOT NULL,
    fail    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    credential_id INTEGER NOT NULL,
    proxy         TEXT    NOT NULL,
    service       TEXT    NOT NULL,
    state         TEXT    NOT NULL,
    retry_count   INTEGER NOT NULL DEFAULT 0,
    point         INTEGER NOT NULL DEFAULT 0,
    last_updated  TEXT    NOT NULL DEFAULT (datetime('now')),
    UNIQUE(credential_id, proxy, service)
);
"#;

/// Task progress state. Success and Failed are terminal: once reached, the
/// task is never reprocessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Success,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "success" => Some(TaskState::Success),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed)
    }
}

/// One credential/proxy pair, as produced by the assignment stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedPair {
    pub credential_id: i64,
    pub secret_value: String,
    pub proxy: String,
}

/// Full task row, mainly for reporting and tests.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub credential_id: i64,
    pub proxy: String,
    pub service: String,
    pub state: TaskState,
    pub retry_count: u32,
    pub point: i64,
}

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open (creating if missing) the store at `path`. The one store error
    /// that is fatal to a run.
    pub async fn open(path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(path = path, "Task store opened");
        Ok(Self { pool })
    }

    /// Insert a credential if absent; returns its id either way.
    pub async fn upsert_credential(&self, secret_value: &str) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO credentials (secret_value) VALUES (?1)")
            .bind(secret_value)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT id FROM credentials WHERE secret_value = ?1")
            .bind(secret_value)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("id"))
    }

    /// Bind a proxy to a credential. A proxy already assigned (to any
    /// credential) is left untouched.
    pub async fn insert_assignment(&self, credential_id: i64, proxy: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO assignments (credential_id, proxy) VALUES (?1, ?2)")
            .bind(credential_id)
            .bind(proxy)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every credential/proxy pair with an assignment, via a join. Each
    /// assignment appears exactly once; order is unspecified.
    pub async fn list_assigned_pairs(&self) -> Result<Vec<AssignedPair>> {
        let rows = sqlx::query(
            "SELECT c.id AS credential_id, c.secret_value, a.proxy
             FROM credentials c JOIN assignments a ON a.credential_id = c.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| AssignedPair {
                credential_id: r.get("credential_id"),
                secret_value: r.get("secret_value"),
                proxy: r.get("proxy"),
            })
            .collect())
    }

    /// Replace the probe-results table wholesale, inside one transaction.
    /// Called only once the full validator result set is known, so a failed
    /// run leaves the previous rows intact.
    pub async fn replace_probe_results(&self, results: &[ProbeResult]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM proxy_probe_results")
            .execute(&mut *tx)
            .await?;

        for r in results {
            sqlx::query("INSERT INTO proxy_probe_results (proxy, success, fail) VALUES (?1, ?2, ?3)")
                .bind(&r.proxy)
                .bind(serde_json::to_string(&r.success).unwrap_or_else(|_| "[]".into()))
                .bind(serde_json::to_string(&r.fail).unwrap_or_else(|_| "[]".into()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Read back the stored probe results.
    pub async fn probe_results(&self) -> Result<Vec<ProbeResult>> {
        let rows = sqlx::query("SELECT proxy, success, fail FROM proxy_probe_results")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| ProbeResult {
                proxy: r.get("proxy"),
                success: serde_json::from_str(r.get::<String, _>("success").as_str())
                    .unwrap_or_default(),
                fail: serde_json::from_str(r.get::<String, _>("fail").as_str())
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Make sure a task row exists for the key, pending with a zero retry
    /// count and zero point. Idempotent check-then-insert under the
    /// single-writer assumption. Store errors are logged and swallowed;
    /// callers must treat them as "state unknown", not as success.
    pub async fn ensure_task(&self, credential_id: i64, proxy: &str, service: &str) {
        let existing = sqlx::query(
            "SELECT id FROM tasks WHERE credential_id = ?1 AND proxy = ?2 AND service = ?3",
        )
        .bind(credential_id)
        .bind(proxy)
        .bind(service)
        .fetch_optional(&self.pool)
        .await;

        match existing {
            Ok(Some(_)) => {}
            Ok(None) => {
                let inserted = sqlx::query(
                    "INSERT INTO tasks (credential_id, proxy, service, state, retry_count, point)
                     VALUES (?1, ?2, ?3, ?4, 0, 0)",
                )
                .bind(credential_id)
                .bind(proxy)
                .bind(service)
                .bind(TaskState::Pending.as_str())
                .execute(&self.pool)
                .await;

                if let Err(e) = inserted {
                    warn!(credential_id, proxy, service, "Failed to insert task row: {}", e);
                }
            }
            Err(e) => {
                warn!(credential_id, proxy, service, "Failed to look up task row: {}", e);
            }
        }
    }

    /// Current state of a task, or None if the row is missing or the read
    /// failed (logged).
    pub async fn task_state(
        &self,
        credential_id: i64,
        proxy: &str,
        service: &str,
    ) -> Option<TaskState> {
        let row = sqlx::query(
            "SELECT state FROM tasks WHERE credential_id = ?1 AND proxy = ?2 AND service = ?3",
        )
        .bind(credential_id)
        .bind(proxy)
        .bind(service)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(r) => r.and_then(|r| TaskState::parse(r.get::<String, _>("state").as_str())),
            Err(e) => {
                warn!(credential_id, proxy, service, "Failed to read task state: {}", e);
                None
            }
        }
    }

    /// Unconditional overwrite of state, point, retry count, and timestamp.
    /// Last writer wins; errors are logged and swallowed.
    pub async fn set_task_state(
        &self,
        credential_id: i64,
        proxy: &str,
        service: &str,
        state: TaskState,
        point: i64,
        retry_count: u32,
    ) {
        let updated = sqlx::query(
            "UPDATE tasks SET state = ?4, point = ?5, retry_count = ?6, last_updated = datetime('now')
             WHERE credential_id = ?1 AND proxy = ?2 AND service = ?3",
        )
        .bind(credential_id)
        .bind(proxy)
        .bind(service)
        .bind(state.as_str())
        .bind(point)
        .bind(retry_count as i64)
        .execute(&self.pool)
        .await;

        if let Err(e) = updated {
            warn!(credential_id, proxy, service, "Failed to update task state: {}", e);
        }
    }

    /// Full task row, or None if missing or unreadable.
    pub async fn get_task(
        &self,
        credential_id: i64,
        proxy: &str,
        service: &str,
    ) -> Option<TaskRow> {
        let row = sqlx::query(
            "SELECT credential_id, proxy, service, state, retry_count, point
             FROM tasks WHERE credential_id = ?1 AND proxy = ?2 AND service = ?3",
        )
        .bind(credential_id)
        .bind(proxy)
        .bind(service)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()?;

        Some(TaskRow {
            credential_id: row.get("credential_id"),
            proxy: row.get("proxy"),
            service: row.get("service"),
            state: TaskState::parse(row.get::<String, _>("state").as_str())?,
            retry_count: row.get::<i64, _>("retry_count") as u32,
            point: row.get("point"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(dir: &tempfile::TempDir) -> TaskStore {
        let db_path = dir.path().join("test.db");
        TaskStore::open(db_path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn ensure_task_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.ensure_task(1, "http://p1:8080", "portal").await;
        store.ensure_task(1, "http://p1:8080", "portal").await;

        let task = store.get_task(1, "http://p1:8080", "portal").await.unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.point, 0);
    }

    #[tokio::test]
    async fn ensure_task_preserves_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.ensure_task(1, "http://p1:8080", "portal").await;
        store
            .set_task_state(1, "http://p1:8080", "portal", TaskState::Success, 37, 1)
            .await;

        store.ensure_task(1, "http://p1:8080", "portal").await;

        let task = store.get_task(1, "http://p1:8080", "portal").await.unwrap();
        assert_eq!(task.state, TaskState::Success);
        assert_eq!(task.point, 37);
    }

    #[tokio::test]
    async fn state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.ensure_task(7, "http://p2:8080", "portal").await;
        assert_eq!(
            store.task_state(7, "http://p2:8080", "portal").await,
            Some(TaskState::Pending)
        );

        store
            .set_task_state(7, "http://p2:8080", "portal", TaskState::Failed, 0, 2)
            .await;
        assert_eq!(
            store.task_state(7, "http://p2:8080", "portal").await,
            Some(TaskState::Failed)
        );

        assert!(store.task_state(7, "http://other:8080", "portal").await.is_none());
    }

    #[tokio::test]
    async fn assigned_pairs_joins_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let alice = store.upsert_credential("alice-secret").await.unwrap();
        let bob = store.upsert_credential("bob-secret").await.unwrap();
        store.insert_assignment(alice, "http://p1:8080").await.unwrap();
        store.insert_assignment(alice, "http://p2:8080").await.unwrap();
        store.insert_assignment(bob, "http://p3:8080").await.unwrap();

        let mut pairs = store.list_assigned_pairs().await.unwrap();
        pairs.sort_by(|a, b| a.proxy.cmp(&b.proxy));

        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].secret_value, "alice-secret");
        assert_eq!(pairs[2].secret_value, "bob-secret");
        assert_eq!(pairs[2].credential_id, bob);
    }

    #[tokio::test]
    async fn upsert_credential_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let first = store.upsert_credential("alice-secret").await.unwrap();
        let second = store.upsert_credential("alice-secret").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn duplicate_proxy_assignment_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let alice = store.upsert_credential("alice-secret").await.unwrap();
        let bob = store.upsert_credential("bob-secret").await.unwrap();
        store.insert_assignment(alice, "http://p1:8080").await.unwrap();
        store.insert_assignment(bob, "http://p1:8080").await.unwrap();

        let pairs = store.list_assigned_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].credential_id, alice);
    }

    #[tokio::test]
    async fn probe_results_are_replaced_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let first = vec![
            ProbeResult {
                proxy: "http://p1:8080".into(),
                success: vec!["portal".into()],
                fail: vec![],
            },
            ProbeResult {
                proxy: "http://p2:8080".into(),
                success: vec![],
                fail: vec!["portal".into()],
            },
        ];
        store.replace_probe_results(&first).await.unwrap();

        let second = vec![ProbeResult {
            proxy: "http://p3:8080".into(),
            success: vec!["portal".into()],
            fail: vec![],
        }];
        store.replace_probe_results(&second).await.unwrap();

        let stored = store.probe_results().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].proxy, "http://p3:8080");
        assert_eq!(stored[0].success, vec!["portal".to_string()]);
    }
}
