//! SQLite persistence for projects and their version history.
//!
//! One database per data dir, WAL mode. History writes are whole-snapshot:
//! a project's versions are replaced in a single transaction, which keeps
//! the on-disk cursor and version list consistent even if the daemon dies
//! mid-apply.

use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

use crate::patch::engine::{History, Version};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub template_slug: String,
    /// Relative path of the project's editable page source.
    pub file_path: String,
    pub cursor: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VersionRow {
    pub id: String,
    pub project_id: String,
    pub idx: i64,
    pub file_path: String,
    pub content: String,
    /// JSON array of applied changes.
    pub applied_changes: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding
    /// it are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("islad.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions as _;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        // SQLite has no ALTER TABLE IF NOT EXISTS; the schema is created
        // idempotently instead.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS projects (
                id            TEXT PRIMARY KEY,
                template_slug TEXT NOT NULL,
                file_path     TEXT NOT NULL,
                cursor        INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .context("failed to create projects table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS versions (
                id              TEXT PRIMARY KEY,
                project_id      TEXT NOT NULL,
                idx             INTEGER NOT NULL,
                file_path       TEXT NOT NULL,
                content         TEXT NOT NULL,
                applied_changes TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                UNIQUE (project_id, idx)
            )",
        )
        .execute(pool)
        .await
        .context("failed to create versions table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_versions_project ON versions (project_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Projects ───────────────────────────────────────────────────────────

    pub async fn create_project(
        &self,
        id: &str,
        template_slug: &str,
        file_path: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        with_timeout(async {
            sqlx::query(
                "INSERT INTO projects (id, template_slug, file_path, cursor, created_at, updated_at)
                 VALUES (?, ?, ?, 0, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(id)
            .bind(template_slug)
            .bind(file_path)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        with_timeout(async {
            let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        })
        .await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRow>> {
        with_timeout(async {
            let rows =
                sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        })
        .await
    }

    pub async fn project_count(&self) -> Result<i64> {
        with_timeout(async {
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM projects")
                .fetch_one(&self.pool)
                .await?;
            Ok(count.0)
        })
        .await
    }

    // ─── History ────────────────────────────────────────────────────────────

    /// Persist a project's full history snapshot in one transaction.
    pub async fn save_history(&self, project_id: &str, history: &History) -> Result<()> {
        with_timeout(async {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM versions WHERE project_id = ?")
                .bind(project_id)
                .execute(&mut *tx)
                .await?;

            for (idx, version) in history.versions().iter().enumerate() {
                sqlx::query(
                    "INSERT INTO versions
                     (id, project_id, idx, file_path, content, applied_changes, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&version.id)
                .bind(project_id)
                .bind(idx as i64)
                .bind(&version.file_path)
                .bind(&version.content)
                .bind(serde_json::to_string(&version.applied_changes)?)
                .bind(version.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("UPDATE projects SET cursor = ?, updated_at = ? WHERE id = ?")
                .bind(history.cursor() as i64)
                .bind(Utc::now().to_rfc3339())
                .bind(project_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Load a project's history. Returns None when the project has no
    /// persisted versions yet.
    pub async fn load_history(&self, project_id: &str) -> Result<Option<History>> {
        with_timeout(async {
            let project = match self.get_project_in_pool(project_id).await? {
                Some(p) => p,
                None => return Ok(None),
            };

            let rows = sqlx::query_as::<_, VersionRow>(
                "SELECT * FROM versions WHERE project_id = ? ORDER BY idx",
            )
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;

            let mut versions = Vec::with_capacity(rows.len());
            for row in rows {
                versions.push(Version {
                    id: row.id,
                    file_path: row.file_path,
                    content: row.content,
                    applied_changes: serde_json::from_str(&row.applied_changes)
                        .context("corrupt applied_changes JSON")?,
                    created_at: chrono::DateTime::parse_from_rfc3339(&row.created_at)
                        .context("corrupt version timestamp")?
                        .with_timezone(&Utc),
                });
            }

            Ok(History::restore(versions, project.cursor as usize))
        })
        .await
    }

    async fn get_project_in_pool(&self, id: &str) -> Result<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
