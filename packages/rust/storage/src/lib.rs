//! libSQL storage layer (local, offline).
//!
//! The [`Storage`] struct wraps a libSQL database holding the history of
//! merge runs and the assisted strategy's resolution cache.
//!
//! **Access rules:**
//! - `skillsmith merge`: read-write via [`Storage::open`]
//! - `skillsmith history`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use serde::Serialize;

use skillsmith_shared::{Result, SkillsmithError};

fn storage_err(e: libsql::Error) -> SkillsmithError {
    SkillsmithError::Storage(e.to_string())
}

/// One recorded merge run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    /// UUID v7, shared with the output manifest.
    pub id: String,
    pub name: String,
    pub strategy: String,
    /// RFC 3339.
    pub created_at: String,
    pub entry_count: u64,
    pub conflict_count: u64,
    pub degraded_sources: u64,
    pub output_dir: String,
    /// Serialized quality summary.
    pub summary_json: String,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SkillsmithError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database without writing to it.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SkillsmithError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SkillsmithError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            // Table doesn't exist yet
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SkillsmithError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Merge runs
    // -----------------------------------------------------------------------

    pub async fn record_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO merge_runs (id, name, strategy, created_at, entry_count, conflict_count,
                                         degraded_sources, output_dir, summary_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.id.as_str(),
                    run.name.as_str(),
                    run.strategy.as_str(),
                    run.created_at.as_str(),
                    run.entry_count as i64,
                    run.conflict_count as i64,
                    run.degraded_sources as i64,
                    run.output_dir.as_str(),
                    run.summary_json.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first, optionally for one project name.
    pub async fn list_runs(&self, name: Option<&str>, limit: usize) -> Result<Vec<RunRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = match name {
            Some(name) => {
                self.conn
                    .query(
                        "SELECT id, name, strategy, created_at, entry_count, conflict_count,
                                degraded_sources, output_dir, summary_json
                         FROM merge_runs WHERE name = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                        params![name, limit],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        "SELECT id, name, strategy, created_at, entry_count, conflict_count,
                                degraded_sources, output_dir, summary_json
                         FROM merge_runs ORDER BY created_at DESC, id DESC LIMIT ?1",
                        params![limit],
                    )
                    .await
            }
        }
        .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            runs.push(row_to_run(&row)?);
        }
        Ok(runs)
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, strategy, created_at, entry_count, conflict_count,
                        degraded_sources, output_dir, summary_json
                 FROM merge_runs WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Resolution cache
    // -----------------------------------------------------------------------

    /// Cached collaborator response for a request hash and model.
    pub async fn get_resolution(&self, request_hash: &str, model: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT response_json FROM resolution_cache WHERE request_hash = ?1 AND model = ?2",
                params![request_hash, model],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Store a collaborator response (upserts).
    pub async fn set_resolution(
        &self,
        identifier: &str,
        request_hash: &str,
        model: &str,
        response_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO resolution_cache (request_hash, model, identifier, response_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(request_hash, model) DO UPDATE SET
                   identifier = excluded.identifier,
                   response_json = excluded.response_json,
                   created_at = excluded.created_at",
                params![request_hash, model, identifier, response_json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop every cached resolution. Returns the number removed.
    pub async fn clear_resolutions(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM resolution_cache", params![])
            .await
            .map_err(storage_err)
    }
}

fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let count = |idx: i32| -> Result<u64> {
        let value = row.get::<i64>(idx).map_err(storage_err)?;
        Ok(u64::try_from(value).unwrap_or(0))
    };
    Ok(RunRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        name: row.get::<String>(1).map_err(storage_err)?,
        strategy: row.get::<String>(2).map_err(storage_err)?,
        created_at: row.get::<String>(3).map_err(storage_err)?,
        entry_count: count(4)?,
        conflict_count: count(5)?,
        degraded_sources: count(6)?,
        output_dir: row.get::<String>(7).map_err(storage_err)?,
        summary_json: row.get::<String>(8).map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("skillsmith_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_db()).await.expect("open test db")
    }

    fn run(name: &str, created_at: &str) -> RunRecord {
        RunRecord {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            strategy: "deterministic".into(),
            created_at: created_at.into(),
            entry_count: 12,
            conflict_count: 3,
            degraded_sources: 0,
            output_dir: format!("out/{name}"),
            summary_json: "{}".into(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db();
        let first = Storage::open(&tmp).await.expect("first open");
        drop(first);
        let second = Storage::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn runs_roundtrip_newest_first() {
        let storage = test_storage().await;
        let older = run("godot", "2026-01-01T00:00:00+00:00");
        let newer = run("godot", "2026-02-01T00:00:00+00:00");
        let other = run("bevy", "2026-03-01T00:00:00+00:00");
        for r in [&older, &newer, &other] {
            storage.record_run(r).await.expect("record");
        }

        let godot = storage.list_runs(Some("godot"), 10).await.expect("list");
        assert_eq!(godot, vec![newer.clone(), older.clone()]);

        let all = storage.list_runs(None, 2).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "bevy");

        let fetched = storage.get_run(&older.id).await.expect("get");
        assert_eq!(fetched, Some(older));
        assert!(storage.get_run("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn resolution_cache_upserts() {
        let storage = test_storage().await;
        assert!(storage.get_resolution("h1", "m").await.expect("get").is_none());

        storage
            .set_resolution("rotate", "h1", "m", r#"{"confidence":0.5}"#)
            .await
            .expect("set");
        storage
            .set_resolution("rotate", "h1", "m", r#"{"confidence":0.9}"#)
            .await
            .expect("set");
        assert_eq!(
            storage.get_resolution("h1", "m").await.expect("get").as_deref(),
            Some(r#"{"confidence":0.9}"#)
        );
        assert!(storage.get_resolution("h1", "other-model").await.expect("get").is_none());

        assert_eq!(storage.clear_resolutions().await.expect("clear"), 1);
        assert!(storage.get_resolution("h1", "m").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db();
        let rw = Storage::open(&tmp).await.expect("open");
        rw.record_run(&run("godot", "2026-01-01T00:00:00+00:00"))
            .await
            .expect("record");
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.expect("open readonly");
        assert_eq!(ro.list_runs(None, 10).await.expect("list").len(), 1);
        let result = ro.record_run(&run("bevy", "2026-01-02T00:00:00+00:00")).await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_db() {
        assert!(Storage::open_readonly(&temp_db()).await.is_err());
    }
}
