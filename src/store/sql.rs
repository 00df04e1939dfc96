//! SQLite-backed state store. Grounded on `state/db.py`'s
//! `SQLAlchemyState`: lazy schema creation, upsert-on-save,
//! prune-on-restore, and a logged warning on an app-identity hash
//! mismatch (same `app_id`, different fingerprint - "HASH COLLISION" in
//! the original).

use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::{Result, SkedgeError};
use crate::job::Job;

use super::{apply_restored, AppIdentity, PersistedJobState, StateStore};

#[derive(Debug)]
pub struct SqlStore {
    conn: Mutex<Connection>,
    app_id: String,
    identity: AppIdentity,
}

impl SqlStore {
    /// Open (creating if needed) a SQLite database at `path` and ensure
    /// the `apps`/`state` tables exist.
    ///
    /// # Errors
    /// Returns [`SkedgeError::StoreError`] on any SQLite failure.
    pub fn open(path: impl AsRef<std::path::Path>, app_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SkedgeError::StoreError(format!("open sqlite db: {e}")))?;
        let identity = AppIdentity::current()?;
        let store = Self {
            conn: Mutex::new(conn),
            app_id: app_id.into(),
            identity,
        };
        store.ensure_schema()?;
        store.upsert_app_identity()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS apps (
                app_id TEXT PRIMARY KEY,
                app_unique_info TEXT NOT NULL,
                restart_dt TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS state (
                app_id TEXT NOT NULL,
                signature TEXT NOT NULL,
                readable TEXT,
                log TEXT,
                err TEXT,
                start_dt TEXT,
                end_dt TEXT,
                disabled INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (app_id, signature)
            );",
        )
        .map_err(|e| SkedgeError::StoreError(format!("create schema: {e}")))
    }

    fn upsert_app_identity(&self) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let existing: Option<String> = conn
            .query_row(
                "SELECT app_unique_info FROM apps WHERE app_id = ?1",
                params![self.app_id],
                |row| row.get(0),
            )
            .ok();
        if let Some(existing) = &existing {
            if existing != &self.identity.info {
                warn!(app_id = %self.app_id, "HASH COLLISION: app_unique_info differs from stored value");
            }
        }
        conn.execute(
            "INSERT INTO apps (app_id, app_unique_info, restart_dt) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(app_id) DO UPDATE SET app_unique_info = excluded.app_unique_info, restart_dt = excluded.restart_dt",
            params![self.app_id, self.identity.info],
        )
        .map_err(|e| SkedgeError::StoreError(format!("upsert app identity: {e}")))?;
        Ok(())
    }
}

impl StateStore for SqlStore {
    fn save_job(&self, job: &Job) -> Result<()> {
        let state = PersistedJobState::from_job(job);
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute(
            "INSERT INTO state (app_id, signature, readable, log, err, start_dt, end_dt, disabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(app_id, signature) DO UPDATE SET
                readable = excluded.readable, log = excluded.log, err = excluded.err,
                start_dt = excluded.start_dt, end_dt = excluded.end_dt, disabled = excluded.disabled",
            params![
                self.app_id,
                state.signature_hash,
                state.readable,
                state.log,
                state.err,
                state.start_dt,
                state.end_dt,
                i64::from(state.disabled),
            ],
        )
        .map_err(|e| SkedgeError::StoreError(format!("save job state: {e}")))?;
        Ok(())
    }

    fn restore_all(&self, jobs: &mut [Job]) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        let mut found = Vec::new();
        for job in jobs.iter_mut() {
            let row = conn.query_row(
                "SELECT readable, log, err, start_dt, end_dt, disabled FROM state
                 WHERE app_id = ?1 AND signature = ?2",
                params![self.app_id, job.signature_hash()],
                |row| {
                    Ok(PersistedJobState {
                        signature_hash: job.signature_hash().to_string(),
                        readable: row.get(0)?,
                        log: row.get(1)?,
                        err: row.get(2)?,
                        start_dt: row.get(3)?,
                        end_dt: row.get(4)?,
                        disabled: row.get::<_, i64>(5)? != 0,
                    })
                },
            );
            if let Ok(state) = row {
                apply_restored(job, &state);
                found.push(job.signature_hash().to_string());
            }
        }
        let placeholders = found
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = if found.is_empty() {
            "DELETE FROM state WHERE app_id = ?1".to_string()
        } else {
            format!("DELETE FROM state WHERE app_id = ?1 AND signature NOT IN ({placeholders})")
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SkedgeError::StoreError(format!("prepare prune: {e}")))?;
        let mut bind_params: Vec<&dyn rusqlite::ToSql> = vec![&self.app_id];
        for s in &found {
            bind_params.push(s);
        }
        stmt.execute(bind_params.as_slice())
            .map_err(|e| SkedgeError::StoreError(format!("prune stale state: {e}")))?;
        Ok(())
    }
}
