use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;

use super::{new_id, StoreResult, TraceStore};
use crate::errors::TraceError;
use crate::logging::append_run_log;
use crate::types::{format_timestamp, parse_timestamp, NewStep, Payload, Run, Step, StepKind};

const RUN_COLUMNS: &str = "id, name, started_at, ended_at, meta_json";
const STEP_COLUMNS: &str =
    "id, run_id, idx, kind, name, ts, input_json, output_json, error_json";

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        append_run_log(
            "info",
            "store.open",
            json!({ "path": path.display().to_string() }),
        );
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TraceError::Database(e.to_string()))?;
            }
        }

        let existed_before_open = path.exists();

        // Zero-byte files indicate a previously interrupted create.
        if existed_before_open {
            let meta =
                std::fs::metadata(&path).map_err(|e| TraceError::Database(e.to_string()))?;
            if meta.len() == 0 {
                return Err(TraceError::Database(format!(
                    "trace database is 0 bytes (corrupt): {}",
                    path.display()
                )));
            }
        }

        let conn = Connection::open(&path).map_err(db_err)?;
        configure_connection(&conn)?;

        if existed_before_open {
            let integrity: String = conn
                .pragma_query_value(None, "quick_check", |row| row.get(0))
                .map_err(db_err)?;
            if integrity != "ok" {
                return Err(TraceError::Database(format!(
                    "trace database failed integrity check: {integrity}"
                )));
            }
        }

        let store = Self {
            conn: Mutex::new(conn),
            db_path: path,
        };
        store.init()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TraceError::Database("connection lock poisoned".to_string()))
    }
}

impl TraceStore for SqliteStore {
    fn init(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        run_migrations(&mut conn)
    }

    fn create_run(
        &self,
        name: &str,
        started_at: DateTime<Utc>,
        meta: &Payload,
    ) -> StoreResult<String> {
        let run_id = new_id();
        let meta_json = encode_payload(meta)?;
        self.conn()?
            .execute(
                "INSERT INTO runs (id, name, started_at, ended_at, meta_json)
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                params![run_id, name, format_timestamp(&started_at), meta_json],
            )
            .map_err(db_err)?;
        append_run_log(
            "info",
            "store.run.created",
            json!({ "run_id": run_id, "name": name }),
        );
        Ok(run_id)
    }

    fn end_run(&self, run_id: &str, ended_at: DateTime<Utc>) -> StoreResult<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE runs SET ended_at = ?1 WHERE id = ?2",
                params![format_timestamp(&ended_at), run_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(TraceError::RunNotFound(run_id.to_string()));
        }
        append_run_log("info", "store.run.ended", json!({ "run_id": run_id }));
        Ok(())
    }

    fn add_step(&self, run_id: &str, step: &NewStep) -> StoreResult<String> {
        let step_id = new_id();
        let error_json = step.error.as_ref().map(encode_payload).transpose()?;
        self.conn()?
            .execute(
                "INSERT INTO steps (
                    id, run_id, idx, kind, name, ts, input_json, output_json, error_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    step_id,
                    run_id,
                    step.idx,
                    step.kind.as_str(),
                    step.name,
                    format_timestamp(&step.ts),
                    encode_payload(&step.input)?,
                    encode_payload(&step.output)?,
                    error_json,
                ],
            )
            .map_err(db_err)?;
        append_run_log(
            "debug",
            "store.step.added",
            json!({
                "run_id": run_id,
                "step_id": step_id,
                "idx": step.idx,
                "kind": step.kind.as_str(),
                "name": step.name,
            }),
        );
        Ok(step_id)
    }

    fn get_run(&self, run_id: &str) -> StoreResult<Run> {
        self.conn()?
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                [run_id],
                row_to_run,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| TraceError::RunNotFound(run_id.to_string()))
    }

    fn list_runs(&self, limit: usize) -> StoreResult<Vec<Run>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC LIMIT ?1"
            ))
            .map_err(db_err)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], row_to_run).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn list_steps(&self, run_id: &str) -> StoreResult<Vec<Step>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM steps WHERE run_id = ?1 ORDER BY idx ASC, rowid ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([run_id], row_to_step).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

fn configure_connection(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "FULL")
        .map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    Ok(())
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let migrations = [(1_i64, include_str!("../../migrations/0001_traces.sql"))];

    conn.execute_batch("BEGIN IMMEDIATE; CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL); COMMIT;")
        .map_err(db_err)?;

    for (version, sql) in migrations {
        let exists = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                [version],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();

        if exists {
            continue;
        }

        append_run_log(
            "info",
            "store.migration.applying",
            json!({ "version": version }),
        );
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(sql).map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, format_timestamp(&Utc::now())],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        append_run_log(
            "info",
            "store.migration.applied",
            json!({ "version": version }),
        );
    }

    Ok(())
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let started_at = row.get::<_, String>(2)?;
    let ended_at = row.get::<_, Option<String>>(3)?;
    let meta_json = row.get::<_, String>(4)?;

    Ok(Run {
        id: row.get(0)?,
        name: row.get(1)?,
        started_at: parse_timestamp(&started_at)
            .map_err(|e| invalid_column(2, format!("invalid started_at: {e}")))?,
        ended_at: match ended_at.filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(
                parse_timestamp(&raw)
                    .map_err(|e| invalid_column(3, format!("invalid ended_at: {e}")))?,
            ),
            None => None,
        },
        meta: decode_payload(4, &meta_json)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<Step> {
    let kind = row.get::<_, String>(3)?;
    let ts = row.get::<_, String>(5)?;
    let input_json = row.get::<_, String>(6)?;
    let output_json = row.get::<_, String>(7)?;
    let error_json = row.get::<_, Option<String>>(8)?;

    Ok(Step {
        id: row.get(0)?,
        run_id: row.get(1)?,
        idx: row.get(2)?,
        kind: StepKind::parse(&kind)
            .ok_or_else(|| invalid_column(3, format!("invalid kind: {kind}")))?,
        name: row.get(4)?,
        ts: parse_timestamp(&ts).map_err(|e| invalid_column(5, format!("invalid ts: {e}")))?,
        input: decode_payload(6, &input_json)?,
        output: decode_payload(7, &output_json)?,
        error: match error_json.filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(decode_payload(8, &raw)?),
            None => None,
        },
    })
}

fn encode_payload(payload: &Payload) -> StoreResult<String> {
    serde_json::to_string(payload).map_err(|e| TraceError::Database(e.to_string()))
}

fn decode_payload(column: usize, raw: &str) -> rusqlite::Result<Payload> {
    if raw.trim().is_empty() {
        return Ok(Payload::new());
    }
    let value: Option<Payload> = serde_json::from_str(raw)
        .map_err(|e| invalid_column(column, format!("invalid json payload: {e}")))?;
    Ok(value.unwrap_or_default())
}

fn invalid_column(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn db_err(error: rusqlite::Error) -> TraceError {
    TraceError::Database(error.to_string())
}
