//! The task table and its operations.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use autopost_core::error::{AutopostError, Result};
use autopost_core::task::{Destination, Payload, Task};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Durable record of every task's definition and last-known state.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open or create the task database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AutopostError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AutopostError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                chat TEXT NOT NULL,
                topic_id INTEGER,
                text TEXT NOT NULL,
                attachment TEXT,
                interval_secs INTEGER NOT NULL,
                jitter_secs INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_run TEXT,
                last_activity TEXT NOT NULL,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );",
        )
        .map_err(|e| AutopostError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AutopostError::Store("connection lock poisoned".into()))
    }

    /// Load all tasks. Called once at startup to seed the dispatch queue.
    pub fn load(&self) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM tasks ORDER BY created_at"
            ))
            .map_err(|e| AutopostError::Store(format!("Load: {e}")))?;
        let rows = stmt
            .query_map([], row_to_task)
            .map_err(|e| AutopostError::Store(format!("Load: {e}")))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| AutopostError::Store(format!("Load row: {e}")))?);
        }
        Ok(tasks)
    }

    /// Fetch one task by id.
    pub fn get(&self, id: &str) -> Result<Task> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"))
            .map_err(|e| AutopostError::Store(format!("Get: {e}")))?;
        let mut rows = stmt
            .query_map([id], row_to_task)
            .map_err(|e| AutopostError::Store(format!("Get: {e}")))?;
        match rows.next() {
            Some(Ok(task)) => Ok(task),
            Some(Err(e)) => Err(AutopostError::Store(format!("Get row: {e}"))),
            None => Err(AutopostError::NotFound(id.to_string())),
        }
    }

    /// Insert or replace a task.
    pub fn upsert(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO tasks
             (id, chat, topic_id, text, attachment, interval_secs, jitter_secs,
              active, created_at, last_run, last_activity,
              consecutive_failures, sent_count, failed_count, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                task.id,
                task.destination.chat,
                task.destination.topic_id,
                task.payload.text,
                task.payload
                    .attachment
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                task.interval_secs,
                task.jitter_secs,
                task.active as i32,
                task.created_at.to_rfc3339(),
                task.last_run.map(|t| t.to_rfc3339()),
                task.last_activity.to_rfc3339(),
                task.consecutive_failures,
                task.sent_count,
                task.failed_count,
                task.last_error,
            ],
        )
        .map_err(|e| AutopostError::Store(format!("Upsert: {e}")))?;
        Ok(())
    }

    /// Delete a task, removing its attached file from disk.
    pub fn delete(&self, id: &str) -> Result<()> {
        let attachment: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT attachment FROM tasks WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    AutopostError::NotFound(id.to_string())
                }
                other => AutopostError::Store(format!("Delete lookup: {other}")),
            })?
        };

        let conn = self.lock()?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", [id])
            .map_err(|e| AutopostError::Store(format!("Delete: {e}")))?;
        drop(conn);

        if let Some(path) = attachment {
            if std::fs::remove_file(&path).is_ok() {
                tracing::debug!("removed attachment {path}");
            }
        }
        Ok(())
    }

    /// Flip the active flag.
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET active = ?2 WHERE id = ?1",
                rusqlite::params![id, active as i32],
            )
            .map_err(|e| AutopostError::Store(format!("Set active: {e}")))?;
        if changed == 0 {
            return Err(AutopostError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Update the interval (already clamped by the caller).
    pub fn set_interval(&self, id: &str, interval_secs: u64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET interval_secs = ?2 WHERE id = ?1",
                rusqlite::params![id, interval_secs],
            )
            .map_err(|e| AutopostError::Store(format!("Set interval: {e}")))?;
        if changed == 0 {
            return Err(AutopostError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Record the final outcome of one execution cycle: timestamps, counters,
    /// and the last error — all in one statement.
    pub fn record_outcome(&self, id: &str, success: bool, error: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE tasks SET
                   last_run = ?2,
                   last_activity = ?2,
                   sent_count = sent_count + CASE WHEN ?3 != 0 THEN 1 ELSE 0 END,
                   failed_count = failed_count + CASE WHEN ?3 != 0 THEN 0 ELSE 1 END,
                   consecutive_failures =
                     CASE WHEN ?3 != 0 THEN 0 ELSE consecutive_failures + 1 END,
                   last_error = ?4
                 WHERE id = ?1",
                rusqlite::params![id, now, success as i32, error],
            )
            .map_err(|e| AutopostError::Store(format!("Record outcome: {e}")))?;
        if changed == 0 {
            return Err(AutopostError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Bump `last_activity` — called on every dequeue and every retry wait so
    /// the health monitor can tell a live task from a dead one.
    pub fn touch_activity(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET last_activity = ?2 WHERE id = ?1",
                rusqlite::params![id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| AutopostError::Store(format!("Touch activity: {e}")))?;
        if changed == 0 {
            return Err(AutopostError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

const COLUMNS: &str = "id, chat, topic_id, text, attachment, interval_secs, jitter_secs, \
                       active, created_at, last_run, last_activity, \
                       consecutive_failures, sent_count, failed_count, last_error";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let attachment: Option<String> = row.get(4)?;
    let created_at: String = row.get(8)?;
    let last_run: Option<String> = row.get(9)?;
    let last_activity: String = row.get(10)?;

    Ok(Task {
        id: row.get(0)?,
        destination: Destination {
            chat: row.get(1)?,
            topic_id: row.get(2)?,
        },
        payload: Payload {
            text: row.get(3)?,
            attachment: attachment.map(PathBuf::from),
        },
        interval_secs: row.get(5)?,
        jitter_secs: row.get(6)?,
        active: row.get::<_, i32>(7)? != 0,
        created_at: parse_ts(&created_at),
        last_run: last_run.as_deref().map(parse_ts),
        last_activity: parse_ts(&last_activity),
        consecutive_failures: row.get(11)?,
        sent_count: row.get(12)?,
        failed_count: row.get(13)?,
        last_error: row.get(14)?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::warn!("unparseable timestamp {s:?} in task row, substituting now");
            Utc::now()
        })
}
