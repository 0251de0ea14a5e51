//! SQLite-backed task store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{
    NewUploadedFile, PurgeReport, Task, TaskMutation, TaskStatus, TaskStore, TaskStoreError,
    UploadedFile,
};
use crate::error::ErrorCode;
use crate::filter::FilterChain;
use crate::options::ConvertOptions;

const TASK_COLUMNS: &str = "t.id, t.file_id, t.options, t.filter_chain, t.status, t.progress, \
     t.result_key, t.result_url, t.error_code, t.error_message, t.attempts, t.lease_owner, \
     t.lease_expires_at, t.created_at, t.updated_at, t.started_at, t.completed_at";

const FILE_COLUMNS: &str = "id, name, size_bytes, duration_secs, storage_key, uploaded_at";

/// SQLite-backed task store.
///
/// Uploads older than the retention window are treated as gone even before
/// the retention sweep deletes them, and so are their tasks.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
    retention: Duration,
}

impl SqliteTaskStore {
    /// Create a new SQLite task store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TaskStoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite task store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    /// Sets how long uploads stay visible.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn from_connection(conn: Connection) -> Result<Self, TaskStoreError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retention: Duration::hours(24),
        })
    }

    /// Inserts a PENDING task inside `tx`, checking the file and its active task.
    fn insert_task(
        tx: &Transaction<'_>,
        visible_since: &str,
        file_id: &str,
        options: &ConvertOptions,
        filter_chain: &FilterChain,
    ) -> Result<Task, TaskStoreError> {
        let file_exists = tx
            .query_row(
                "SELECT 1 FROM files WHERE id = ? AND uploaded_at >= ?",
                params![file_id, visible_since],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();
        if !file_exists {
            return Err(TaskStoreError::FileNotFound(file_id.to_string()));
        }

        let active: Option<String> = tx
            .query_row(
                "SELECT id FROM tasks WHERE file_id = ? AND status IN ('PENDING', 'RUNNING')",
                params![file_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(task_id) = active {
            return Err(TaskStoreError::ActiveTaskExists {
                file_id: file_id.to_string(),
                task_id,
            });
        }

        let now = now();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            options: options.clone(),
            filter_chain: filter_chain.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            result_key: None,
            result_url: None,
            error_code: None,
            error_message: None,
            attempts: 0,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        let options_json =
            serde_json::to_string(&task.options).map_err(|e| TaskStoreError::Database(e.to_string()))?;
        let chain_json = serde_json::to_string(&task.filter_chain)
            .map_err(|e| TaskStoreError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO tasks (id, file_id, options, filter_chain, status, progress, attempts, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)",
            params![
                task.id,
                task.file_id,
                options_json,
                chain_json,
                task.status.as_str(),
                ts(now),
                ts(now),
            ],
        )
        .map_err(db_err)?;
        Ok(task)
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskStoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                duration_secs REAL NOT NULL,
                storage_key TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL REFERENCES files(id),
                options TEXT NOT NULL,
                filter_chain TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                result_key TEXT,
                result_url TEXT,
                error_code TEXT,
                error_message TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                lease_owner TEXT,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_files_uploaded_at ON files(uploaded_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active_file
                ON tasks(file_id) WHERE status IN ('PENDING', 'RUNNING');
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TaskStoreError> {
        self.conn
            .lock()
            .map_err(|_| TaskStoreError::Database("connection mutex poisoned".to_string()))
    }

    /// Oldest upload time still within retention.
    fn visible_since(&self) -> String {
        ts(now() - self.retention)
    }

    fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<UploadedFile> {
        Ok(UploadedFile {
            id: row.get(0)?,
            name: row.get(1)?,
            size_bytes: row.get::<_, i64>(2)?.max(0) as u64,
            duration_secs: row.get(3)?,
            storage_key: row.get(4)?,
            uploaded_at: parse_ts(row, 5)?,
        })
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let options: ConvertOptions = parse_json(row, 2)?;
        let filter_chain: FilterChain = parse_json(row, 3)?;

        let status_str: String = row.get(4)?;
        let status = TaskStatus::parse(&status_str)
            .ok_or_else(|| conversion_err(4, format!("unknown status {}", status_str)))?;

        let error_code = match row.get::<_, Option<String>>(8)? {
            Some(code) => Some(
                ErrorCode::parse(&code)
                    .ok_or_else(|| conversion_err(8, format!("unknown error code {}", code)))?,
            ),
            None => None,
        };

        Ok(Task {
            id: row.get(0)?,
            file_id: row.get(1)?,
            options,
            filter_chain,
            status,
            progress: row.get::<_, i64>(5)?.clamp(0, 100) as u8,
            result_key: row.get(6)?,
            result_url: row.get(7)?,
            error_code,
            error_message: row.get(9)?,
            attempts: row.get::<_, i64>(10)?.max(0) as u32,
            lease_owner: row.get(11)?,
            lease_expires_at: parse_opt_ts(row, 12)?,
            created_at: parse_ts(row, 13)?,
            updated_at: parse_ts(row, 14)?,
            started_at: parse_opt_ts(row, 15)?,
            completed_at: parse_opt_ts(row, 16)?,
        })
    }

    fn load_task(
        tx: &Transaction<'_>,
        task_id: &str,
        visible_since: &str,
    ) -> Result<Task, TaskStoreError> {
        let sql = format!(
            "SELECT {} FROM tasks t JOIN files f ON f.id = t.file_id \
             WHERE t.id = ? AND f.uploaded_at >= ?",
            TASK_COLUMNS
        );
        tx.query_row(&sql, params![task_id, visible_since], Self::row_to_task)
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| TaskStoreError::NotFound(task_id.to_string()))
    }

    fn write_task(tx: &Transaction<'_>, task: &Task) -> Result<(), TaskStoreError> {
        tx.execute(
            "UPDATE tasks SET status = ?, progress = ?, result_key = ?, result_url = ?, \
             error_code = ?, error_message = ?, attempts = ?, lease_owner = ?, \
             lease_expires_at = ?, updated_at = ?, started_at = ?, completed_at = ? \
             WHERE id = ?",
            params![
                task.status.as_str(),
                i64::from(task.progress),
                task.result_key,
                task.result_url,
                task.error_code.map(|c| c.as_str()),
                task.error_message,
                i64::from(task.attempts),
                task.lease_owner,
                task.lease_expires_at.map(ts),
                ts(task.updated_at),
                task.started_at.map(ts),
                task.completed_at.map(ts),
                task.id,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn query_tasks(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Task>, TaskStoreError> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, Self::row_to_task).map_err(db_err)?;

        let mut tasks = Vec::new();
        for row_result in rows {
            tasks.push(row_result.map_err(db_err)?);
        }
        Ok(tasks)
    }
}

impl TaskStore for SqliteTaskStore {
    fn register_file(&self, file: NewUploadedFile) -> Result<UploadedFile, TaskStoreError> {
        let conn = self.lock()?;
        let uploaded_at = now();

        conn.execute(
            &format!("INSERT INTO files ({}) VALUES (?, ?, ?, ?, ?, ?)", FILE_COLUMNS),
            params![
                file.id,
                file.name,
                file.size_bytes as i64,
                file.duration_secs,
                file.storage_key,
                ts(uploaded_at),
            ],
        )
        .map_err(db_err)?;

        Ok(UploadedFile {
            id: file.id,
            name: file.name,
            size_bytes: file.size_bytes,
            duration_secs: file.duration_secs,
            storage_key: file.storage_key,
            uploaded_at,
        })
    }

    fn get_file(&self, file_id: &str) -> Result<Option<UploadedFile>, TaskStoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM files WHERE id = ? AND uploaded_at >= ?",
                FILE_COLUMNS
            ),
            params![file_id, self.visible_since()],
            Self::row_to_file,
        )
        .optional()
        .map_err(db_err)
    }

    fn create(
        &self,
        file_id: &str,
        options: &ConvertOptions,
        filter_chain: &FilterChain,
    ) -> Result<Task, TaskStoreError> {
        let visible_since = self.visible_since();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let task = Self::insert_task(&tx, &visible_since, file_id, options, filter_chain)?;
        tx.commit().map_err(db_err)?;
        Ok(task)
    }

    fn create_batch(
        &self,
        file_ids: &[String],
        options: &ConvertOptions,
        filter_chain: &FilterChain,
    ) -> Result<Vec<Task>, TaskStoreError> {
        let visible_since = self.visible_since();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut tasks = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            tasks.push(Self::insert_task(
                &tx,
                &visible_since,
                file_id,
                options,
                filter_chain,
            )?);
        }
        // Dropping the transaction on error rolls every insert back.
        tx.commit().map_err(db_err)?;
        Ok(tasks)
    }

    fn get(&self, task_id: &str) -> Result<Task, TaskStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        Self::load_task(&tx, task_id, &self.visible_since())
    }

    fn update(&self, task_id: &str, mutation: TaskMutation) -> Result<Task, TaskStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let mut task = Self::load_task(&tx, task_id, &self.visible_since())?;
        task.apply(&mutation, now())?;
        Self::write_task(&tx, &task)?;

        tx.commit().map_err(db_err)?;
        Ok(task)
    }

    fn list(&self, task_ids: &[String]) -> Result<Vec<Task>, TaskStoreError> {
        let conn = self.lock()?;
        let visible_since = self.visible_since();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks t JOIN files f ON f.id = t.file_id \
                 WHERE t.id = ? AND f.uploaded_at >= ?",
                TASK_COLUMNS
            ))
            .map_err(db_err)?;

        let mut tasks = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            let task = stmt
                .query_row(params![id, visible_since], Self::row_to_task)
                .optional()
                .map_err(db_err)?;
            if let Some(task) = task {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    fn list_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>, TaskStoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM tasks t JOIN files f ON f.id = t.file_id \
             WHERE t.status = ? AND f.uploaded_at >= ? ORDER BY t.created_at ASC LIMIT ?",
            TASK_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Self::query_tasks(
            &conn,
            &sql,
            params![status.as_str(), self.visible_since(), limit],
        )
    }

    fn list_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Task>, TaskStoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM tasks t JOIN files f ON f.id = t.file_id \
             WHERE t.status = 'RUNNING' AND t.lease_expires_at IS NOT NULL \
             AND t.lease_expires_at <= ? AND f.uploaded_at >= ? ORDER BY t.lease_expires_at ASC",
            TASK_COLUMNS
        );
        Self::query_tasks(&conn, &sql, params![ts(now), self.visible_since()])
    }

    fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport, TaskStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let cutoff = ts(cutoff);

        let mut storage_keys = Vec::new();
        {
            let mut stmt = tx
                .prepare(
                    "SELECT storage_key FROM files WHERE uploaded_at < ?1 \
                     UNION ALL \
                     SELECT t.result_key FROM tasks t JOIN files f ON f.id = t.file_id \
                     WHERE f.uploaded_at < ?1 AND t.result_key IS NOT NULL",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![cutoff], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            for key in rows {
                storage_keys.push(key.map_err(db_err)?);
            }
        }

        let tasks_removed = tx
            .execute(
                "DELETE FROM tasks WHERE file_id IN (SELECT id FROM files WHERE uploaded_at < ?)",
                params![cutoff],
            )
            .map_err(db_err)?;
        let files_removed = tx
            .execute("DELETE FROM files WHERE uploaded_at < ?", params![cutoff])
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        Ok(PurgeReport {
            files_removed,
            tasks_removed,
            storage_keys,
        })
    }
}

/// Current time at the precision timestamps are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width UTC timestamps so that text comparison matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn db_err(e: rusqlite::Error) -> TaskStoreError {
    TaskStoreError::Database(e.to_string())
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => parse_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::build_filter_chain;
    use crate::options::OptionDefaults;
    use tempfile::TempDir;

    fn store() -> SqliteTaskStore {
        SqliteTaskStore::in_memory().unwrap()
    }

    fn new_file(id: &str) -> NewUploadedFile {
        NewUploadedFile {
            id: id.to_string(),
            name: format!("{}.mp4", id),
            size_bytes: 1024,
            duration_secs: 9.8,
            storage_key: format!("raw/2024/01/01/{}.mp4", id),
        }
    }

    fn create_task(store: &SqliteTaskStore, file_id: &str) -> Result<Task, TaskStoreError> {
        let options = OptionDefaults::default().to_options().unwrap();
        let chain = build_filter_chain(&options);
        store.create(file_id, &options, &chain)
    }

    fn claim(worker: &str, secs: i64) -> TaskMutation {
        TaskMutation::Claim {
            worker_id: worker.to_string(),
            lease_until: Utc::now() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_register_and_get_file() {
        let store = store();
        let file = store.register_file(new_file("f1")).unwrap();
        assert_eq!(file.name, "f1.mp4");

        let fetched = store.get_file("f1").unwrap().unwrap();
        assert_eq!(fetched, file);
        assert!(store.get_file("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_task() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        let task = create_task(&store, "f1").unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);

        let fetched = store.get(&task.id).unwrap();
        assert_eq!(fetched.file_id, "f1");
        assert_eq!(fetched.options, task.options);
        assert_eq!(fetched.filter_chain, task.filter_chain);
    }

    #[test]
    fn test_create_for_unknown_file_fails() {
        let store = store();
        let err = create_task(&store, "nope").unwrap_err();
        assert!(matches!(err, TaskStoreError::FileNotFound(_)));
    }

    #[test]
    fn test_one_active_task_per_file() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        let first = create_task(&store, "f1").unwrap();

        let err = create_task(&store, "f1").unwrap_err();
        assert!(
            matches!(err, TaskStoreError::ActiveTaskExists { ref task_id, .. } if *task_id == first.id)
        );

        store.update(&first.id, claim("w1", 60)).unwrap();
        store
            .update(
                &first.id,
                TaskMutation::Fail {
                    worker_id: Some("w1".to_string()),
                    code: ErrorCode::EngineFailed,
                    message: "exit 1".to_string(),
                },
            )
            .unwrap();

        // terminal tasks no longer block a new one
        assert!(create_task(&store, "f1").is_ok());
    }

    #[test]
    fn test_get_missing_task() {
        let store = store();
        assert!(matches!(
            store.get("missing"),
            Err(TaskStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_persists_lifecycle() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        let task = create_task(&store, "f1").unwrap();

        store.update(&task.id, claim("w1", 60)).unwrap();
        store
            .update(
                &task.id,
                TaskMutation::Progress {
                    worker_id: "w1".to_string(),
                    percent: 40,
                    lease_until: Utc::now() + Duration::seconds(60),
                },
            )
            .unwrap();
        let done = store
            .update(
                &task.id,
                TaskMutation::Succeed {
                    worker_id: "w1".to_string(),
                    result_key: "processed/2024/01/01/f1.webm".to_string(),
                    result_url: "file:///data/processed/2024/01/01/f1.webm".to_string(),
                },
            )
            .unwrap();
        assert_eq!(done.status, TaskStatus::Success);

        let fetched = store.get(&task.id).unwrap();
        assert_eq!(fetched.status, TaskStatus::Success);
        assert_eq!(fetched.progress, 100);
        assert_eq!(fetched.attempts, 1);
        assert!(fetched.lease_owner.is_none());
        assert!(fetched.completed_at.is_some());
        assert_eq!(
            fetched.result_key.as_deref(),
            Some("processed/2024/01/01/f1.webm")
        );
    }

    #[test]
    fn test_rejected_update_leaves_record_untouched() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        let task = create_task(&store, "f1").unwrap();
        store.update(&task.id, claim("w1", 60)).unwrap();

        let err = store.update(&task.id, claim("w2", 60)).unwrap_err();
        assert!(matches!(err, TaskStoreError::LeaseHeld { .. }));

        let fetched = store.get(&task.id).unwrap();
        assert_eq!(fetched.lease_owner.as_deref(), Some("w1"));
        assert_eq!(fetched.attempts, 1);
    }

    #[test]
    fn test_list_skips_unknown_and_keeps_order() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        store.register_file(new_file("f2")).unwrap();
        let a = create_task(&store, "f1").unwrap();
        let b = create_task(&store, "f2").unwrap();

        let tasks = store
            .list(&[b.id.clone(), "unknown".to_string(), a.id.clone()])
            .unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);
    }

    #[test]
    fn test_list_by_status() {
        let store = store();
        for id in ["f1", "f2", "f3"] {
            store.register_file(new_file(id)).unwrap();
            create_task(&store, id).unwrap();
        }
        let pending = store.list_by_status(TaskStatus::Pending, 10).unwrap();
        assert_eq!(pending.len(), 3);
        store.update(&pending[0].id, claim("w1", 60)).unwrap();

        assert_eq!(store.list_by_status(TaskStatus::Pending, 10).unwrap().len(), 2);
        assert_eq!(store.list_by_status(TaskStatus::Running, 10).unwrap().len(), 1);
        assert_eq!(store.list_by_status(TaskStatus::Pending, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_list_expired_leases() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        store.register_file(new_file("f2")).unwrap();
        let stale = create_task(&store, "f1").unwrap();
        let live = create_task(&store, "f2").unwrap();

        store.update(&stale.id, claim("w1", -5)).unwrap();
        store.update(&live.id, claim("w2", 600)).unwrap();

        let expired = store.list_expired_leases(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
    }

    #[test]
    fn test_expired_uploads_are_hidden() {
        let store = store().with_retention(Duration::zero());
        store.register_file(new_file("f1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(store.get_file("f1").unwrap().is_none());
        assert!(matches!(
            create_task(&store, "f1"),
            Err(TaskStoreError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_create_batch_is_all_or_nothing() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        store.register_file(new_file("f2")).unwrap();
        let options = OptionDefaults::default().to_options().unwrap();
        let chain = build_filter_chain(&options);

        let ids = vec!["f1".to_string(), "missing".to_string(), "f2".to_string()];
        let err = store.create_batch(&ids, &options, &chain).unwrap_err();
        assert!(matches!(err, TaskStoreError::FileNotFound(ref id) if id == "missing"));
        assert!(store.list_by_status(TaskStatus::Pending, 10).unwrap().is_empty());

        let ids = vec!["f1".to_string(), "f2".to_string()];
        let tasks = store.create_batch(&ids, &options, &chain).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].file_id, "f1");
        assert_eq!(tasks[1].file_id, "f2");
        assert_eq!(store.list_by_status(TaskStatus::Pending, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_purge_expired() {
        let store = store();
        store.register_file(new_file("f1")).unwrap();
        let task = create_task(&store, "f1").unwrap();
        store.update(&task.id, claim("w1", 60)).unwrap();
        store
            .update(
                &task.id,
                TaskMutation::Succeed {
                    worker_id: "w1".to_string(),
                    result_key: "processed/2024/01/01/f1.webm".to_string(),
                    result_url: "file:///f1.webm".to_string(),
                },
            )
            .unwrap();

        // nothing is old enough yet
        let none = store.purge_expired(Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(none, PurgeReport::default());

        let report = store.purge_expired(Utc::now() + Duration::seconds(1)).unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.tasks_removed, 1);
        assert!(report
            .storage_keys
            .contains(&"raw/2024/01/01/f1.mp4".to_string()));
        assert!(report
            .storage_keys
            .contains(&"processed/2024/01/01/f1.webm".to_string()));

        assert!(store.get_file("f1").unwrap().is_none());
        assert!(matches!(store.get(&task.id), Err(TaskStoreError::NotFound(_))));
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.db");

        let task_id = {
            let store = SqliteTaskStore::new(&path).unwrap();
            store.register_file(new_file("f1")).unwrap();
            create_task(&store, "f1").unwrap().id
        };

        let reopened = SqliteTaskStore::new(&path).unwrap();
        assert_eq!(reopened.get(&task_id).unwrap().status, TaskStatus::Pending);
    }
}
