//! rollcall-storage: SQLite persistence for recipients, schedules and logs.
//!
//! A single connection behind an async mutex; every call hops onto the
//! blocking pool. Timestamps are stored as RFC 3339 text, calendar dates
//! as `%Y-%m-%d` text.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;

use rollcall_types::{
    CronRunLog, DeliveryLogEntry, DeliveryStatus, Frequency, MessageKind, Recipient, RunStatus,
    Schedule,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS recipients (
        id TEXT PRIMARY KEY,
        phone TEXT NOT NULL,
        schedule_id TEXT NOT NULL,
        frequency TEXT NOT NULL,
        start_date TEXT NOT NULL,
        last_sent TEXT,
        message_kind TEXT NOT NULL,
        client_code TEXT NOT NULL,
        retry_attempts INTEGER NOT NULL DEFAULT 0,
        next_retry_at TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        sender_name TEXT NOT NULL,
        frequency TEXT NOT NULL,
        send_hour INTEGER,
        user_template TEXT NOT NULL,
        admin_template TEXT NOT NULL,
        event_id TEXT NOT NULL,
        client_code TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS delivery_log (
        id TEXT PRIMARY KEY,
        phone TEXT NOT NULL,
        content TEXT NOT NULL,
        status TEXT NOT NULL,
        provider_message_id TEXT,
        error TEXT,
        frequency TEXT NOT NULL,
        client_code TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_delivery_log_created
        ON delivery_log (created_at DESC);

    CREATE TABLE IF NOT EXISTS cron_run_log (
        id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        processed INTEGER NOT NULL DEFAULT 0,
        detail TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT
    );
";

/// SQLite-backed storage shared by the engine and the CLI.
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ─── Recipients ───────────────────────────────────

    /// All recipients eligible for sweep consideration.
    pub async fn list_active_recipients(&self) -> Result<Vec<Recipient>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECIPIENT_COLS} FROM recipients WHERE active = 1 ORDER BY created_at"
            ))?;
            let rows = stmt
                .query_map([], recipient_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    /// Every recipient, active or not (operator listing).
    pub async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECIPIENT_COLS} FROM recipients ORDER BY created_at"
            ))?;
            let rows = stmt
                .query_map([], recipient_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    /// Get a recipient by ID.
    pub async fn get_recipient(&self, id: &str) -> Result<Option<Recipient>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECIPIENT_COLS} FROM recipients WHERE id = ?1"
            ))?;
            let result = stmt
                .query_row(rusqlite::params![id], recipient_from_row)
                .optional()?;
            Ok(result)
        })
        .await?
    }

    /// Insert or update a recipient (atomic single-row upsert).
    pub async fn upsert_recipient(&self, recipient: &Recipient) -> Result<()> {
        let conn = self.conn.clone();
        let r = recipient.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO recipients
                    (id, phone, schedule_id, frequency, start_date, last_sent, message_kind,
                     client_code, retry_attempts, next_retry_at, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    r.id,
                    r.phone,
                    r.schedule_id,
                    r.frequency.as_str(),
                    r.start_date.format("%Y-%m-%d").to_string(),
                    r.last_sent.map(|t| t.to_rfc3339()),
                    if r.message_kind.is_admin() { "admin" } else { "user" },
                    r.client_code,
                    r.retry_attempts,
                    r.next_retry_at.map(|t| t.to_rfc3339()),
                    r.active as i64,
                    r.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Flip a recipient's active flag. Re-activation clears retry state so
    /// the recipient starts from a clean slate. Returns false when no such
    /// recipient exists.
    pub async fn set_recipient_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = if active {
                conn.execute(
                    "UPDATE recipients
                     SET active = 1, retry_attempts = 0, next_retry_at = NULL
                     WHERE id = ?1",
                    rusqlite::params![id],
                )?
            } else {
                conn.execute(
                    "UPDATE recipients SET active = 0 WHERE id = ?1",
                    rusqlite::params![id],
                )?
            };
            Ok(count > 0)
        })
        .await?
    }

    // ─── Schedules ───────────────────────────────────

    /// Insert or update a schedule.
    pub async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let conn = self.conn.clone();
        let s = schedule.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO schedules
                    (id, name, sender_name, frequency, send_hour, user_template,
                     admin_template, event_id, client_code, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    s.id,
                    s.name,
                    s.sender_name,
                    s.frequency.as_str(),
                    s.send_hour,
                    s.user_template,
                    s.admin_template,
                    s.event_id,
                    s.client_code,
                    s.created_at.to_rfc3339(),
                    s.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Get a schedule by ID.
    pub async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLS} FROM schedules WHERE id = ?1"
            ))?;
            let result = stmt
                .query_row(rusqlite::params![id], schedule_from_row)
                .optional()?;
            Ok(result)
        })
        .await?
    }

    /// List all schedules.
    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLS} FROM schedules ORDER BY created_at"
            ))?;
            let rows = stmt
                .query_map([], schedule_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    // ─── Delivery Log ───────────────────────────────────

    /// Append one immutable delivery-attempt record.
    pub async fn append_delivery_log(&self, entry: &DeliveryLogEntry) -> Result<()> {
        let conn = self.conn.clone();
        let e = entry.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO delivery_log
                    (id, phone, content, status, provider_message_id, error,
                     frequency, client_code, is_admin, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    e.id,
                    e.phone,
                    e.content,
                    e.status.as_str(),
                    e.provider_message_id,
                    e.error,
                    e.frequency.as_str(),
                    e.client_code,
                    e.is_admin as i64,
                    e.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Most recent delivery-log entries, newest first.
    pub async fn recent_delivery_logs(&self, limit: u32) -> Result<Vec<DeliveryLogEntry>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, phone, content, status, provider_message_id, error,
                        frequency, client_code, is_admin, created_at
                 FROM delivery_log ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![limit], delivery_log_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }

    // ─── Cron Run Log ───────────────────────────────────

    /// Record the start of a sweep. Returns the run row's id.
    pub async fn start_run(&self, job_type: &str, now: DateTime<Utc>) -> Result<String> {
        let conn = self.conn.clone();
        let job_type = job_type.to_string();
        let id = uuid::Uuid::new_v4().to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO cron_run_log (id, job_type, status, processed, started_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                rusqlite::params![id, job_type, RunStatus::Started.as_str(), now.to_rfc3339()],
            )?;
            Ok(id)
        })
        .await?
    }

    /// Record the end of a sweep, whatever the outcome.
    pub async fn finish_run(
        &self,
        id: &str,
        status: RunStatus,
        processed: u32,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let detail = detail.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE cron_run_log
                 SET status = ?1, processed = ?2, detail = ?3, finished_at = ?4
                 WHERE id = ?5",
                rusqlite::params![status.as_str(), processed, detail, now.to_rfc3339(), id],
            )?;
            Ok(())
        })
        .await?
    }

    /// Get a run row by id.
    pub async fn get_run(&self, id: &str) -> Result<Option<CronRunLog>> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let result = conn
                .query_row(
                    "SELECT id, job_type, status, processed, detail, started_at, finished_at
                     FROM cron_run_log WHERE id = ?1",
                    rusqlite::params![id],
                    run_log_from_row,
                )
                .optional()?;
            Ok(result)
        })
        .await?
    }

    /// Most recent run rows, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<CronRunLog>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, job_type, status, processed, detail, started_at, finished_at
                 FROM cron_run_log ORDER BY started_at DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![limit], run_log_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?
    }
}

// ─── Row Mapping ───────────────────────────────────

const RECIPIENT_COLS: &str = "id, phone, schedule_id, frequency, start_date, last_sent, \
     message_kind, client_code, retry_attempts, next_retry_at, active, created_at";

const SCHEDULE_COLS: &str = "id, name, sender_name, frequency, send_hour, user_template, \
     admin_template, event_id, client_code, created_at, updated_at";

fn parse_text<T: std::str::FromStr>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn parse_date(idx: usize, value: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn recipient_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recipient> {
    Ok(Recipient {
        id: row.get(0)?,
        phone: row.get(1)?,
        schedule_id: row.get(2)?,
        frequency: parse_text::<Frequency>(3, row.get(3)?)?,
        start_date: parse_date(4, row.get(4)?)?,
        last_sent: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| s.parse().ok()),
        message_kind: if row.get::<_, String>(6)? == "admin" {
            MessageKind::Admin
        } else {
            MessageKind::User
        },
        client_code: row.get(7)?,
        retry_attempts: row.get(8)?,
        next_retry_at: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| s.parse().ok()),
        active: row.get::<_, i64>(10)? != 0,
        created_at: row
            .get::<_, String>(11)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn schedule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: row.get(0)?,
        name: row.get(1)?,
        sender_name: row.get(2)?,
        frequency: parse_text::<Frequency>(3, row.get(3)?)?,
        send_hour: row.get(4)?,
        user_template: row.get(5)?,
        admin_template: row.get(6)?,
        event_id: row.get(7)?,
        client_code: row.get(8)?,
        created_at: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
        updated_at: row
            .get::<_, String>(10)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn delivery_log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveryLogEntry> {
    Ok(DeliveryLogEntry {
        id: row.get(0)?,
        phone: row.get(1)?,
        content: row.get(2)?,
        status: parse_text::<DeliveryStatus>(3, row.get(3)?)?,
        provider_message_id: row.get(4)?,
        error: row.get(5)?,
        frequency: parse_text::<Frequency>(6, row.get(6)?)?,
        client_code: row.get(7)?,
        is_admin: row.get::<_, i64>(8)? != 0,
        created_at: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn run_log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronRunLog> {
    Ok(CronRunLog {
        id: row.get(0)?,
        job_type: row.get(1)?,
        status: parse_text::<RunStatus>(2, row.get(2)?)?,
        processed: row.get(3)?,
        detail: row.get(4)?,
        started_at: row
            .get::<_, String>(5)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
        finished_at: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_types::{MessageKind, Recipient};

    fn sample_recipient() -> Recipient {
        Recipient::new(
            "+233201234567",
            "sched-1",
            Frequency::Weekly,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            MessageKind::User,
            "acme",
        )
    }

    fn sample_schedule() -> Schedule {
        Schedule {
            id: "sched-1".into(),
            name: "Weekly rollup".into(),
            sender_name: "RollCall".into(),
            frequency: Frequency::Weekly,
            send_hour: Some(7),
            user_template: "Hi [FirstName], you had [ClockIns] clock-ins".into(),
            admin_template: "[Members] members, [ClockIns] clock-ins".into(),
            event_id: "evt-1".into(),
            client_code: "acme".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_recipient_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        let mut r = sample_recipient();
        r.last_sent = Some(Utc.with_ymd_and_hms(2024, 1, 8, 7, 0, 0).unwrap());
        r.retry_attempts = 2;
        r.next_retry_at = Some(Utc.with_ymd_and_hms(2024, 1, 9, 13, 0, 0).unwrap());
        storage.upsert_recipient(&r).await.unwrap();

        let loaded = storage.get_recipient(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.phone, r.phone);
        assert_eq!(loaded.frequency, Frequency::Weekly);
        assert_eq!(loaded.start_date, r.start_date);
        assert_eq!(loaded.last_sent, r.last_sent);
        assert_eq!(loaded.retry_attempts, 2);
        assert_eq!(loaded.next_retry_at, r.next_retry_at);
        assert!(loaded.active);
    }

    #[tokio::test]
    async fn test_inactive_recipients_not_listed_as_active() {
        let storage = Storage::open_in_memory().unwrap();
        let mut r = sample_recipient();
        r.active = false;
        storage.upsert_recipient(&r).await.unwrap();
        storage.upsert_recipient(&sample_recipient()).await.unwrap();

        assert_eq!(storage.list_active_recipients().await.unwrap().len(), 1);
        assert_eq!(storage.list_recipients().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reactivation_clears_retry_state() {
        let storage = Storage::open_in_memory().unwrap();
        let mut r = sample_recipient();
        r.active = false;
        r.retry_attempts = 3;
        r.next_retry_at = Some(Utc::now());
        storage.upsert_recipient(&r).await.unwrap();

        assert!(storage.set_recipient_active(&r.id, true).await.unwrap());
        let loaded = storage.get_recipient(&r.id).await.unwrap().unwrap();
        assert!(loaded.active);
        assert_eq!(loaded.retry_attempts, 0);
        assert!(loaded.next_retry_at.is_none());

        assert!(!storage.set_recipient_active("nope", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_schedule_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        let s = sample_schedule();
        storage.upsert_schedule(&s).await.unwrap();
        let loaded = storage.get_schedule("sched-1").await.unwrap().unwrap();
        assert_eq!(loaded.sender_name, "RollCall");
        assert_eq!(loaded.send_hour, Some(7));
        assert_eq!(loaded.user_template, s.user_template);
        assert!(storage.get_schedule("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delivery_log_ordering() {
        let storage = Storage::open_in_memory().unwrap();
        let r = sample_recipient();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 7, 0, 0).unwrap();
        storage
            .append_delivery_log(&DeliveryLogEntry::sent(&r, "first", "mid-1", t0))
            .await
            .unwrap();
        storage
            .append_delivery_log(&DeliveryLogEntry::failed(&r, "second", "gateway down", t1))
            .await
            .unwrap();

        let logs = storage.recent_delivery_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        // Newest first.
        assert_eq!(logs[0].content, "second");
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(logs[0].error.as_deref(), Some("gateway down"));
        assert_eq!(logs[1].provider_message_id.as_deref(), Some("mid-1"));
    }

    #[tokio::test]
    async fn test_run_log_lifecycle() {
        let storage = Storage::open_in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 7, 5, 0).unwrap();

        let run_id = storage.start_run("delivery-sweep", t0).await.unwrap();
        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Started);
        assert!(run.finished_at.is_none());

        storage
            .finish_run(&run_id, RunStatus::Completed, 5, None, t1)
            .await
            .unwrap();
        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.processed, 5);
        assert_eq!(run.finished_at, Some(t1));
    }
}
