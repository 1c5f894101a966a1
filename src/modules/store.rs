//! Persistence boundary for panels, service records and the job queue.
//!
//! The reconciliation engine only talks to [`Store`]; [`SqliteStore`] is the
//! bundled implementation.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{AppError, AppResult};
use crate::models::{
    DailyReport, ItemState, Job, JobItem, JobKind, JobProgress, JobState, LocationChange, Order,
    OrderKind, PanelConfig, PendingTransition, ServiceRecord, ServiceStatus,
};

/// Result of an enqueue; `created` is false when the external reference
/// already named a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub job_id: i64,
    pub targets: usize,
    pub created: bool,
}

pub trait Store: Send + Sync {
    // Panels
    fn upsert_panel(&self, panel: &PanelConfig) -> AppResult<()>;
    fn panel(&self, id: &str) -> AppResult<Option<PanelConfig>>;
    fn active_panels(&self) -> AppResult<Vec<PanelConfig>>;

    // Service records
    fn insert_service(&self, record: &ServiceRecord) -> AppResult<i64>;
    fn service(&self, id: i64) -> AppResult<Option<ServiceRecord>>;
    fn service_by_username(&self, panel_id: &str, username: &str) -> AppResult<Option<ServiceRecord>>;
    /// Newest live record for `username` on any panel
    fn find_service(&self, username: &str) -> AppResult<Option<ServiceRecord>>;
    fn set_pending(&self, id: i64, pending: Option<PendingTransition>) -> AppResult<()>;
    /// Random sample of records waiting for an enable/disable transition
    fn pending_sync_sample(&self, limit: u32) -> AppResult<Vec<ServiceRecord>>;
    /// Store the reconciled status and drop the pending flag
    fn complete_sync(&self, id: i64, status: ServiceStatus, now: i64) -> AppResult<()>;
    /// Count a failed sync attempt; returns the new total
    fn bump_sync_attempts(&self, id: i64) -> AppResult<u32>;
    /// Records still running or waiting (active, on_hold, disabled) not
    /// checked since `checked_before`
    fn sweep_candidates(&self, checked_before: i64, limit: u32) -> AppResult<Vec<ServiceRecord>>;
    fn mark_checked(&self, id: i64, now: i64) -> AppResult<()>;
    /// Set the lifecycle status; entering expired/limited stamps `ended_at`
    fn update_status(&self, id: i64, status: ServiceStatus, now: i64) -> AppResult<()>;
    fn mark_volume_sent(&self, id: i64) -> AppResult<()>;
    fn mark_time_sent(&self, id: i64) -> AppResult<()>;
    fn reset_warning_flags(&self, id: i64) -> AppResult<()>;
    /// Expired/limited records whose `ended_at` is at or before `cutoff`
    fn ended_before(&self, cutoff: i64) -> AppResult<Vec<ServiceRecord>>;
    fn delete_service(&self, id: i64) -> AppResult<()>;
    /// On-hold records created at or before `created_before` and not yet reminded
    fn on_hold_candidates(&self, created_before: i64) -> AppResult<Vec<ServiceRecord>>;
    fn mark_on_hold_reminded(&self, id: i64) -> AppResult<()>;
    /// Records still occupying a slot on `panel_id`
    fn count_live_services(&self, panel_id: &str) -> AppResult<u64>;

    // Location changes
    fn add_location_change(&self, change: &LocationChange) -> AppResult<()>;
    fn has_location_change(&self, username: &str) -> AppResult<bool>;

    // Users and admins
    fn upsert_user(&self, user_id: i64, language: &str, now: i64) -> AppResult<()>;
    fn user_language(&self, user_id: i64) -> AppResult<Option<String>>;
    fn add_admin(&self, chat_id: i64) -> AppResult<()>;
    fn admins(&self) -> AppResult<Vec<i64>>;

    // Orders and reporting
    fn insert_order(&self, order: &Order) -> AppResult<i64>;
    fn daily_report(&self, day: &str, start: i64, end: i64) -> AppResult<DailyReport>;
    fn meta(&self, key: &str) -> AppResult<Option<String>>;
    fn set_meta(&self, key: &str, value: &str) -> AppResult<()>;

    // Job queue
    /// Create a job with one pending item per target in a single transaction.
    /// An existing `external_ref` returns that job untouched.
    fn enqueue_job(
        &self,
        kind: JobKind,
        payload: &serde_json::Value,
        requester: i64,
        targets: &[String],
        external_ref: Option<&str>,
    ) -> AppResult<Enqueued>;
    fn job(&self, id: i64) -> AppResult<Option<Job>>;
    /// Oldest active job of `kind`
    fn active_job(&self, kind: JobKind) -> AppResult<Option<Job>>;
    fn pending_items(&self, job_id: i64, limit: u32) -> AppResult<Vec<JobItem>>;
    fn mark_item(&self, item_id: i64, state: ItemState, reason: Option<&str>) -> AppResult<()>;
    fn job_progress(&self, job_id: i64) -> AppResult<JobProgress>;
    fn complete_job(&self, job_id: i64) -> AppResult<()>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS panels (
    id TEXT PRIMARY KEY,
    config TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS services (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    panel_id TEXT NOT NULL,
    username TEXT NOT NULL,
    status TEXT NOT NULL,
    pending TEXT,
    sync_attempts INTEGER NOT NULL DEFAULT 0,
    volume_sent INTEGER NOT NULL DEFAULT 0,
    time_sent INTEGER NOT NULL DEFAULT 0,
    on_hold_reminded INTEGER NOT NULL DEFAULT 0,
    last_checked INTEGER NOT NULL DEFAULT 0,
    ended_at INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    UNIQUE (panel_id, username)
);
CREATE INDEX IF NOT EXISTS idx_services_pending ON services (pending);
CREATE INDEX IF NOT EXISTS idx_services_status ON services (status, last_checked);
CREATE TABLE IF NOT EXISTS location_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    from_panel TEXT NOT NULL,
    to_panel TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_location_changes_username ON location_changes (username);
CREATE TABLE IF NOT EXISTS admins (
    chat_id INTEGER PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    language TEXT NOT NULL DEFAULT 'en',
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    panel_id TEXT NOT NULL,
    username TEXT NOT NULL,
    kind TEXT NOT NULL,
    price INTEGER NOT NULL,
    volume_gb REAL NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_created ON orders (created_at);
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    requester INTEGER NOT NULL,
    external_ref TEXT UNIQUE,
    state TEXT NOT NULL DEFAULT 'active',
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS job_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    target TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_job_items_job ON job_items (job_id, state);
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const SERVICE_COLUMNS: &str = "id, user_id, panel_id, username, status, pending, sync_attempts, \
     volume_sent, time_sent, on_hold_reminded, last_checked, ended_at, created_at";

const JOB_COLUMNS: &str = "id, kind, payload, requester, external_ref, state, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> AppResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Store("connection lock poisoned".to_string()))
    }

    fn services_where(&self, clause: &str, args: &[&dyn rusqlite::ToSql]) -> AppResult<Vec<ServiceRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM services WHERE {}", SERVICE_COLUMNS, clause);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, service_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn execute(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> AppResult<usize> {
        Ok(self.conn()?.execute(sql, args)?)
    }
}

fn service_from_row(row: &Row<'_>) -> rusqlite::Result<ServiceRecord> {
    let status: String = row.get(4)?;
    let pending: Option<String> = row.get(5)?;
    Ok(ServiceRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        panel_id: row.get(2)?,
        username: row.get(3)?,
        status: ServiceStatus::parse(&status).unwrap_or(ServiceStatus::Active),
        pending: pending.as_deref().and_then(PendingTransition::parse),
        sync_attempts: row.get(6)?,
        volume_sent: row.get(7)?,
        time_sent: row.get(8)?,
        on_hold_reminded: row.get(9)?,
        last_checked: row.get(10)?,
        ended_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let kind: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let state: String = row.get(5)?;
    Ok(Job {
        id: row.get(0)?,
        kind: JobKind::parse(&kind).unwrap_or(JobKind::Notify),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        requester: row.get(3)?,
        external_ref: row.get(4)?,
        state: if state == "done" {
            JobState::Done
        } else {
            JobState::Active
        },
        created_at: row.get(6)?,
    })
}

impl Store for SqliteStore {
    fn upsert_panel(&self, panel: &PanelConfig) -> AppResult<()> {
        let config = serde_json::to_string(panel)?;
        self.execute(
            "INSERT INTO panels (id, config, active) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET config = excluded.config, active = excluded.active",
            &[&panel.id, &config, &panel.active],
        )?;
        Ok(())
    }

    fn panel(&self, id: &str) -> AppResult<Option<PanelConfig>> {
        let conn = self.conn()?;
        let config: Option<String> = conn
            .query_row("SELECT config FROM panels WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(match config {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        })
    }

    fn active_panels(&self) -> AppResult<Vec<PanelConfig>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, config FROM panels WHERE active = 1 ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut panels = Vec::new();
        for row in rows {
            let (id, text) = row?;
            match serde_json::from_str::<PanelConfig>(&text) {
                Ok(panel) => panels.push(panel),
                Err(e) => tracing::warn!(panel = %id, error = %e, "Skipping unreadable panel config"),
            }
        }
        Ok(panels)
    }

    fn insert_service(&self, record: &ServiceRecord) -> AppResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO services (user_id, panel_id, username, status, pending, sync_attempts, \
             volume_sent, time_sent, on_hold_reminded, last_checked, ended_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.user_id,
                record.panel_id,
                record.username,
                record.status.as_str(),
                record.pending.map(|p| p.as_str()),
                record.sync_attempts,
                record.volume_sent,
                record.time_sent,
                record.on_hold_reminded,
                record.last_checked,
                record.ended_at,
                record.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn service(&self, id: i64) -> AppResult<Option<ServiceRecord>> {
        Ok(self.services_where("id = ?1", &[&id])?.into_iter().next())
    }

    fn service_by_username(&self, panel_id: &str, username: &str) -> AppResult<Option<ServiceRecord>> {
        Ok(self
            .services_where("panel_id = ?1 AND username = ?2", &[&panel_id, &username])?
            .into_iter()
            .next())
    }

    fn find_service(&self, username: &str) -> AppResult<Option<ServiceRecord>> {
        Ok(self
            .services_where(
                "username = ?1 AND status != 'removed' ORDER BY created_at DESC LIMIT 1",
                &[&username],
            )?
            .into_iter()
            .next())
    }

    fn set_pending(&self, id: i64, pending: Option<PendingTransition>) -> AppResult<()> {
        let pending = pending.map(|p| p.as_str());
        self.execute(
            "UPDATE services SET pending = ?1, sync_attempts = 0 WHERE id = ?2",
            &[&pending, &id],
        )?;
        Ok(())
    }

    fn pending_sync_sample(&self, limit: u32) -> AppResult<Vec<ServiceRecord>> {
        self.services_where(
            "pending IS NOT NULL AND status != 'removed' ORDER BY RANDOM() LIMIT ?1",
            &[&limit],
        )
    }

    fn complete_sync(&self, id: i64, status: ServiceStatus, now: i64) -> AppResult<()> {
        self.update_status(id, status, now)?;
        self.execute(
            "UPDATE services SET pending = NULL, sync_attempts = 0, last_checked = ?1 WHERE id = ?2",
            &[&now, &id],
        )?;
        Ok(())
    }

    fn bump_sync_attempts(&self, id: i64) -> AppResult<u32> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE services SET sync_attempts = sync_attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        let attempts: u32 = conn.query_row(
            "SELECT sync_attempts FROM services WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    fn sweep_candidates(&self, checked_before: i64, limit: u32) -> AppResult<Vec<ServiceRecord>> {
        self.services_where(
            "status IN ('active', 'on_hold', 'disabled') AND last_checked < ?1 \
             ORDER BY last_checked ASC, id ASC LIMIT ?2",
            &[&checked_before, &limit],
        )
    }

    fn mark_checked(&self, id: i64, now: i64) -> AppResult<()> {
        self.execute(
            "UPDATE services SET last_checked = ?1 WHERE id = ?2",
            &[&now, &id],
        )?;
        Ok(())
    }

    fn update_status(&self, id: i64, status: ServiceStatus, now: i64) -> AppResult<()> {
        if status.is_ended() {
            // Keep the first end timestamp so the grace period is not restarted
            self.execute(
                "UPDATE services SET status = ?1, \
                 ended_at = CASE WHEN ended_at > 0 THEN ended_at ELSE ?2 END WHERE id = ?3",
                &[&status.as_str(), &now, &id],
            )?;
        } else {
            self.execute(
                "UPDATE services SET status = ?1, ended_at = 0 WHERE id = ?2",
                &[&status.as_str(), &id],
            )?;
        }
        Ok(())
    }

    fn mark_volume_sent(&self, id: i64) -> AppResult<()> {
        self.execute("UPDATE services SET volume_sent = 1 WHERE id = ?1", &[&id])?;
        Ok(())
    }

    fn mark_time_sent(&self, id: i64) -> AppResult<()> {
        self.execute("UPDATE services SET time_sent = 1 WHERE id = ?1", &[&id])?;
        Ok(())
    }

    fn reset_warning_flags(&self, id: i64) -> AppResult<()> {
        self.execute(
            "UPDATE services SET volume_sent = 0, time_sent = 0 WHERE id = ?1",
            &[&id],
        )?;
        Ok(())
    }

    fn ended_before(&self, cutoff: i64) -> AppResult<Vec<ServiceRecord>> {
        self.services_where(
            "status IN ('expired', 'limited') AND ended_at > 0 AND ended_at <= ?1 ORDER BY ended_at",
            &[&cutoff],
        )
    }

    fn delete_service(&self, id: i64) -> AppResult<()> {
        self.execute("DELETE FROM services WHERE id = ?1", &[&id])?;
        Ok(())
    }

    fn on_hold_candidates(&self, created_before: i64) -> AppResult<Vec<ServiceRecord>> {
        self.services_where(
            "status = 'on_hold' AND on_hold_reminded = 0 AND created_at <= ?1 ORDER BY created_at",
            &[&created_before],
        )
    }

    fn mark_on_hold_reminded(&self, id: i64) -> AppResult<()> {
        self.execute("UPDATE services SET on_hold_reminded = 1 WHERE id = ?1", &[&id])?;
        Ok(())
    }

    fn count_live_services(&self, panel_id: &str) -> AppResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM services WHERE panel_id = ?1 AND status != 'removed'",
            params![panel_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn add_location_change(&self, change: &LocationChange) -> AppResult<()> {
        self.execute(
            "INSERT INTO location_changes (username, from_panel, to_panel, created_at) VALUES (?1, ?2, ?3, ?4)",
            &[&change.username, &change.from_panel, &change.to_panel, &change.created_at],
        )?;
        Ok(())
    }

    fn has_location_change(&self, username: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM location_changes WHERE username = ?1 LIMIT 1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn upsert_user(&self, user_id: i64, language: &str, now: i64) -> AppResult<()> {
        self.execute(
            "INSERT INTO users (user_id, language, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(user_id) DO UPDATE SET language = excluded.language",
            &[&user_id, &language, &now],
        )?;
        Ok(())
    }

    fn user_language(&self, user_id: i64) -> AppResult<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT language FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn add_admin(&self, chat_id: i64) -> AppResult<()> {
        self.execute("INSERT OR IGNORE INTO admins (chat_id) VALUES (?1)", &[&chat_id])?;
        Ok(())
    }

    fn admins(&self) -> AppResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT chat_id FROM admins ORDER BY chat_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<i64>, _>>()?)
    }

    fn insert_order(&self, order: &Order) -> AppResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO orders (user_id, panel_id, username, kind, price, volume_gb, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                order.user_id,
                order.panel_id,
                order.username,
                order.kind.as_str(),
                order.price,
                order.volume_gb,
                order.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn daily_report(&self, day: &str, start: i64, end: i64) -> AppResult<DailyReport> {
        let conn = self.conn()?;
        let mut report = DailyReport {
            day: day.to_string(),
            ..Default::default()
        };

        let mut stmt = conn.prepare(
            "SELECT panel_id, kind, COUNT(*), COALESCE(SUM(price), 0), COALESCE(SUM(volume_gb), 0) \
             FROM orders WHERE created_at >= ?1 AND created_at < ?2 GROUP BY panel_id, kind",
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?;

        for row in rows {
            let (panel_id, kind, count, revenue, volume) = row?;
            let count = count.max(0) as u64;
            let entry = report.per_panel.entry(panel_id).or_default();
            if kind == OrderKind::Extend.as_str() {
                entry.extensions += count;
                report.extensions += count;
            } else {
                entry.sales += count;
                report.sales += count;
            }
            entry.revenue += revenue;
            entry.volume_gb += volume;
            report.revenue += revenue;
            report.volume_gb += volume;
        }

        let new_users: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE created_at >= ?1 AND created_at < ?2",
            params![start, end],
            |row| row.get(0),
        )?;
        report.new_users = new_users.max(0) as u64;
        Ok(report)
    }

    fn meta(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: &str) -> AppResult<()> {
        self.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            &[&key, &value],
        )?;
        Ok(())
    }

    fn enqueue_job(
        &self,
        kind: JobKind,
        payload: &serde_json::Value,
        requester: i64,
        targets: &[String],
        external_ref: Option<&str>,
    ) -> AppResult<Enqueued> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(reference) = external_ref {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM jobs WHERE external_ref = ?1",
                    params![reference],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(job_id) = existing {
                let count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM job_items WHERE job_id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )?;
                return Ok(Enqueued {
                    job_id,
                    targets: count.max(0) as usize,
                    created: false,
                });
            }
        }

        tx.execute(
            "INSERT INTO jobs (kind, payload, requester, external_ref, state, created_at) \
             VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
            params![
                kind.as_str(),
                serde_json::to_string(payload)?,
                requester,
                external_ref,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        let job_id = tx.last_insert_rowid();
        {
            let mut stmt =
                tx.prepare("INSERT INTO job_items (job_id, target, state) VALUES (?1, ?2, 'pending')")?;
            for target in targets {
                stmt.execute(params![job_id, target])?;
            }
        }
        tx.commit()?;

        tracing::info!(job_id, kind = kind.as_str(), targets = targets.len(), "Job enqueued");
        Ok(Enqueued {
            job_id,
            targets: targets.len(),
            created: true,
        })
    }

    fn job(&self, id: i64) -> AppResult<Option<Job>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        Ok(conn.query_row(&sql, params![id], job_from_row).optional()?)
    }

    fn active_job(&self, kind: JobKind) -> AppResult<Option<Job>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE kind = ?1 AND state = 'active' ORDER BY id ASC LIMIT 1",
            JOB_COLUMNS
        );
        Ok(conn.query_row(&sql, params![kind.as_str()], job_from_row).optional()?)
    }

    fn pending_items(&self, job_id: i64, limit: u32) -> AppResult<Vec<JobItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, target, state, reason FROM job_items \
             WHERE job_id = ?1 AND state = 'pending' ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![job_id, limit], |row| {
            let state: String = row.get(3)?;
            Ok(JobItem {
                id: row.get(0)?,
                job_id: row.get(1)?,
                target: row.get(2)?,
                state: ItemState::parse(&state).unwrap_or(ItemState::Pending),
                reason: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn mark_item(&self, item_id: i64, state: ItemState, reason: Option<&str>) -> AppResult<()> {
        self.execute(
            "UPDATE job_items SET state = ?1, reason = ?2 WHERE id = ?3",
            &[&state.as_str(), &reason, &item_id],
        )?;
        Ok(())
    }

    fn job_progress(&self, job_id: i64) -> AppResult<JobProgress> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM job_items WHERE job_id = ?1 GROUP BY state")?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut progress = JobProgress::default();
        for row in rows {
            let (state, count) = row?;
            let count = count.max(0) as u64;
            match ItemState::parse(&state) {
                Some(ItemState::Pending) => progress.pending += count,
                Some(ItemState::Done) => progress.done += count,
                Some(ItemState::Failed) => progress.failed += count,
                None => {}
            }
        }
        Ok(progress)
    }

    fn complete_job(&self, job_id: i64) -> AppResult<()> {
        self.execute("UPDATE jobs SET state = 'done' WHERE id = ?1", &[&job_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PanelCredentials, VendorKind};
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn service(store: &SqliteStore, username: &str, status: ServiceStatus) -> i64 {
        let mut record = ServiceRecord::new(7, "p1", username);
        record.status = status;
        store.insert_service(&record).unwrap()
    }

    #[test]
    fn test_panel_round_trip_and_active_filter() {
        let store = store();
        let mut panel = PanelConfig::new(
            "p1",
            VendorKind::Marzban,
            "https://panel.example.com",
            PanelCredentials::Password {
                username: "admin".into(),
                password: "secret".into(),
            },
        );
        panel.capacity = Some(100);
        store.upsert_panel(&panel).unwrap();

        let mut off = panel.clone();
        off.id = "p2".into();
        off.active = false;
        store.upsert_panel(&off).unwrap();

        assert_eq!(store.panel("p1").unwrap().unwrap().capacity, Some(100));
        let active = store.active_panels().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "p1");
    }

    #[test]
    fn test_ended_at_is_stamped_once() {
        let store = store();
        let id = service(&store, "alice", ServiceStatus::Active);

        store.update_status(id, ServiceStatus::Expired, 100).unwrap();
        store.update_status(id, ServiceStatus::Limited, 200).unwrap();
        assert_eq!(store.service(id).unwrap().unwrap().ended_at, 100);
        assert_eq!(store.ended_before(150).unwrap().len(), 1);
        assert!(store.ended_before(50).unwrap().is_empty());

        store.update_status(id, ServiceStatus::Active, 300).unwrap();
        assert_eq!(store.service(id).unwrap().unwrap().ended_at, 0);
    }

    #[test]
    fn test_pending_sync_and_attempts() {
        let store = store();
        let id = service(&store, "bob", ServiceStatus::Active);
        service(&store, "carol", ServiceStatus::Active);
        store.set_pending(id, Some(PendingTransition::Disable)).unwrap();

        let sample = store.pending_sync_sample(10).unwrap();
        assert_eq!(sample.len(), 1);
        assert_eq!(sample[0].pending, Some(PendingTransition::Disable));

        assert_eq!(store.bump_sync_attempts(id).unwrap(), 1);
        assert_eq!(store.bump_sync_attempts(id).unwrap(), 2);

        store.complete_sync(id, ServiceStatus::Disabled, 50).unwrap();
        let record = store.service(id).unwrap().unwrap();
        assert_eq!(record.pending, None);
        assert_eq!(record.sync_attempts, 0);
        assert_eq!(record.status, ServiceStatus::Disabled);
        assert!(store.pending_sync_sample(10).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_candidates_respect_cooldown() {
        let store = store();
        let fresh = service(&store, "d", ServiceStatus::Active);
        service(&store, "e", ServiceStatus::Active);
        service(&store, "f", ServiceStatus::Disabled);
        service(&store, "g", ServiceStatus::OnHold);
        service(&store, "h", ServiceStatus::Expired);
        store.mark_checked(fresh, 1_000).unwrap();

        let due: Vec<String> = store
            .sweep_candidates(500, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(due, vec!["e", "f", "g"]);
    }

    #[test]
    fn test_enqueue_is_atomic_and_deduplicated() {
        let store = store();
        let targets = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let first = store
            .enqueue_job(JobKind::Notify, &json!({"text": "hi"}), 9, &targets, Some("legacy:a:ff"))
            .unwrap();
        assert!(first.created);
        assert_eq!(first.targets, 3);

        let again = store
            .enqueue_job(JobKind::Notify, &json!({"text": "hi"}), 9, &targets, Some("legacy:a:ff"))
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.job_id, first.job_id);
        assert_eq!(again.targets, 3);

        let job = store.active_job(JobKind::Notify).unwrap().unwrap();
        assert_eq!(job.id, first.job_id);
        assert!(store.active_job(JobKind::Gift).unwrap().is_none());

        let items = store.pending_items(job.id, 2).unwrap();
        assert_eq!(items.len(), 2);
        store.mark_item(items[0].id, ItemState::Done, None).unwrap();
        store
            .mark_item(items[1].id, ItemState::Failed, Some("blocked"))
            .unwrap();
        let progress = store.job_progress(job.id).unwrap();
        assert_eq!((progress.pending, progress.done, progress.failed), (1, 1, 1));

        store.complete_job(job.id).unwrap();
        assert!(store.active_job(JobKind::Notify).unwrap().is_none());
    }

    #[test]
    fn test_daily_report_groups_by_panel() {
        let store = store();
        let order = |panel: &str, kind, price, at| Order {
            user_id: 1,
            panel_id: panel.to_string(),
            username: "u".into(),
            kind,
            price,
            volume_gb: 10.0,
            created_at: at,
        };
        store.insert_order(&order("p1", OrderKind::New, 100, 10)).unwrap();
        store.insert_order(&order("p1", OrderKind::Extend, 50, 20)).unwrap();
        store.insert_order(&order("p2", OrderKind::New, 70, 30)).unwrap();
        store.insert_order(&order("p2", OrderKind::New, 70, 5_000)).unwrap();
        store.upsert_user(1, "en", 15).unwrap();

        let report = store.daily_report("1970-01-01", 0, 1_000).unwrap();
        assert_eq!(report.sales, 2);
        assert_eq!(report.extensions, 1);
        assert_eq!(report.revenue, 220);
        assert_eq!(report.new_users, 1);
        assert_eq!(report.per_panel["p1"].extensions, 1);
        assert_eq!(report.per_panel["p2"].revenue, 70);
    }
}
