//! store.rs — durable SQLite log of snapshots, insights, deliveries and the
//! per-day reach-out budget.
//!
//! Single-writer by design: one connection behind a mutex. Timestamps are
//! unix seconds; nested payloads are JSON text columns. The budget bump is
//! the one operation wrapped in a transaction, so concurrent deliveries can
//! never push the counter past `max_per_day` through lost updates.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::insight::{Budget, Delivery, Insight, Priority, Snapshot};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    source      TEXT NOT NULL,
    captured_at INTEGER NOT NULL,
    payload     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_source_time
    ON snapshots(source, captured_at DESC);

CREATE TABLE IF NOT EXISTS insights (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    kind            TEXT NOT NULL,
    category        TEXT NOT NULL,
    priority        TEXT NOT NULL,
    title           TEXT NOT NULL,
    message         TEXT NOT NULL,
    confidence      REAL NOT NULL,
    data            TEXT NOT NULL DEFAULT 'null',
    source_analyzer TEXT NOT NULL,
    dedupe_key      TEXT,
    created_at      INTEGER NOT NULL,
    expires_at      INTEGER,
    delivered       INTEGER NOT NULL DEFAULT 0,
    delivered_at    INTEGER
);
CREATE INDEX IF NOT EXISTS idx_insights_dedupe
    ON insights(dedupe_key, delivered, delivered_at DESC);

CREATE TABLE IF NOT EXISTS deliveries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    insight_id   INTEGER NOT NULL,
    channel      TEXT NOT NULL,
    delivered_at INTEGER NOT NULL,
    success      INTEGER NOT NULL,
    error        TEXT
);
CREATE INDEX IF NOT EXISTS idx_deliveries_time
    ON deliveries(delivered_at DESC);

CREATE TABLE IF NOT EXISTS budgets (
    date        TEXT PRIMARY KEY,
    count       INTEGER NOT NULL DEFAULT 0,
    max_per_day INTEGER NOT NULL,
    consumed    TEXT NOT NULL DEFAULT '[]'
);
"#;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating store dir {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening store at {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("opening in-memory store")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("store pragmas")?;
        conn.execute_batch(SCHEMA).context("applying store schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    // --- snapshots ---

    pub fn save_snapshot(&self, snap: &Snapshot) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO snapshots (source, captured_at, payload) VALUES (?, ?, ?)",
            params![
                snap.source,
                snap.captured_at.timestamp(),
                serde_json::to_string(&snap.payload)?,
            ],
        )
        .context("insert snapshot")?;
        Ok(conn.last_insert_rowid())
    }

    /// Snapshots for `source` captured within the last `hours`, newest first,
    /// capped at `limit` rows so historical queries stay bounded.
    pub fn snapshots_since(&self, source: &str, hours: f64, limit: usize) -> Result<Vec<Snapshot>> {
        let cutoff = Utc::now().timestamp() - (hours * 3600.0) as i64;
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source, captured_at, payload FROM snapshots
             WHERE source = ? AND captured_at >= ?
             ORDER BY captured_at DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![source, cutoff, limit as i64], row_to_snapshot)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.context("read snapshot row")?);
        }
        Ok(out)
    }

    pub fn latest_snapshot(&self, source: &str) -> Result<Option<Snapshot>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, source, captured_at, payload FROM snapshots
             WHERE source = ? ORDER BY captured_at DESC LIMIT 1",
            params![source],
            row_to_snapshot,
        )
        .optional()
        .context("read latest snapshot")
    }

    /// Age-based retention. Returns the number of rows removed.
    pub fn cleanup_old_snapshots(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - i64::from(retention_days) * 86_400;
        let n = self
            .lock()
            .execute("DELETE FROM snapshots WHERE captured_at < ?", params![cutoff])
            .context("snapshot retention delete")?;
        Ok(n)
    }

    // --- insights ---

    pub fn save_insight(&self, insight: &Insight) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO insights (kind, category, priority, title, message, confidence,
                                   data, source_analyzer, dedupe_key, created_at, expires_at, delivered)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                insight.kind,
                insight.category,
                insight.priority.as_str(),
                insight.title,
                insight.message,
                f64::from(insight.confidence),
                serde_json::to_string(&insight.data)?,
                insight.source_analyzer,
                insight.dedupe_key,
                insight.created_at.timestamp(),
                insight.expires_at.map(|t| t.timestamp()),
                insight.delivered as i64,
            ],
        )
        .context("insert insight")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_insight(&self, id: i64) -> Result<Option<Insight>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {INSIGHT_COLS} FROM insights WHERE id = ?"),
            params![id],
            row_to_insight,
        )
        .optional()
        .context("read insight")
    }

    /// True if an insight sharing `dedupe_key` was *delivered* within the
    /// last `window_hours`. The window is anchored on the delivery instant,
    /// not creation: an insight queued overnight and sent this morning
    /// opens its cooldown at send time.
    pub fn check_duplicate(&self, dedupe_key: &str, window_hours: f64) -> Result<bool> {
        let cutoff = Utc::now().timestamp() - (window_hours * 3600.0) as i64;
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM insights
                 WHERE dedupe_key = ? AND delivered = 1 AND delivered_at >= ?
                 LIMIT 1",
                params![dedupe_key, cutoff],
                |row| row.get(0),
            )
            .optional()
            .context("dedupe lookup")?;
        Ok(found.is_some())
    }

    pub fn mark_delivered(&self, id: i64) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE insights SET delivered = 1, delivered_at = ? WHERE id = ?",
                params![Utc::now().timestamp(), id],
            )
            .context("mark delivered")?;
        Ok(())
    }

    /// Undelivered, unexpired insights since `hours` ago, newest first.
    /// Feeds the batch section of scheduled reports.
    pub fn undelivered_since(&self, hours: f64, limit: usize) -> Result<Vec<Insight>> {
        let now = Utc::now().timestamp();
        let cutoff = now - (hours * 3600.0) as i64;
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSIGHT_COLS} FROM insights
             WHERE delivered = 0 AND created_at >= ?
               AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY created_at DESC LIMIT ?"
        ))?;
        let rows = stmt.query_map(params![cutoff, now, limit as i64], row_to_insight)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.context("read insight row")?);
        }
        Ok(out)
    }

    // --- deliveries ---

    pub fn save_delivery(&self, d: &Delivery) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO deliveries (insight_id, channel, delivered_at, success, error)
             VALUES (?, ?, ?, ?, ?)",
            params![
                d.insight_id,
                d.channel,
                d.delivered_at.timestamp(),
                d.success as i64,
                d.error,
            ],
        )
        .context("insert delivery")?;
        Ok(conn.last_insert_rowid())
    }

    /// Audit query: all channel attempts recorded within the last `hours`.
    pub fn deliveries_since(&self, hours: f64) -> Result<Vec<Delivery>> {
        let cutoff = Utc::now().timestamp() - (hours * 3600.0) as i64;
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, insight_id, channel, delivered_at, success, error
             FROM deliveries WHERE delivered_at >= ? ORDER BY delivered_at DESC",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(Delivery {
                id: Some(row.get(0)?),
                insight_id: row.get(1)?,
                channel: row.get(2)?,
                delivered_at: ts_to_utc(row.get(3)?),
                success: row.get::<_, i64>(4)? != 0,
                error: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.context("read delivery row")?);
        }
        Ok(out)
    }

    // --- budget ---

    /// Budget row for `date`, created with a zero count if absent.
    pub fn today_budget(&self, date: NaiveDate, max_per_day: u32) -> Result<Budget> {
        let key = date.format("%Y-%m-%d").to_string();
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO budgets (date, count, max_per_day, consumed)
             VALUES (?, 0, ?, '[]')",
            params![key, max_per_day],
        )
        .context("ensure budget row")?;
        let (count, max, consumed_json): (u32, u32, String) = conn
            .query_row(
                "SELECT count, max_per_day, consumed FROM budgets WHERE date = ?",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("read budget")?;
        Ok(Budget {
            date,
            count,
            max_per_day: max,
            consumed_insight_ids: serde_json::from_str(&consumed_json).unwrap_or_default(),
        })
    }

    /// Atomic read-increment-write of the daily counter plus the consumed-id
    /// list, in one transaction. Creates the day's row when this delivery is
    /// the first of the day (urgent insights never read the budget first).
    pub fn increment_budget(&self, date: NaiveDate, insight_id: i64, max_per_day: u32) -> Result<()> {
        let key = date.format("%Y-%m-%d").to_string();
        let mut conn = self.lock();
        let tx = conn.transaction().context("budget transaction")?;
        tx.execute(
            "INSERT OR IGNORE INTO budgets (date, count, max_per_day, consumed)
             VALUES (?, 0, ?, '[]')",
            params![key, max_per_day],
        )
        .context("ensure budget row")?;
        let consumed_json: String = tx
            .query_row(
                "SELECT consumed FROM budgets WHERE date = ?",
                params![key],
                |row| row.get(0),
            )
            .context("read consumed ids")?;
        let mut ids: Vec<i64> = serde_json::from_str(&consumed_json).unwrap_or_default();
        ids.push(insight_id);
        tx.execute(
            "UPDATE budgets SET count = count + 1, consumed = ? WHERE date = ?",
            params![serde_json::to_string(&ids)?, key],
        )
        .context("bump budget")?;
        tx.commit().context("commit budget")?;
        Ok(())
    }
}

const INSIGHT_COLS: &str = "id, kind, category, priority, title, message, confidence, \
                            data, source_analyzer, dedupe_key, created_at, expires_at, delivered";

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    let payload: String = row.get(3)?;
    Ok(Snapshot {
        id: Some(row.get(0)?),
        source: row.get(1)?,
        captured_at: ts_to_utc(row.get(2)?),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<Insight> {
    let priority: String = row.get(3)?;
    let data: String = row.get(7)?;
    Ok(Insight {
        id: Some(row.get(0)?),
        kind: row.get(1)?,
        category: row.get(2)?,
        priority: Priority::from_str(&priority).unwrap_or(Priority::Low),
        title: row.get(4)?,
        message: row.get(5)?,
        confidence: row.get::<_, f64>(6)? as f32,
        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        source_analyzer: row.get(8)?,
        dedupe_key: row.get(9)?,
        created_at: ts_to_utc(row.get(10)?),
        expires_at: row.get::<_, Option<i64>>(11)?.map(ts_to_utc),
        delivered: row.get::<_, i64>(12)? != 0,
    })
}

fn ts_to_utc(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}
