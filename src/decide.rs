//! decide.rs — the reach-out decision engine.
//!
//! Classifies each candidate insight into a disposition using priority,
//! dedup history, quiet hours and the remaining daily budget. The outcome
//! is a pure function of those inputs: identical state always yields the
//! same disposition, which is what the policy tests pin down.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use std::sync::Mutex;

use crate::config::Config;
use crate::insight::{Insight, Priority};
use crate::store::Store;

/// Classification of one candidate insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send through channels immediately; consumes budget.
    DeliverNow,
    /// Fold into the next scheduled report.
    BatchReport,
    /// Hold until quiet hours end or the day rolls over, then re-evaluate.
    QueueLater,
    /// Drop: expired or duplicate of a recently delivered condition.
    Skip,
}

pub struct DecisionEngine {
    quiet_start: NaiveTime,
    quiet_end: NaiveTime,
    max_per_day: u32,
    cooldown_hours: f64,
    tz: FixedOffset,
    /// Insights awaiting a constraint to clear, re-checked each tick.
    queued: Mutex<Vec<Insight>>,
}

impl DecisionEngine {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let (quiet_start, quiet_end) = cfg.decision.quiet_window()?;
        Ok(Self::new(
            quiet_start,
            quiet_end,
            cfg.decision.max_per_day,
            cfg.decision.cooldown_hours(),
            cfg.engine.utc_offset()?,
        ))
    }

    pub fn new(
        quiet_start: NaiveTime,
        quiet_end: NaiveTime,
        max_per_day: u32,
        cooldown_hours: f64,
        tz: FixedOffset,
    ) -> Self {
        Self {
            quiet_start,
            quiet_end,
            max_per_day,
            cooldown_hours,
            tz,
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    /// Engine-local calendar date for budget accounting.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Quiet-hours predicate; `[start, end)`, overnight wraparound when
    /// `start > end` (quiet iff `now >= start || now < end`).
    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        let t = now.with_timezone(&self.tz).time();
        quiet_at(t, self.quiet_start, self.quiet_end)
    }

    /// Classify one insight. Store reads (dedup history, budget row) are the
    /// only inputs besides the insight and the clock.
    pub fn classify(&self, store: &Store, insight: &Insight, now: DateTime<Utc>) -> Disposition {
        if insight.is_expired(now) {
            return Disposition::Skip;
        }
        if let Some(key) = &insight.dedupe_key {
            if crate::analyze::was_delivered_recently(store, key, self.cooldown_hours) {
                return Disposition::Skip;
            }
        }

        if insight.priority == Priority::Urgent {
            // Bypasses quiet hours and budget.
            return Disposition::DeliverNow;
        }

        let quiet = self.is_quiet(now);
        let budget_left = match store.today_budget(self.local_date(now), self.max_per_day) {
            Ok(b) => !b.exhausted(),
            Err(e) => {
                // Treat a broken budget read as exhausted: worst case we
                // batch a notification, never over-send.
                tracing::warn!(error = ?e, "budget read failed");
                false
            }
        };

        match insight.priority {
            Priority::High => {
                if !quiet && budget_left {
                    Disposition::DeliverNow
                } else if quiet {
                    Disposition::QueueLater
                } else {
                    Disposition::BatchReport
                }
            }
            Priority::Medium => {
                if !quiet && budget_left {
                    Disposition::DeliverNow
                } else {
                    Disposition::BatchReport
                }
            }
            // Low; Urgent already returned above.
            _ => Disposition::BatchReport,
        }
    }

    /// Park an insight whose constraints have not cleared yet.
    pub fn queue_later(&self, insight: Insight) {
        self.queued.lock().expect("queue mutex poisoned").push(insight);
    }

    pub fn queued_len(&self) -> usize {
        self.queued.lock().expect("queue mutex poisoned").len()
    }

    /// Re-evaluate queued insights. Ones that now classify as `DeliverNow`
    /// are returned; expired/duplicate ones are dropped; the rest stay
    /// queued for a later tick.
    ///
    /// Classification reads the budget as it stood before any of these
    /// deliveries happen, so a batch release caps itself at the remaining
    /// budget: releasing everything that individually classifies as
    /// `DeliverNow` would overshoot `max_per_day`. Urgent insights are
    /// exempt, as in `classify`.
    pub fn pending_for_delivery(&self, store: &Store, now: DateTime<Utc>) -> Vec<Insight> {
        let mut remaining = match store.today_budget(self.local_date(now), self.max_per_day) {
            Ok(b) => b.remaining() as usize,
            Err(e) => {
                tracing::warn!(error = ?e, "budget read failed");
                0
            }
        };
        let mut queued = self.queued.lock().expect("queue mutex poisoned");
        let mut deliver = Vec::new();
        let mut keep = Vec::new();
        for insight in queued.drain(..) {
            match self.classify(store, &insight, now) {
                Disposition::DeliverNow if insight.priority == Priority::Urgent => {
                    deliver.push(insight)
                }
                Disposition::DeliverNow => {
                    if remaining > 0 {
                        remaining -= 1;
                        deliver.push(insight);
                    } else {
                        keep.push(insight);
                    }
                }
                Disposition::Skip => {
                    tracing::debug!(title = %insight.title, "queued insight dropped");
                }
                // Still blocked (or demoted to batch during a full budget
                // day): hold on to it, the day roll may free it up.
                Disposition::QueueLater | Disposition::BatchReport => keep.push(insight),
            }
        }
        *queued = keep;
        deliver
    }
}

/// Pure quiet-hours predicate over times of day.
pub fn quiet_at(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn quiet_normal_window_boundaries() {
        let (s, e) = (t(13, 0), t(15, 0));
        assert!(!quiet_at(t(12, 59), s, e));
        assert!(quiet_at(t(13, 0), s, e)); // start inclusive
        assert!(quiet_at(t(14, 59), s, e));
        assert!(!quiet_at(t(15, 0), s, e)); // end exclusive
    }

    #[test]
    fn quiet_overnight_wraparound_boundaries() {
        let (s, e) = (t(22, 0), t(7, 0));
        assert!(quiet_at(t(22, 0), s, e));
        assert!(quiet_at(t(23, 30), s, e));
        assert!(quiet_at(t(0, 0), s, e));
        assert!(quiet_at(t(6, 59), s, e));
        assert!(!quiet_at(t(7, 0), s, e));
        assert!(!quiet_at(t(14, 0), s, e));
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(
            t(22, 0),
            t(7, 0),
            2,
            4.0,
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, h, 0, 0).unwrap()
    }

    fn insight(p: Priority) -> Insight {
        Insight::new("threshold", "infra", p, "t", "m")
    }

    #[test]
    fn urgent_bypasses_quiet_and_budget() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        let date = e.local_date(at(23));
        for id in 0..3 {
            store.increment_budget(date, id, 2).unwrap();
        }
        // 23:00 is quiet and budget (max 2) is blown; urgent still delivers.
        assert_eq!(
            e.classify(&store, &insight(Priority::Urgent), at(23)),
            Disposition::DeliverNow
        );
    }

    #[test]
    fn high_queues_in_quiet_hours_and_batches_on_empty_budget() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        assert_eq!(
            e.classify(&store, &insight(Priority::High), at(23)),
            Disposition::QueueLater
        );
        let date = e.local_date(at(14));
        store.increment_budget(date, 1, 2).unwrap();
        store.increment_budget(date, 2, 2).unwrap();
        assert_eq!(
            e.classify(&store, &insight(Priority::High), at(14)),
            Disposition::BatchReport
        );
    }

    #[test]
    fn medium_batches_in_quiet_hours() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        assert_eq!(
            e.classify(&store, &insight(Priority::Medium), at(23)),
            Disposition::BatchReport
        );
        assert_eq!(
            e.classify(&store, &insight(Priority::Medium), at(14)),
            Disposition::DeliverNow
        );
    }

    #[test]
    fn low_always_batches() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        assert_eq!(
            e.classify(&store, &insight(Priority::Low), at(14)),
            Disposition::BatchReport
        );
    }

    #[test]
    fn expired_and_duplicate_skip() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();

        let expired = insight(Priority::High).expires_in_hours(-1);
        assert_eq!(e.classify(&store, &expired, Utc::now()), Disposition::Skip);

        let dup = insight(Priority::High).with_dedupe_key("k");
        let id = store.save_insight(&dup).unwrap();
        store.mark_delivered(id).unwrap();
        assert_eq!(e.classify(&store, &dup, at(14)), Disposition::Skip);
    }

    #[test]
    fn classification_is_deterministic() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        let i = insight(Priority::High);
        let first = e.classify(&store, &i, at(14));
        for _ in 0..5 {
            assert_eq!(e.classify(&store, &i, at(14)), first);
        }
    }

    #[test]
    fn queue_releases_after_quiet_hours() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        e.queue_later(insight(Priority::High));
        // Still quiet: nothing released.
        assert!(e.pending_for_delivery(&store, at(23)).is_empty());
        assert_eq!(e.queued_len(), 1);
        // Morning: released.
        let released = e.pending_for_delivery(&store, at(9));
        assert_eq!(released.len(), 1);
        assert_eq!(e.queued_len(), 0);
    }

    #[test]
    fn queue_release_stops_at_remaining_budget() {
        let store = Store::open_in_memory().unwrap();
        let e = engine(); // max_per_day = 2
        for _ in 0..3 {
            e.queue_later(insight(Priority::High));
        }
        // All three individually classify as DeliverNow at 09:00, but the
        // batch must not overshoot the daily cap.
        let released = e.pending_for_delivery(&store, at(9));
        assert_eq!(released.len(), 2);
        assert_eq!(e.queued_len(), 1);

        // With the budget actually consumed, the straggler stays queued.
        let date = e.local_date(at(9));
        store.increment_budget(date, 1, 2).unwrap();
        store.increment_budget(date, 2, 2).unwrap();
        assert!(e.pending_for_delivery(&store, at(9)).is_empty());
        assert_eq!(e.queued_len(), 1);
    }

    #[test]
    fn urgent_release_ignores_budget_cap() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        let date = e.local_date(at(9));
        store.increment_budget(date, 1, 2).unwrap();
        store.increment_budget(date, 2, 2).unwrap();
        e.queue_later(insight(Priority::Urgent));
        let released = e.pending_for_delivery(&store, at(9));
        assert_eq!(released.len(), 1);
    }

    #[test]
    fn queue_drops_expired_entries() {
        let store = Store::open_in_memory().unwrap();
        let e = engine();
        e.queue_later(insight(Priority::High).expires_in_hours(-1));
        assert!(e.pending_for_delivery(&store, Utc::now()).is_empty());
        assert_eq!(e.queued_len(), 0);
    }
}
