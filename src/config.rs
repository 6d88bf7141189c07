//! config.rs — engine configuration, loaded once at startup.
//!
//! Path resolution: `$VIGIL_CONFIG_PATH`, then `config/engine.toml`.
//! Everything here is read-only at runtime; secrets (webhook URLs, SMTP
//! credentials) come from the environment, never from this file.

use anyhow::{anyhow, Context, Result};
use chrono::{FixedOffset, NaiveTime, Weekday};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "VIGIL_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub decision: DecisionSection,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
    /// Per-metric warning/critical bounds, keyed by metric name.
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdConfig>,
    #[serde(default)]
    pub analyzers: BTreeMap<String, AnalyzerConfig>,
    #[serde(default)]
    pub reports: ReportSection,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    /// Priority → channel names. Unrouted priorities fall back to all
    /// enabled channels.
    #[serde(default)]
    pub routes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub summarizer: SummarizerSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub tick_secs: u64,
    /// Fixed UTC offset for quiet hours and budget days, e.g. "+01:00".
    pub timezone: String,
    pub retention_days: u32,
    /// A tick slower than this is logged as a warning.
    pub slow_tick_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            timezone: "+00:00".to_string(),
            retention_days: 30,
            slow_tick_secs: 5,
        }
    }
}

impl EngineSection {
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.timezone)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: String,
    /// Report "last sent" bookkeeping, durable independently of the store.
    pub report_state_path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: "data/vigil.db".to_string(),
            report_state_path: "state/last_reports.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionSection {
    pub max_per_day: u32,
    /// Quiet window start/end ("HH:MM"), overnight wraparound supported.
    pub quiet_start: String,
    pub quiet_end: String,
    /// Dedup cooldown applied to threshold-style repeat conditions.
    pub cooldown_minutes: u32,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            max_per_day: 5,
            quiet_start: "22:00".to_string(),
            quiet_end: "07:00".to_string(),
            cooldown_minutes: 240,
        }
    }
}

impl DecisionSection {
    pub fn quiet_window(&self) -> Result<(NaiveTime, NaiveTime)> {
        Ok((parse_hhmm(&self.quiet_start)?, parse_hhmm(&self.quiet_end)?))
    }

    pub fn cooldown_hours(&self) -> f64 {
        f64::from(self.cooldown_minutes) / 60.0
    }
}

/// One external data source (collector + its fetch schedule).
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Collector kind registered at startup: health | calendar | weather | infra.
    pub kind: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub url: Option<String>,
    /// Snapshot age beyond this surfaces a "source stale" insight.
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: f64,
    /// infra only: name → health/status URL.
    #[serde(default)]
    pub servers: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_interval_minutes() -> u64 {
    30
}
fn default_freshness_hours() -> f64 {
    6.0
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    /// Source whose snapshots carry this metric.
    pub source: String,
    /// Slash path into the payload; a `*` segment expands over object keys
    /// (per-entity metrics), e.g. "servers/*/disk_used_pct".
    pub path: String,
    pub warning: f64,
    pub critical: f64,
    #[serde(default = "default_true")]
    pub higher_is_worse: bool,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub enabled: bool,
    /// Periodic class only.
    pub interval_hours: Option<f64>,
    /// Scheduled class only ("HH:MM").
    pub at: Option<String>,
    /// Lookback / projection knobs, analyzer-specific.
    pub lookback_days: Option<u32>,
    pub horizon_days: Option<f64>,
    pub min_samples: Option<u32>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: None,
            at: None,
            lookback_days: None,
            horizon_days: None,
            min_samples: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub morning: String,
    pub evening: String,
    pub weekly_day: String,
    pub weekly_time: String,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            morning: "07:30".to_string(),
            evening: "21:30".to_string(),
            weekly_day: "Sun".to_string(),
            weekly_time: "18:00".to_string(),
        }
    }
}

impl ReportSection {
    pub fn morning_at(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.morning)
    }
    pub fn evening_at(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.evening)
    }
    pub fn weekly_at(&self) -> Result<(Weekday, NaiveTime)> {
        let day: Weekday = self
            .weekly_day
            .parse()
            .map_err(|_| anyhow!("bad weekly_day: {}", self.weekly_day))?;
        Ok((day, parse_hhmm(&self.weekly_time)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummarizerSection {
    /// External summarization service; `None` disables it and digest text
    /// falls back to plain formatting.
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load using env override, then the default path.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(s).context("parsing engine config TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail fast on bad configuration instead of at call time.
    fn validate(&self) -> Result<()> {
        self.engine.utc_offset()?;
        self.decision.quiet_window()?;
        self.reports.morning_at()?;
        self.reports.evening_at()?;
        self.reports.weekly_at()?;
        for (name, t) in &self.thresholds {
            if t.higher_is_worse && t.critical < t.warning {
                return Err(anyhow!("threshold {name}: critical below warning"));
            }
            if !t.higher_is_worse && t.critical > t.warning {
                return Err(anyhow!("threshold {name}: critical above warning"));
            }
            if !self.sources.iter().any(|s| s.name == t.source) {
                return Err(anyhow!("threshold {name}: unknown source {}", t.source));
            }
        }
        for (prio, chans) in &self.routes {
            if crate::insight::Priority::from_str(prio).is_none() {
                return Err(anyhow!("routes: unknown priority {prio}"));
            }
            for c in chans {
                if !self.channels.contains_key(c) {
                    return Err(anyhow!("routes.{prio}: unknown channel {c}"));
                }
            }
        }
        for (name, a) in &self.analyzers {
            if let Some(at) = &a.at {
                parse_hhmm(at).with_context(|| format!("analyzers.{name}.at"))?;
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn analyzer(&self, name: &str) -> AnalyzerConfig {
        self.analyzers.get(name).cloned().unwrap_or_default()
    }

    pub fn enabled_channel_names(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("bad time-of-day: {s:?} (expected HH:MM)"))
}

/// Parse "+HH:MM" / "-HH:MM" into a fixed offset.
fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let t = s.trim();
    let (sign, rest) = match t.as_bytes().first() {
        Some(b'+') => (1i32, &t[1..]),
        Some(b'-') => (-1i32, &t[1..]),
        _ => return Err(anyhow!("bad timezone offset: {s:?} (expected +HH:MM)")),
    };
    let (h, m) = rest
        .split_once(':')
        .ok_or_else(|| anyhow!("bad timezone offset: {s:?}"))?;
    let hours: i32 = h.parse().with_context(|| format!("offset hours in {s:?}"))?;
    let mins: i32 = m.parse().with_context(|| format!("offset minutes in {s:?}"))?;
    let secs = sign * (hours * 3600 + mins * 60);
    FixedOffset::east_opt(secs).ok_or_else(|| anyhow!("offset out of range: {s:?}"))
}
