//! Config-driven threshold analyzer (real-time class). The most reused
//! rule shape in the engine: compare a metric against warning/critical
//! bounds and emit at most one insight per condition per cooldown window.

use anyhow::Result;
use serde_json::{json, Value};

use super::{was_delivered_recently, Analyzer, AnalyzerContext, Schedule};
use crate::config::{Config, ThresholdConfig};
use crate::insight::{Insight, Priority};

/// Severity of a crossed bound. Ties resolve toward the more severe bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Elevated,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Elevated => "elevated",
        }
    }

    fn priority(&self) -> Priority {
        match self {
            Severity::Critical => Priority::High,
            Severity::Elevated => Priority::Medium,
        }
    }
}

/// Pure severity computation shared by every threshold-style check.
pub fn evaluate(value: f64, warning: f64, critical: f64, higher_is_worse: bool) -> Option<Severity> {
    if higher_is_worse {
        if value >= critical {
            Some(Severity::Critical)
        } else if value >= warning {
            Some(Severity::Elevated)
        } else {
            None
        }
    } else if value <= critical {
        Some(Severity::Critical)
    } else if value <= warning {
        Some(Severity::Elevated)
    } else {
        None
    }
}

pub struct ThresholdAnalyzer {
    checks: Vec<(String, ThresholdConfig)>,
    cooldown_hours: f64,
    enabled: bool,
}

impl ThresholdAnalyzer {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            checks: cfg
                .thresholds
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cooldown_hours: cfg.decision.cooldown_hours(),
            enabled: cfg.analyzer("threshold").enabled,
        }
    }

    fn insight_for(
        &self,
        metric: &str,
        t: &ThresholdConfig,
        entity: Option<&str>,
        value: f64,
        sev: Severity,
    ) -> Insight {
        let unit = t.unit.as_deref().unwrap_or("");
        let subject = match entity {
            Some(e) => format!("{metric} on {e}"),
            None => metric.to_string(),
        };
        let bound = if sev == Severity::Critical {
            t.critical
        } else {
            t.warning
        };
        let dedupe_key = match entity {
            Some(e) => format!("thr:{metric}:{}:{e}", sev.as_str()),
            None => format!("thr:{metric}:{}", sev.as_str()),
        };
        let category = t.source.clone();
        Insight::new(
            "threshold",
            category,
            sev.priority(),
            format!("{subject} is {}", sev.as_str()),
            format!("{subject} at {value:.1}{unit} (bound {bound:.1}{unit})"),
        )
        .with_data(json!({
            "metric": metric,
            "entity": entity,
            "value": value,
            "warning": t.warning,
            "critical": t.critical,
            "severity": sev.as_str(),
        }))
        .with_dedupe_key(dedupe_key)
        .expires_in_hours(6)
    }
}

#[async_trait::async_trait]
impl Analyzer for ThresholdAnalyzer {
    fn name(&self) -> &str {
        "threshold"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Realtime
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn analyze(&self, cx: &AnalyzerContext<'_>) -> Result<Vec<Insight>> {
        let mut out = Vec::new();
        for (metric, t) in &self.checks {
            let Some(payload) = cx.fresh.get(&t.source) else {
                continue;
            };
            for (entity, value) in resolve_metric(payload, &t.path) {
                let Some(sev) = evaluate(value, t.warning, t.critical, t.higher_is_worse) else {
                    continue;
                };
                let insight = self.insight_for(metric, t, entity.as_deref(), value, sev);
                let key = insight.dedupe_key.as_deref().unwrap_or_default();
                if was_delivered_recently(cx.store, key, self.cooldown_hours) {
                    tracing::debug!(metric, ?entity, "threshold suppressed by cooldown");
                    continue;
                }
                out.push(insight);
            }
        }
        Ok(out)
    }
}

/// Walk a slash path into `payload`; a `*` segment expands over object
/// keys and yields one `(entity, value)` per key. Non-numeric leaves are
/// skipped.
pub fn resolve_metric(payload: &Value, path: &str) -> Vec<(Option<String>, f64)> {
    fn walk(v: &Value, rest: &[&str], entity: Option<&str>, out: &mut Vec<(Option<String>, f64)>) {
        match rest.first() {
            None => {
                if let Some(n) = v.as_f64() {
                    out.push((entity.map(str::to_string), n));
                }
            }
            Some(&"*") => {
                if let Some(obj) = v.as_object() {
                    for (k, child) in obj {
                        walk(child, &rest[1..], Some(k), out);
                    }
                }
            }
            Some(seg) => {
                if let Some(child) = v.get(*seg) {
                    walk(child, &rest[1..], entity, out);
                }
            }
        }
    }
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    walk(payload, &segs, None, &mut out);
    out
}
