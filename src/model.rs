use std::collections::HashSet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Outcome of a single probe attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Fail => "FAIL",
        }
    }
}

/// A monitored target, created via `AddService` and mutated only via
/// `UpdateService`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: u64,
    pub name: String,
    pub url: String,
    /// Check interval, seconds. Normalized to >= 1 on creation/update.
    #[serde(rename = "interval", default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts beyond the first.
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default = "default_slo_target")]
    pub slo_target: f64,
}

pub fn default_interval_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
pub fn default_timeout_ms() -> u64 {
    2500
}
pub fn default_retry_backoff_ms() -> u64 {
    300
}
pub fn default_expected_status() -> u16 {
    200
}
pub fn default_slo_target() -> f64 {
    99.9
}

impl Service {
    /// Fills in defaults for any zero-valued field so a partially
    /// specified service config still ends up with sane settings.
    pub fn normalize(&mut self) {
        if self.interval_secs < 1 {
            self.interval_secs = default_interval_secs();
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = default_timeout_ms();
        }
        if self.expected_status == 0 {
            self.expected_status = default_expected_status();
        }
        if self.slo_target <= 0.0 {
            self.slo_target = default_slo_target();
        }
    }
}

/// One probe outcome. Immutable once appended to a service's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub service_id: u64,
    pub name: String,
    pub url: String,
    pub status: Status,
    pub response_ms: u64,
    /// Pre-formatted RFC3339 UTC timestamp, kept as a string to preserve
    /// exact round-tripping through the snapshot file.
    pub checked_at: String,
}

/// An uptime gap for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: u64,
    pub service_id: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_s: Option<i64>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Global thresholds governing the incident FSM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPolicy {
    #[serde(default = "default_open_consecutive_fails")]
    pub open_consecutive_fails: u32,
    #[serde(default = "default_open_seconds")]
    pub open_seconds: u64,
    #[serde(rename = "closeConsecutiveOKs", default = "default_close_consecutive_oks")]
    pub close_consecutive_oks: u32,
    #[serde(default = "default_alert_cooldown_sec")]
    pub alert_cooldown_sec: u64,
}

fn default_open_consecutive_fails() -> u32 {
    2
}
fn default_open_seconds() -> u64 {
    5
}
fn default_close_consecutive_oks() -> u32 {
    1
}
fn default_alert_cooldown_sec() -> u64 {
    60
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        IncidentPolicy {
            open_consecutive_fails: default_open_consecutive_fails(),
            open_seconds: default_open_seconds(),
            close_consecutive_oks: default_close_consecutive_oks(),
            alert_cooldown_sec: default_alert_cooldown_sec(),
        }
    }
}

impl IncidentPolicy {
    /// A policy is "zero-valued" if every field is its Rust zero
    /// value, i.e. it decoded from an absent or empty JSON object.
    pub fn is_zero(&self) -> bool {
        self.open_consecutive_fails == 0
            && self.open_seconds == 0
            && self.close_consecutive_oks == 0
            && self.alert_cooldown_sec == 0
    }
}

/// A time-bounded suppression of notifications for a service or tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Silence {
    pub id: u64,
    pub service_id: Option<u64>,
    pub tag: Option<String>,
    pub until: DateTime<Utc>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Silence {
    pub fn matches(&self, service: &Service) -> bool {
        if let Some(sid) = self.service_id
            && sid == service.id
        {
            return true;
        }
        if let Some(tag) = &self.tag
            && service.tags.contains(tag)
        {
            return true;
        }
        false
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: u64) -> Service {
        Service {
            id,
            name: "svc".into(),
            url: "http://example.test".into(),
            interval_secs: 0,
            active: true,
            timeout_ms: 0,
            retries: 0,
            retry_backoff_ms: 300,
            expected_status: 0,
            contains: None,
            tags: HashSet::new(),
            slo_target: 0.0,
        }
    }

    #[test]
    fn normalize_fills_in_zero_values_with_defaults() {
        let mut svc = service(1);
        svc.normalize();
        assert_eq!(svc.interval_secs, default_interval_secs());
        assert_eq!(svc.timeout_ms, default_timeout_ms());
        assert_eq!(svc.expected_status, default_expected_status());
        assert_eq!(svc.slo_target, default_slo_target());
    }

    #[test]
    fn normalize_leaves_explicit_nonzero_values_alone() {
        let mut svc = service(1);
        svc.interval_secs = 30;
        svc.timeout_ms = 1000;
        svc.expected_status = 204;
        svc.slo_target = 99.99;
        svc.normalize();
        assert_eq!(svc.interval_secs, 30);
        assert_eq!(svc.timeout_ms, 1000);
        assert_eq!(svc.expected_status, 204);
        assert_eq!(svc.slo_target, 99.99);
    }

    #[test]
    fn silence_matches_by_service_id_or_tag() {
        let mut tagged = service(2);
        tagged.tags.insert("edge".to_string());

        let by_id = Silence {
            id: 1,
            service_id: Some(2),
            tag: None,
            until: Utc::now(),
            reason: String::new(),
            created_at: Utc::now(),
        };
        assert!(by_id.matches(&tagged));
        assert!(!by_id.matches(&service(3)));

        let by_tag = Silence {
            id: 2,
            service_id: None,
            tag: Some("edge".to_string()),
            until: Utc::now(),
            reason: String::new(),
            created_at: Utc::now(),
        };
        assert!(by_tag.matches(&tagged));
        assert!(!by_tag.matches(&service(3)));
    }

    #[test]
    fn policy_is_zero_only_when_every_field_is_zero() {
        let zero = IncidentPolicy {
            open_consecutive_fails: 0,
            open_seconds: 0,
            close_consecutive_oks: 0,
            alert_cooldown_sec: 0,
        };
        assert!(zero.is_zero());
        assert!(!IncidentPolicy::default().is_zero());
    }
}
