use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::model::{IncidentPolicy, Service, Silence};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier delivery failed: {0}")]
    Delivery(String),
}

/// The core's only contract with notification delivery backends
/// (chat bots, webhooks, ...), which live entirely outside this crate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, text: &str) -> Result<(), NotifyError>;
}

/// Discards every notification. Used when no sinks are configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _title: &str, _text: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// `alertCooldownSec == 0` OR no prior alert OR enough time has passed.
pub fn can_notify(
    policy: &IncidentPolicy,
    last_alert_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if policy.alert_cooldown_sec == 0 {
        return true;
    }
    match last_alert_at {
        None => true,
        Some(last) => (now - last).num_seconds() as u64 >= policy.alert_cooldown_sec,
    }
}

/// No active silence matches the service by id or by any tag.
pub fn is_silenced(silences: &[Silence], service: &Service, now: DateTime<Utc>) -> bool {
    silences
        .iter()
        .any(|s| s.is_active(now) && s.matches(service))
}

/// Spawns delivery of `(title, text)` to every sink on a background
/// task, so a slow or failing sink can never stall a checker. Delivery
/// errors are logged and discarded.
pub fn dispatch(sinks: &[Arc<dyn Notifier>], title: String, text: String) {
    for sink in sinks.iter().cloned() {
        let title = title.clone();
        let text = text.clone();
        tokio::spawn(async move {
            match sink.notify(&title, &text).await {
                Ok(()) => info!(title = title.as_str(), "notification delivered"),
                Err(err) => error!(title = title.as_str(), error = %err, "notification delivery failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn service(id: u64, tags: &[&str]) -> Service {
        Service {
            id,
            name: "svc".into(),
            url: "http://example.test".into(),
            interval_secs: 10,
            active: true,
            timeout_ms: 2500,
            retries: 0,
            retry_backoff_ms: 300,
            expected_status: 200,
            contains: None,
            tags: tags.iter().map(|t| t.to_string()).collect::<HashSet<_>>(),
            slo_target: 99.9,
        }
    }

    fn policy_with_cooldown(secs: u64) -> IncidentPolicy {
        IncidentPolicy {
            alert_cooldown_sec: secs,
            ..IncidentPolicy::default()
        }
    }

    #[test]
    fn cooldown_suppresses_alert_until_elapsed() {
        let policy = policy_with_cooldown(60);
        let t0 = Utc::now();
        assert!(can_notify(&policy, None, t0));
        let last = t0;
        assert!(!can_notify(&policy, Some(last), t0 + chrono::Duration::seconds(30)));
        assert!(can_notify(&policy, Some(last), t0 + chrono::Duration::seconds(60)));
    }

    #[test]
    fn zero_cooldown_always_notifies() {
        let policy = policy_with_cooldown(0);
        let now = Utc::now();
        assert!(can_notify(&policy, Some(now), now));
    }

    #[test]
    fn silence_matches_by_tag_not_by_unrelated_service() {
        let now = Utc::now();
        let edge_service = service(1, &["edge"]);
        let other_service = service(2, &["core"]);
        let silences = vec![Silence {
            id: 1,
            service_id: None,
            tag: Some("edge".to_string()),
            until: now + chrono::Duration::hours(1),
            reason: "maintenance".into(),
            created_at: now,
        }];
        assert!(is_silenced(&silences, &edge_service, now));
        assert!(!is_silenced(&silences, &other_service, now));
    }

    #[test]
    fn expired_silence_no_longer_matches() {
        let now = Utc::now();
        let svc = service(1, &["edge"]);
        let silences = vec![Silence {
            id: 1,
            service_id: None,
            tag: Some("edge".to_string()),
            until: now - chrono::Duration::seconds(1),
            reason: "maintenance".into(),
            created_at: now,
        }];
        assert!(!is_silenced(&silences, &svc, now));
    }
}
