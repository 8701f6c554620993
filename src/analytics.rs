use chrono::{DateTime, Utc};

use crate::model::{Incident, Status, StatusResult};

/// Output of `compute` for one service over one window.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub service_id: u64,
    pub window_hours: u64,
    pub checks: u64,
    pub avg_response_ms: u64,
    pub fail_count: u64,
    pub uptime_percent: f64,
    pub incident_count: u64,
    pub mttr_seconds: f64,
}

/// SLO burn-rate view over the same window.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SloReport {
    pub service_id: u64,
    pub target_percent: f64,
    pub window_hours: u64,
    pub analytics: Analytics,
    pub allowed_downtime_sec: f64,
    pub observed_downtime_sec: f64,
    pub burn_rate: f64,
    pub breached: bool,
}

/// Computes time-weighted uptime, average OK latency, fail count,
/// incident count and MTTR over `[now - hours*3600s, now]`.
///
/// Takes plain snapshots (no lock, no store reference) so the actual
/// computation never runs while holding the store lock.
pub fn compute(
    service_id: u64,
    history: &[StatusResult],
    incidents: &[Incident],
    hours: u64,
    now: DateTime<Utc>,
) -> Analytics {
    let window_seconds = (hours.max(1) * 3600) as f64;
    let window_start = now - chrono::Duration::seconds(window_seconds as i64);

    let mut checks = 0u64;
    let mut fail_count = 0u64;
    let mut ok_latency_sum = 0u128;
    let mut ok_count = 0u64;

    for result in history {
        let Ok(checked_at) = DateTime::parse_from_rfc3339(&result.checked_at) else {
            continue;
        };
        let checked_at = checked_at.with_timezone(&Utc);
        if checked_at <= window_start {
            continue;
        }
        checks += 1;
        match result.status {
            Status::Ok => {
                ok_latency_sum += result.response_ms as u128;
                ok_count += 1;
            }
            Status::Fail => fail_count += 1,
        }
    }
    let avg_response_ms = if ok_count > 0 {
        (ok_latency_sum / ok_count as u128) as u64
    } else {
        0
    };

    let mut down_seconds = 0.0f64;
    let mut incident_count = 0u64;
    let mut mttr_sum = 0.0f64;
    for incident in incidents {
        let end = incident.ended_at.unwrap_or(now);
        let clipped_start = incident.started_at.max(window_start);
        let clipped_end = end.min(now);
        if clipped_end > clipped_start {
            down_seconds += (clipped_end - clipped_start).num_seconds() as f64;
        }

        if let Some(ended_at) = incident.ended_at
            && ended_at >= window_start
            && ended_at <= now
        {
            incident_count += 1;
            mttr_sum += incident.duration_s.unwrap_or(0) as f64;
        }
    }

    let uptime_percent = if window_seconds > 0.0 {
        (100.0 * (1.0 - down_seconds / window_seconds)).clamp(0.0, 100.0)
    } else {
        100.0
    };
    let mttr_seconds = if incident_count > 0 {
        mttr_sum / incident_count as f64
    } else {
        0.0
    };

    Analytics {
        service_id,
        window_hours: hours,
        checks,
        avg_response_ms,
        fail_count,
        uptime_percent,
        incident_count,
        mttr_seconds,
    }
}

/// Error-budget / burn-rate view for a given SLO target.
pub fn slo_report(analytics: Analytics, target_percent: f64) -> SloReport {
    let window_seconds = (analytics.window_hours.max(1) * 3600) as f64;
    let allowed_downtime_sec = window_seconds * (1.0 - target_percent / 100.0);
    let observed_downtime_sec = window_seconds * (1.0 - analytics.uptime_percent / 100.0);
    let burn_rate = if allowed_downtime_sec > 0.0 {
        observed_downtime_sec / allowed_downtime_sec
    } else {
        0.0
    };
    let breached = analytics.uptime_percent < target_percent;

    SloReport {
        service_id: analytics.service_id,
        target_percent,
        window_hours: analytics.window_hours,
        allowed_downtime_sec,
        observed_downtime_sec,
        burn_rate,
        breached,
        analytics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    // One closed incident lasting 6 minutes inside a 1h window.
    #[test]
    fn time_weighted_uptime_over_one_closed_incident() {
        let now = Utc::now();
        let started = now - ChronoDuration::minutes(30);
        let ended = started + ChronoDuration::minutes(6);
        let incident = Incident {
            id: 1,
            service_id: 1,
            started_at: started,
            ended_at: Some(ended),
            duration_s: Some(360),
        };
        let analytics = compute(1, &[], &[incident], 1, now);
        assert!((analytics.uptime_percent - 90.0).abs() < 0.01);
        assert_eq!(analytics.incident_count, 1);
        assert_eq!(analytics.mttr_seconds, 360.0);
    }

    #[test]
    fn empty_incidents_means_full_uptime() {
        let now = Utc::now();
        let analytics = compute(1, &[], &[], 4, now);
        assert_eq!(analytics.uptime_percent, 100.0);
        assert_eq!(analytics.incident_count, 0);
        assert_eq!(analytics.mttr_seconds, 0.0);
    }

    #[test]
    fn uptime_percent_always_clamped() {
        let now = Utc::now();
        // An incident far longer than the window should clamp to 0, not
        // go negative.
        let incident = Incident {
            id: 1,
            service_id: 1,
            started_at: now - ChronoDuration::days(30),
            ended_at: None,
            duration_s: None,
        };
        let analytics = compute(1, &[], &[incident], 1, now);
        assert!(analytics.uptime_percent >= 0.0 && analytics.uptime_percent <= 100.0);
        assert_eq!(analytics.uptime_percent, 0.0);
    }

    #[test]
    fn avg_response_ms_only_over_ok_checks_in_window() {
        let now = Utc::now();
        let recent = |ms: u64, status: Status| StatusResult {
            service_id: 1,
            name: "svc".into(),
            url: "http://example.test".into(),
            status,
            response_ms: ms,
            checked_at: now.to_rfc3339(),
        };
        let history = vec![
            recent(100, Status::Ok),
            recent(300, Status::Ok),
            recent(50, Status::Fail),
        ];
        let analytics = compute(1, &history, &[], 1, now);
        assert_eq!(analytics.checks, 3);
        assert_eq!(analytics.fail_count, 1);
        assert_eq!(analytics.avg_response_ms, 200);
    }

    #[test]
    fn slo_burn_rate_matches_allowed_over_observed() {
        let analytics = Analytics {
            service_id: 1,
            window_hours: 1,
            checks: 10,
            avg_response_ms: 50,
            fail_count: 1,
            uptime_percent: 95.0,
            incident_count: 1,
            mttr_seconds: 60.0,
        };
        let report = slo_report(analytics, 99.0);
        // allowed = 3600 * 0.01 = 36s; observed = 3600 * 0.05 = 180s
        assert!((report.allowed_downtime_sec - 36.0).abs() < 0.01);
        assert!((report.observed_downtime_sec - 180.0).abs() < 0.01);
        assert!((report.burn_rate - 5.0).abs() < 0.01);
        assert!(report.breached);
    }
}
