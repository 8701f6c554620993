use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreResult;
use crate::model::{IncidentPolicy, Incident, Service, Silence, Status, StatusResult};

/// The subset of store state that gets written to disk. Streak
/// counters, `first_fail_at`, `last_alert_at`, and checker stop
/// signals are deliberately absent: they are runtime-only and reset
/// on every boot. Unknown top-level keys are ignored on load, and
/// every field defaults so an older or partial snapshot still loads.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub histories: HashMap<u64, Vec<StatusResult>>,
    #[serde(default)]
    pub statuses: HashMap<u64, StatusResult>,
    #[serde(default)]
    pub incidents: HashMap<u64, Vec<Incident>>,
    #[serde(default)]
    pub last_status: HashMap<u64, Status>,
    #[serde(default = "default_next_id")]
    pub next_id: u64,
    #[serde(default = "default_next_id")]
    pub next_incident_id: u64,
    #[serde(default)]
    pub policy: IncidentPolicy,
    #[serde(default)]
    pub silences: Vec<Silence>,
    #[serde(default = "default_next_id")]
    pub next_silence_id: u64,
}

fn default_next_id() -> u64 {
    1
}

// `#[serde(default = "...")]` only fires during deserialization, not
// `Default::default()`, so a plain derive would leave the id counters
// at 0 on a fresh boot with no snapshot file. Seed them to 1 here to
// match a freshly constructed store.
impl Default for SnapshotData {
    fn default() -> Self {
        SnapshotData {
            services: Vec::new(),
            histories: HashMap::new(),
            statuses: HashMap::new(),
            incidents: HashMap::new(),
            last_status: HashMap::new(),
            next_id: default_next_id(),
            next_incident_id: default_next_id(),
            policy: IncidentPolicy {
                open_consecutive_fails: 0,
                open_seconds: 0,
                close_consecutive_oks: 0,
                alert_cooldown_sec: 0,
            },
            silences: Vec::new(),
            next_silence_id: default_next_id(),
        }
    }
}

/// Loads the snapshot at `path`, or an empty default if it doesn't
/// exist yet (first boot).
pub fn load(path: &Path) -> StoreResult<SnapshotData> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let data: SnapshotData = serde_json::from_slice(&bytes)?;
            Ok(data)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(?path, "no snapshot found, starting with empty state");
            Ok(SnapshotData::default())
        }
        Err(err) => Err(err.into()),
    }
}

/// Writes `data` to `path` atomically: serialize to a sibling temp
/// file, then rename over the destination, so a crash mid-write never
/// leaves a torn snapshot.
pub fn save(path: &Path, data: &SnapshotData) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(data)?;
    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, &bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::default_interval_secs;
    use chrono::Utc;

    fn sample_service() -> Service {
        let mut svc = Service {
            id: 1,
            name: "api".into(),
            url: "http://example.test/health".into(),
            interval_secs: default_interval_secs(),
            active: true,
            timeout_ms: 2500,
            retries: 1,
            retry_backoff_ms: 300,
            expected_status: 200,
            contains: None,
            tags: Default::default(),
            slo_target: 99.9,
        };
        svc.normalize();
        svc
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let mut incidents = HashMap::new();
        incidents.insert(
            1,
            vec![Incident {
                id: 1,
                service_id: 1,
                started_at: Utc::now(),
                ended_at: None,
                duration_s: None,
            }],
        );

        let data = SnapshotData {
            services: vec![sample_service()],
            incidents,
            next_id: 2,
            next_incident_id: 2,
            next_silence_id: 1,
            ..Default::default()
        };

        save(&path, &data).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.services.len(), 1);
        assert_eq!(loaded.services[0].name, "api");
        assert_eq!(loaded.next_id, 2);
        let open = &loaded.incidents.get(&1).unwrap()[0];
        assert!(open.ended_at.is_none());
    }

    #[test]
    fn missing_file_loads_empty_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let data = load(&path).unwrap();
        assert!(data.services.is_empty());
        assert_eq!(data.next_id, 1);
        assert_eq!(data.next_incident_id, 1);
        assert_eq!(data.next_silence_id, 1);
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"{"services": [], "futureField": {"whatever": true}}"#,
        )
        .unwrap();
        let data = load(&path).unwrap();
        assert!(data.services.is_empty());
    }
}
