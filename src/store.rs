use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analytics::{self, Analytics, SloReport};
use crate::error::{StoreError, StoreResult};
use crate::fsm::{self, Streaks, Transition};
use crate::model::{Incident, IncidentPolicy, Service, Silence, Status, StatusResult};
use crate::notify::{self, Notifier};
use crate::probe;

/// History is capped at this many entries per service; older entries
/// are dropped FIFO.
const MAX_HISTORY: usize = 1000;

struct CheckerHandle {
    cancel: CancellationToken,
}

/// The store's in-memory state: every map is keyed by service id and
/// guarded by `Store::inner`'s mutex; nothing here is ever touched
/// without holding it.
#[derive(Default)]
struct StoreInner {
    services: HashMap<u64, Service>,
    statuses: HashMap<u64, StatusResult>,
    histories: HashMap<u64, VecDeque<StatusResult>>,
    incidents: HashMap<u64, Vec<Incident>>,
    last_status: HashMap<u64, Status>,
    streaks: HashMap<u64, Streaks>,
    last_alert_at: HashMap<u64, DateTime<Utc>>,
    checkers: HashMap<u64, CheckerHandle>,
    silences: Vec<Silence>,
    policy: IncidentPolicy,
    next_id: u64,
    next_incident_id: u64,
    next_silence_id: u64,
}

impl StoreInner {
    fn fresh() -> Self {
        StoreInner {
            next_id: 1,
            next_incident_id: 1,
            next_silence_id: 1,
            policy: IncidentPolicy::default(),
            ..Default::default()
        }
    }
}

/// The monitoring engine's shared state store, plus the checker task
/// lifecycle that spawns against it. Held as `Arc<Store>` and passed
/// explicitly to the control plane and every checker task; there is
/// no global singleton.
pub struct Store {
    inner: Mutex<StoreInner>,
    client: Client,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Store {
    pub fn new(client: Client, notifiers: Vec<Arc<dyn Notifier>>) -> Arc<Store> {
        Arc::new(Store {
            inner: Mutex::new(StoreInner::fresh()),
            client,
            notifiers,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("store mutex poisoned by a panicked task; recovering");
                poisoned.into_inner()
            }
        }
    }

    // ---- Service lifecycle -------------------------------------------

    /// Assigns a fresh id, inserts the record, and starts its checker.
    pub fn add_service(self: &Arc<Self>, mut cfg: Service) -> u64 {
        cfg.normalize();
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            cfg.id = id;
            inner.services.insert(id, cfg);
            inner.streaks.insert(id, Streaks::default());
            id
        };
        self.spawn_checker(id);
        id
    }

    /// Mutates the record in place and restarts the checker: the
    /// existing stop signal is triggered before a new one is
    /// allocated, so at most one checker task ever runs for a service.
    /// Streaks reset; the open incident and history are preserved.
    pub fn update_service(self: &Arc<Self>, id: u64, mut cfg: Service) -> StoreResult<()> {
        cfg.normalize();
        {
            let mut inner = self.lock();
            if !inner.services.contains_key(&id) {
                return Err(StoreError::ServiceNotFound { id });
            }
            cfg.id = id;
            inner.services.insert(id, cfg);
            inner.streaks.insert(id, Streaks::default());
            if let Some(handle) = inner.checkers.remove(&id) {
                handle.cancel.cancel();
            }
        }
        self.spawn_checker(id);
        Ok(())
    }

    /// Idempotent: silently no-ops on an unknown id. Retains historical
    /// incidents and history for the id but removes the service, its
    /// latest status, and its checker registration so no further
    /// `StatusResult`s are appended.
    pub fn remove_service(&self, id: u64) {
        let mut inner = self.lock();
        if let Some(handle) = inner.checkers.remove(&id) {
            handle.cancel.cancel();
        }
        inner.services.remove(&id);
        inner.statuses.remove(&id);
        inner.streaks.remove(&id);
        inner.last_alert_at.remove(&id);
    }

    /// Used at boot to resume a persisted service with its current
    /// config; behaves like `update_service` with a freshly assigned
    /// checker but does not touch `next_id`.
    fn restart_checker(self: &Arc<Self>, id: u64) {
        self.spawn_checker(id);
    }

    pub fn has_service(&self, id: u64) -> bool {
        self.lock().services.contains_key(&id)
    }

    fn spawn_checker(self: &Arc<Self>, id: u64) {
        let cancel = CancellationToken::new();
        {
            let mut inner = self.lock();
            inner.checkers.insert(
                id,
                CheckerHandle {
                    cancel: cancel.clone(),
                },
            );
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.run_checker(id, cancel).await;
        });
    }

    /// One task per service. Performs one check immediately (the
    /// first `interval.tick()` resolves without delay), then one per
    /// `interval`, until `cancel` fires. Each tick runs the probe
    /// outside any lock, then does the entire state update under the
    /// store lock in one critical section.
    async fn run_checker(self: Arc<Self>, id: u64, cancel: CancellationToken) {
        let interval_secs = match self.lock().services.get(&id) {
            Some(svc) => svc.interval_secs,
            None => return,
        };
        // interval()'s first tick resolves immediately, giving "check
        // once on start, then every `interval`" for free. The interval
        // itself never changes mid-task: `update_service` always
        // restarts the checker rather than mutating this ticker in place.
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            // Reread configuration under the lock on every tick, even
            // though only `active`/url/etc. can have drifted without a
            // restart in this implementation.
            let service = match self.lock().services.get(&id).cloned() {
                Some(svc) => svc,
                None => return,
            };
            if !service.active {
                continue;
            }

            let result = probe::check(&self.client, &service).await;
            self.apply_result(&service, result);
        }
    }

    /// The single critical section per tick: history append, streak
    /// update, FSM evaluation and incident mutation, notification
    /// dispatch decision. Runs entirely under the store lock except
    /// for the notifier dispatch itself, which is spawned off so a
    /// slow or failing sink can never stall the checker.
    fn apply_result(&self, service: &Service, result: StatusResult) {
        let now = Utc::now();
        let mut notify_request: Option<(String, String)> = None;

        {
            let mut inner = self.lock();
            let id = service.id;

            inner.statuses.insert(id, result.clone());
            let history = inner.histories.entry(id).or_default();
            history.push_back(result.clone());
            while history.len() > MAX_HISTORY {
                history.pop_front();
            }

            let streaks = inner.streaks.entry(id).or_default();
            streaks.record(result.status, now);
            let streaks = streaks.clone();

            let prev_status = inner.last_status.get(&id).copied();
            let open_started_at = inner
                .incidents
                .get(&id)
                .and_then(|list| list.last())
                .filter(|inc| inc.is_open())
                .map(|inc| inc.started_at);

            let policy = inner.policy;
            let transition = fsm::decide(
                prev_status,
                result.status,
                &streaks,
                &policy,
                open_started_at,
                now,
            );

            match transition {
                Transition::None => {}
                Transition::Open { started_at } => {
                    let incident_id = inner.next_incident_id;
                    inner.next_incident_id += 1;
                    inner.incidents.entry(id).or_default().push(Incident {
                        id: incident_id,
                        service_id: id,
                        started_at,
                        ended_at: None,
                        duration_s: None,
                    });
                    inner.last_status.insert(id, Status::Fail);
                    debug!(service = service.name.as_str(), incident_id, "incident opened");

                    if notify::can_notify(&policy, inner.last_alert_at.get(&id).copied(), now)
                        && !notify::is_silenced(&inner.silences, service, now)
                    {
                        inner.last_alert_at.insert(id, now);
                        notify_request = Some((
                            format!("[DOWN] {}", service.name),
                            format!(
                                "URL: {}\nTime: {}",
                                service.url,
                                now.to_rfc3339()
                            ),
                        ));
                    }
                }
                Transition::Close {
                    ended_at,
                    duration_s,
                } => {
                    if let Some(incident) = inner
                        .incidents
                        .get_mut(&id)
                        .and_then(|list| list.last_mut())
                    {
                        incident.ended_at = Some(ended_at);
                        incident.duration_s = Some(duration_s);
                    }
                    inner.last_status.insert(id, Status::Ok);
                    debug!(service = service.name.as_str(), duration_s, "incident closed");

                    if notify::can_notify(&policy, inner.last_alert_at.get(&id).copied(), now)
                        && !notify::is_silenced(&inner.silences, service, now)
                    {
                        inner.last_alert_at.insert(id, now);
                        notify_request = Some((
                            format!("[UP] {}", service.name),
                            format!(
                                "URL: {}\nTime: {}\nDowntime: {}s",
                                service.url,
                                now.to_rfc3339(),
                                duration_s
                            ),
                        ));
                    }
                }
                Transition::CloseWithoutIncident => {
                    inner.last_status.insert(id, Status::Ok);
                }
            }
        }

        if let Some((title, text)) = notify_request {
            notify::dispatch(&self.notifiers, title, text);
        }
    }

    // ---- Reads --------------------------------------------------------

    pub fn get_statuses(&self) -> Vec<StatusResult> {
        self.lock().statuses.values().cloned().collect()
    }

    pub fn get_history(&self, id: u64) -> (Vec<StatusResult>, bool) {
        let inner = self.lock();
        match inner.histories.get(&id) {
            Some(h) => (h.iter().cloned().collect(), true),
            None => (Vec::new(), false),
        }
    }

    pub fn get_incidents(&self, id: u64) -> (Vec<Incident>, bool) {
        let inner = self.lock();
        match inner.incidents.get(&id) {
            Some(list) => (list.clone(), true),
            None => (Vec::new(), false),
        }
    }

    pub fn get_incidents_or_empty(&self, id: u64) -> Vec<Incident> {
        self.get_incidents(id).0
    }

    /// All open incidents across every service, newest services first.
    pub fn list_open_incidents(&self) -> Vec<Incident> {
        self.lock()
            .incidents
            .values()
            .filter_map(|list| list.last())
            .filter(|inc| inc.is_open())
            .cloned()
            .collect()
    }

    pub fn get_policy(&self) -> IncidentPolicy {
        self.lock().policy
    }

    pub fn set_policy(&self, policy: IncidentPolicy) {
        self.lock().policy = policy;
    }

    pub fn get_service_slo_target(&self, id: u64) -> f64 {
        self.lock()
            .services
            .get(&id)
            .map(|s| s.slo_target)
            .unwrap_or_else(crate::model::default_slo_target)
    }

    pub fn set_service_slo_target(&self, id: u64, target: f64) -> StoreResult<()> {
        let mut inner = self.lock();
        match inner.services.get_mut(&id) {
            Some(svc) => {
                svc.slo_target = target;
                Ok(())
            }
            None => Err(StoreError::ServiceNotFound { id }),
        }
    }

    // ---- Silences -------------------------------------------------------

    pub fn new_silence(
        &self,
        service_id: Option<u64>,
        tag: Option<String>,
        until: DateTime<Utc>,
        reason: String,
    ) -> Silence {
        let mut inner = self.lock();
        let id = inner.next_silence_id;
        inner.next_silence_id += 1;
        let silence = Silence {
            id,
            service_id,
            tag,
            until,
            reason,
            created_at: Utc::now(),
        };
        inner.silences.push(silence.clone());
        silence
    }

    pub fn list_silences(&self) -> Vec<Silence> {
        self.lock().silences.clone()
    }

    pub fn delete_silence(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.silences.len();
        inner.silences.retain(|s| s.id != id);
        inner.silences.len() != before
    }

    pub fn is_silenced(&self, service: &Service) -> bool {
        let inner = self.lock();
        notify::is_silenced(&inner.silences, service, Utc::now())
    }

    // ---- Analytics ------------------------------------------------------

    /// Takes a snapshot of history and incidents under the lock, then
    /// computes the report outside it so analytics never holds the
    /// lock during the computation.
    pub fn compute_analytics(&self, id: u64, hours: u64) -> Analytics {
        let (history, incidents) = {
            let inner = self.lock();
            let history = inner
                .histories
                .get(&id)
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default();
            let incidents = inner.incidents.get(&id).cloned().unwrap_or_default();
            (history, incidents)
        };
        analytics::compute(id, &history, &incidents, hours, Utc::now())
    }

    pub fn compute_slo_report(&self, id: u64, hours: u64) -> SloReport {
        let target = self.get_service_slo_target(id);
        let analytics = self.compute_analytics(id, hours);
        analytics::slo_report(analytics, target)
    }

    // ---- Snapshot interop -------------------------------------------------

    pub(crate) fn snapshot_fields(&self) -> crate::snapshot::SnapshotData {
        let inner = self.lock();
        crate::snapshot::SnapshotData {
            services: inner.services.values().cloned().collect(),
            histories: inner
                .histories
                .iter()
                .map(|(k, v)| (*k, v.iter().cloned().collect()))
                .collect(),
            statuses: inner.statuses.clone(),
            incidents: inner.incidents.clone(),
            last_status: inner.last_status.clone(),
            next_id: inner.next_id,
            next_incident_id: inner.next_incident_id,
            policy: inner.policy,
            silences: inner.silences.clone(),
            next_silence_id: inner.next_silence_id,
        }
    }

    /// Rebuilds all maps from a loaded snapshot and starts one checker
    /// per loaded service. Streak counters, `first_fail_at`, and
    /// `last_alert_at` are runtime-only and deliberately left empty;
    /// they reset on every boot rather than risk stale alert
    /// suppression from a previous run.
    pub fn restore_from_snapshot(self: &Arc<Self>, data: crate::snapshot::SnapshotData) {
        let ids: Vec<u64> = {
            let mut inner = self.lock();
            inner.next_id = data.next_id;
            inner.next_incident_id = data.next_incident_id;
            inner.next_silence_id = data.next_silence_id;
            inner.policy = if data.policy.is_zero() {
                IncidentPolicy::default()
            } else {
                data.policy
            };
            inner.silences = data.silences;
            inner.last_status = data.last_status;
            inner.incidents = data.incidents;
            inner.statuses = data.statuses;
            inner.histories = data
                .histories
                .into_iter()
                .map(|(k, v)| (k, VecDeque::from(v)))
                .collect();

            let ids: Vec<u64> = data.services.iter().map(|s| s.id).collect();
            for service in data.services {
                inner.streaks.insert(service.id, Streaks::default());
                inner.services.insert(service.id, service);
            }
            ids
        };
        info!(count = ids.len(), "restored services from snapshot");
        for id in ids {
            self.restart_checker(id);
        }
    }
}
