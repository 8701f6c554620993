use chrono::{DateTime, Utc};

use crate::model::{IncidentPolicy, Status};

/// Per-service runtime counters the FSM reads and updates on every tick.
/// Not persisted: these reset to zero/absent on every boot.
#[derive(Debug, Clone, Default)]
pub struct Streaks {
    pub fail_streak: u32,
    pub ok_streak: u32,
    pub first_fail_at: Option<DateTime<Utc>>,
}

impl Streaks {
    /// Updates fail/ok streaks and `first_fail_at` for the given outcome.
    /// Must run before `decide` is called so it sees the post-update counts.
    pub fn record(&mut self, status: Status, now: DateTime<Utc>) {
        match status {
            Status::Fail => {
                self.fail_streak += 1;
                self.ok_streak = 0;
                if self.fail_streak == 1 {
                    self.first_fail_at = Some(now);
                }
            }
            Status::Ok => {
                self.ok_streak += 1;
                self.fail_streak = 0;
                self.first_fail_at = None;
            }
        }
    }
}

/// What the checker task must do with the store and the notifier gate
/// as a result of one FSM evaluation.
#[derive(Debug, Clone)]
pub enum Transition {
    None,
    Open {
        started_at: DateTime<Utc>,
    },
    /// Close the existing open incident: set `ended_at`/`duration_s` on
    /// it. The caller (the store, which owns the incident list) applies
    /// these fields to the actual `Incident` record.
    Close {
        ended_at: DateTime<Utc>,
        duration_s: i64,
    },
    /// `prev == "FAIL"`, `cur == "OK"`, streak threshold met, but there
    /// was no open incident to close. Can happen after a restart if the
    /// open incident was lost before the close condition was reached.
    CloseWithoutIncident,
}

/// Pure decision function: takes no lock, performs no I/O, so it is
/// directly unit-testable on its own.
///
/// `open_incident` is `Some` iff the service currently has an
/// unclosed incident; its `started_at` is read to compute `duration_s`
/// on close.
pub fn decide(
    prev_status: Option<Status>,
    cur_status: Status,
    streaks: &Streaks,
    policy: &IncidentPolicy,
    open_incident_started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Transition {
    let prev_fail = prev_status == Some(Status::Fail);

    match (prev_fail, cur_status) {
        (false, Status::Fail) => {
            let open_by_consecutive = streaks.fail_streak >= policy.open_consecutive_fails;
            let open_by_elapsed = policy.open_seconds > 0
                && streaks
                    .first_fail_at
                    .is_some_and(|t0| (now - t0).num_seconds() as u64 >= policy.open_seconds);
            if open_by_consecutive || open_by_elapsed {
                Transition::Open { started_at: now }
            } else {
                Transition::None
            }
        }
        (true, Status::Ok) => {
            if streaks.ok_streak >= policy.close_consecutive_oks {
                match open_incident_started_at {
                    Some(started_at) => {
                        let duration_s = (now - started_at).num_seconds().max(0);
                        Transition::Close {
                            ended_at: now,
                            duration_s,
                        }
                    }
                    None => Transition::CloseWithoutIncident,
                }
            } else {
                Transition::None
            }
        }
        _ => Transition::None,
    }
}
