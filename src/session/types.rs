// Session domain types: per-trial telemetry records, the per-session
// accumulation the report serializes, and the runtime counters shared with
// the streaming server.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trial type reported by the apparatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialKind {
    Go,
    Stop,
}

impl TrialKind {
    pub fn from_code(code: u8) -> Option<TrialKind> {
        match code {
            0 => Some(TrialKind::Go),
            1 => Some(TrialKind::Stop),
            _ => None,
        }
    }

    pub fn as_code(&self) -> u8 {
        match self {
            TrialKind::Go => 0,
            TrialKind::Stop => 1,
        }
    }
}

/// Counters for telemetry the ingestor could not use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestDiagnostics {
    /// Records whose values were missing or unparseable.
    pub missed_data: u64,
    /// Lines that were not valid UTF-8.
    pub encoding_errors: u64,
    /// Lines with the wrong field count.
    pub length_mismatches: u64,
}

/// One completed trial as decoded from the telemetry stream.
///
/// Timestamps are milliseconds since session start. The diagnostics field
/// is the ingestor's counter state at the time the record was decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialEvent {
    pub kind: TrialKind,
    pub rewarded: bool,
    pub stop_delay_ms: i64,
    pub poke_in_left: Vec<i64>,
    pub poke_out_left: Vec<i64>,
    pub poke_in_mid: Vec<i64>,
    pub poke_out_mid: Vec<i64>,
    pub poke_in_right: Vec<i64>,
    pub poke_out_right: Vec<i64>,
    pub reward_start: Vec<i64>,
    pub stop_signal_start: Vec<i64>,
    pub laser_on: Vec<i64>,
    pub diagnostics: IngestDiagnostics,
}

/// Everything collected over one session, keyed the way the report lays it
/// out. Owned exclusively by the control task; the temp safety snapshot and
/// the final report both serialize this structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLog {
    pub poke_in_left: Vec<i64>,
    pub poke_out_left: Vec<i64>,
    pub poke_in_mid: Vec<i64>,
    pub poke_out_mid: Vec<i64>,
    pub poke_in_right: Vec<i64>,
    pub poke_out_right: Vec<i64>,
    pub reward_start: Vec<i64>,
    pub stop_signal_start: Vec<i64>,
    pub laser_on: Vec<i64>,
    /// Per-trial type codes (0 = go, 1 = stop).
    pub trial_kinds: Vec<u8>,
    /// Per-trial reward flags (0 / 1).
    pub rewarded: Vec<u8>,
    /// Per-trial stop-signal delays in milliseconds.
    pub stop_delays: Vec<i64>,
    pub diagnostics: IngestDiagnostics,
}

impl SessionLog {
    /// Fold one trial into the session accumulation.
    pub fn absorb(&mut self, event: &TrialEvent) {
        self.poke_in_left.extend_from_slice(&event.poke_in_left);
        self.poke_out_left.extend_from_slice(&event.poke_out_left);
        self.poke_in_mid.extend_from_slice(&event.poke_in_mid);
        self.poke_out_mid.extend_from_slice(&event.poke_out_mid);
        self.poke_in_right.extend_from_slice(&event.poke_in_right);
        self.poke_out_right.extend_from_slice(&event.poke_out_right);
        self.reward_start.extend_from_slice(&event.reward_start);
        self.stop_signal_start
            .extend_from_slice(&event.stop_signal_start);
        self.laser_on.extend_from_slice(&event.laser_on);
        self.trial_kinds.push(event.kind.as_code());
        self.rewarded.push(event.rewarded as u8);
        self.stop_delays.push(event.stop_delay_ms);
        self.diagnostics = event.diagnostics.clone();
    }

    pub fn trials_recorded(&self) -> usize {
        self.trial_kinds.len()
    }

    pub fn clear(&mut self) {
        *self = SessionLog::default();
    }
}

/// Lifecycle of the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No configuration committed.
    Idle,
    /// Configuration committed, ready to start.
    Armed,
    /// Session in progress.
    Running,
    /// Shutdown in progress: draining the ingestor, persisting results.
    Ending,
}

/// Live counters of the running session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeState {
    pub trial_count: u64,
    pub elapsed_seconds: u64,
    pub running: bool,
    /// Toggled twice a second while the session runs; a stuck value means
    /// the control task has stalled.
    pub liveness: bool,
}

/// Cloneable view of the runtime counters.
///
/// The control task is the only writer; streaming workers read
/// whole-struct snapshots, so no reader can observe a half-applied update.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<RuntimeState>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RuntimeState {
        self.inner.read().clone()
    }

    pub(crate) fn begin_session(&self) {
        let mut state = self.inner.write();
        state.trial_count = 0;
        state.elapsed_seconds = 0;
        state.running = true;
        state.liveness = true;
    }

    pub(crate) fn end_session(&self) {
        let mut state = self.inner.write();
        state.running = false;
        state.liveness = false;
    }

    /// Count one trial; returns the new total.
    pub(crate) fn record_trial(&self) -> u64 {
        let mut state = self.inner.write();
        state.trial_count += 1;
        state.trial_count
    }

    pub(crate) fn tick_elapsed(&self) {
        self.inner.write().elapsed_seconds += 1;
    }

    pub(crate) fn toggle_liveness(&self) {
        let mut state = self.inner.write();
        state.liveness = !state.liveness;
    }
}
