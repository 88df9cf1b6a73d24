// Session lifecycle: controller state machine, trial aggregation and the
// shared runtime counters.

pub mod aggregator;
pub mod controller;
pub mod types;

pub use aggregator::{TrialAggregator, TrialSummary};
pub use controller::{ControllerSettings, SessionController};
pub use types::{RuntimeState, SessionHandle, SessionLog, SessionPhase, TrialEvent, TrialKind};
