//! # sst-rig
//!
//! Controller for a stop-signal task apparatus: commits session
//! parameters to the control board over a serial link, ingests per-trial
//! telemetry, adapts the stop-signal delay from baseline reaction times,
//! streams live video and counters to remote viewers over TCP, and writes
//! a flat-text report at session end.

pub mod alert;
pub mod config;
pub mod device;
pub mod error;
pub mod report;
pub mod session;
pub mod stats;
pub mod streaming;

pub use config::{Direction, SessionConfig, SessionSpec};
pub use device::DeviceLink;
pub use error::{Result, RigError};
pub use session::{SessionController, SessionHandle};
pub use streaming::{StreamingServer, DEFAULT_STREAM_PORT};
