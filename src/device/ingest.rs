// Telemetry ingestor.
//
// The control board reports one line per completed trial:
//
//   T,<kind>,<rewarded>,<ssd>,<pokeInL>,<pokeOutL>,<pokeInM>,<pokeOutM>,
//   <pokeInR>,<pokeOutR>,<rewardStart>,<stopSignalStart>,<laserOn>
//
// 13 comma-delimited fields; the nine trailing fields are `|`-separated
// timestamp vectors in milliseconds since session start, empty when the
// channel saw no events that trial. A line the worker cannot use is
// counted and dropped; it never kills the worker.
//
// One worker runs per session. It checks out the device reader, decodes
// lines until cancelled, and puts the reader back so the next session can
// reuse it. Reads are bounded by a poll deadline so cancellation is
// observed between reads rather than by aborting a read in flight.

use crate::device::link::ReaderSlot;
use crate::session::types::{IngestDiagnostics, TrialEvent, TrialKind};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fields in a trial record line.
pub const TRIAL_FIELDS: usize = 13;

/// Tag opening every trial record line.
pub const TRIAL_TAG: &str = "T";

/// Why a trial line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialDecodeError {
    LengthMismatch { fields: usize },
    MissedData { field: &'static str },
}

/// Decode one telemetry line into a trial event.
///
/// The diagnostics attached to the returned event are left default; the
/// worker stamps its counter state before forwarding.
pub fn decode_trial_line(line: &str) -> Result<TrialEvent, TrialDecodeError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != TRIAL_FIELDS || fields[0] != TRIAL_TAG {
        return Err(TrialDecodeError::LengthMismatch {
            fields: fields.len(),
        });
    }

    fn value<T: std::str::FromStr>(
        field: &'static str,
        raw: &str,
    ) -> Result<T, TrialDecodeError> {
        raw.parse()
            .map_err(|_| TrialDecodeError::MissedData { field })
    }

    fn series(field: &'static str, raw: &str) -> Result<Vec<i64>, TrialDecodeError> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        raw.split('|')
            .map(|stamp| {
                stamp
                    .parse()
                    .map_err(|_| TrialDecodeError::MissedData { field })
            })
            .collect()
    }

    let kind = TrialKind::from_code(value("kind", fields[1])?)
        .ok_or(TrialDecodeError::MissedData { field: "kind" })?;
    let rewarded = value::<u8>("rewarded", fields[2])? != 0;

    Ok(TrialEvent {
        kind,
        rewarded,
        stop_delay_ms: value("ssd", fields[3])?,
        poke_in_left: series("pokeInL", fields[4])?,
        poke_out_left: series("pokeOutL", fields[5])?,
        poke_in_mid: series("pokeInM", fields[6])?,
        poke_out_mid: series("pokeOutM", fields[7])?,
        poke_in_right: series("pokeInR", fields[8])?,
        poke_out_right: series("pokeOutR", fields[9])?,
        reward_start: series("rewardStart", fields[10])?,
        stop_signal_start: series("stopSignalStart", fields[11])?,
        laser_on: series("laserOn", fields[12])?,
        diagnostics: IngestDiagnostics::default(),
    })
}

/// Running ingestor worker for one session.
pub struct IngestorHandle {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl IngestorHandle {
    /// Ask the worker to stop after its current read.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the worker to finish and return the reader to its slot.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!("ingestor worker panicked: {e}");
        }
    }
}

/// Spawn the per-session telemetry worker.
pub fn spawn(
    slot: ReaderSlot,
    events: mpsc::Sender<TrialEvent>,
    poll_deadline: Duration,
) -> IngestorHandle {
    let token = CancellationToken::new();
    let worker_token = token.clone();

    let handle = tokio::spawn(async move {
        let Some(mut reader) = slot.take().await else {
            tracing::error!("device reader already checked out, ingestor not started");
            return;
        };
        tracing::info!("telemetry ingestor started");

        let mut diagnostics = IngestDiagnostics::default();
        let mut line = String::new();

        loop {
            if worker_token.is_cancelled() {
                break;
            }
            match tokio::time::timeout(poll_deadline, reader.read_line(&mut line)).await {
                // deadline passed with no complete line; loop to observe
                // cancellation, keeping any partial line for the next read
                Err(_) => continue,
                Ok(Ok(0)) => {
                    tracing::warn!("device stream closed unexpectedly");
                    break;
                }
                Ok(Ok(_)) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        match decode_trial_line(trimmed) {
                            Ok(mut event) => {
                                event.diagnostics = diagnostics.clone();
                                if events.send(event).await.is_err() {
                                    tracing::info!("trial event receiver closed");
                                    break;
                                }
                            }
                            Err(TrialDecodeError::LengthMismatch { fields }) => {
                                diagnostics.length_mismatches += 1;
                                tracing::debug!(fields, "dropped trial line with bad field count");
                            }
                            Err(TrialDecodeError::MissedData { field }) => {
                                diagnostics.missed_data += 1;
                                tracing::debug!(field, "dropped trial line with unusable value");
                            }
                        }
                    }
                    line.clear();
                }
                Ok(Err(e)) if e.kind() == ErrorKind::InvalidData => {
                    diagnostics.encoding_errors += 1;
                    tracing::debug!("dropped non-UTF-8 telemetry data");
                    line.clear();
                }
                Ok(Err(e)) => {
                    tracing::error!("device read error: {e}");
                    break;
                }
            }
        }

        slot.put_back(reader).await;
        tracing::info!(
            missed = diagnostics.missed_data,
            encoding = diagnostics.encoding_errors,
            length = diagnostics.length_mismatches,
            "telemetry ingestor stopped"
        );
    });

    IngestorHandle { handle, token }
}
