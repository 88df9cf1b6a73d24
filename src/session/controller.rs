// Session lifecycle orchestration.
//
// The controller owns the Idle -> Armed -> Running -> Ending -> Idle state
// machine. Starting a session resets the runtime counters, puts the
// parameter line on the wire, spawns the single ingestor worker and the
// two periodic tasks; every trial event updates the counters, runs the
// aggregator, and flushes the safety snapshot; ending a session resets the
// board, drains the worker, writes the report and clears the snapshot.
//
// At most one controller exists per process and it never runs two
// sessions at once: `start` refuses anything but the Armed phase.

use crate::config::{SessionConfig, SessionSpec};
use crate::device::codec::{self, ControlCommand};
use crate::device::ingest::{self, IngestorHandle};
use crate::device::link::{DeviceWriter, ReaderSlot};
use crate::error::{Result, RigError};
use crate::report::snapshot::TempSnapshot;
use crate::report::writer;
use crate::session::aggregator::TrialAggregator;
use crate::session::types::{SessionHandle, SessionLog, SessionPhase, TrialEvent};
use crate::stats;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Tunables for a controller instance.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Where reports and the safety snapshot are written.
    pub report_dir: PathBuf,
    /// How long the ingestor waits on the port before re-checking for
    /// cancellation.
    pub poll_deadline: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("."),
            poll_deadline: Duration::from_millis(500),
        }
    }
}

pub struct SessionController {
    phase: SessionPhase,
    config: Option<SessionConfig>,
    log: SessionLog,
    handle: SessionHandle,
    writer: DeviceWriter,
    reader_slot: ReaderSlot,
    aggregator: TrialAggregator,
    snapshot: TempSnapshot,
    settings: ControllerSettings,
    ingestor: Option<IngestorHandle>,
    timer_token: CancellationToken,
}

impl SessionController {
    pub fn new(
        writer: DeviceWriter,
        reader_slot: ReaderSlot,
        handle: SessionHandle,
        aggregator: TrialAggregator,
        settings: ControllerSettings,
    ) -> Self {
        let snapshot = TempSnapshot::new(&settings.report_dir);
        Self {
            phase: SessionPhase::Idle,
            config: None,
            log: SessionLog::default(),
            handle,
            writer,
            reader_slot,
            aggregator,
            snapshot,
            settings,
            ingestor: None,
            timer_token: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    /// Commit a session configuration. Allowed while idle or armed only;
    /// a running session keeps the configuration it started with.
    pub fn commit(&mut self, spec: &SessionSpec) -> Result<&SessionConfig> {
        if !matches!(self.phase, SessionPhase::Idle | SessionPhase::Armed) {
            return Err(RigError::InvalidState(
                "configuration can only be committed while idle or armed".into(),
            ));
        }
        let cfg = SessionConfig::commit(spec)?;
        tracing::info!(
            stage = cfg.stage,
            direction = %cfg.direction,
            stop_num = cfg.stop_num,
            "session configuration committed"
        );
        self.phase = SessionPhase::Armed;
        Ok(self.config.insert(cfg))
    }

    /// Start the committed session.
    ///
    /// Returns the channel on which the caller receives trial events to
    /// feed back through [`SessionController::on_trial`].
    pub async fn start(&mut self) -> Result<mpsc::Receiver<TrialEvent>> {
        if self.phase != SessionPhase::Armed {
            return Err(RigError::InvalidState(
                "start requires an armed session".into(),
            ));
        }
        let cfg = self
            .config
            .clone()
            .ok_or_else(|| RigError::InvalidState("armed without a configuration".into()))?;

        self.log.clear();
        self.handle.begin_session();

        // parameter line first; a dead link must fail the start, not the
        // first trial
        self.writer
            .send(codec::encode_parameters(&cfg).into_bytes())
            .await?;

        let (events_tx, events_rx) = mpsc::channel(64);
        self.ingestor = Some(ingest::spawn(
            self.reader_slot.clone(),
            events_tx,
            self.settings.poll_deadline,
        ));

        self.timer_token = CancellationToken::new();
        self.spawn_elapsed_task();
        self.spawn_liveness_task();

        self.phase = SessionPhase::Running;
        tracing::info!(stage = cfg.stage, "session started");
        Ok(events_rx)
    }

    /// Handle one decoded trial from the ingestor.
    pub async fn on_trial(&mut self, event: TrialEvent) -> Result<()> {
        if self.phase != SessionPhase::Running {
            tracing::debug!("trial event outside a running session ignored");
            return Ok(());
        }
        let cfg = self
            .config
            .clone()
            .ok_or_else(|| RigError::InvalidState("running without a configuration".into()))?;

        let trial_count = self.handle.record_trial();
        self.log.absorb(&event);

        let summary = self.aggregator.observe(&cfg, &self.log, trial_count);
        if let Some(line) = &summary.stop_delay_line {
            self.writer.send(line.clone().into_bytes()).await?;
            tracing::info!(delay = %line.trim(), "initial stop-signal delay sent");
        }
        if summary.cue_started {
            tracing::info!(trial_count, "session length reached, cue started");
        }
        tracing::info!(
            trial_count,
            go_rate = summary.rates.go,
            stop_rate = summary.rates.stop,
            "trial recorded"
        );

        self.snapshot.persist(&self.log)?;
        Ok(())
    }

    /// End the running session: reset the board, stop the periodic tasks,
    /// drain the ingestor, write the report and clear the safety snapshot.
    pub async fn end(&mut self) -> Result<PathBuf> {
        if self.phase != SessionPhase::Running {
            return Err(RigError::InvalidState(
                "end requires a running session".into(),
            ));
        }
        self.phase = SessionPhase::Ending;

        // a failed reset must not strand the collected data; the report
        // below is still written
        if let Err(e) = self.writer.send(ControlCommand::Reset.as_bytes()).await {
            tracing::warn!("apparatus reset failed during session end: {e}");
        }

        self.timer_token.cancel();
        if let Some(worker) = self.ingestor.take() {
            worker.cancel();
            worker.join().await;
        }
        self.handle.end_session();

        let cfg = self
            .config
            .clone()
            .ok_or_else(|| RigError::InvalidState("ending without a configuration".into()))?;

        if cfg.stage == 5 {
            let reaction_times = match cfg.direction {
                crate::config::Direction::Left => {
                    stats::reaction_times(&self.log.poke_out_right, &self.log.poke_in_left)
                }
                crate::config::Direction::Right => {
                    stats::reaction_times(&self.log.poke_out_left, &self.log.poke_in_right)
                }
            };
            if let Some(ssrt) = stats::estimate_ssrt(&reaction_times, &self.log.stop_delays) {
                tracing::info!(ssrt_ms = ssrt, "stop-signal reaction time estimate");
            }
        }

        let path = writer::write_report(&self.settings.report_dir, &cfg, &self.log)?;
        self.snapshot.clear()?;

        self.phase = SessionPhase::Armed;
        tracing::info!(report = %path.display(), "session ended");
        Ok(path)
    }

    fn spawn_elapsed_task(&self) {
        let handle = self.handle.clone();
        let token = self.timer_token.child_token();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            tick.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tick.tick() => handle.tick_elapsed(),
                }
            }
        });
    }

    fn spawn_liveness_task(&self) {
        let handle = self.handle.clone();
        let token = self.timer_token.child_token();
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(500));
            tick.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tick.tick() => handle.toggle_liveness(),
                }
            }
        });
    }
}
