// Trial aggregation: reaction-time extraction, the adaptive stop-delay
// handoff at the baseline boundary, correct-response rates, and the
// end-of-session cue.
//
// The aggregator never touches the device itself; anything that must reach
// the apparatus comes back in the summary for the controller to transmit,
// keeping all writes on the single writer task.

use crate::alert::CuePlayer;
use crate::config::{Direction, SessionConfig};
use crate::device::codec;
use crate::session::types::SessionLog;
use crate::stats::{self, CorrectRates};

/// What one trial observation produced.
#[derive(Debug, Default)]
pub struct TrialSummary {
    /// Reaction times over the session so far, direction-mapped.
    pub reaction_times: Vec<i64>,
    /// Correct-response rates split by trial type.
    pub rates: CorrectRates,
    /// Stop-delay line to transmit to the apparatus, set exactly once per
    /// stage-5 session when the trial count reaches the baseline.
    pub stop_delay_line: Option<String>,
    /// Whether this observation started the end-of-session cue.
    pub cue_started: bool,
}

pub struct TrialAggregator {
    cue: Box<dyn CuePlayer>,
}

impl TrialAggregator {
    pub fn new(cue: Box<dyn CuePlayer>) -> Self {
        Self { cue }
    }

    /// Observe the session after one more trial has been absorbed.
    pub fn observe(
        &mut self,
        cfg: &SessionConfig,
        log: &SessionLog,
        trial_count: u64,
    ) -> TrialSummary {
        let mut summary = TrialSummary::default();

        // stages 1 and 2 train the approach only; no timing analysis yet
        if cfg.stage > 2 {
            summary.reaction_times = match cfg.direction {
                Direction::Left => stats::reaction_times(&log.poke_out_right, &log.poke_in_left),
                Direction::Right => stats::reaction_times(&log.poke_out_left, &log.poke_in_right),
            };

            if cfg.stage == 5 && trial_count == cfg.baseline as u64 {
                let median = stats::median(&summary.reaction_times);
                summary.stop_delay_line = Some(codec::encode_stop_delay(median));
            }

            summary.rates = stats::correct_rates(&log.trial_kinds, &log.rewarded);
        }

        if trial_count > cfg.session_length as u64 {
            if self.cue.is_busy() {
                tracing::debug!("end-of-session cue already sounding");
            } else {
                match self.cue.play() {
                    Ok(()) => summary.cue_started = true,
                    Err(e) => tracing::warn!("end-of-session cue failed: {e}"),
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, SessionSpec};
    use crate::error::Result;
    use crate::session::types::{IngestDiagnostics, TrialEvent, TrialKind};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ScriptedCue {
        busy: Arc<AtomicBool>,
        plays: Arc<AtomicBool>,
    }

    impl CuePlayer for ScriptedCue {
        fn is_busy(&mut self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }

        fn play(&mut self) -> Result<()> {
            self.plays.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn cfg(stage: u8, direction: Direction) -> SessionConfig {
        SessionConfig::commit(&SessionSpec {
            stage,
            direction,
            baseline: 20,
            session_length: 120,
            stop_percent: 0.5,
            block_length: 40,
            block_number: 3,
            lh: 5_000,
            reward: 100,
            punishment: 2_000,
            blinker_freq: 20,
            laser_freq: 20,
            pulse_dur: 10,
            laser_dur: 1_000,
        })
        .unwrap()
    }

    fn trial(poke_in_left: i64, poke_out_right: i64) -> TrialEvent {
        TrialEvent {
            kind: TrialKind::Go,
            rewarded: true,
            stop_delay_ms: 0,
            poke_in_left: vec![poke_in_left],
            poke_out_left: vec![poke_out_right + 5],
            poke_in_mid: vec![],
            poke_out_mid: vec![],
            poke_in_right: vec![poke_in_left + 1],
            poke_out_right: vec![poke_out_right],
            reward_start: vec![],
            stop_signal_start: vec![],
            laser_on: vec![],
            diagnostics: IngestDiagnostics::default(),
        }
    }

    fn aggregator() -> (TrialAggregator, Arc<AtomicBool>, Arc<AtomicBool>) {
        let busy = Arc::new(AtomicBool::new(false));
        let plays = Arc::new(AtomicBool::new(false));
        let agg = TrialAggregator::new(Box::new(ScriptedCue {
            busy: busy.clone(),
            plays: plays.clone(),
        }));
        (agg, busy, plays)
    }

    #[test]
    fn reaction_times_follow_the_direction_mapping() {
        let (mut agg, _, _) = aggregator();
        let mut log = SessionLog::default();
        log.absorb(&trial(100, 450));

        let left = agg.observe(&cfg(5, Direction::Left), &log, 1);
        assert_eq!(left.reaction_times, vec![350]);

        // right approach uses pokeOutLeft - pokeInRight
        let right = agg.observe(&cfg(5, Direction::Right), &log, 1);
        assert_eq!(right.reaction_times, vec![455 - 101]);
    }

    #[test]
    fn stop_delay_emitted_only_at_the_baseline_boundary_of_stage5() {
        let (mut agg, _, _) = aggregator();
        let config = cfg(5, Direction::Left);
        let mut log = SessionLog::default();
        for i in 0..20 {
            log.absorb(&trial(100 * i, 100 * i + 400));
        }

        assert!(agg.observe(&config, &log, 19).stop_delay_line.is_none());
        let at_baseline = agg.observe(&config, &log, 20);
        assert_eq!(at_baseline.stop_delay_line.as_deref(), Some("400\n"));
        assert!(agg.observe(&config, &log, 21).stop_delay_line.is_none());
    }

    #[test]
    fn non_positive_median_transmits_literal_zero() {
        let (mut agg, _, _) = aggregator();
        let config = cfg(5, Direction::Left);
        let mut log = SessionLog::default();
        for i in 0..20 {
            // poke-out before poke-in: negative reaction time
            log.absorb(&trial(500 + i, 100));
        }
        let summary = agg.observe(&config, &log, 20);
        assert_eq!(summary.stop_delay_line.as_deref(), Some("0\n"));
    }

    #[test]
    fn stage4_never_emits_a_stop_delay() {
        let (mut agg, _, _) = aggregator();
        let config = cfg(4, Direction::Left);
        let mut log = SessionLog::default();
        for i in 0..20 {
            log.absorb(&trial(100 * i, 100 * i + 400));
        }
        assert!(agg.observe(&config, &log, 20).stop_delay_line.is_none());
    }

    #[test]
    fn early_stages_skip_timing_analysis() {
        let (mut agg, _, _) = aggregator();
        let config = cfg(2, Direction::Left);
        let mut log = SessionLog::default();
        log.absorb(&trial(100, 450));
        let summary = agg.observe(&config, &log, 1);
        assert!(summary.reaction_times.is_empty());
        assert_eq!(summary.rates, CorrectRates::default());
    }

    #[test]
    fn cue_respects_the_player_busy_state_and_retriggers_after() {
        let (mut agg, busy, plays) = aggregator();
        let config = cfg(5, Direction::Left);
        let log = SessionLog::default();

        // below threshold: nothing
        assert!(!agg.observe(&config, &log, 120).cue_started);
        assert!(!plays.load(Ordering::SeqCst));

        // past threshold with the player idle: cue starts
        assert!(agg.observe(&config, &log, 121).cue_started);
        assert!(plays.load(Ordering::SeqCst));

        // player reports busy: the guard holds, no duplicate trigger
        busy.store(true, Ordering::SeqCst);
        plays.store(false, Ordering::SeqCst);
        assert!(!agg.observe(&config, &log, 122).cue_started);
        assert!(!plays.load(Ordering::SeqCst));

        // playback ended: the next qualifying trial re-triggers
        busy.store(false, Ordering::SeqCst);
        assert!(agg.observe(&config, &log, 123).cue_started);
        assert!(plays.load(Ordering::SeqCst));
    }
}
