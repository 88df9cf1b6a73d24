// Session configuration: user-entered parameters, validation and the
// committed, hardware-scaled form sent to the apparatus.
//
// A `SessionSpec` is what the experimenter writes (a JSON file with the
// values as they appear on the bench). Committing a spec normalizes the
// fields the selected training stage does not use, enforces field ranges,
// applies the hardware clock scale and derives the stop-trial count. The
// resulting `SessionConfig` is immutable for the lifetime of the session.

use crate::device::codec;
use crate::error::{Result, RigError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale between bench units and apparatus clock ticks.
pub const HARDWARE_SCALE: f64 = 1.024;

/// Approach direction of the trained response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "l")]
    Left,
    #[serde(rename = "r")]
    Right,
}

impl Direction {
    pub fn from_wire(s: &str) -> Result<Self> {
        match s {
            "l" => Ok(Direction::Left),
            "r" => Ok(Direction::Right),
            other => Err(RigError::Decode(format!("unknown direction {other:?}"))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "l"),
            Direction::Right => write!(f, "r"),
        }
    }
}

/// Session parameters as entered by the experimenter, in bench units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    pub stage: u8,
    pub direction: Direction,
    pub baseline: u32,
    pub session_length: u32,
    #[serde(default)]
    pub stop_percent: f64,
    #[serde(default)]
    pub block_length: u32,
    #[serde(default)]
    pub block_number: u32,
    pub lh: u32,
    pub reward: u32,
    pub punishment: u32,
    pub blinker_freq: u32,
    #[serde(default)]
    pub laser_freq: u32,
    #[serde(default)]
    pub pulse_dur: u32,
    #[serde(default)]
    pub laser_dur: u32,
}

impl SessionSpec {
    /// Zero out the fields the selected stage does not use and raise the
    /// baseline floor for the adaptive stage. Stages 1-3 and 6 run without
    /// stop blocks or the laser; stage 4 runs stop blocks without the laser;
    /// stage 5 uses everything and needs at least 20 baseline trials for a
    /// usable reaction-time estimate.
    fn normalized(&self) -> SessionSpec {
        let mut spec = self.clone();
        match spec.stage {
            4 => {
                spec.laser_freq = 0;
                spec.pulse_dur = 0;
                spec.laser_dur = 0;
            }
            5 => {
                if spec.baseline < 20 {
                    tracing::warn!(
                        baseline = spec.baseline,
                        "baseline below the stage-5 floor, raising to 20"
                    );
                    spec.baseline = 20;
                }
            }
            _ => {
                spec.stop_percent = 0.0;
                spec.block_length = 0;
                spec.block_number = 0;
                spec.laser_freq = 0;
                spec.pulse_dur = 0;
                spec.laser_dur = 0;
            }
        }
        spec
    }

    fn validate(&self) -> Result<()> {
        fn check(name: &str, value: u32, lo: u32, hi: u32) -> Result<()> {
            if value < lo || value > hi {
                return Err(RigError::InvalidConfig(format!(
                    "{name} must be between {lo} and {hi}, got {value}"
                )));
            }
            Ok(())
        }

        if !(1..=6).contains(&self.stage) {
            return Err(RigError::InvalidConfig(format!(
                "stage must be between 1 and 6, got {}",
                self.stage
            )));
        }
        check("baseline", self.baseline, 1, 500)?;
        check("sessionLength", self.session_length, 1, 500)?;
        check("lh", self.lh, 100, 30_000)?;
        check("reward", self.reward, 10, 1_000)?;
        check("punishment", self.punishment, 1_000, 10_000)?;
        check("blinkerFreq", self.blinker_freq, 5, 100)?;
        if self.session_length < self.baseline {
            return Err(RigError::InvalidConfig(format!(
                "sessionLength ({}) must not be smaller than baseline ({})",
                self.session_length, self.baseline
            )));
        }
        if matches!(self.stage, 4 | 5) {
            check("blockLength", self.block_length, 1, 500)?;
            check("blockNumber", self.block_number, 1, 10)?;
            if !(0.0..=1.0).contains(&self.stop_percent) {
                return Err(RigError::InvalidConfig(format!(
                    "stopPercent must be a fraction between 0 and 1, got {}",
                    self.stop_percent
                )));
            }
        }
        Ok(())
    }
}

/// Committed session parameters in apparatus units.
///
/// `lh`, `reward`, `punishment`, `pulse_dur` and `laser_dur` carry the
/// hardware scale; `stop_num` is derived at commit time so an invalid
/// stop-trial layout is rejected before anything reaches the device.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub stage: u8,
    pub direction: Direction,
    pub baseline: u32,
    pub session_length: u32,
    pub stop_percent: f64,
    pub block_length: u32,
    pub block_number: u32,
    pub lh: u32,
    pub reward: u32,
    pub punishment: u32,
    pub blinker_freq: u32,
    pub laser_freq: u32,
    pub pulse_dur: u32,
    pub laser_dur: u32,
    pub is_laser: bool,
    pub stop_num: u32,
}

impl SessionConfig {
    /// Validate and freeze a spec for use by a session.
    pub fn commit(spec: &SessionSpec) -> Result<SessionConfig> {
        let spec = spec.normalized();
        spec.validate()?;

        let stop_num = codec::stop_count(
            spec.stage,
            spec.session_length,
            spec.baseline,
            spec.stop_percent,
            spec.block_length,
            spec.block_number,
        )?;

        let laser_freq = spec.laser_freq;
        let pulse_dur = scale(spec.pulse_dur);
        let laser_dur = scale(spec.laser_dur);
        let is_laser = spec.stage == 5 && laser_freq > 0 && pulse_dur > 0 && laser_dur > 0;

        Ok(SessionConfig {
            stage: spec.stage,
            direction: spec.direction,
            baseline: spec.baseline,
            session_length: spec.session_length,
            stop_percent: spec.stop_percent,
            block_length: spec.block_length,
            block_number: spec.block_number,
            lh: scale(spec.lh),
            reward: scale(spec.reward),
            punishment: scale(spec.punishment),
            blinker_freq: spec.blinker_freq,
            laser_freq,
            pulse_dur,
            laser_dur,
            is_laser,
            stop_num,
        })
    }
}

/// Bench units to apparatus clock ticks.
pub fn scale(value: u32) -> u32 {
    (value as f64 * HARDWARE_SCALE).round() as u32
}

/// Apparatus clock ticks back to bench units.
pub fn descale(value: u32) -> u32 {
    (value as f64 / HARDWARE_SCALE).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage5_spec() -> SessionSpec {
        SessionSpec {
            stage: 5,
            direction: Direction::Left,
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
        }
    }

    #[test]
    fn commit_derives_stop_num_without_clamping() {
        let cfg = SessionConfig::commit(&stage5_spec()).unwrap();
        assert_eq!(cfg.stop_num, 60);
        assert_eq!(cfg.stop_num % cfg.block_number, 0);
    }

    #[test]
    fn stage5_baseline_floor_is_raised_before_derivation() {
        let mut spec = stage5_spec();
        spec.baseline = 10;
        let cfg = SessionConfig::commit(&spec).unwrap();
        assert_eq!(cfg.baseline, 20);
    }

    #[test]
    fn stop_num_never_exceeds_100_and_stays_block_aligned() {
        let mut spec = stage5_spec();
        spec.block_length = 60;
        spec.block_number = 7;
        spec.stop_percent = 0.5;
        // raw = floor(60 * 0.5) * 7 = 210 -> clamp to 100, align down to 98
        let cfg = SessionConfig::commit(&spec).unwrap();
        assert!(cfg.stop_num <= 100);
        assert_eq!(cfg.stop_num, 98);
        assert_eq!(cfg.stop_num % 7, 0);
    }

    #[test]
    fn block_number_zero_is_rejected_under_block_structure() {
        let mut spec = stage5_spec();
        spec.block_number = 0;
        assert!(matches!(
            SessionConfig::commit(&spec),
            Err(RigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn early_stages_zero_unused_fields() {
        let mut spec = stage5_spec();
        spec.stage = 2;
        let cfg = SessionConfig::commit(&spec).unwrap();
        assert_eq!(cfg.stop_percent, 0.0);
        assert_eq!(cfg.block_length, 0);
        assert_eq!(cfg.block_number, 0);
        assert_eq!(cfg.laser_freq, 0);
        assert_eq!(cfg.stop_num, 0);
        assert!(!cfg.is_laser);
    }

    #[test]
    fn stage4_keeps_blocks_but_drops_laser() {
        let mut spec = stage5_spec();
        spec.stage = 4;
        let cfg = SessionConfig::commit(&spec).unwrap();
        assert_eq!(cfg.block_length, 40);
        assert_eq!(cfg.laser_freq, 0);
        assert!(!cfg.is_laser);
        // stage != 5 formula: floor((120 - 20) * 0.5) = 50
        assert_eq!(cfg.stop_num, 50);
    }

    #[test]
    fn laser_flag_requires_all_three_laser_fields() {
        let mut spec = stage5_spec();
        let cfg = SessionConfig::commit(&spec).unwrap();
        assert!(cfg.is_laser);

        spec.pulse_dur = 0;
        let cfg = SessionConfig::commit(&spec).unwrap();
        assert!(!cfg.is_laser);
    }

    #[test]
    fn session_shorter_than_baseline_is_rejected() {
        let mut spec = stage5_spec();
        spec.session_length = 10;
        spec.baseline = 30;
        assert!(SessionConfig::commit(&spec).is_err());
    }

    #[test]
    fn hardware_scale_round_trips_over_validated_ranges() {
        for value in [10, 100, 999, 5_000, 30_000] {
            assert_eq!(descale(scale(value)), value);
        }
    }

    #[test]
    fn direction_serde_uses_wire_letters() {
        assert_eq!(serde_json::to_string(&Direction::Left).unwrap(), "\"l\"");
        assert_eq!(Direction::from_wire("r").unwrap(), Direction::Right);
        assert!(Direction::from_wire("x").is_err());
    }
}
