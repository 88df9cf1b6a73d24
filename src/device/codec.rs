// Apparatus command protocol.
//
// The control board accepts a single comma-delimited parameter line at
// session start, single-byte control commands, and a decimal stop-delay
// line during stage-5 sessions. The parameter line carries 15 fields in a
// fixed order, each followed by a comma, terminated by a line break:
//
//   stage,direction,lh,sessionLength,baseline,stopNum,punishment,
//   blockLength,blockNumber,reward,blinkerFreq,isLaser,laserFreq,
//   pulseDur,laserDur,\n

use crate::config::{Direction, SessionConfig};
use crate::error::{Result, RigError};

/// Number of fields in a parameter command.
pub const COMMAND_FIELDS: usize = 15;

/// Ceiling on stop trials per session imposed by the control board.
pub const MAX_STOP_TRIALS: u32 = 100;

/// Single-byte commands understood by the control board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Restart the board, ending the current protocol.
    Reset,
    /// Open the reward valve (manual test).
    RewardOn,
    /// Close the reward valve (manual test).
    RewardOff,
    /// Fire the stop-signal cue once (manual test).
    StopSignal,
    /// Switch the laser on (manual test).
    LaserOn,
    /// Switch the laser off (manual test).
    LaserOff,
}

impl ControlCommand {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            ControlCommand::Reset => b"r",
            ControlCommand::RewardOn => b"t",
            ControlCommand::RewardOff => b"s",
            ControlCommand::StopSignal => b"f",
            ControlCommand::LaserOn => b"l",
            ControlCommand::LaserOff => b"x",
        }
    }
}

/// Number of stop trials for a committed parameter set.
///
/// Stage 5 derives the count from the block layout, every other stage from
/// the post-baseline portion of the session. Counts above the board ceiling
/// are clamped and then aligned down to the block count; the alignment walk
/// is bounded by `block_number` steps, and a layout that cannot be aligned
/// within that bound is rejected.
pub fn stop_count(
    stage: u8,
    session_length: u32,
    baseline: u32,
    stop_percent: f64,
    block_length: u32,
    block_number: u32,
) -> Result<u32> {
    let raw = if stage == 5 {
        ((block_length as f64 * stop_percent).floor() as u32) * block_number
    } else {
        ((session_length.saturating_sub(baseline)) as f64 * stop_percent).floor() as u32
    };

    if raw <= MAX_STOP_TRIALS {
        return Ok(raw);
    }
    if block_number == 0 {
        return Err(RigError::InvalidConfig(
            "stop-trial count exceeds the board ceiling and blockNumber is zero".into(),
        ));
    }

    let mut count = MAX_STOP_TRIALS;
    for _ in 0..block_number {
        if count % block_number == 0 {
            return Ok(count);
        }
        count -= 1;
    }
    Err(RigError::InvalidConfig(format!(
        "no stop-trial count at or below {MAX_STOP_TRIALS} is divisible by {block_number}"
    )))
}

/// Render the session parameter line for the control board.
pub fn encode_parameters(cfg: &SessionConfig) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},\n",
        cfg.stage,
        cfg.direction,
        cfg.lh,
        cfg.session_length,
        cfg.baseline,
        cfg.stop_num,
        cfg.punishment,
        cfg.block_length,
        cfg.block_number,
        cfg.reward,
        cfg.blinker_freq,
        cfg.is_laser as u8,
        cfg.laser_freq,
        cfg.pulse_dur,
        cfg.laser_dur,
    )
}

/// Render the initial stop-signal delay line sent after baseline trials.
///
/// A usable median reaction time is transmitted as a decimal string; an
/// unusable one (absent or non-positive) transmits the literal zero.
pub fn encode_stop_delay(median_rt: Option<f64>) -> String {
    match median_rt {
        Some(m) if m > 0.0 => format!("{m}\n"),
        _ => "0\n".to_string(),
    }
}

/// A parameter line decoded back into its 15 fields.
///
/// This is the board's view of the command; used by the test suite and by
/// bench tooling to verify what a configuration puts on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedParameters {
    pub stage: u8,
    pub direction: Direction,
    pub lh: u32,
    pub session_length: u32,
    pub baseline: u32,
    pub stop_num: u32,
    pub punishment: u32,
    pub block_length: u32,
    pub block_number: u32,
    pub reward: u32,
    pub blinker_freq: u32,
    pub is_laser: bool,
    pub laser_freq: u32,
    pub pulse_dur: u32,
    pub laser_dur: u32,
}

/// Reference decoder for the parameter line.
pub fn decode_parameters(line: &str) -> Result<DecodedParameters> {
    let body = line.trim_end_matches(['\n', '\r']);
    let fields: Vec<&str> = body.split(',').collect();
    // 15 fields each followed by a comma leaves a trailing empty token
    if fields.len() != COMMAND_FIELDS + 1 || !fields[COMMAND_FIELDS].is_empty() {
        return Err(RigError::Decode(format!(
            "expected {COMMAND_FIELDS} comma-terminated fields, got {:?}",
            body
        )));
    }

    fn num<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
        raw.parse()
            .map_err(|_| RigError::Decode(format!("bad {name} field {raw:?}")))
    }

    Ok(DecodedParameters {
        stage: num("stage", fields[0])?,
        direction: Direction::from_wire(fields[1])?,
        lh: num("lh", fields[2])?,
        session_length: num("sessionLength", fields[3])?,
        baseline: num("baseline", fields[4])?,
        stop_num: num("stopNum", fields[5])?,
        punishment: num("punishment", fields[6])?,
        block_length: num("blockLength", fields[7])?,
        block_number: num("blockNumber", fields[8])?,
        reward: num("reward", fields[9])?,
        blinker_freq: num("blinkerFreq", fields[10])?,
        is_laser: num::<u8>("isLaser", fields[11])? != 0,
        laser_freq: num("laserFreq", fields[12])?,
        pulse_dur: num("pulseDur", fields[13])?,
        laser_dur: num("laserDur", fields[14])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, SessionSpec};

    fn committed() -> SessionConfig {
        SessionConfig::commit(&SessionSpec {
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
        })
        .unwrap()
    }

    #[test]
    fn parameter_line_shape_and_order() {
        let cfg = committed();
        let line = encode_parameters(&cfg);
        assert!(line.ends_with(",\n"));
        assert!(line.starts_with("5,l,5120,120,20,60,2048,40,3,102,20,1,"));
    }

    #[test]
    fn encode_then_decode_recovers_all_fields() {
        let cfg = committed();
        let decoded = decode_parameters(&encode_parameters(&cfg)).unwrap();
        assert_eq!(decoded.stage, cfg.stage);
        assert_eq!(decoded.direction, cfg.direction);
        assert_eq!(decoded.lh, cfg.lh);
        assert_eq!(decoded.session_length, cfg.session_length);
        assert_eq!(decoded.baseline, cfg.baseline);
        assert_eq!(decoded.stop_num, cfg.stop_num);
        assert_eq!(decoded.punishment, cfg.punishment);
        assert_eq!(decoded.block_length, cfg.block_length);
        assert_eq!(decoded.block_number, cfg.block_number);
        assert_eq!(decoded.reward, cfg.reward);
        assert_eq!(decoded.blinker_freq, cfg.blinker_freq);
        assert_eq!(decoded.is_laser, cfg.is_laser);
        assert_eq!(decoded.laser_freq, cfg.laser_freq);
        assert_eq!(decoded.pulse_dur, cfg.pulse_dur);
        assert_eq!(decoded.laser_dur, cfg.laser_dur);
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        assert!(decode_parameters("1,l,100,\n").is_err());
        // no trailing comma
        assert!(decode_parameters("5,l,5120,120,20,60,2048,40,3,102,20,1,20,10,1024\n").is_err());
    }

    #[test]
    fn stop_count_clamp_requires_nonzero_blocks() {
        // raw 200 with no block structure cannot be aligned
        assert!(stop_count(4, 500, 50, 0.9, 0, 0).is_err());
        // raw 210, clamp to 100, align down to 98
        assert_eq!(stop_count(5, 120, 20, 0.5, 60, 7).unwrap(), 98);
    }

    #[test]
    fn stop_delay_line_transmits_zero_for_unusable_medians() {
        assert_eq!(encode_stop_delay(Some(412.5)), "412.5\n");
        assert_eq!(encode_stop_delay(Some(412.0)), "412\n");
        assert_eq!(encode_stop_delay(Some(-3.0)), "0\n");
        assert_eq!(encode_stop_delay(None), "0\n");
    }

    #[test]
    fn control_commands_are_single_bytes() {
        assert_eq!(ControlCommand::Reset.as_bytes(), b"r");
        assert_eq!(ControlCommand::RewardOn.as_bytes(), b"t");
        assert_eq!(ControlCommand::RewardOff.as_bytes(), b"s");
        assert_eq!(ControlCommand::StopSignal.as_bytes(), b"f");
        assert_eq!(ControlCommand::LaserOn.as_bytes(), b"l");
        assert_eq!(ControlCommand::LaserOff.as_bytes(), b"x");
    }
}
