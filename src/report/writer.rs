// Session report writer.
//
// The report is the flat text file the lab's analysis scripts consume:
// a header with the trial count and every configuration field in bench
// units, then one labeled section per telemetry channel with the raw
// collected sequence. Reports are named by local time at minute
// resolution; a name already taken grows a " new" suffix until unique.

use crate::config::{descale, SessionConfig};
use crate::error::Result;
use crate::session::types::SessionLog;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

const REPORT_EXTENSION: &str = ".txt";

/// Write the completed session to a uniquely named report file and return
/// its path.
pub fn write_report(dir: &Path, cfg: &SessionConfig, log: &SessionLog) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H-%M");
    write_report_named(dir, &format!("SST Report {stamp}{REPORT_EXTENSION}"), cfg, log)
}

/// Inner writer with the timestamp factored out so collision handling is
/// testable without racing the wall clock.
fn write_report_named(
    dir: &Path,
    preferred_name: &str,
    cfg: &SessionConfig,
    log: &SessionLog,
) -> Result<PathBuf> {
    let mut name = preferred_name.to_string();
    while dir.join(&name).exists() {
        match name.strip_suffix(REPORT_EXTENSION) {
            Some(stem) => name = format!("{stem} new{REPORT_EXTENSION}"),
            None => name.push_str(" new"),
        }
    }
    let path = dir.join(&name);

    let mut file = std::fs::File::create(&path)?;
    file.write_all(render(cfg, log).as_bytes())?;
    Ok(path)
}

fn render(cfg: &SessionConfig, log: &SessionLog) -> String {
    let mut out = String::new();
    out.push_str("General Message:\n");
    let _ = write!(out, "trialNum: {} ", log.trials_recorded());
    for (key, value) in config_fields(cfg) {
        let _ = write!(out, "{key}: {value} ");
    }

    for (label, series) in channel_sections(log) {
        let _ = write!(out, "\n{label}\n{}", format_series(&series));
    }
    let _ = write!(
        out,
        "\nmissedDataError\n{}\nencodingError\n{}\ndataLengthError\n{}",
        log.diagnostics.missed_data,
        log.diagnostics.encoding_errors,
        log.diagnostics.length_mismatches
    );
    out.push('\n');
    out
}

/// Configuration fields in report order, hardware-scaled fields rendered
/// back in bench units.
fn config_fields(cfg: &SessionConfig) -> Vec<(&'static str, String)> {
    vec![
        ("stage", cfg.stage.to_string()),
        ("direction", cfg.direction.to_string()),
        ("baseline", cfg.baseline.to_string()),
        ("sessionLength", cfg.session_length.to_string()),
        ("lh", descale(cfg.lh).to_string()),
        ("reward", descale(cfg.reward).to_string()),
        ("punishment", descale(cfg.punishment).to_string()),
        ("blinkerFreq", cfg.blinker_freq.to_string()),
        ("isLaser", (cfg.is_laser as u8).to_string()),
        ("stopPercent", cfg.stop_percent.to_string()),
        ("blockLength", cfg.block_length.to_string()),
        ("blockNumber", cfg.block_number.to_string()),
        ("laserFreq", cfg.laser_freq.to_string()),
        ("pulseDur", descale(cfg.pulse_dur).to_string()),
        ("laserDur", descale(cfg.laser_dur).to_string()),
    ]
}

fn channel_sections(log: &SessionLog) -> Vec<(&'static str, Vec<i64>)> {
    vec![
        ("pokeInL", log.poke_in_left.clone()),
        ("pokeOutL", log.poke_out_left.clone()),
        ("pokeInM", log.poke_in_mid.clone()),
        ("pokeOutM", log.poke_out_mid.clone()),
        ("pokeInR", log.poke_in_right.clone()),
        ("pokeOutR", log.poke_out_right.clone()),
        ("rewardStart", log.reward_start.clone()),
        ("stopSignalStart", log.stop_signal_start.clone()),
        ("trialType", log.trial_kinds.iter().map(|k| *k as i64).collect()),
        ("isRewarded", log.rewarded.iter().map(|r| *r as i64).collect()),
        ("SSDs", log.stop_delays.clone()),
        ("laserOn", log.laser_on.clone()),
    ]
}

fn format_series(series: &[i64]) -> String {
    let body = series
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{body}]")
}
