// Trial statistics consumed by the aggregator: reaction-time extraction,
// correct-response rates per trial type and the mean-method SSRT estimate.

/// Pairwise reaction times between a poke-out series and a poke-in series.
///
/// Series are aligned by trial index; a trial missing either event
/// contributes nothing.
pub fn reaction_times(poke_out: &[i64], poke_in: &[i64]) -> Vec<i64> {
    poke_out
        .iter()
        .zip(poke_in.iter())
        .map(|(out, inn)| out - inn)
        .collect()
}

/// Median of a sample, `None` when empty.
pub fn median(samples: &[i64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid] as f64)
    } else {
        Some((sorted[mid - 1] + sorted[mid]) as f64 / 2.0)
    }
}

/// Correct-response rate split by trial type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectRates {
    /// Fraction of go trials that ended rewarded, `None` before the first go trial.
    pub go: Option<f64>,
    /// Fraction of stop trials that ended rewarded, `None` before the first stop trial.
    pub stop: Option<f64>,
}

/// Rates over parallel per-trial series of type codes (0 = go, 1 = stop)
/// and reward flags.
pub fn correct_rates(kinds: &[u8], rewarded: &[u8]) -> CorrectRates {
    let mut go = (0u64, 0u64);
    let mut stop = (0u64, 0u64);
    for (kind, flag) in kinds.iter().zip(rewarded.iter()) {
        let slot = if *kind == 0 { &mut go } else { &mut stop };
        slot.0 += 1;
        if *flag != 0 {
            slot.1 += 1;
        }
    }
    let rate = |(total, hit): (u64, u64)| {
        if total > 0 {
            Some(hit as f64 / total as f64)
        } else {
            None
        }
    };
    CorrectRates {
        go: rate(go),
        stop: rate(stop),
    }
}

/// Stop-signal reaction time, mean method: mean go RT minus mean stop delay.
pub fn estimate_ssrt(go_reaction_times: &[i64], stop_delays: &[i64]) -> Option<f64> {
    let mean = |xs: &[i64]| {
        if xs.is_empty() {
            None
        } else {
            Some(xs.iter().sum::<i64>() as f64 / xs.len() as f64)
        }
    };
    Some(mean(go_reaction_times)? - mean(stop_delays)?)
}
