//! Ping run summary

use lanscope_common::{PingResult, PingStatistics};

/// Summarize a ping run. `requested` is the count asked for, which may be
/// larger than the results collected when the run was stopped early.
/// Returns `None` for an empty run.
pub fn calculate_statistics(results: &[PingResult], requested: Option<usize>) -> Option<PingStatistics> {
    let first = results.first()?;

    let transmitted = requested.unwrap_or(results.len());
    let times: Vec<f64> = results
        .iter()
        .filter(|r| !r.is_timeout)
        .map(|r| r.time_ms)
        .collect();
    let received = times.len();

    let packet_loss = if transmitted == 0 {
        0.0
    } else {
        transmitted.saturating_sub(received) as f64 / transmitted as f64 * 100.0
    };

    let (min_ms, max_ms, avg_ms) = if times.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (min, max, times.iter().sum::<f64>() / received as f64)
    };

    let std_dev_ms = (received >= 2).then(|| {
        let sum_sq: f64 = times.iter().map(|t| (t - avg_ms).powi(2)).sum();
        (sum_sq / (received - 1) as f64).sqrt()
    });

    Some(PingStatistics {
        host: first.host.clone(),
        transmitted,
        received,
        packet_loss,
        min_ms,
        max_ms,
        avg_ms,
        std_dev_ms,
    })
}
