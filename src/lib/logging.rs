//! Run summaries written through the `log` facade.
//!
//! [`OperationTimer`] brackets the calling run with start and completion messages, and
//! [`CallSummary`] tallies the reported rows by variant type for the closing summary.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::pipeline::{RegionOutput, Rows};
use crate::synth::VarType;

/// Formats an integer count with thousands separators.
///
/// ```
/// use vardict_lib::logging::format_count;
///
/// assert_eq!(format_count(0), "0");
/// assert_eq!(format_count(1234567), "1,234,567");
/// ```
#[must_use]
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Formats a fraction as a percentage.
#[must_use]
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.decimals$}%", value * 100.0)
}

/// Formats a duration as `45s`, `2m 15s` or `1h 30m`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, mins, secs) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (hours, mins, secs) {
        (0, 0, s) => format!("{s}s"),
        (0, m, 0) => format!("{m}m"),
        (0, m, s) => format!("{m}m {s}s"),
        (h, 0, _) => format!("{h}h"),
        (h, m, _) => format!("{h}h {m}m"),
    }
}

/// Formats how many `unit`s were handled per second, or per minute below one per second.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_rate(count: u64, duration: Duration, unit: &str) -> String {
    let secs = duration.as_secs_f64();
    if secs < 0.001 {
        return format!("{} {unit}/s", format_count(count));
    }
    let rate = count as f64 / secs;
    if rate >= 1.0 {
        format!("{} {unit}/s", format_count(rate as u64))
    } else {
        format!("{:.1} {unit}/min", rate * 60.0)
    }
}

/// Logs when an operation starts and, with a count and rate, when it finishes.
///
/// ```no_run
/// use vardict_lib::logging::OperationTimer;
///
/// let timer = OperationTimer::new("Calling variants", "regions");
/// timer.log_completion(250);
/// ```
pub struct OperationTimer {
    operation: String,
    unit: String,
    start_time: Instant,
}

impl OperationTimer {
    #[must_use]
    pub fn new(operation: &str, unit: &str) -> Self {
        log::info!("{operation} ...");
        Self { operation: operation.to_string(), unit: unit.to_string(), start_time: Instant::now() }
    }

    pub fn log_completion(&self, count: u64) {
        let duration = self.start_time.elapsed();
        log::info!(
            "{} completed: {} {} in {} ({})",
            self.operation,
            format_count(count),
            self.unit,
            format_duration(duration),
            format_rate(count, duration, &self.unit)
        );
    }
}

/// Row tallies of a calling run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub regions: u64,
    /// Regions that produced no rows.
    pub silent_regions: u64,
    /// Rows per variant type; pileup rows without a variant are counted under `Reference`.
    pub by_type: BTreeMap<&'static str, u64>,
}

impl CallSummary {
    /// Adds the rows of one finished task.
    pub fn record(&mut self, output: &RegionOutput) {
        self.regions += 1;
        if output.rows.is_empty() {
            self.silent_regions += 1;
        }
        let types: Vec<Option<VarType>> = match &output.rows {
            Rows::Single(calls) => calls.iter().map(|c| c.var_type).collect(),
            Rows::Paired(calls) => calls.iter().map(|c| Some(c.var_type)).collect(),
            Rows::Amplicon(calls) => calls.iter().map(|c| c.var_type).collect(),
        };
        for var_type in types {
            *self.by_type.entry(var_type.map_or("Reference", VarType::as_str)).or_default() += 1;
        }
    }

    #[must_use]
    pub fn rows(&self) -> u64 {
        self.by_type.values().sum()
    }

    /// Logs the tallies, most frequent type first.
    #[allow(clippy::cast_precision_loss)]
    pub fn log(&self) {
        log::info!("Calling Summary:");
        log::info!("  Regions: {}", format_count(self.regions));
        log::info!("  Regions without rows: {}", format_count(self.silent_regions));
        let rows = self.rows();
        log::info!("  Rows: {}", format_count(rows));
        let mut sorted: Vec<_> = self.by_type.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(a.1));
        for (name, count) in sorted {
            log::info!("    {name}: {} ({})", format_count(*count), format_percent(*count as f64 / rows as f64, 1));
        }
    }
}
