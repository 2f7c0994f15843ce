//! Console and CSV results log with an end-of-run summary.
//!
//! [`ResultsLog`] is the default [`MetricsSink`]. Each record is printed as one
//! console line and, when a CSV path is configured, appended to the CSV file:
//!
//! ```text
//! ip,port,timestamp,elapsed,bandwidth_mbps,loss_percent,jitter_ms
//! 127.0.0.1,40512,1760860800.123456,1.000,0.98,0.00,0.42
//! ```
//!
//! Metrics that were not computable for a window are left empty.

use crate::metrics::{MetricsRecord, MetricsSink};
use crate::Result;
use log::error;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const CSV_HEADER: &str = "ip,port,timestamp,elapsed,bandwidth_mbps,loss_percent,jitter_ms";

/// Average, minimum, and maximum of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }

        (count > 0).then(|| Self {
            avg: sum / count as f64,
            min,
            max,
        })
    }
}

/// Aggregate over every record of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub measurements: usize,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_mbps: Option<MetricSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_percent: Option<MetricSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<MetricSummary>,
}

struct LogState {
    records: Vec<MetricsRecord>,
    csv: Option<BufWriter<File>>,
}

/// Thread-safe results log.
///
/// # Examples
///
/// ```
/// use netmeter::metrics::{MetricsSink, WindowMetrics};
/// use netmeter::results_log::ResultsLog;
///
/// let log = ResultsLog::console(false);
/// let peer = "127.0.0.1:5001".parse().unwrap();
/// log.record(WindowMetrics::bandwidth_only(12.5).into_record(peer));
///
/// let summary = log.summary().unwrap();
/// assert_eq!(summary.measurements, 1);
/// assert_eq!(summary.bandwidth_mbps.unwrap().max, 12.5);
/// ```
pub struct ResultsLog {
    state: Mutex<LogState>,
    csv_path: Option<PathBuf>,
    json: bool,
}

impl ResultsLog {
    /// Creates a console-only log.
    pub fn console(json: bool) -> Self {
        Self {
            state: Mutex::new(LogState {
                records: Vec::new(),
                csv: None,
            }),
            csv_path: None,
            json,
        }
    }

    /// Creates a log that also writes every record to a CSV file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or the header written.
    pub fn with_csv(path: &Path, json: bool) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", CSV_HEADER)?;
        writer.flush()?;

        Ok(Self {
            state: Mutex::new(LogState {
                records: Vec::new(),
                csv: Some(writer),
            }),
            csv_path: Some(path.to_path_buf()),
            json,
        })
    }

    /// Creates a CSV log when `path` is set, otherwise a console log.
    pub fn open(path: Option<&Path>, json: bool) -> Result<Self> {
        match path {
            Some(path) => Self::with_csv(path, json),
            None => Ok(Self::console(json)),
        }
    }

    pub fn records(&self) -> Vec<MetricsRecord> {
        self.state.lock().records.clone()
    }

    /// Aggregates the recorded metrics. `None` if nothing was recorded.
    pub fn summary(&self) -> Option<Summary> {
        let state = self.state.lock();
        let first = state.records.first()?;
        let last = state.records.last()?;

        Some(Summary {
            measurements: state.records.len(),
            duration_secs: seconds_between(first, last),
            bandwidth_mbps: MetricSummary::from_values(
                state.records.iter().filter_map(|r| r.bandwidth_mbps),
            ),
            loss_percent: MetricSummary::from_values(
                state.records.iter().filter_map(|r| r.loss_percent),
            ),
            jitter_ms: MetricSummary::from_values(state.records.iter().filter_map(|r| r.jitter_ms)),
        })
    }

    fn print_summary(&self, summary: &Summary) {
        if self.json {
            match serde_json::to_string_pretty(summary) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to serialize summary: {}", e),
            }
            return;
        }

        println!();
        println!("=== Test Summary ===");
        println!("  Duration: {}s", summary.duration_secs as u64);
        println!("  Measurements: {}", summary.measurements);

        if let Some(bw) = summary.bandwidth_mbps {
            println!(
                "  Bandwidth: avg={:.2} Mbps, min={:.2}, max={:.2}",
                bw.avg, bw.min, bw.max
            );
        }
        if let Some(loss) = summary.loss_percent {
            println!(
                "  Loss: avg={:.2}%, min={:.2}, max={:.2}",
                loss.avg, loss.min, loss.max
            );
        }
        if let Some(jitter) = summary.jitter_ms {
            println!(
                "  Jitter: avg={:.6} ms, min={:.6}, max={:.6}",
                jitter.avg, jitter.min, jitter.max
            );
        }
    }
}

impl MetricsSink for ResultsLog {
    fn record(&self, record: MetricsRecord) {
        let mut state = self.state.lock();
        let elapsed = state
            .records
            .first()
            .map(|first| seconds_between(first, &record))
            .unwrap_or(0.0);

        println!("{}", format_console_line(&record, elapsed));

        if let Some(csv) = state.csv.as_mut() {
            let row = format_csv_row(&record, elapsed);
            if let Err(e) = writeln!(csv, "{}", row).and_then(|_| csv.flush()) {
                error!("Failed to write metrics to CSV: {}", e);
            }
        }

        state.records.push(record);
    }

    fn summarize(&self) {
        match self.summary() {
            Some(summary) => self.print_summary(&summary),
            None => println!("No statistics recorded"),
        }

        if let Some(path) = &self.csv_path {
            println!("Results saved to {}", path.display());
        }
    }
}

fn seconds_between(first: &MetricsRecord, later: &MetricsRecord) -> f64 {
    let micros = (later.timestamp - first.timestamp)
        .num_microseconds()
        .unwrap_or(0);
    micros.max(0) as f64 / 1_000_000.0
}

fn unix_secs(record: &MetricsRecord) -> f64 {
    record.timestamp.timestamp_micros() as f64 / 1_000_000.0
}

/// Formats one record for the console, omitting absent metrics.
pub fn format_console_line(record: &MetricsRecord, elapsed: f64) -> String {
    let mut parts = vec![format!(
        "[{:03}s] [Peer:{}:{}]",
        elapsed as u64,
        record.peer.ip(),
        record.peer.port()
    )];

    if let Some(bw) = record.bandwidth_mbps {
        parts.push(format!("Bandwidth: {:.2} Mbps", bw));
    }
    if let Some(loss) = record.loss_percent {
        parts.push(format!("Loss: {:.2}%", loss));
    }
    if let Some(jitter) = record.jitter_ms {
        parts.push(format!("Jitter: {:.6} ms", jitter));
    }

    parts.join(" ")
}

/// Formats one record as a CSV row, leaving absent metrics empty.
pub fn format_csv_row(record: &MetricsRecord, elapsed: f64) -> String {
    let cell = |value: Option<f64>| value.map(|v| format!("{:.2}", v)).unwrap_or_default();

    format!(
        "{},{},{:.6},{:.3},{},{},{}",
        record.peer.ip(),
        record.peer.port(),
        unix_secs(record),
        elapsed,
        cell(record.bandwidth_mbps),
        cell(record.loss_percent),
        cell(record.jitter_ms)
    )
}
