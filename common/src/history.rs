use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::{
    config::{HistoryConfig, DEFAULT_WINDOW_LEN},
    error::ExportError,
    export::{self, Derivation, ExportFormat},
    record::SensorRecord,
    types::MetricValue,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// One entry of the unbounded session log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedRecord {
    pub received_at: DateTime<Utc>,
    pub record: SensorRecord,
}

/// Numeric values of one message, keyed against the shared time label.
#[derive(Debug, Clone)]
struct ChartRow {
    at: DateTime<Utc>,
    values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub metric: String,
    pub points: Vec<Option<f64>>,
}

/// Labels and series of equal length, ready for a chart's X and Y axes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartFrame {
    pub labels: Vec<DateTime<Utc>>,
    pub series: Vec<ChartSeries>,
}

/// Bounded per-metric history for charting plus the session log for export.
///
/// Every window, and the shared label window, holds at most `max_window_len`
/// entries and evicts oldest first. Shrinking the bound with [`configure`]
/// truncates immediately.
///
/// [`configure`]: MetricHistoryStore::configure
#[derive(Debug, Clone)]
pub struct MetricHistoryStore {
    max_window_len: usize,
    tracked: Option<BTreeSet<String>>,
    windows: BTreeMap<String, VecDeque<Sample>>,
    rows: VecDeque<ChartRow>,
    latest: BTreeMap<String, MetricValue>,
    log: Vec<LoggedRecord>,
    last_received_at: Option<DateTime<Utc>>,
    message_count: u64,
}

impl Default for MetricHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LEN)
    }
}

impl MetricHistoryStore {
    pub fn new(max_window_len: usize) -> Self {
        Self {
            max_window_len: max_window_len.max(1),
            tracked: None,
            windows: BTreeMap::new(),
            rows: VecDeque::new(),
            latest: BTreeMap::new(),
            log: Vec::new(),
            last_received_at: None,
            message_count: 0,
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        let mut store = Self::new(config.window_len);
        if let Some(metrics) = &config.tracked_metrics {
            store.track_only(metrics.iter().cloned());
        }
        store
    }

    /// Sets the window bound. Returns `false` and keeps the old bound for zero.
    pub fn configure(&mut self, max_window_len: usize) -> bool {
        if max_window_len == 0 {
            return false;
        }

        self.max_window_len = max_window_len;
        for window in self.windows.values_mut() {
            evict_overflow(window, max_window_len);
        }
        evict_overflow(&mut self.rows, max_window_len);
        true
    }

    /// Restricts windowing to `metrics`. Other numeric keys still update
    /// `latest` and the session log.
    pub fn track_only<I, S>(&mut self, metrics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked = Some(metrics.into_iter().map(Into::into).collect());
    }

    pub fn is_tracked(&self, metric: &str) -> bool {
        self.tracked
            .as_ref()
            .map(|tracked| tracked.contains(metric))
            .unwrap_or(true)
    }

    pub fn ingest(&mut self, record: SensorRecord, received_at: DateTime<Utc>) {
        let at = match self.last_received_at {
            Some(last) if received_at < last => last,
            _ => received_at,
        };
        self.last_received_at = Some(at);
        self.message_count = self.message_count.saturating_add(1);

        let mut row = ChartRow {
            at,
            values: BTreeMap::new(),
        };

        for (metric, value) in record.iter() {
            self.latest.insert(metric.to_string(), value.clone());

            let Some(number) = value.as_number() else {
                continue;
            };
            if !self.is_tracked(metric) {
                continue;
            }

            let window = self.windows.entry(metric.to_string()).or_default();
            window.push_back(Sample { at, value: number });
            evict_overflow(window, self.max_window_len);

            row.values.insert(metric.to_string(), number);
        }

        self.rows.push_back(row);
        evict_overflow(&mut self.rows, self.max_window_len);

        self.log.push(LoggedRecord {
            received_at: at,
            record,
        });
    }

    pub fn snapshot(&self, metric: &str) -> Vec<Sample> {
        self.windows
            .get(metric)
            .map(|window| window.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn values(&self, metric: &str) -> Vec<f64> {
        self.windows
            .get(metric)
            .map(|window| window.iter().map(|sample| sample.value).collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, metric: &str) -> Option<&MetricValue> {
        self.latest.get(metric)
    }

    pub fn latest_values(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.latest
            .iter()
            .map(|(metric, value)| (metric.as_str(), value))
    }

    pub fn time_labels(&self) -> Vec<DateTime<Utc>> {
        self.rows.iter().map(|row| row.at).collect()
    }

    pub fn chart_frame(&self, metrics: &[&str]) -> ChartFrame {
        let series = metrics
            .iter()
            .map(|metric| ChartSeries {
                metric: metric.to_string(),
                points: self
                    .rows
                    .iter()
                    .map(|row| row.values.get(*metric).copied())
                    .collect(),
            })
            .collect();

        ChartFrame {
            labels: self.time_labels(),
            series,
        }
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    pub fn max_window_len(&self) -> usize {
        self.max_window_len
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn log(&self) -> &[LoggedRecord] {
        &self.log
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn export_all(
        &self,
        format: ExportFormat,
        derivation: &Derivation,
    ) -> Result<Vec<u8>, ExportError> {
        export::export_records(&self.log, format, derivation)
    }
}

fn evict_overflow<T>(window: &mut VecDeque<T>, max_len: usize) {
    while window.len() > max_len {
        window.pop_front();
    }
}
