use chrono::{DateTime, Utc};

use crate::{
    config::RuntimeConfig,
    connection::{ConnectionAction, ConnectionState, ConnectionTracker},
    error::{DecodeError, ExportError},
    export::{iso_timestamp, Derivation, ExportFormat},
    history::MetricHistoryStore,
    record::SensorRecord,
    types::{MetricValue, ReadingSummary, StatusSummary},
};

/// What the transport client reports, already stripped of client specifics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected(Option<String>),
    MessageReceived(Vec<u8>),
}

/// All state of one monitoring session.
#[derive(Debug)]
pub struct GreenhouseMonitor {
    store: MetricHistoryStore,
    tracker: ConnectionTracker,
    derivation: Derivation,
    status_message: String,
    dropped_count: u64,
    last_decode_error: Option<String>,
}

impl GreenhouseMonitor {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            store: MetricHistoryStore::from_config(&config.history),
            tracker: ConnectionTracker::new(config.reconnect.clone()),
            derivation: Derivation {
                fields: config.export.derived.clone(),
                ranges: config.ranges.clone(),
                calibration: config.calibration,
            },
            status_message: "Waiting for data...".to_string(),
            dropped_count: 0,
            last_decode_error: None,
        }
    }

    pub fn store(&self) -> &MetricHistoryStore {
        &self.store
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.tracker.current_state()
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    pub fn last_decode_error(&self) -> Option<&str> {
        self.last_decode_error.as_deref()
    }

    pub fn start(&mut self, now_ms: u64) -> Vec<ConnectionAction> {
        let actions = self.tracker.start(now_ms);
        self.sync_status_from_tracker(&actions);
        actions
    }

    pub fn reconnect(&mut self, now_ms: u64) -> Vec<ConnectionAction> {
        let actions = self.tracker.reconnect(now_ms);
        self.status_message = self.tracker.status_message().to_string();
        actions
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<ConnectionAction> {
        let actions = self.tracker.tick(now_ms);
        self.sync_status_from_tracker(&actions);
        actions
    }

    pub fn handle(
        &mut self,
        event: TransportEvent,
        received_at: DateTime<Utc>,
        now_ms: u64,
    ) -> Vec<ConnectionAction> {
        match event {
            TransportEvent::Connected => {
                let actions = self.tracker.on_transport_connected(now_ms);
                self.status_message = self.tracker.status_message().to_string();
                actions
            }
            TransportEvent::Disconnected(reason) => {
                let actions = self
                    .tracker
                    .on_transport_disconnected(reason.as_deref(), now_ms);
                self.status_message = self.tracker.status_message().to_string();
                actions
            }
            TransportEvent::MessageReceived(payload) => {
                // Decode failures are recorded in the status, never propagated.
                let _ = self.handle_payload(&payload, received_at);
                Vec::new()
            }
        }
    }

    /// Decodes and ingests one payload. On failure nothing but the status and
    /// drop counter changes.
    pub fn handle_payload(
        &mut self,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<(), DecodeError> {
        match SensorRecord::decode(payload) {
            Ok(record) => {
                self.store.ingest(record, received_at);
                self.status_message = format!("Last update {}", iso_timestamp(received_at));
                Ok(())
            }
            Err(err) => {
                self.dropped_count = self.dropped_count.saturating_add(1);
                self.status_message = format!("Discarded payload: {err}");
                self.last_decode_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn export(&self, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
        self.store.export_all(format, &self.derivation)
    }

    pub fn summary(&self) -> StatusSummary {
        let readings = self
            .store
            .latest_values()
            .map(|(metric, value)| ReadingSummary {
                metric: metric.to_string(),
                value: value.clone(),
                status: value
                    .as_number()
                    .and_then(|number| self.derivation.ranges.evaluate(metric, number))
                    .map(|status| status.as_str()),
            })
            .collect();

        StatusSummary {
            connection: self.tracker.current_state().to_string(),
            status_message: self.status_message.clone(),
            retry_count: self.tracker.retry_count(),
            message_count: self.store.message_count(),
            dropped_count: self.dropped_count,
            window_length: self.store.max_window_len(),
            readings,
        }
    }

    pub fn latest(&self, metric: &str) -> Option<&MetricValue> {
        self.store.latest(metric)
    }

    fn sync_status_from_tracker(&mut self, actions: &[ConnectionAction]) {
        if !actions.is_empty() {
            self.status_message = self.tracker.status_message().to_string();
        }
    }
}
