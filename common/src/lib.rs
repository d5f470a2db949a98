pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod history;
pub mod monitor;
pub mod record;
pub mod topics;
pub mod types;

pub use config::{
    HistoryConfig, MoistureCalibration, MqttConfig, OptimalRange, OptimalRanges, ReconnectConfig,
    RuntimeConfig,
};
pub use connection::{ConnectionAction, ConnectionState, ConnectionTracker, ReconnectReason};
pub use error::{DecodeError, ExportError};
pub use export::{Derivation, DerivedField, ExportFormat};
pub use history::{ChartFrame, ChartSeries, MetricHistoryStore, Sample};
pub use monitor::{GreenhouseMonitor, TransportEvent};
pub use record::SensorRecord;
pub use topics::*;
pub use types::{MetricValue, RangeStatus, ReadingSummary, StatusSummary};
