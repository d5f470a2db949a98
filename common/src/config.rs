use serde::{Deserialize, Serialize};

use crate::{
    export::{DerivedField, ExportFormat},
    topics::{DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, TOPIC_SENSOR_DATA},
    types::RangeStatus,
};

pub const DEFAULT_WINDOW_LEN: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// `wss://` endpoint; only honoured when built with the `websocket` feature.
    #[serde(default)]
    pub ws_url: Option<String>,
    pub topic: String,
    pub qos: u8,
    pub client_id_prefix: String,
    pub user: String,
    pub pass: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            ws_url: None,
            topic: TOPIC_SENSOR_DATA.to_string(),
            qos: 0,
            client_id_prefix: "greenhouse-monitor".to_string(),
            user: String::new(),
            pass: String::new(),
            keep_alive_secs: 60,
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub window_len: usize,
    /// `None` tracks every numeric key that arrives.
    #[serde(default)]
    pub tracked_metrics: Option<Vec<String>>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window_len: DEFAULT_WINDOW_LEN,
            tracked_metrics: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub auto_reconnect: bool,
    pub delay_ms: u64,
    pub manual_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            delay_ms: 5_000,
            manual_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OptimalRange {
    pub min: f64,
    pub max: f64,
}

impl OptimalRange {
    pub fn classify(&self, value: f64) -> RangeStatus {
        if (self.min..=self.max).contains(&value) {
            RangeStatus::Optimal
        } else {
            RangeStatus::OutOfRange
        }
    }

    fn sanitize(&mut self) {
        if self.min > self.max {
            std::mem::swap(&mut self.min, &mut self.max);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimalRanges {
    pub soil_moisture: OptimalRange,
    pub ph: OptimalRange,
}

impl Default for OptimalRanges {
    fn default() -> Self {
        Self {
            soil_moisture: OptimalRange {
                min: 20.0,
                max: 60.0,
            },
            ph: OptimalRange { min: 5.5, max: 6.5 },
        }
    }
}

impl OptimalRanges {
    pub fn evaluate(&self, metric: &str, value: f64) -> Option<RangeStatus> {
        match metric {
            "humedad" | "soil_moisture" => Some(self.soil_moisture.classify(value)),
            "ph" => Some(self.ph.classify(value)),
            _ => None,
        }
    }
}

/// Raw capacitive probe readings at fully dry and fully wet soil.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MoistureCalibration {
    pub dry_raw: f64,
    pub wet_raw: f64,
}

impl Default for MoistureCalibration {
    fn default() -> Self {
        Self {
            dry_raw: 3_500.0,
            wet_raw: 1_200.0,
        }
    }
}

impl MoistureCalibration {
    pub fn percent(&self, raw: f64) -> f64 {
        let span = self.dry_raw - self.wet_raw;
        let pct = (self.dry_raw - raw) / span * 100.0;
        pct.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_derived_fields")]
    pub derived: Vec<DerivedField>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: ExportFormat::default(),
            derived: default_derived_fields(),
        }
    }
}

fn default_derived_fields() -> Vec<DerivedField> {
    vec![DerivedField::WaterQuality, DerivedField::SoilMoistureStatus]
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub ranges: OptimalRanges,
    #[serde(default)]
    pub calibration: MoistureCalibration,
    #[serde(default)]
    pub export: ExportConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.mqtt.qos = self.mqtt.qos.min(1);
        self.mqtt.keep_alive_secs = self.mqtt.keep_alive_secs.clamp(5, 3_600);
        self.mqtt.connect_timeout_secs = self.mqtt.connect_timeout_secs.clamp(1, 120);
        if self.mqtt.topic.trim().is_empty() {
            self.mqtt.topic = TOPIC_SENSOR_DATA.to_string();
        }

        if self.history.window_len == 0 {
            self.history.window_len = DEFAULT_WINDOW_LEN;
        }

        self.reconnect.delay_ms = self.reconnect.delay_ms.clamp(500, 60_000);
        self.reconnect.manual_delay_ms = self.reconnect.manual_delay_ms.min(10_000);

        self.ranges.soil_moisture.sanitize();
        self.ranges.ph.sanitize();

        if (self.calibration.dry_raw - self.calibration.wet_raw).abs() < f64::EPSILON {
            self.calibration = MoistureCalibration::default();
        }
    }
}
