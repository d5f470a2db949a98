use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{
    config::{MoistureCalibration, OptimalRanges},
    error::ExportError,
    history::LoggedRecord,
    record::SensorRecord,
    types::MetricValue,
};

/// Fixed CSV columns and the payload keys each one is read from, in order of
/// preference. Field devices publish either English or Spanish names.
const CSV_COLUMNS: &[(&str, &[&str])] = &[
    ("temperature", &["temperature", "temperatura"]),
    ("humidity", &["humidity", "humedad_aire"]),
    ("soil_moisture", &["soil_moisture", "humedad"]),
    ("pressure", &["pressure", "presion"]),
    ("tds", &["tds"]),
    ("water_level", &["water_level", "nivel_agua"]),
    ("ph", &["ph"]),
    ("co2", &["co2"]),
    ("voc", &["voc"]),
    ("battery", &["battery", "bateria"]),
    ("turbidity", &["turbidity", "turbidez"]),
    ("water_quality", &["water_quality", "calidad_agua"]),
    ("color_r", &["color_r"]),
    ("color_g", &["color_g"]),
    ("color_b", &["color_b"]),
];

const SOIL_MOISTURE_KEYS: &[&str] = &["soil_moisture", "humedad"];
const SOIL_MOISTURE_RAW_KEYS: &[&str] = &["soil_moisture_raw", "humedad_raw"];
const TDS_KEYS: &[&str] = &["tds"];
const PH_KEYS: &[&str] = &["ph"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

/// Interpretive columns computed from raw readings at export time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedField {
    WaterQuality,
    SoilMoisturePercent,
    SoilMoistureStatus,
    PhStatus,
}

impl DerivedField {
    pub fn column(self) -> &'static str {
        match self {
            Self::WaterQuality => "water_quality_label",
            Self::SoilMoisturePercent => "soil_moisture_pct",
            Self::SoilMoistureStatus => "soil_moisture_status",
            Self::PhStatus => "ph_status",
        }
    }
}

/// Water quality grade for a total-dissolved-solids reading in ppm.
pub fn water_quality_label(tds_ppm: f64) -> &'static str {
    match tds_ppm {
        t if t <= 300.0 => "Excelente",
        t if t <= 600.0 => "Buena",
        t if t <= 900.0 => "Regular",
        t if t <= 1_200.0 => "Mala",
        _ => "No apta",
    }
}

/// The derived fields requested for an export and the tables they need.
#[derive(Debug, Clone, Default)]
pub struct Derivation {
    pub fields: Vec<DerivedField>,
    pub ranges: OptimalRanges,
    pub calibration: MoistureCalibration,
}

impl Derivation {
    fn derive(&self, field: DerivedField, record: &SensorRecord) -> Option<Value> {
        match field {
            DerivedField::WaterQuality => {
                let tds = number_of(record, TDS_KEYS)?;
                Some(Value::String(water_quality_label(tds).to_string()))
            }
            DerivedField::SoilMoisturePercent => {
                let raw = number_of(record, SOIL_MOISTURE_RAW_KEYS)?;
                let pct = (self.calibration.percent(raw) * 10.0).round() / 10.0;
                Number::from_f64(pct).map(Value::Number)
            }
            DerivedField::SoilMoistureStatus => {
                let moisture = number_of(record, SOIL_MOISTURE_KEYS)?;
                let status = self.ranges.evaluate("soil_moisture", moisture)?;
                Some(Value::String(status.as_str().to_string()))
            }
            DerivedField::PhStatus => {
                let ph = number_of(record, PH_KEYS)?;
                let status = self.ranges.evaluate("ph", ph)?;
                Some(Value::String(status.as_str().to_string()))
            }
        }
    }
}

pub fn export_records(
    log: &[LoggedRecord],
    format: ExportFormat,
    derivation: &Derivation,
) -> Result<Vec<u8>, ExportError> {
    if log.is_empty() {
        return Err(ExportError::EmptyExport);
    }

    match format {
        ExportFormat::Csv => export_csv(log, derivation),
        ExportFormat::Json => export_json(log, derivation),
    }
}

fn export_csv(log: &[LoggedRecord], derivation: &Derivation) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b',')
        .from_writer(Vec::new());

    let header: Vec<&str> = std::iter::once("timestamp")
        .chain(CSV_COLUMNS.iter().map(|(column, _)| *column))
        .chain(derivation.fields.iter().map(|field| field.column()))
        .collect();
    writer.write_record(&header)?;

    for entry in log {
        let mut row = Vec::with_capacity(header.len());
        row.push(iso_timestamp(entry.received_at));

        for (_, keys) in CSV_COLUMNS {
            row.push(
                entry
                    .record
                    .first_of(keys)
                    .map(MetricValue::to_string)
                    .unwrap_or_default(),
            );
        }

        for field in &derivation.fields {
            row.push(
                derivation
                    .derive(*field, &entry.record)
                    .map(|value| match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .unwrap_or_default(),
            );
        }

        writer.write_record(&row)?;
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|err| ExportError::Io(err.into_error()))
}

fn export_json(log: &[LoggedRecord], derivation: &Derivation) -> Result<Vec<u8>, ExportError> {
    let records: Vec<Value> = log
        .iter()
        .map(|entry| {
            let mut object: Map<String, Value> = entry.record.raw().clone();
            object.insert(
                "timestamp".to_string(),
                Value::String(iso_timestamp(entry.received_at)),
            );
            for field in &derivation.fields {
                if let Some(value) = derivation.derive(*field, &entry.record) {
                    object.insert(field.column().to_string(), value);
                }
            }
            Value::Object(object)
        })
        .collect();

    Ok(serde_json::to_vec_pretty(&records)?)
}

fn number_of(record: &SensorRecord, keys: &[&str]) -> Option<f64> {
    record.first_of(keys).and_then(MetricValue::as_number)
}

pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
