use std::fmt;

/// A single decoded sensor reading. Numbers are charted, text is only shown as
/// the latest value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    Optimal,
    OutOfRange,
}

impl RangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimal => "optimal",
            Self::OutOfRange => "out_of_range",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadingSummary {
    pub metric: String,
    pub value: MetricValue,
    pub status: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct StatusSummary {
    pub connection: String,
    pub status_message: String,
    pub retry_count: u32,
    pub message_count: u64,
    pub dropped_count: u64,
    pub window_length: usize,
    pub readings: Vec<ReadingSummary>,
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | msgs={} dropped={} window={} | {}",
            self.connection,
            self.message_count,
            self.dropped_count,
            self.window_length,
            self.status_message
        )?;

        for reading in &self.readings {
            write!(f, " | {}={}", reading.metric, reading.value)?;
            if let Some(status) = reading.status {
                write!(f, " ({status})")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn summary_renders_as_one_log_line() {
        let summary = StatusSummary {
            connection: "CONNECTED".to_string(),
            status_message: "Last update 2026-01-05T08:00:00.000Z".to_string(),
            retry_count: 0,
            message_count: 4,
            dropped_count: 1,
            window_length: 30,
            readings: vec![
                ReadingSummary {
                    metric: "humedad".to_string(),
                    value: MetricValue::Number(42.5),
                    status: Some(RangeStatus::Optimal.as_str()),
                },
                ReadingSummary {
                    metric: "calidad_agua".to_string(),
                    value: "Buena".into(),
                    status: None,
                },
            ],
        };

        assert_eq!(
            summary.to_string(),
            "CONNECTED | msgs=4 dropped=1 window=30 | Last update 2026-01-05T08:00:00.000Z \
             | humedad=42.5 (optimal) | calidad_agua=Buena"
        );
    }
}
