use thiserror::Error;

/// Why an incoming payload was discarded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no records have been received yet")]
    EmptyExport,
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("json export failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("export buffer error: {0}")]
    Io(#[from] std::io::Error),
}
