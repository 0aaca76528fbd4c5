use thiserror::Error;

#[derive(Error, Debug)]
pub enum KpiError {
    #[error("Invalid period '{0}': expected <month>_<year>, ytd, qtd, month or q1..q4_<year>")]
    InvalidPeriod(String),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No collector row for practice {practice} in territory '{territory}'")]
    CollectorNotFound { practice: String, territory: String },

    #[error("Unknown practice: {0}")]
    UnknownPractice(String),

    #[error("Ingestion error on line {line}: {details}")]
    Ingestion { line: u64, details: String },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KpiError>;
