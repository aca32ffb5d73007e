use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid period identifier: {0}")]
    InvalidPeriod(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    #[error("Input file not found: {0}")]
    MissingInput(String),

    #[error("Registry error: {message}")]
    Registry { message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
