use thiserror::Error;

#[derive(Error, Debug)]
pub enum UldkError {
    #[error("Registry error: {0}")]
    RegistryError(#[from] uldk_registry::RegistryError),
    #[error("Record error: {0}")]
    RecordError(#[from] crate::record::RecordError),
    #[error("Collector error: {0}")]
    CollectorError(#[from] crate::collector::CollectorError),
    #[error("Coverage error: {0}")]
    CoverageError(#[from] crate::coverage::CoverageError),
    #[error("Import error: {0}")]
    ImportError(#[from] crate::import::ImportError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Init Logging error: {0}")]
    InitLoggingError(#[from] tracing_subscriber::filter::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, UldkError>;
