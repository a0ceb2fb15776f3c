use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0}")]
    EnvFile(String),
}

/// Failures reading or appending the flat CSV files.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} is missing required column {column:?}")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("json error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("json error at {path}: {message}")]
    Json { path: String, message: String },

    #[error("weather cache error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("forecast response contained no usable entries")]
    Empty,
}

impl From<serde_path_to_error::Error<serde_json::Error>> for WeatherError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        WeatherError::Json {
            path: value.path().to_string(),
            message: value.into_inner().to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}
