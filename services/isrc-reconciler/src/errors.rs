//!
//! src/errors.rs  Andrew Belles  Oct 2nd, 2025
//!
//! Defines enums and methods of error conversion
//! for errors the reconciler uses, plus the exit code and
//! http status each class of failure maps to
//!

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("artist not found: {0}")]
    ArtistNotFound(String),
    #[error("catalog fetch error: {0}")]
    CatalogFetch(String),
    #[error("join error: {0}")]
    Join(String),
    #[error("report error: {0}")]
    Report(String),
    #[error("run deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl ReconcileError {
    /// Process exit code, stable per failure class
    pub fn exit_code(&self) -> u8 {
        match self {
            ReconcileError::Schema(_)
            | ReconcileError::Io(_)
            | ReconcileError::Parse(_) => 2,
            ReconcileError::Config(_) => 3,
            ReconcileError::Http(_)
            | ReconcileError::RateLimited(_)
            | ReconcileError::Unauthorized(_)
            | ReconcileError::CatalogFetch(_)
            | ReconcileError::DeadlineExceeded(_) => 4,
            ReconcileError::Join(_) => 5,
            ReconcileError::Report(_) => 6,
            ReconcileError::ArtistNotFound(_) => 7,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ReconcileError::Schema(_)
            | ReconcileError::Io(_)
            | ReconcileError::Parse(_) => 400,
            ReconcileError::ArtistNotFound(_) => 404,
            ReconcileError::Http(_)
            | ReconcileError::RateLimited(_)
            | ReconcileError::Unauthorized(_)
            | ReconcileError::CatalogFetch(_) => 502,
            ReconcileError::DeadlineExceeded(_) => 504,
            ReconcileError::Config(_)
            | ReconcileError::Join(_)
            | ReconcileError::Report(_) => 500,
        }
    }

    /// Short label used in log events
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Config(_)           => "config",
            ReconcileError::Http(_)             => "http",
            ReconcileError::RateLimited(_)      => "rate_limited",
            ReconcileError::Unauthorized(_)     => "unauthorized",
            ReconcileError::Parse(_)            => "parse",
            ReconcileError::Schema(_)           => "schema",
            ReconcileError::ArtistNotFound(_)   => "artist_not_found",
            ReconcileError::CatalogFetch(_)     => "catalog_fetch",
            ReconcileError::Join(_)             => "join",
            ReconcileError::Report(_)           => "report",
            ReconcileError::DeadlineExceeded(_) => "deadline",
            ReconcileError::Io(_)               => "io",
        }
    }
}

impl From<reqwest::Error> for ReconcileError {
    fn from(e: reqwest::Error) -> Self { ReconcileError::Http(e.to_string()) }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(e: serde_json::Error) -> Self { ReconcileError::Parse(e.to_string()) }
}

impl From<csv::Error> for ReconcileError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io) => ReconcileError::Io(io),
                other => ReconcileError::Parse(format!("{other:?}")),
            }
        } else {
            ReconcileError::Parse(e.to_string())
        }
    }
}

impl From<rust_xlsxwriter::XlsxError> for ReconcileError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        ReconcileError::Report(e.to_string())
    }
}
