use crate::ledger::Serial;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading certificates and the responder key. Always fatal at startup.
#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Key in {} cannot sign OCSP responses: {reason}", .path.display())]
    UnsupportedKeyType { path: PathBuf, reason: String },

    #[error("Key in {} does not belong to the responder certificate", .path.display())]
    KeyMismatch { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Could not open index file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serial {0} not found")]
    NotFound(Serial),
}

#[derive(Error, Debug, PartialEq)]
pub enum RequestError {
    #[error("Unsupported request method {0}")]
    UnsupportedMethod(String),

    #[error("Strict mode requires content type application/ocsp-request, got {0:?}")]
    ContentType(Option<String>),

    #[error("GET path is not valid base64: {0}")]
    InvalidEncoding(String),
}

#[derive(Error, Debug)]
pub enum ResponderError {
    #[error("Malformed OCSP request: {0}")]
    Malformed(String),

    #[error("Ledger lookup failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Cannot encode OCSP response: {0}")]
    Encoding(String),

    #[error("Cannot sign OCSP response: {0}")]
    Signing(String),
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Trust(#[from] TrustError),
}
