//! Error types for rkndaemon.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RknError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Errors raised while streaming a registry document.
///
/// `SchemaMismatch` is tolerable: the offending element or attribute is
/// skipped and decoding continues. The other kinds abort the document.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unexpected document shape: {0}")]
    SchemaMismatch(String),

    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("unsupported charset: {0}")]
    Charset(String),

    #[error("failed to read document: {0}")]
    Io(String),
}

/// Outcome classes of a failed feed cycle.
///
/// Transient failures are retried after a backoff. Filesystem failures abort
/// the remaining steps of the cycle and are fatal in one-shot mode.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("transient failure: {0:#}")]
    Transient(anyhow::Error),

    #[error("filesystem failure: {0:#}")]
    FileSystem(anyhow::Error),
}

impl CycleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CycleError::Transient(_))
    }
}

impl DecodeError {
    /// Whether decoding may continue past this error.
    pub fn is_tolerable(&self) -> bool {
        matches!(self, DecodeError::SchemaMismatch(_))
    }
}
