// src/error.rs
use std::io;
use thiserror::Error;

/// Central error type for the mazurka engine.
///
/// Protocol-level failures (malformed requests, missing files) never show
/// up here; they are answered over the wire as 4xx/5xx responses. This
/// enum covers the failures that surface to the operator instead.
#[derive(Debug, Error)]
pub enum MazurkaError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Worker pool could not be constructed.
    #[error("worker pool error: {0}")]
    Pool(String),
}

pub type MazurkaResult<T> = Result<T, MazurkaError>;
