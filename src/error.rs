use std::num::ParseIntError;
use thiserror::Error;

use crate::buffer::SinkError;

/// Errors returned by hlsio operations.
///
/// Conditions other components need to react to (parsing failures, append
/// failures, emergency aborts) travel as [`crate::events::HlsEvent`]s instead;
/// this type covers what a direct caller gets back.
#[derive(Error, Debug)]
pub enum HlsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("decrypt error: {0}")]
    Decrypt(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("channel closed: {0}")]
    Channel(String),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, HlsError>;
