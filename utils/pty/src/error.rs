use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to allocate pseudo-terminal: {0}")]
    OpenPty(String),
    #[error("failed to switch terminal to raw mode: {0}")]
    RawMode(#[source] io::Error),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for {program}: {message}")]
    Wait { program: String, message: String },
}
