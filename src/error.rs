use std::{io, path::PathBuf};

use thiserror::Error;

/// Reasons a start request is turned down before any task exists.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("no credentials found in the uploaded file")]
    MissingCredentials,
    #[error("failed to read credentials file {path}: {source}")]
    UnreadableCredentials {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read messages file {path}: {source}")]
    UnreadableMessages {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("message set is empty")]
    EmptyMessages,
    #[error("no target identifier provided")]
    MissingTarget,
    #[error("send interval must be greater than zero")]
    InvalidInterval,
    #[error("failed to spawn send loop: {0}")]
    Spawn(#[source] io::Error),
}

/// Outcome of a failed call against the remote messaging endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("rejected by endpoint: {0}")]
    Rejected(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}
