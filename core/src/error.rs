use std::path::PathBuf;
use std::time::Duration;

use crate::storage::{MatchId, RoundId};

/// Failures reported by the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown match {0}")]
    UnknownMatch(MatchId),

    #[error("unknown round {0}")]
    UnknownRound(RoundId),

    #[error("server {server} already has an active match ({active})")]
    MatchAlreadyActive { server: String, active: MatchId },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read snapshot {path:?}")]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode snapshot {path:?}")]
    SnapshotFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the remote-control channel (RCON or status query).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("remote {0} is not configured for server {1}")]
    NotConfigured(&'static str, String),

    #[error("rcon authentication rejected")]
    AuthRejected,

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("remote query cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration from {path:?}")]
    Load {
        path: PathBuf,
        #[source]
        source: confy::ConfyError,
    },

    #[error("no configuration directory available on this platform")]
    NoConfigDir,

    #[error("duplicate server id {0:?}")]
    DuplicateServer(String),

    #[error("server id must not be empty")]
    EmptyServerId,

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("debounce window ({window:?}) exceeds max wait ({max_wait:?})")]
    WindowExceedsMaxWait { window: Duration, max_wait: Duration },
}

/// Filesystem watch failures.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
