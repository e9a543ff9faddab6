use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration faults, surfaced at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("alias `{0}` is not defined")]
    DanglingAlias(String),
    #[error("alias cycle through `{0}`")]
    AliasCycle(String),
    #[error("layer `{0}` is referenced but never defined")]
    UnknownLayer(String),
    #[error("base layer `{0}` is not defined")]
    UnknownBaseLayer(String),
}

/// Input-side failures. `Closed` is the orderly end of the stream (shutdown
/// flag, device unplugged); everything else is fatal I/O.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input source closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
