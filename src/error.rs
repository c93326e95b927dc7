use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// An I/O error paired with the path that produced it.
#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct BuildIoError {
    io: io::Error,
    path: PathBuf,
}

impl BuildIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn inner(&self) -> &io::Error {
        &self.io
    }
}

impl From<BuildIoError> for io::Error {
    fn from(err: BuildIoError) -> Self {
        err.io
    }
}

/// Error variants produced by the build core.
///
/// Everything the core can fail with is captured at the call site and carried
/// as a message; stack context is only ever logged at trace level.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] BuildIoError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("compilation failed: {0}")]
    Compile(String),
    #[error("test run failed: {0}")]
    Test(String),
    #[error("task `{task}` failed: {message}")]
    Task { task: String, message: String },
    #[error("dependency resolution failed: {0}")]
    Resolution(String),
    /// Catch-all for interface errors that have no dedicated variant
    #[error("{0}")]
    Message(String),
}

impl BuildError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        BuildIoError::new(err, path).into()
    }

    /// Create an error message
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Self::Message(msg.to_string())
    }

    pub fn parse(msg: impl std::fmt::Display) -> Self {
        Self::Parse(msg.to_string())
    }

    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    pub fn compile(msg: impl std::fmt::Display) -> Self {
        Self::Compile(msg.to_string())
    }

    pub fn task(task: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Task { task: task.into(), message: message.to_string() }
    }
}
