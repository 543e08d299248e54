//! Error type shared by every harness helper.
//!
//! Two channels are kept apart: [`HarnessError::Skip`] means the environment
//! or the daemon under test lacks a feature and the test should be reported
//! as skipped; every other variant is a hard failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The test cannot run here. The reason is shown verbatim by the runner.
    #[error("{0}")]
    Skip(String),
    #[error("{0}")]
    Failure(String),
    #[error("command `{command}` failed: {detail}")]
    Command { command: String, detail: String },
    #[error("control interface error: {0}")]
    Ctrl(String),
    #[error("invalid hex input: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Self::Skip(reason) => Some(reason),
            _ => None,
        }
    }
}
