//! Error type shared by every loop in the crate.

use thiserror::Error;

/// Everything that can go wrong while sampling, scoring or updating.
///
/// Failures inside dfdx's infallible operators (shape mismatches that slip
/// past the checks below, device faults) still panic, as they do anywhere
/// dfdx is used.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{what} is empty")]
    EmptySet { what: &'static str },

    #[error("{what}: expected {expected}, found {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("label {label} is out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },

    #[error("one-hot row {row} has no finite maximum")]
    DegenerateOneHot { row: usize },

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("class pool cannot supply the episode: {0}")]
    NotEnoughData(String),

    #[error("validation needs at least one episode")]
    NoEpisodes,

    #[error("optimizer update failed: {0}")]
    Optimizer(String),

    #[error("tensor backend error: {0}")]
    Backend(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Wraps a device or module error coming out of dfdx.
    pub fn backend<E: std::fmt::Debug>(err: E) -> Self {
        Self::Backend(format!("{err:?}"))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
