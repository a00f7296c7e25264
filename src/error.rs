use thiserror::Error;

/// Errors raised by the calculation engine or propagated from its
/// collaborator boundaries (model builder, solver, period reducer).
///
/// Every variant is fatal for the calculation it occurs in: a failed
/// calculation's partially merged results must be discarded.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid strategy parameters or time data, detected before any
    /// window is built.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An internal invariant was violated. Indicates a bug in the engine
    /// or in a collaborator implementation, not a user input problem.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// The solver reported an infeasible model for one window. Remaining
    /// windows are abandoned.
    #[error("model infeasible: {0}")]
    Infeasible(String),

    /// The component graph rejected the build (degrees of freedom,
    /// medium mismatch, out-of-bounds parameters).
    #[error("structural model error: {0}")]
    Structural(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode result snapshot: {0}")]
    SnapshotData(#[from] bincode::Error),

    #[error("failed to encode run record: {0}")]
    SnapshotRecord(#[from] serde_yaml::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Error::Consistency(msg.into())
    }

    pub fn infeasible(msg: impl Into<String>) -> Self {
        Error::Infeasible(msg.into())
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        Error::Structural(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
