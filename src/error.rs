//! Error types for nma-sim
//!
//! Configuration errors are fatal: a simulation whose purpose is numerical
//! correctness must not silently clip a bad parameter.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// nma-sim error types
#[derive(Error, Debug)]
pub enum Error {
    /// Requested arm size is larger than the component alphabet
    #[error("Arm size {requested} exceeds alphabet size {available}\nReduce max arm size or register more components")]
    ArmSizeExceedsAlphabet {
        /// Requested arm size
        requested: usize,
        /// Number of components available
        available: usize,
    },

    /// Sampling without replacement cannot satisfy the request
    #[error("Sample size {requested} exceeds population size {available}\nSampling without replacement cannot satisfy this request")]
    SampleExceedsPopulation {
        /// Requested sample size
        requested: usize,
        /// Population size
        available: usize,
    },

    /// Truncation target cannot reach the configured floor
    #[error("Truncation target {target} is below the configured floor {floor}")]
    TruncationBelowFloor {
        /// Largest achievable target
        target: usize,
        /// Configured floor
        floor: usize,
    },

    /// Component identifier is not registered
    #[error("Unknown component '{0}': not present in the registered alphabet")]
    UnknownComponent(char),

    /// Component identifier registered twice
    #[error("Duplicate component '{0}' in alphabet")]
    DuplicateComponent(char),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input to a table operation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Per-study regression has no information about the treated flag
    #[error("Degenerate design for study {study_id}: {reason}")]
    DegenerateDesign {
        /// Study whose subset could not be fitted
        study_id: i64,
        /// What made the design degenerate
        reason: String,
    },

    /// Meta-regression normal equations are not positive definite
    #[error("Singular meta-regression design: {0}\nSample more studies or more distinct comparisons")]
    SingularDesign(String),

    /// Storage error (Arrow tables)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
