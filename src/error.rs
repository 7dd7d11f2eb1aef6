//! Error types for the pheWAS engine
//!
//! Every variant carries an actionable message. [`Error::kind`] groups the
//! variants so callers can guard on a class of failure (for example, a
//! double-initialisation bug is always [`ErrorKind::State`]).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration, detected before any job runs.
    Configuration,
    /// A named variant, phenotype or sample does not exist.
    Lookup,
    /// An operation is illegal in the current lifecycle state.
    State,
    /// A statistical model could not be fitted.
    Fit,
    /// Sample sequences of the two data sources cannot be reconciled.
    SampleReconciliation,
    /// Persistence layer failure.
    Storage,
    /// Filesystem failure.
    Io,
    /// Anything else.
    Other,
}

/// pheWAS engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transformation name not in the registry
    #[error("Unknown transformation '{0}'. Available: log, inverse-normal-transform")]
    UnknownTransformation(String),

    /// Projection on a field the catalog does not have
    #[error("Unknown field '{field}' (available: {available})")]
    UnknownField {
        /// Requested field
        field: String,
        /// Comma separated list of valid fields
        available: String,
    },

    /// Variant set file could not be parsed
    #[error("Malformed set file {path}: {reason}")]
    MalformedSetFile {
        /// File being parsed
        path: String,
        /// What was wrong
        reason: String,
    },

    /// Feature acknowledged but not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Unknown name at the point of access
    #[error("'{name}' is not in the {what}")]
    Lookup {
        /// Kind of collection that was searched
        what: &'static str,
        /// The offending name
        name: String,
    },

    /// Filter configuration attempted on a frozen genotype source
    #[error("Once initialized, genotype databases are immutable. Further filtering needs to be done at the Task level.")]
    FrozenDatabase,

    /// Variant catalog already holds rows from a previous initialisation
    #[error("Variant catalog already populated ({0} variants). Refusing to insert twice.")]
    CatalogAlreadyPopulated(usize),

    /// Related phenotype exclusions triggered a second time
    #[error("Related phenotype exclusions were already computed for this experiment")]
    ExclusionsAlreadyComputed,

    /// Task lifecycle violation
    #[error("Task '{task}' cannot {action} while {state}")]
    InvalidTaskState {
        /// Task name (or type when not yet named)
        task: String,
        /// Attempted transition
        action: &'static str,
        /// Current state
        state: String,
    },

    /// Jobs that produced no result because their worker died
    #[error("Task '{task}' lost {lost} result(s): a worker thread died mid-job")]
    LostResults {
        /// Task name
        task: String,
        /// Jobs without a result
        lost: usize,
    },

    /// Work pushed after `done_pushing`
    #[error("Work queue closed (no more jobs accepted)")]
    QueueClosed,

    /// A (task, entity, phenotype) triple was written twice
    #[error("Duplicate result for task '{task}': entity '{entity}', phenotype '{phenotype}'")]
    DuplicateResult {
        /// Task name
        task: String,
        /// Variant or set name
        entity: String,
        /// Phenotype name
        phenotype: String,
    },

    /// Statistical fit failure (recovered per job)
    #[error("Model fit failed: {0}")]
    FitFailed(String),

    /// Reordering request contains samples the source does not have
    #[error("Some of the given samples are not in the phenotype database ({0})")]
    ExtraSamples(String),

    /// Reordering request drops samples while subsetting is disallowed
    #[error("Can't set the sequence because {0} entries are missing, resulting in ambiguous order")]
    MissingSamples(usize),

    /// Sample identifier appears more than once
    #[error("Sample '{0}' appears more than once, sample identity would be ambiguous")]
    DuplicateSamples(String),

    /// Run directory collision
    #[error("Run directory '{}' already exists. Remove it or rename the experiment.", .0.display())]
    RunDirectoryExists(PathBuf),

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialisation error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delimited file error
    #[error("Delimited file error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for an unknown phenotype.
    pub fn unknown_phenotype(name: impl Into<String>) -> Self {
        Self::Lookup {
            what: "phenotype database",
            name: name.into(),
        }
    }

    /// Shorthand for an unknown variant.
    pub fn unknown_variant(name: impl Into<String>) -> Self {
        Self::Lookup {
            what: "genotype database",
            name: name.into(),
        }
    }

    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::UnknownTransformation(_)
            | Self::UnknownField { .. }
            | Self::MalformedSetFile { .. }
            | Self::NotImplemented(_)
            | Self::InvalidInput(_) => ErrorKind::Configuration,
            Self::Lookup { .. } => ErrorKind::Lookup,
            Self::FrozenDatabase
            | Self::CatalogAlreadyPopulated(_)
            | Self::ExclusionsAlreadyComputed
            | Self::InvalidTaskState { .. }
            | Self::QueueClosed
            | Self::DuplicateResult { .. } => ErrorKind::State,
            Self::FitFailed(_) | Self::LostResults { .. } => ErrorKind::Fit,
            Self::ExtraSamples(_) | Self::MissingSamples(_) | Self::DuplicateSamples(_) => {
                ErrorKind::SampleReconciliation
            }
            Self::RunDirectoryExists(_)
            | Self::StorageError(_)
            | Self::Arrow(_)
            | Self::Parquet(_)
            | Self::Json(_)
            | Self::Csv(_) => ErrorKind::Storage,
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// True for the state errors raised by double initialisation.
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::State)
    }
}
