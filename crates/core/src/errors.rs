//! Error types and handling
//!
//! Each provisioning backend has its own error enum; all of them are wrapped in
//! [`BenchEnvError`] for unified propagation. Errors stop at the lifecycle
//! controller boundary, which logs them and converts them into success flags.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration value failed validation
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// Task category has no matching profile
    #[error("Unknown category '{category}' for {service}")]
    UnknownCategory { service: String, category: String },

    /// Settings file could not be parsed
    #[error("Failed to parse settings file: {message}")]
    Parsing { message: String },

    /// Settings file I/O error
    #[error("Failed to read settings file")]
    Io(#[from] std::io::Error),
}

/// Fixture download and extraction errors
#[derive(Error, Debug)]
pub enum FixtureError {
    /// No archive is published for this category
    #[error("No fixture archive known for category: {category}")]
    UnknownCategory { category: String },

    /// Archive download failed
    #[error("Fixture download error: {message}")]
    Download { message: String },

    /// Archive extraction failed
    #[error("Fixture extraction error: {message}")]
    Extraction { message: String },

    /// Extraction finished but the expected directory is absent
    #[error("Extracted fixture not found at expected path: {path}")]
    Missing { path: String },

    /// Local I/O failure while caching a fixture
    #[error("Fixture I/O error")]
    Io(#[from] std::io::Error),
}

/// Filesystem snapshot errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Baseline tree does not exist
    #[error("Baseline directory not found: {path}")]
    BaselineMissing { path: String },

    /// Working copy could not be created
    #[error("Failed to copy {from} to {to}: {message}")]
    Copy {
        from: String,
        to: String,
        message: String,
    },

    /// Directory could not be removed
    #[error("Failed to remove {path}: {message}")]
    Remove { path: String, message: String },

    /// Working copy and baseline would share files
    #[error("Working copy {working} overlaps baseline {baseline}")]
    Overlap { working: String, baseline: String },

    /// Restore requested without a working copy to restore from
    #[error("No backup directory available for restore")]
    NoBackup,

    /// Generic I/O failure
    #[error("Filesystem I/O error")]
    Io(#[from] std::io::Error),
}

/// Database provisioning errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Server unreachable or credentials rejected
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    /// SQL statement failed
    #[error("Database query failed: {message}")]
    Query { message: String },

    /// Per-task setup script exited non-zero
    #[error("Setup script failed with exit code {code}: {stderr}")]
    SetupScript { code: i32, stderr: String },

    /// Per-task setup script exceeded its timeout
    #[error("Setup script timed out after {seconds}s")]
    SetupTimeout { seconds: u64 },

    /// Restore tool reported a fatal error
    #[error("Restore of '{database}' failed: {message}")]
    Restore { database: String, message: String },

    /// Process spawn or local I/O failure
    #[error("Database tooling I/O error")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                DatabaseError::Connection {
                    message: err.to_string(),
                }
            }
            other => DatabaseError::Query {
                message: other.to_string(),
            },
        }
    }
}

/// Container runtime errors
#[derive(Error, Debug)]
pub enum DockerError {
    /// Container runtime is not installed or not accessible
    #[error("Container runtime is not installed or not accessible")]
    NotInstalled,

    /// Runtime CLI command error
    #[error("Docker CLI error: {0}")]
    CLIError(String),

    /// Loading the image archive failed
    #[error("Failed to load image from {path}: {message}")]
    ImageLoad { path: String, message: String },

    /// `run` exited non-zero
    #[error("Failed to start container {name}: {message}")]
    StartFailed { name: String, message: String },

    /// Readiness probe deadline expired
    #[error("Timed out waiting for {url} to become ready")]
    ReadinessTimeout { url: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum BenchEnvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Fixture-related errors
    #[error("Fixture error: {0}")]
    Fixture(#[from] FixtureError),

    /// Filesystem snapshot errors
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Container runtime errors
    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    /// A hook was asked to clean up a resource kind it does not own
    #[error("Unsupported resource kind '{kind}' for {service}")]
    UnsupportedResource { service: String, kind: String },
}

/// Convenience type alias for Results with BenchEnvError
pub type Result<T> = std::result::Result<T, BenchEnvError>;
