//! Error taxonomy shared by every adapter and manager.

use thiserror::Error;

/// Errors produced by the Ceres library.
#[derive(Error, Debug)]
pub enum CeresError {
    /// External binary is not installed or not on `PATH`.
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// External command exited non-zero.
    #[error("{program} failed ({status}): {output}")]
    CommandFailed {
        program: String,
        status: String,
        output: String,
    },

    /// External command succeeded but printed something we cannot interpret.
    #[error("unexpected output from {what}: {detail}")]
    UnexpectedOutput { what: String, detail: String },

    /// Bounded wait loop exhausted.
    #[error("timed out after {waited_secs}s waiting for {what}")]
    Timeout { what: String, waited_secs: u64 },

    /// Deployment state record unreadable or inconsistent.
    #[error("state error: {0}")]
    State(String),

    /// Deployment state record changed between read and write.
    #[error("deployment state was modified concurrently (read at resourceVersion {resource_version}); re-run the command")]
    StateConflict { resource_version: String },

    /// Bad argument, unknown name, or missing confirmation.
    #[error("{0}")]
    Validation(String),

    /// A required deployment step failed.
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<CeresError>,
    },

    /// SMTP or REST failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CeresError {
    /// Wrap with the name of the step that failed.
    #[must_use]
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Whether the API server answered that the object does not exist.
    ///
    /// Only the server's `(NotFound)` reason counts; client-side failures such
    /// as a missing credential plugin also print "not found" but say nothing
    /// about the object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::CommandFailed { output, .. } => output.contains("Error from server (NotFound)"),
            _ => false,
        }
    }

    /// Whether this is an optimistic-concurrency rejection from the cluster.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::CommandFailed { output, .. } => {
                output.contains("Conflict")
                    || output.contains("the object has been modified")
                    || output.contains("AlreadyExists")
            }
            Self::StateConflict { .. } => true,
            _ => false,
        }
    }
}

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, CeresError>;
