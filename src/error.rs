//! Error kinds raised while executing a test run.

use thiserror::Error;

/// Errors surfaced by the execution engine.
///
/// `Verification` is the expected, test-level failure of a step that
/// does not continue at failure. Everything else is unrecoverable for the
/// run it happens in.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("verification failed: {0}")]
    Verification(String),

    #[error("step '{step}' raised an error")]
    Step {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to create driver")]
    DriverCreation(#[source] anyhow::Error),

    #[error("failed to load data source '{name}'")]
    DataSource {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load test case '{name}'")]
    Load {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("test run '{run}' aborted")]
    Fatal {
        run: String,
        #[source]
        source: Box<RunError>,
    },
}

impl RunError {
    /// Wrap as a fatal error of `run`, unless it already is one.
    pub fn into_fatal(self, run: &str) -> RunError {
        match self {
            fatal @ RunError::Fatal { .. } => fatal,
            other => RunError::Fatal {
                run: run.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, RunError::Verification(_))
    }

    /// The innermost error, skipping `Fatal` wrappers.
    pub fn root(&self) -> &RunError {
        match self {
            RunError::Fatal { source, .. } => source.root(),
            other => other,
        }
    }
}
