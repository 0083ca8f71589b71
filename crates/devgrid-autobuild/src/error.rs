//! Error types for the lifecycle scheduler.

use devgrid_schedule::PolicyError;
use devgrid_state::StateError;
use thiserror::Error;

/// Tick-level failures. A tick that fails this way reports no stats.
#[derive(Debug, Error)]
pub enum AutobuildError {
    #[error("failed to fetch eligible workspaces: {0}")]
    Fetch(#[source] StateError),
}

/// Why one workspace could not be handled in a tick. Retried on the next tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("template {0} not found")]
    TemplateNotFound(String),

    #[error("template version {0} not found")]
    TemplateVersionNotFound(String),

    #[error("owner {0} not found")]
    OwnerNotFound(String),

    #[error("workspace has no builds")]
    NoBuilds,

    #[error("resolve template policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("template version {version} is incompatible with the workspace parameters: missing {missing:?}")]
    IncompatibleParameters {
        version: String,
        missing: Vec<String>,
    },

    #[error("store: {0}")]
    Store(String),

    #[error("orchestrator: {0}")]
    Orchestrator(String),
}

impl From<StateError> for TransitionError {
    fn from(err: StateError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Errors from a build orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("build rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<OrchestratorError> for TransitionError {
    fn from(err: OrchestratorError) -> Self {
        Self::Orchestrator(err.to_string())
    }
}

/// Errors from a notification enqueuer. Never fatal to a transition.
#[derive(Debug, Error)]
#[error("enqueue notification: {0}")]
pub struct NotifyError(pub String);
