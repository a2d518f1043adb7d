use thiserror::Error;

/// Failure kinds the executor and pipeline stages distinguish. Everything
/// else travels as plain `anyhow::Error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing credentials or settings, caught before an automation body runs.
    #[error("configuration incomplete: {0}")]
    Configuration(String),

    /// A single external call (search, generation, fetch, dispatch) failed.
    #[error("external call failed: {0}")]
    TransientFetch(String),

    /// Generation output lacked the expected structured payload.
    #[error("could not parse {what}: {detail}")]
    Parse { what: String, detail: String },

    /// An item is missing data a stage requires before it can start.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl PipelineError {
    pub fn parse(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.into(),
        }
    }

    /// Short machine-readable label recorded in step metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::TransientFetch(_) => "transient_fetch",
            PipelineError::Parse { .. } => "parse",
            PipelineError::Precondition(_) => "precondition",
            PipelineError::NotFound(_) => "not_found",
        }
    }
}

/// Label for an arbitrary error, falling back to "error" for untyped ones.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<PipelineError>()
        .map(PipelineError::kind)
        .unwrap_or("error")
}
