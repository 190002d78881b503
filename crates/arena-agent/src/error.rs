use crate::runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Conflict(String),
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("container for instance {0} not found - may have been removed externally")]
    ContainerGone(String),
    #[error("{0}")]
    ResourceExhausted(String),
    #[error("{context}: {source}")]
    RuntimeFailure {
        context: &'static str,
        #[source]
        source: RuntimeError,
    },
}

impl LifecycleError {
    pub fn runtime(context: &'static str, source: RuntimeError) -> Self {
        Self::RuntimeFailure { context, source }
    }

    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) | Self::ContainerGone(_) => "not_found",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::RuntimeFailure { .. } => "runtime_failure",
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            Self::RuntimeFailure {
                source: RuntimeError::ImageNotFound(_),
                ..
            } => Some("Build or pull the game image before launching instances.".to_string()),
            Self::ResourceExhausted(_) => {
                Some("Terminate an instance or raise MAX_INSTANCES.".to_string())
            }
            _ => None,
        }
    }
}
