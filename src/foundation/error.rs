use serde::{Deserialize, Serialize};

/// Convenience result type used across the engine.
pub type RenderResult<T> = Result<T, RenderError>;

/// Terminal outcome of a frame/view request, recorded once the request
/// settles and surfaced to every deduplicated requester.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The request produced its image.
    Ok,
    /// The plugin or the scheduler reported a hard failure.
    Failed,
    /// The render was cancelled while in flight.
    Aborted,
    /// An input the request depends on is not connected. Downstream this
    /// reads as "nothing to render here", not as a failure.
    InputDisconnected,
    /// A backend ran out of memory and no fallback remained.
    OutOfMemory,
}

impl Status {
    /// True for outcomes that poison the execution pass.
    /// `InputDisconnected` deliberately does not.
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failed | Status::Aborted | Status::OutOfMemory)
    }
}

/// Top-level error taxonomy used by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// A plugin action or the scheduler failed.
    #[error("render failed: {0}")]
    Failed(String),

    /// The render was aborted. Sticky once observed.
    #[error("render aborted")]
    Aborted,

    /// A required input is not connected.
    #[error("input disconnected")]
    InputDisconnected,

    /// A backend could not allocate the memory it needed.
    #[error("out of memory")]
    OutOfMemory,

    /// Wrapped lower-level error from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RenderError {
    /// Build a [`RenderError::Failed`] value.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// The terminal status this error maps to.
    pub fn status(&self) -> Status {
        match self {
            RenderError::Failed(_) | RenderError::Other(_) => Status::Failed,
            RenderError::Aborted => Status::Aborted,
            RenderError::InputDisconnected => Status::InputDisconnected,
            RenderError::OutOfMemory => Status::OutOfMemory,
        }
    }

    /// Rebuilds the error corresponding to a non-`Ok` status.
    pub fn from_status(status: Status) -> Option<RenderError> {
        match status {
            Status::Ok => None,
            Status::Failed => Some(RenderError::failed("upstream request failed")),
            Status::Aborted => Some(RenderError::Aborted),
            Status::InputDisconnected => Some(RenderError::InputDisconnected),
            Status::OutOfMemory => Some(RenderError::OutOfMemory),
        }
    }
}

/// Terminal status of a finished unit of work.
pub fn status_of<T>(r: &RenderResult<T>) -> Status {
    match r {
        Ok(_) => Status::Ok,
        Err(e) => e.status(),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
