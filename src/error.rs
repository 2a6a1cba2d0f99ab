//! Error and retry types shared by the surface, the controller and the supervisor.

use thiserror::Error;

/// Failures talking to the game surface. Anything of this type escaping a
/// controller step is treated as unexpected and answered with a full restart.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Could not open the DevTools WebSocket.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Serialization, transport or unexpected message shape.
    #[error("DevTools protocol error: {detail}")]
    Protocol { detail: String },

    /// A page script threw.
    #[error("page script raised: {message}")]
    Script { message: String },

    /// An element vanished between being located and being used.
    #[error("element not found: {what}")]
    ElementNotFound { what: String },
}

/// Recoverable outcomes. The controller waits and stays in its current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Retry {
    /// An expected element or control is not on the page (yet).
    #[error("{0} not found")]
    TransientAbsence(&'static str),

    /// The completion container is there but holds too few controls.
    #[error("needed {needed} action controls, found {found}")]
    ActionFailure { needed: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized color {input:?}, expected rgb(r, g, b)")]
pub struct ColorParseError {
    pub input: String,
}
