use thiserror::Error;

/// Canonical result for the streaming core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate a batch iterator.
///
/// Exhaustion is not an error: iterators signal it with `Ok(None)`.
/// The enum is `Clone` because fan-out and fan-in operators deliver the same
/// terminal cause to several consumers.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Early termination requested by a consumer or by the operator itself.
    #[error("iteration cancelled")]
    Cancelled,

    /// A producer offered to, or a consumer read from, a queue that was
    /// already completed.
    #[error("batch queue already terminated")]
    QueueTerminated,

    #[error("source failed: {0}")]
    Source(String),

    #[error("bind failed: {0}")]
    Bind(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("internal invariant failed: {0}")]
    Invariant(String),

    #[error("{primary} ({} suppressed)", .suppressed.len())]
    Suppressed {
        primary: Box<Error>,
        suppressed: Vec<Error>,
    },
}

impl Error {
    /// True for causes meaning "stopped on purpose" rather than "failed".
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Suppressed { primary, .. } => primary.is_cancellation(),
            _ => false,
        }
    }

    /// The error that caused termination, ignoring suppressed ones.
    pub fn primary(&self) -> &Error {
        match self {
            Error::Suppressed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Errors recorded after the primary one.
    pub fn suppressed(&self) -> &[Error] {
        match self {
            Error::Suppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Attach `other` as a suppressed error, keeping `self` as primary.
    pub fn suppress(self, other: Error) -> Error {
        match self {
            Error::Suppressed {
                primary,
                mut suppressed,
            } => {
                suppressed.push(other);
                Error::Suppressed {
                    primary,
                    suppressed,
                }
            }
            primary => Error::Suppressed {
                primary: Box::new(primary),
                suppressed: vec![other],
            },
        }
    }

    /// Build an `Error::Panicked` from a thread panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Error {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Error::Panicked(msg)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
