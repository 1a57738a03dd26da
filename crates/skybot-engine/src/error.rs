use skybot_types::ClientError;

/// Outcome of a dispatched call that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Every attempt hit a transient failure.
    #[error("{action} failed after {attempts} attempts: {source}")]
    Exhausted {
        action: String,
        attempts: u32,
        source: ClientError,
    },

    /// A permanent failure; the call was not retried.
    #[error("{action} abandoned: {source}")]
    Abandoned { action: String, source: ClientError },
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("completion returned no text")]
    EmptyCompletion,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Transient errors cut the current stream batch short so the Event is
    /// fetched again next cycle; anything else is logged and skipped.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Dispatch(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhausted_dispatches_are_transient() {
        let exhausted = EngineError::from(DispatchError::Exhausted {
            action: "post".into(),
            attempts: 3,
            source: ClientError::Timeout,
        });
        let abandoned = EngineError::from(DispatchError::Abandoned {
            action: "post".into(),
            source: ClientError::Malformed("text too long".into()),
        });
        assert!(exhausted.is_transient());
        assert!(!abandoned.is_transient());
        assert!(!EngineError::EmptyCompletion.is_transient());
    }
}
