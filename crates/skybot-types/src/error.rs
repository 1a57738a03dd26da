/// Failure of an outbound call to a collaborator service
/// (social network, completion API, PLC directory).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("request rejected {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connect(_) | Self::Server { .. } | Self::RateLimited
        )
    }

    /// Classify an HTTP status that was not a success.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth(body),
            429 => Self::RateLimited,
            500..=599 => Self::Server { status, body },
            _ => Self::Status { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ClientError::from_status(502, String::new()).is_transient());
        assert!(ClientError::from_status(429, String::new()).is_transient());
        assert!(!ClientError::from_status(400, "bad".into()).is_transient());
        assert!(matches!(
            ClientError::from_status(401, "expired".into()),
            ClientError::Auth(_)
        ));
    }
}
