/// Shared error type used across all chat memory crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Upstream text-generation or embedding service failure.
    #[error("generation ({provider}): {message}")]
    Generation {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Structured output that failed schema validation or parsing after
    /// the strict attempts and the loose fallback were exhausted.
    #[error("structured generation ({schema}): {message}")]
    StructuredGeneration { schema: String, message: String },

    #[error("storage: {0}")]
    Storage(String),

    /// A caller bug: negative cost, malformed key, dimension mismatch.
    /// Never retried.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("compaction: {0}")]
    Compaction(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Used as the default predicate for [`crate::retry::retry`].
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) | Error::Storage(_) | Error::Io(_) => true,
            Error::Generation { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            Error::StructuredGeneration { .. } => true,
            Error::Json(_)
            | Error::ContractViolation(_)
            | Error::Compaction(_)
            | Error::Config(_)
            | Error::Auth(_)
            | Error::Other(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_status_decides_transience() {
        let rate_limited = Error::Generation {
            provider: "groq".into(),
            status: Some(429),
            message: "slow down".into(),
        };
        let bad_request = Error::Generation {
            provider: "groq".into(),
            status: Some(400),
            message: "bad".into(),
        };
        let no_status = Error::Generation {
            provider: "groq".into(),
            status: None,
            message: "connection reset".into(),
        };
        assert!(rate_limited.is_transient());
        assert!(!bad_request.is_transient());
        assert!(no_status.is_transient());
    }

    #[test]
    fn contract_violation_is_never_transient() {
        assert!(!Error::ContractViolation("negative cost".into()).is_transient());
        assert!(Error::Storage("down".into()).is_transient());
    }
}
