use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{what} `{key}` not found")]
    NotFound { what: &'static str, key: String },
    #[error("duplicate cache token `{token}`")]
    DuplicateKey { token: String },
    #[error("invalid table query `{segment}`: {reason}")]
    InvalidQuery { segment: String, reason: &'static str },
}

impl DomainError {
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    pub fn duplicate_key(token: impl Into<String>) -> Self {
        Self::DuplicateKey {
            token: token.into(),
        }
    }

    pub fn invalid_query(segment: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidQuery {
            segment: segment.into(),
            reason,
        }
    }
}
