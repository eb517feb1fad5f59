//! Auth error types.

/// Reasons a token is rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token was supplied.
    #[error("missing token")]
    MissingToken,

    /// Token is past its expiry.
    #[error("token expired")]
    Expired,

    /// Token could not be decoded or its signature or claims are wrong.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Expired => "expired",
            Self::InvalidToken(_) => "invalid_token",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::InvalidToken(err.to_string()),
        }
    }
}
