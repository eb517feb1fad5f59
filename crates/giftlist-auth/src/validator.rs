//! The identity validation seam.

use giftlist_core::SubjectId;

use crate::errors::AuthError;

/// Validates an identity token presented at connect time.
///
/// Implementations must be synchronous and stateless from the caller's
/// point of view: one call per connection attempt, no retries.
pub trait IdentityValidator: Send + Sync {
    /// Return the subject the token was issued to, or why it was rejected.
    fn validate(&self, token: &str) -> Result<SubjectId, AuthError>;
}

impl<F> IdentityValidator for F
where
    F: Fn(&str) -> Result<SubjectId, AuthError> + Send + Sync,
{
    fn validate(&self, token: &str) -> Result<SubjectId, AuthError> {
        self(token)
    }
}
