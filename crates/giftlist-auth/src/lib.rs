//! # giftlist-auth
//!
//! Identity token validation for realtime connections.
//!
//! The realtime layer consumes tokens; it never issues them. Validation is
//! behind the [`IdentityValidator`] trait so the server can be wired to any
//! token scheme. [`JwtValidator`] covers the default deployment: HS256 tokens
//! signed with a secret shared with the REST backend.

#![deny(unsafe_code)]

pub mod errors;
pub mod jwt;
pub mod validator;

pub use errors::AuthError;
pub use jwt::{Claims, JwtConfig, JwtValidator};
pub use validator::IdentityValidator;
