//! Error handler for the authentication core.

use thiserror::Error;
use validator::ValidationErrors;

use crate::backend::BackendError;
use crate::crypto::CryptoError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors returned by the credential gateway operations.
///
/// Configuration absence is not represented here: running without a backend
/// is a recognized operating mode, not a failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("this email is reserved for demo access")]
    ReservedEmail,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("user with this email already exists")]
    EmailTaken,

    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    /// Backend-reported error, propagated verbatim without reinterpretation.
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
