//! Backend collaborator port.
//!
//! The managed auth+data service is consumed through [`AuthBackend`], never
//! implemented here. Its errors cross the boundary verbatim; the core only
//! ever inspects the [`BackendErrorKind::NotFound`] kind, which drives
//! profile creation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::user::{Identity, Profile, ProfilePatch};

/// Backend-issued proof of authentication. The token material is opaque to
/// the core; the backend returns the authenticated identity alongside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendSession {
    pub access_token: String,
    pub user: Identity,
}

/// Successful result of a credential operation.
///
/// Sign-up may return a user without a session when email confirmation is
/// pending; callers must distinguish the two outcomes.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthPayload {
    pub user: Identity,
    pub session: Option<BackendSession>,
}

/// Profile metadata forwarded with a sign-up request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignUpMetadata {
    pub full_name: Option<String>,
    /// Callback address for the email confirmation link.
    pub email_redirect_to: Option<String>,
}

/// Seed values for a freshly created profile row.
#[derive(Clone, Debug, PartialEq)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
}

/// Coarse classification of a backend failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The requested row does not exist.
    NotFound,
    /// Rejected credentials or row-level security.
    Unauthorized,
    /// The service could not be reached.
    Unavailable,
    Other,
}

/// Error as reported by the backend, carried through unmodified.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == BackendErrorKind::NotFound
    }
}

/// The managed auth+data service surface consumed by the core.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Retrieve the currently persisted session, if any.
    async fn get_session(&self)
    -> Result<Option<BackendSession>, BackendError>;

    /// Password sign-in.
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthPayload, BackendError>;

    /// Sign-up with profile metadata and a confirmation redirect.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignUpMetadata,
    ) -> Result<AuthPayload, BackendError>;

    /// Invalidate the current session.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Session-change notifications. The receiver is the subscription
    /// handle; dropping it ends the subscription.
    fn session_changes(
        &self,
    ) -> mpsc::UnboundedReceiver<Option<BackendSession>>;

    /// Look up a profile row keyed by identity id.
    async fn fetch_profile(
        &self,
        user_id: &str,
    ) -> Result<Profile, BackendError>;

    /// Insert a new profile row.
    async fn create_profile(
        &self,
        profile: NewProfile,
    ) -> Result<Profile, BackendError>;

    /// Partial update of a profile row keyed by identity id.
    async fn update_profile(
        &self,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> Result<(), BackendError>;
}
