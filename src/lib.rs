//! Session resolution and demo-mode authentication core for TransportX.
//!
//! The crate decides, from process configuration, whether a managed backend
//! is reachable or the application must run against local persistence only,
//! then resolves the current identity accordingly and exposes the credential
//! operations (sign-in, sign-up, demo login, sign-out, profile update).
//!
//! The entry point is [`SessionManager`]: construct it with a
//! [`Configuration`], a [`store::LocalStore`] and, when configured, an
//! [`backend::AuthBackend`], call [`SessionManager::resolve`] once at
//! startup, then read or subscribe to its [`SessionState`].

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
mod crypto;
pub mod demo;
pub mod error;
pub mod session;
pub mod store;
pub mod user;

pub use backend::{AuthBackend, AuthPayload, BackendSession};
pub use config::Configuration;
pub use crypto::CryptoError;
pub use error::{AuthError, Result};
pub use session::{SessionManager, SessionState};
pub use user::{Identity, Profile, ProfilePatch, Role};
