//! Session resolution and the credential gateway.
//!
//! [`SessionManager`] owns the process-wide session state. Startup
//! resolution follows a strict priority order: the demo-mode flag first,
//! then (without a backend) the legacy current-user cache, then the backend
//! session. Backend failures during resolution are swallowed into
//! [`SessionState::Anonymous`]; the state never stays in
//! [`SessionState::Resolving`] after a settled operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use validator::Validate;

use crate::backend::{
    AuthBackend, AuthPayload, BackendSession, NewProfile, SignUpMetadata,
};
use crate::config::Configuration;
use crate::demo::DemoStore;
use crate::error::{AuthError, Result};
use crate::store::LocalStore;
use crate::user::{self, Identity, Profile, ProfilePatch};

/// Resolved session state. Every variant except [`SessionState::Resolving`]
/// is terminal until the next credential operation or backend notification.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SessionState {
    /// Startup resolution has not settled yet; the only loading state.
    #[default]
    Resolving,
    /// The reserved demo identity is active.
    Demo { user: Identity, profile: Profile },
    /// A locally cached demo-store user is active (no backend configured).
    Legacy { user: Identity, profile: Profile },
    /// A backend session authenticates the user. The profile arrives after
    /// a fetch-or-create round trip and may still be absent.
    Backend {
        user: Identity,
        session: BackendSession,
        profile: Option<Profile>,
    },
    /// Nobody is signed in.
    Anonymous,
}

impl SessionState {
    /// Current identity, if anyone is signed in.
    pub fn user(&self) -> Option<&Identity> {
        match self {
            Self::Demo { user, .. }
            | Self::Legacy { user, .. }
            | Self::Backend { user, .. } => Some(user),
            Self::Resolving | Self::Anonymous => None,
        }
    }

    /// Current profile, if resolved.
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Self::Demo { profile, .. } | Self::Legacy { profile, .. } => {
                Some(profile)
            },
            Self::Backend { profile, .. } => profile.as_ref(),
            Self::Resolving | Self::Anonymous => None,
        }
    }

    /// Active backend session, backend mode only.
    pub fn session(&self) -> Option<&BackendSession> {
        match self {
            Self::Backend { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Whether startup resolution is still pending.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Resolving)
    }

    /// Whether an identity is current.
    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }
}

#[derive(Debug, Validate)]
struct SignUpBody {
    #[validate(email(message = "Email must be formatted."))]
    email: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    password: String,
}

/// Owns the session state and exposes the credential operations.
///
/// Built once at the application root and passed down explicitly; readers
/// take snapshots with [`SessionManager::state`] or live updates with
/// [`SessionManager::subscribe`].
pub struct SessionManager {
    config: Configuration,
    store: DemoStore,
    backend: Option<Arc<dyn AuthBackend>>,
    state: Arc<watch::Sender<SessionState>>,
    /// Bumped on every transition; in-flight profile fetches compare it at
    /// apply time so a stale response can never resurrect a profile.
    generation: Arc<AtomicU64>,
    listener: Mutex<Option<JoinHandle<()>>>,
    confirm_redirect: Option<String>,
}

impl SessionManager {
    /// Create a new [`SessionManager`] in the [`SessionState::Resolving`]
    /// state. `backend` is only consulted while the configuration reports
    /// the backend as reachable.
    pub fn new(
        config: Configuration,
        store: Arc<dyn LocalStore>,
        backend: Option<Arc<dyn AuthBackend>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Resolving);

        Self {
            config,
            store: DemoStore::new(store),
            backend,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            listener: Mutex::new(None),
            confirm_redirect: None,
        }
    }

    /// Set the callback address forwarded with backend sign-up requests.
    pub fn with_confirm_redirect(mut self, url: impl Into<String>) -> Self {
        self.confirm_redirect = Some(url.into());
        self
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn configured_backend(&self) -> Option<&Arc<dyn AuthBackend>> {
        if self.config.is_backend_configured() {
            self.backend.as_ref()
        } else {
            None
        }
    }

    fn transition(&self, next: SessionState) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(next);
    }

    /// Resolve the current identity. Run once at startup; credential
    /// operations keep the state current afterwards.
    ///
    /// While the backend is configured this also starts the session-change
    /// listener, whose notifications re-run the backend branch.
    pub async fn resolve(&self) {
        // The demo flag short-circuits every other check.
        match self.store.demo_flag() {
            Ok(true) => {
                self.transition(SessionState::Demo {
                    user: user::demo_identity(),
                    profile: user::demo_profile(),
                });
                return;
            },
            Ok(false) => {},
            Err(err) => {
                tracing::warn!(error = %err, "demo flag unreadable, treated as unset");
            },
        }

        let Some(backend) = self.configured_backend() else {
            match self.store.current_user() {
                Ok(Some(record)) => {
                    tracing::debug!(user_id = %record.id, "legacy cached user restored");
                    self.transition(SessionState::Legacy {
                        user: record.identity(),
                        profile: record.profile(),
                    });
                },
                // Without configuration the UI must never block: fall back
                // to the reserved demo identity.
                Ok(None) => {
                    self.transition(SessionState::Demo {
                        user: user::demo_identity(),
                        profile: user::demo_profile(),
                    });
                },
                Err(err) => {
                    tracing::warn!(error = %err, "legacy cache unreadable");
                    self.transition(SessionState::Demo {
                        user: user::demo_identity(),
                        profile: user::demo_profile(),
                    });
                },
            }
            return;
        };

        self.spawn_listener(Arc::clone(backend));

        match backend.get_session().await {
            Ok(next) => {
                apply_session(backend, &self.state, &self.generation, next)
                    .await;
            },
            Err(err) => {
                tracing::warn!(error = %err, "session lookup failed, resolving anonymous");
                self.transition(SessionState::Anonymous);
            },
        }
    }

    fn spawn_listener(&self, backend: Arc<dyn AuthBackend>) {
        let mut changes = backend.session_changes();
        let state = Arc::clone(&self.state);
        let generation = Arc::clone(&self.generation);

        let handle = tokio::spawn(async move {
            while let Some(next) = changes.recv().await {
                apply_session(&backend, &state, &generation, next).await;
            }
        });

        if let Ok(mut listener) = self.listener.lock() {
            if let Some(previous) = listener.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Release the session-change subscription. Also runs on drop.
    pub fn close(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }

    /// Password sign-in.
    ///
    /// The reserved demo email is rejected before either store is
    /// consulted; demo access goes through [`SessionManager::login_demo`]
    /// only. In backend mode the result is returned verbatim and the state
    /// update arrives through the session-change notification.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthPayload> {
        if email == user::DEMO_EMAIL {
            return Err(AuthError::ReservedEmail);
        }

        let Some(backend) = self.configured_backend() else {
            let record = self.store.authenticate(email, password)?;
            self.store.set_current_user(&record)?;

            let identity = record.identity();
            self.transition(SessionState::Legacy {
                user: identity.clone(),
                profile: record.profile(),
            });

            return Ok(AuthPayload {
                user: identity,
                session: None,
            });
        };

        Ok(backend.sign_in(email, password).await?)
    }

    /// Sign-up with a display name.
    ///
    /// Demo path: enforces email uniqueness only and signs the new user in;
    /// credential rules belong to the real backend, so the body is validated
    /// on the configured branch alone. The backend path may return a user
    /// without a session while email confirmation is pending; the caller
    /// distinguishes the two outcomes.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<AuthPayload> {
        if email == user::DEMO_EMAIL {
            return Err(AuthError::ReservedEmail);
        }

        let Some(backend) = self.configured_backend() else {
            let record = self.store.register(email, password, full_name)?;
            self.store.set_current_user(&record)?;

            let identity = record.identity();
            self.transition(SessionState::Legacy {
                user: identity.clone(),
                profile: record.profile(),
            });

            return Ok(AuthPayload {
                user: identity,
                session: None,
            });
        };

        SignUpBody {
            email: email.to_owned(),
            password: password.to_owned(),
        }
        .validate()?;

        let metadata = SignUpMetadata {
            full_name: (!full_name.is_empty()).then(|| full_name.to_owned()),
            email_redirect_to: self.confirm_redirect.clone(),
        };

        Ok(backend.sign_up(email, password, metadata).await?)
    }

    /// Activate the reserved demo identity. Never touches the backend.
    pub fn login_demo(&self) -> Result<()> {
        self.store.set_demo_flag()?;
        self.transition(SessionState::Demo {
            user: user::demo_identity(),
            profile: user::demo_profile(),
        });
        Ok(())
    }

    /// Sign the current user out.
    ///
    /// The demo flag and legacy cache are cleared first so neither can go
    /// stale, whatever the configuration. In backend mode the state clear
    /// itself arrives through the session-change notification.
    pub async fn sign_out(&self) -> Result<()> {
        self.store.clear_demo_flag()?;
        self.store.clear_current_user()?;

        let Some(backend) = self.configured_backend() else {
            self.transition(SessionState::Anonymous);
            return Ok(());
        };

        // Invalidate any in-flight profile fetch right away instead of
        // waiting for the notification.
        self.generation.fetch_add(1, Ordering::SeqCst);
        backend.sign_out().await?;
        Ok(())
    }

    /// Merge a partial update into the current profile. No-op when nobody
    /// is signed in. In backend mode the local merge is optimistic; the
    /// profile is not re-fetched.
    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<()> {
        patch.validate()?;

        let Some(identity) = self.state.borrow().user().cloned() else {
            return Ok(());
        };

        let Some(backend) = self.configured_backend() else {
            if let Some(updated) = self.store.update_current(patch)? {
                self.state.send_if_modified(|state| match state {
                    SessionState::Demo { profile, .. }
                    | SessionState::Legacy { profile, .. } => {
                        *profile = updated.profile();
                        true
                    },
                    _ => false,
                });
            }
            return Ok(());
        };

        backend.update_profile(&identity.id, patch).await?;

        self.state.send_if_modified(|state| match state {
            SessionState::Backend {
                user,
                profile: Some(profile),
                ..
            } if user.id == identity.id => {
                profile.apply(patch);
                true
            },
            _ => false,
        });

        Ok(())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Replace the whole identity/session/profile trio from a backend session
/// value, then run the profile fetch-or-create sub-flow.
///
/// The generation captured after the replacement guards the profile write:
/// any transition in between drops the response.
async fn apply_session(
    backend: &Arc<dyn AuthBackend>,
    state: &watch::Sender<SessionState>,
    generation: &AtomicU64,
    next: Option<BackendSession>,
) {
    let current = generation.fetch_add(1, Ordering::SeqCst) + 1;

    let Some(session) = next else {
        state.send_replace(SessionState::Anonymous);
        return;
    };

    let user = session.user.clone();
    state.send_replace(SessionState::Backend {
        user: user.clone(),
        session,
        profile: None,
    });

    let Some(profile) = fetch_or_create_profile(backend.as_ref(), &user).await
    else {
        return;
    };

    if generation.load(Ordering::SeqCst) != current {
        tracing::debug!(user_id = %user.id, "stale profile response dropped");
        return;
    }

    state.send_if_modified(|state| match state {
        SessionState::Backend {
            user: active,
            profile: slot,
            ..
        } if active.id == profile.id => {
            *slot = Some(profile);
            true
        },
        _ => false,
    });
}

/// Look up the profile row for `user`; create it from the identity when the
/// backend reports it missing. Any other failure leaves the profile unset.
async fn fetch_or_create_profile(
    backend: &dyn AuthBackend,
    user: &Identity,
) -> Option<Profile> {
    match backend.fetch_profile(&user.id).await {
        Ok(profile) => Some(profile),
        Err(err) if err.is_not_found() => {
            let seed = NewProfile {
                id: user.id.clone(),
                email: user.email.clone(),
                full_name: user.full_name.clone(),
            };
            match backend.create_profile(seed).await {
                Ok(profile) => Some(profile),
                Err(err) => {
                    tracing::warn!(error = %err, user_id = %user.id, "profile creation failed");
                    None
                },
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, user_id = %user.id, "profile lookup failed");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::{Notify, mpsc};

    use super::*;
    use crate::backend::{BackendError, BackendErrorKind};
    use crate::store::MemoryStore;
    use crate::user::Role;

    fn configured() -> Configuration {
        Configuration::new("https://project.supabase.co", "k".repeat(101))
    }

    fn identity(id: &str, email: &str) -> Identity {
        Identity {
            id: id.to_owned(),
            email: email.to_owned(),
            full_name: Some("Backend User".to_owned()),
            role: Role::User,
            created_at: Utc::now(),
        }
    }

    fn session_for(id: &str, email: &str) -> BackendSession {
        BackendSession {
            access_token: "opaque-token".to_owned(),
            user: identity(id, email),
        }
    }

    fn profile_for(user: &Identity) -> Profile {
        let now = Utc::now();
        Profile {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            avatar_url: None,
            role: user.role,
            wallet_balance: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Controllable in-memory double for the managed backend.
    #[derive(Default)]
    struct MockBackend {
        session: Mutex<Option<BackendSession>>,
        profiles: Mutex<HashMap<String, Profile>>,
        /// When set, `fetch_profile` waits for a notification before
        /// answering, so tests can interleave a sign-out.
        profile_gate: Option<Arc<Notify>>,
        session_failure: Option<BackendError>,
        events: Mutex<Option<mpsc::UnboundedSender<Option<BackendSession>>>>,
    }

    impl MockBackend {
        fn with_session(session: BackendSession) -> Self {
            Self {
                session: Mutex::new(Some(session)),
                ..Default::default()
            }
        }

        fn emit(&self, next: Option<BackendSession>) {
            if let Some(sender) = self.events.lock().unwrap().as_ref() {
                sender.send(next).ok();
            }
        }
    }

    #[async_trait::async_trait]
    impl AuthBackend for MockBackend {
        async fn get_session(
            &self,
        ) -> std::result::Result<Option<BackendSession>, BackendError>
        {
            if let Some(failure) = &self.session_failure {
                return Err(failure.clone());
            }
            Ok(self.session.lock().unwrap().clone())
        }

        async fn sign_in(
            &self,
            email: &str,
            _password: &str,
        ) -> std::result::Result<AuthPayload, BackendError> {
            let session = session_for("backend-1", email);
            *self.session.lock().unwrap() = Some(session.clone());
            self.emit(Some(session.clone()));
            Ok(AuthPayload {
                user: session.user.clone(),
                session: Some(session),
            })
        }

        async fn sign_up(
            &self,
            email: &str,
            _password: &str,
            metadata: SignUpMetadata,
        ) -> std::result::Result<AuthPayload, BackendError> {
            // Confirmation pending: user without a session.
            let mut user = identity("backend-new", email);
            user.full_name = metadata.full_name;
            Ok(AuthPayload {
                user,
                session: None,
            })
        }

        async fn sign_out(&self) -> std::result::Result<(), BackendError> {
            *self.session.lock().unwrap() = None;
            self.emit(None);
            Ok(())
        }

        fn session_changes(
            &self,
        ) -> mpsc::UnboundedReceiver<Option<BackendSession>> {
            let (sender, receiver) = mpsc::unbounded_channel();
            *self.events.lock().unwrap() = Some(sender);
            receiver
        }

        async fn fetch_profile(
            &self,
            user_id: &str,
        ) -> std::result::Result<Profile, BackendError> {
            if let Some(gate) = &self.profile_gate {
                gate.notified().await;
            }
            self.profiles
                .lock()
                .unwrap()
                .get(user_id)
                .cloned()
                .ok_or_else(|| BackendError::not_found("row not found"))
        }

        async fn create_profile(
            &self,
            seed: NewProfile,
        ) -> std::result::Result<Profile, BackendError> {
            let profile = profile_for(&Identity {
                id: seed.id.clone(),
                email: seed.email,
                full_name: seed.full_name,
                role: Role::User,
                created_at: Utc::now(),
            });
            self.profiles
                .lock()
                .unwrap()
                .insert(seed.id, profile.clone());
            Ok(profile)
        }

        async fn update_profile(
            &self,
            user_id: &str,
            patch: &ProfilePatch,
        ) -> std::result::Result<(), BackendError> {
            let mut profiles = self.profiles.lock().unwrap();
            let profile = profiles
                .get_mut(user_id)
                .ok_or_else(|| BackendError::not_found("row not found"))?;
            profile.apply(patch);
            Ok(())
        }
    }

    fn local_manager() -> SessionManager {
        SessionManager::new(
            Configuration::default(),
            Arc::new(MemoryStore::new()),
            None,
        )
    }

    fn backend_manager(backend: MockBackend) -> SessionManager {
        backend_manager_over(backend, Arc::new(MemoryStore::new()))
    }

    fn backend_manager_over(
        backend: MockBackend,
        store: Arc<MemoryStore>,
    ) -> SessionManager {
        SessionManager::new(
            configured(),
            store,
            Some(Arc::new(backend) as Arc<dyn AuthBackend>),
        )
    }

    /// Await the next state matching `pred` through a subscription. Bounded
    /// so a missed notification fails the test instead of hanging it.
    async fn wait_for(
        updates: &mut watch::Receiver<SessionState>,
        mut pred: impl FnMut(&SessionState) -> bool,
    ) -> SessionState {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let state = updates.borrow_and_update().clone();
                if pred(&state) {
                    return state;
                }
                updates.changed().await.expect("state sender dropped");
            }
        })
        .await
        .expect("expected state transition")
    }

    /// Give background transitions a moment to land. Only for asserting
    /// that nothing changed; positive assertions go through [`wait_for`].
    async fn settled(manager: &SessionManager) -> SessionState {
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.state()
    }

    fn init_tracing() {
        use tracing_subscriber::EnvFilter;

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    }

    #[tokio::test]
    async fn demo_flag_takes_precedence_over_backend_session() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        DemoStore::new(store.clone()).set_demo_flag().unwrap();

        let manager = backend_manager_over(
            MockBackend::with_session(session_for("backend-1", "x@y.com")),
            store,
        );
        manager.resolve().await;

        let state = manager.state();
        assert_eq!(state.user().unwrap().id, user::DEMO_USER_ID);
        assert!(matches!(state, SessionState::Demo { .. }));
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn unconfigured_resolution_prefers_legacy_cache() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let demo = DemoStore::new(store.clone());
        let record = demo.register("a@b.com", "password1", "Name").unwrap();
        demo.set_current_user(&record).unwrap();

        let manager =
            SessionManager::new(Configuration::default(), store, None);
        manager.resolve().await;

        let state = manager.state();
        assert!(matches!(state, SessionState::Legacy { .. }));
        assert_eq!(state.user().unwrap().id, record.id);
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn unconfigured_resolution_defaults_to_demo() {
        let manager = local_manager();
        manager.resolve().await;

        let state = manager.state();
        assert!(matches!(state, SessionState::Demo { .. }));
        assert_eq!(state.user().unwrap().email, user::DEMO_EMAIL);
    }

    #[tokio::test]
    async fn backend_session_resolves_with_created_profile() {
        let session = session_for("backend-1", "x@y.com");
        let manager = backend_manager(MockBackend::with_session(session));
        manager.resolve().await;

        let state = manager.state();
        assert!(matches!(state, SessionState::Backend { .. }));
        assert_eq!(state.user().unwrap().id, "backend-1");
        // No profile row existed; the fetch-or-create sub-flow seeded one.
        let profile = state.profile().unwrap();
        assert_eq!(profile.id, "backend-1");
        assert_eq!(profile.email, "x@y.com");
    }

    #[tokio::test]
    async fn backend_without_session_resolves_anonymous() {
        let manager = backend_manager(MockBackend::default());
        manager.resolve().await;

        assert_eq!(manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn backend_failure_resolves_anonymous() {
        let manager = backend_manager(MockBackend {
            session_failure: Some(BackendError::new(
                BackendErrorKind::Unavailable,
                "connection refused",
            )),
            ..Default::default()
        });
        manager.resolve().await;

        let state = manager.state();
        assert_eq!(state, SessionState::Anonymous);
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn reserved_email_never_signs_in_or_up() {
        let manager = local_manager();
        manager.resolve().await;

        assert!(matches!(
            manager.sign_in(user::DEMO_EMAIL, "any").await,
            Err(AuthError::ReservedEmail)
        ));
        assert!(matches!(
            manager
                .sign_up(user::DEMO_EMAIL, "password1", "Name")
                .await,
            Err(AuthError::ReservedEmail)
        ));

        // Same rejection when a backend is configured.
        let manager = backend_manager(MockBackend::default());
        assert!(matches!(
            manager.sign_in(user::DEMO_EMAIL, "any").await,
            Err(AuthError::ReservedEmail)
        ));
    }

    #[tokio::test]
    async fn demo_sign_up_round_trip() {
        let manager = local_manager();
        manager.resolve().await;

        // The demo store takes any password; credential rules only apply
        // when a real backend handles the sign-up.
        let created = manager.sign_up("a@b.com", "pw", "Name").await.unwrap();
        assert!(created.session.is_none());

        manager.sign_out().await.unwrap();
        assert_eq!(manager.state(), SessionState::Anonymous);

        let signed_in = manager.sign_in("a@b.com", "pw").await.unwrap();
        assert_eq!(signed_in.user.id, created.user.id);
        assert_eq!(signed_in.user.full_name, created.user.full_name);
        assert!(matches!(manager.state(), SessionState::Legacy { .. }));
    }

    #[tokio::test]
    async fn duplicate_sign_up_fails() {
        let manager = local_manager();
        manager.resolve().await;

        let first = manager
            .sign_up("a@b.com", "password1", "First")
            .await
            .unwrap();
        assert!(matches!(
            manager.sign_up("a@b.com", "password2", "Second").await,
            Err(AuthError::EmailTaken)
        ));

        // First record still signs in unchanged.
        let unchanged = manager.sign_in("a@b.com", "password1").await.unwrap();
        assert_eq!(unchanged.user.id, first.user.id);
        assert_eq!(unchanged.user.full_name, Some("First".to_owned()));
    }

    #[tokio::test]
    async fn backend_sign_up_validates_body() {
        let manager = backend_manager(MockBackend::default());

        assert!(matches!(
            manager.sign_up("not-an-email", "password1", "Name").await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            manager.sign_up("a@b.com", "short", "Name").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn sign_out_clears_demo_flag_across_reload() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let backend: Arc<dyn AuthBackend> = Arc::new(MockBackend::default());

        let manager = SessionManager::new(
            configured(),
            store.clone(),
            Some(Arc::clone(&backend)),
        );
        manager.resolve().await;
        manager.login_demo().unwrap();
        assert!(matches!(manager.state(), SessionState::Demo { .. }));

        let mut updates = manager.subscribe();
        manager.sign_out().await.unwrap();
        let state = wait_for(&mut updates, |state| {
            matches!(state, SessionState::Anonymous)
        })
        .await;
        assert_eq!(state, SessionState::Anonymous);

        // Simulated reload: a fresh manager over the same store must not
        // come back as the demo identity.
        let reloaded =
            SessionManager::new(configured(), store, Some(backend));
        reloaded.resolve().await;
        assert_eq!(reloaded.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn stale_profile_response_is_dropped_after_sign_out() {
        init_tracing();

        let gate = Arc::new(Notify::new());
        let session = session_for("backend-1", "x@y.com");
        let backend = MockBackend {
            session: Mutex::new(Some(session.clone())),
            profiles: Mutex::new(HashMap::from([(
                "backend-1".to_owned(),
                profile_for(&session.user),
            )])),
            profile_gate: Some(gate.clone()),
            ..Default::default()
        };

        let manager = Arc::new(backend_manager(backend));
        let mut updates = manager.subscribe();

        // resolve() blocks on the gated profile fetch; drive it from a task.
        let resolving = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.resolve().await })
        };
        wait_for(&mut updates, |state| {
            matches!(state, SessionState::Backend { .. })
        })
        .await;

        manager.sign_out().await.unwrap();
        wait_for(&mut updates, |state| {
            matches!(state, SessionState::Anonymous)
        })
        .await;

        // Release the fetch only after the sign-out landed; its answer must
        // be dropped, not applied over the anonymous state.
        gate.notify_one();
        resolving.await.unwrap();

        let state = manager.state();
        assert_eq!(state, SessionState::Anonymous);
        assert!(state.profile().is_none());
    }

    #[tokio::test]
    async fn session_change_notification_updates_state() {
        init_tracing();

        let manager = backend_manager(MockBackend::default());
        manager.resolve().await;
        assert_eq!(manager.state(), SessionState::Anonymous);

        let mut updates = manager.subscribe();
        let payload =
            manager.sign_in("x@y.com", "password1").await.unwrap();
        assert!(payload.session.is_some());

        let state = wait_for(&mut updates, |state| {
            matches!(state, SessionState::Backend { .. })
        })
        .await;
        assert_eq!(state.user().unwrap().email, "x@y.com");

        manager.sign_out().await.unwrap();
        let state = wait_for(&mut updates, |state| {
            matches!(state, SessionState::Anonymous)
        })
        .await;
        assert_eq!(state, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn backend_sign_up_returns_pending_confirmation_verbatim() {
        let manager = backend_manager(MockBackend::default())
            .with_confirm_redirect("https://transportx.com/auth/callback");
        manager.resolve().await;

        let payload = manager
            .sign_up("new@y.com", "password1", "New User")
            .await
            .unwrap();
        assert!(payload.session.is_none());
        assert_eq!(payload.user.full_name, Some("New User".to_owned()));
        // No notification fired; the caller decides what "pending" means.
        assert_eq!(settled(&manager).await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn update_profile_is_noop_when_anonymous() {
        let manager = backend_manager(MockBackend::default());
        manager.resolve().await;

        manager
            .update_profile(&ProfilePatch {
                full_name: Some("Ghost".to_owned()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn update_profile_merges_optimistically_in_backend_mode() {
        let session = session_for("backend-1", "x@y.com");
        let manager = backend_manager(MockBackend::with_session(session));
        manager.resolve().await;

        manager
            .update_profile(&ProfilePatch {
                wallet_balance: Some(25.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let profile = manager.state().profile().cloned().unwrap();
        assert_eq!(profile.wallet_balance, 25.0);
    }

    #[tokio::test]
    async fn update_profile_persists_for_legacy_user() {
        let manager = local_manager();
        manager.resolve().await;
        manager
            .sign_up("a@b.com", "password1", "Name")
            .await
            .unwrap();

        manager
            .update_profile(&ProfilePatch {
                full_name: Some("Renamed".to_owned()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            manager.state().profile().unwrap().full_name,
            Some("Renamed".to_owned())
        );

        // Negative wallet balance is rejected up front.
        assert!(matches!(
            manager
                .update_profile(&ProfilePatch {
                    wallet_balance: Some(-1.0),
                    ..Default::default()
                })
                .await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn loading_terminates_on_every_branch() {
        // Demo flag branch.
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        DemoStore::new(store.clone()).set_demo_flag().unwrap();
        let manager =
            SessionManager::new(Configuration::default(), store, None);
        manager.resolve().await;
        assert!(!manager.state().is_loading());

        // Legacy and default branches.
        let manager = local_manager();
        manager.resolve().await;
        assert!(!manager.state().is_loading());

        // Backend branches: session found, absent and failing.
        for backend in [
            MockBackend::with_session(session_for("backend-1", "x@y.com")),
            MockBackend::default(),
            MockBackend {
                session_failure: Some(BackendError::new(
                    BackendErrorKind::Unavailable,
                    "connection refused",
                )),
                ..Default::default()
            },
        ] {
            let manager = backend_manager(backend);
            manager.resolve().await;
            assert!(!manager.state().is_loading());
        }

        // Gateway calls, success or error, leave loading false too.
        let manager = local_manager();
        manager.resolve().await;
        manager.sign_in("ghost@b.com", "nope").await.unwrap_err();
        assert!(!manager.state().is_loading());
        manager
            .sign_up("a@b.com", "password1", "Name")
            .await
            .unwrap();
        assert!(!manager.state().is_loading());
        manager.login_demo().unwrap();
        assert!(!manager.state().is_loading());
        manager.sign_out().await.unwrap();
        assert!(!manager.state().is_loading());
    }

    #[tokio::test]
    async fn subscriber_sees_transitions() {
        let manager = local_manager();
        let mut updates = manager.subscribe();
        assert!(updates.borrow().is_loading());

        manager.resolve().await;
        updates.changed().await.unwrap();
        assert!(matches!(*updates.borrow(), SessionState::Demo { .. }));

        manager.sign_out().await.unwrap();
        updates.changed().await.unwrap();
        assert_eq!(*updates.borrow(), SessionState::Anonymous);
    }
}
