//! Local demo-mode persistence.
//!
//! Three well-known keys back demo mode: the demo-mode flag, the legacy
//! current-user cache and the email-keyed demo user collection. All three
//! live in a [`LocalStore`] and are owned by [`DemoStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{AuthError, Result};
use crate::store::LocalStore;
use crate::user::{self, Identity, Profile, ProfilePatch, Role};

/// Marker meaning "the reserved demo identity is active".
pub(crate) const DEMO_FLAG_KEY: &str = "transportx_demo_user";
/// Legacy cache of the current demo-store user.
pub(crate) const CURRENT_USER_KEY: &str = "transportx_current_user";
/// Email-keyed collection of registered demo users.
pub(crate) const DEMO_USERS_KEY: &str = "transportx_demo_users";

/// A locally persisted credential+profile pair, used when no backend is
/// configured. The password is kept as an Argon2 PHC string, never in clear.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemoUserRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub wallet_balance: f64,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DemoUserRecord {
    /// View of the record as the signed-in actor.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            created_at: self.created_at,
        }
    }

    /// View of the record as a profile row.
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            avatar_url: self.avatar_url.clone(),
            role: self.role,
            wallet_balance: self.wallet_balance,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn apply(&mut self, patch: &ProfilePatch) {
        if let Some(full_name) = &patch.full_name {
            self.full_name = Some(full_name.clone());
        }
        if let Some(avatar_url) = &patch.avatar_url {
            self.avatar_url = Some(avatar_url.clone());
        }
        if let Some(wallet_balance) = patch.wallet_balance {
            self.wallet_balance = wallet_balance;
        }
        self.updated_at = Utc::now();
    }
}

/// Typed accessors over the three demo-mode keys.
#[derive(Clone)]
pub struct DemoStore {
    store: Arc<dyn LocalStore>,
}

impl DemoStore {
    /// Create a new [`DemoStore`] over a local store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    // Demo-mode flag.

    /// Whether the reserved demo identity is marked active.
    pub fn demo_flag(&self) -> Result<bool> {
        Ok(self.store.get(DEMO_FLAG_KEY)?.is_some())
    }

    /// Mark the reserved demo identity active.
    pub fn set_demo_flag(&self) -> Result<()> {
        let marker = serde_json::to_string(&user::demo_identity())
            .map_err(crate::store::StoreError::Json)?;
        self.store.set(DEMO_FLAG_KEY, &marker)?;
        Ok(())
    }

    /// Clear the marker. Idempotent.
    pub fn clear_demo_flag(&self) -> Result<()> {
        self.store.remove(DEMO_FLAG_KEY)?;
        Ok(())
    }

    // Legacy current-user cache.

    /// Read the cached current user. An unreadable entry counts as absent.
    pub fn current_user(&self) -> Result<Option<DemoUserRecord>> {
        let Some(raw) = self.store.get(CURRENT_USER_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(error = %err, "unreadable current-user cache");
                Ok(None)
            },
        }
    }

    /// Persist the current-user cache entry.
    pub fn set_current_user(&self, record: &DemoUserRecord) -> Result<()> {
        let raw = serde_json::to_string(record)
            .map_err(crate::store::StoreError::Json)?;
        self.store.set(CURRENT_USER_KEY, &raw)?;
        Ok(())
    }

    /// Remove the current-user cache entry. Idempotent.
    pub fn clear_current_user(&self) -> Result<()> {
        self.store.remove(CURRENT_USER_KEY)?;
        Ok(())
    }

    // Demo user collection.

    fn records(&self) -> Result<BTreeMap<String, DemoUserRecord>> {
        let Some(raw) = self.store.get(DEMO_USERS_KEY)? else {
            return Ok(BTreeMap::new());
        };

        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(err) => {
                tracing::warn!(error = %err, "unreadable demo user collection");
                Ok(BTreeMap::new())
            },
        }
    }

    fn save_records(
        &self,
        records: &BTreeMap<String, DemoUserRecord>,
    ) -> Result<()> {
        let raw = serde_json::to_string(records)
            .map_err(crate::store::StoreError::Json)?;
        self.store.set(DEMO_USERS_KEY, &raw)?;
        Ok(())
    }

    /// Find a record by email.
    pub fn find_user(&self, email: &str) -> Result<Option<DemoUserRecord>> {
        Ok(self.records()?.remove(email))
    }

    /// Register a new demo user. Fails with [`AuthError::EmailTaken`] when
    /// the email is already present; the existing record is left untouched.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<DemoUserRecord> {
        let mut records = self.records()?;
        if records.contains_key(email) {
            return Err(AuthError::EmailTaken);
        }

        let now = Utc::now();
        let record = DemoUserRecord {
            id: generate_id(),
            email: email.to_owned(),
            password_hash: crypto::hash_password(password)?,
            full_name: (!full_name.is_empty()).then(|| full_name.to_owned()),
            role: Role::User,
            wallet_balance: user::SIGNUP_WALLET_BALANCE,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        };

        records.insert(email.to_owned(), record.clone());
        self.save_records(&records)?;
        Ok(record)
    }

    /// Check credentials against the collection.
    ///
    /// The failure does not say which of email or password was wrong.
    pub fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<DemoUserRecord> {
        let record = self
            .find_user(email)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !crypto::verify_password(password, &record.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(record)
    }

    /// Merge a partial update into the cached current user, persisting both
    /// the cache entry and the collection record when present.
    pub fn update_current(
        &self,
        patch: &ProfilePatch,
    ) -> Result<Option<DemoUserRecord>> {
        let Some(mut record) = self.current_user()? else {
            return Ok(None);
        };

        record.apply(patch);
        self.set_current_user(&record)?;

        let mut records = self.records()?;
        if let Some(stored) = records.get_mut(&record.email) {
            *stored = record.clone();
            self.save_records(&records)?;
        }

        Ok(Some(record))
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("demo-{}", hex::encode(bytes))
}
