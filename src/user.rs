//! Identity and profile data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Fixed id of the reserved demo identity.
pub const DEMO_USER_ID: &str = "demo-user-id";
/// Reserved demo email, only reachable through the explicit demo login.
pub const DEMO_EMAIL: &str = "demo@transportx.com";

const DEMO_FULL_NAME: &str = "Demo User";
const DEMO_WALLET_BALANCE: f64 = 150.0;
/// Wallet balance granted to freshly signed-up demo users.
pub(crate) const SIGNUP_WALLET_BALANCE: f64 = 100.0;

/// Actor role. Admin assignment is external: the public sign-up path only
/// ever produces [`Role::User`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// The signed-in actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Row shape of the `profiles` table, also used for demo profiles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    /// Non-negative balance in the site currency.
    pub wallet_balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Merge a partial update into this profile.
    pub fn apply(&mut self, patch: &ProfilePatch) {
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

/// Partial profile update, mirroring the mutable columns of the
/// `profiles` table.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate,
)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[validate(range(min = 0.0, message = "Wallet balance cannot be negative."))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_balance: Option<f64>,
}

impl ProfilePatch {
    /// Whether the patch carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.avatar_url.is_none()
            && self.wallet_balance.is_none()
    }
}

/// The fixed reserved demo identity, distinct from any stored demo user.
pub fn demo_identity() -> Identity {
    Identity {
        id: DEMO_USER_ID.to_owned(),
        email: DEMO_EMAIL.to_owned(),
        full_name: Some(DEMO_FULL_NAME.to_owned()),
        role: Role::User,
        created_at: Utc::now(),
    }
}

/// Profile paired with the reserved demo identity.
pub fn demo_profile() -> Profile {
    let now = Utc::now();
    Profile {
        id: DEMO_USER_ID.to_owned(),
        email: DEMO_EMAIL.to_owned(),
        full_name: Some(DEMO_FULL_NAME.to_owned()),
        avatar_url: None,
        role: Role::User,
        wallet_balance: DEMO_WALLET_BALANCE,
        created_at: now,
        updated_at: now,
    }
}
