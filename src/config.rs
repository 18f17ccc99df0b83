//! Configuration manager for the authentication core.

use url::Url;

/// Domain of the managed backend service.
const BACKEND_DOMAIN: &str = "supabase.co";
/// A provisioned anonymous key is longer than any placeholder.
const MIN_KEY_LENGTH: usize = 100;

const URL_VAR: &str = "SUPABASE_URL";
const KEY_VAR: &str = "SUPABASE_ANON_KEY";

/// Process-wide backend configuration.
///
/// Absent or placeholder values are a recognized operating mode (demo mode),
/// never an error.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Backend service URL.
    pub backend_url: Option<String>,
    /// Backend service anonymous key.
    pub backend_key: Option<String>,
}

impl Configuration {
    /// Create a configuration from explicit values.
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            backend_url: Some(url.into()),
            backend_key: Some(key.into()),
        }
    }

    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            backend_url: std::env::var(URL_VAR).ok().filter(|v| !v.is_empty()),
            backend_key: std::env::var(KEY_VAR).ok().filter(|v| !v.is_empty()),
        }
    }

    /// Whether a real managed backend is reachable.
    ///
    /// True only if both values are present, the URL points at the managed
    /// backend domain and the key is longer than a placeholder could be.
    /// Pure and deterministic; every other component consults this predicate.
    pub fn is_backend_configured(&self) -> bool {
        let (Some(url), Some(key)) = (&self.backend_url, &self.backend_key)
        else {
            return false;
        };

        key.len() > MIN_KEY_LENGTH && matches_backend_domain(url)
    }
}

/// Normalizes a URL string by ensuring it starts with a valid scheme, then
/// checks its host against the managed backend domain.
fn matches_backend_domain(url: &str) -> bool {
    let url_with_scheme =
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

    let Ok(parsed_url) = Url::parse(&url_with_scheme) else {
        return false;
    };

    parsed_url.host_str().is_some_and(|host| {
        host == BACKEND_DOMAIN
            || host.ends_with(&format!(".{BACKEND_DOMAIN}"))
    })
}
