//! Verified identity produced by an identity-provider strategy.

/// Profile attributes asserted by the provider after a successful OAuth exchange.
/// Transient: never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Lower-cased, trimmed email; the natural key for user lookup.
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn new(email: &str, display_name: Option<String>, avatar_url: Option<String>) -> Self {
        Self {
            email: normalize_email(email),
            display_name: display_name.filter(|n| !n.trim().is_empty()),
            avatar_url: avatar_url.filter(|u| !u.trim().is_empty()),
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
