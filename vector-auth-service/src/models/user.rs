//! User model - one row per federated login email.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::Identity;

/// Prefix carried by every external-facing user identifier.
pub const USER_ID_PREFIX: &str = "user_";

const USER_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const USER_ID_RANDOM_LEN: usize = 24;

/// User entity.
///
/// `id` is the internal key referenced by `vector_databases.user_id`;
/// `user_id` is the identifier exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub id: Uuid,
    #[validate(custom(function = "validate_user_id"))]
    pub user_id: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub name: Option<String>,
    #[validate(url(message = "Invalid avatar URL"))]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a not-yet-persisted user from a verified identity.
    pub fn from_identity(identity: &Identity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: generate_user_id(),
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Generate an external user identifier such as `user_k3v9...`.
pub fn generate_user_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..USER_ID_RANDOM_LEN)
        .map(|_| USER_ID_ALPHABET[rng.gen_range(0..USER_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", USER_ID_PREFIX, suffix)
}

fn validate_user_id(value: &str) -> Result<(), ValidationError> {
    let valid = value
        .strip_prefix(USER_ID_PREFIX)
        .map(|rest| {
            rest.len() == USER_ID_RANDOM_LEN
                && rest.bytes().all(|b| USER_ID_ALPHABET.contains(&b))
        })
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("user_id_format"))
    }
}
