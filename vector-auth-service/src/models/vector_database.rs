//! Link between a user and the vector database provisioned for them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct VectorDatabase {
    pub id: Uuid,
    /// Project identifier issued by the provisioning provider.
    pub vector_db_id: String,
    /// Internal id of the owning user (`users.id`). Unique per user.
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl VectorDatabase {
    pub fn new(vector_db_id: String, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector_db_id,
            user_id,
            created_at: Utc::now(),
        }
    }
}
