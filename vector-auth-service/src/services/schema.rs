//! Embedding schema bootstrap for a newly provisioned vector database.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use secrecy::{ExposeSecret, Secret};
use sqlx::{Connection, PgConnection};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use super::error::SchemaError;
use crate::config::BootstrapConfig;

/// Dimensionality of stored embedding vectors.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

const CREATE_EXTENSION: &str = "CREATE EXTENSION IF NOT EXISTS vector";

const CREATE_EMBEDDINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS "embeddings" (
    "id" serial PRIMARY KEY NOT NULL,
    "content" text NOT NULL,
    "metadata" jsonb NOT NULL,
    "embedding" vector(1536),
    "created_at" timestamp with time zone DEFAULT now(),
    "updated_at" timestamp with time zone DEFAULT now()
)
"#;

const CREATE_EMBEDDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS "embedding_idx"
ON "embeddings" USING hnsw ("embedding" vector_cosine_ops)
"#;

/// Statements applied, in order, inside one transaction. Each is guarded by
/// `IF NOT EXISTS` so a re-run against a bootstrapped target is a no-op.
pub const BOOTSTRAP_STATEMENTS: [(&str, &str); 3] = [
    ("create_extension", CREATE_EXTENSION),
    ("create_embeddings_table", CREATE_EMBEDDINGS_TABLE),
    ("create_embedding_index", CREATE_EMBEDDING_INDEX),
];

#[async_trait]
pub trait SchemaBootstrapper: Send + Sync {
    async fn bootstrap(&self, connection_uri: &Secret<String>) -> Result<(), SchemaError>;
}

/// Applies [`BOOTSTRAP_STATEMENTS`] over a direct Postgres connection.
#[derive(Clone)]
pub struct PgSchemaBootstrapper {
    timeout: Duration,
    max_retries: u32,
}

impl PgSchemaBootstrapper {
    pub fn new(config: &BootstrapConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
        }
    }

    async fn apply(&self, connection_uri: &Secret<String>) -> Result<(), SchemaError> {
        let mut conn = PgConnection::connect(connection_uri.expose_secret())
            .await
            .map_err(SchemaError::Connect)?;

        let mut tx = conn.begin().await.map_err(SchemaError::Connect)?;

        for (statement, sql) in BOOTSTRAP_STATEMENTS {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|source| SchemaError::Statement { statement, source })?;
        }

        tx.commit().await.map_err(SchemaError::Commit)?;

        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "Failed to close bootstrap connection cleanly");
        }
        Ok(())
    }

    async fn apply_with_timeout(&self, connection_uri: &Secret<String>) -> Result<(), SchemaError> {
        tokio::time::timeout(self.timeout, self.apply(connection_uri))
            .await
            .map_err(|_| SchemaError::Timeout(self.timeout))?
    }

    /// Run `op` up to `max_retries + 1` times with exponential backoff.
    async fn with_retries<F, Fut>(&self, mut op: F) -> Result<(), SchemaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), SchemaError>>,
    {
        let attempts = AtomicUsize::new(0);
        let max_attempts = self.max_retries as usize + 1;

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_elapsed_time: Some(self.timeout * max_attempts as u32),
            ..Default::default()
        };

        let attempts = &attempts;
        backoff::future::retry(policy, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let run = op();
            async move {
                match run.await {
                    Ok(()) => Ok(()),
                    Err(e) if attempt < max_attempts => {
                        tracing::warn!(attempt, error = %e, "Schema bootstrap attempt failed, retrying");
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl SchemaBootstrapper for PgSchemaBootstrapper {
    #[tracing::instrument(skip_all)]
    async fn bootstrap(&self, connection_uri: &Secret<String>) -> Result<(), SchemaError> {
        // Fresh databases can refuse connections for a few seconds after
        // creation; the statement set is idempotent so retrying is safe.
        self.with_retries(|| self.apply_with_timeout(connection_uri)).await?;

        tracing::info!(
            dimensions = EMBEDDING_DIMENSIONS,
            "Embedding schema bootstrapped"
        );
        Ok(())
    }
}

/// Records bootstrap calls; optionally fails them.
#[derive(Default)]
pub struct MockSchemaBootstrapper {
    calls: AtomicUsize,
    applied: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl MockSchemaBootstrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_all(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Connection URIs that were successfully bootstrapped.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl SchemaBootstrapper for MockSchemaBootstrapper {
    async fn bootstrap(&self, connection_uri: &Secret<String>) -> Result<(), SchemaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(SchemaError::Connect(sqlx::Error::PoolTimedOut));
        }
        let mut applied = self.applied.lock().unwrap_or_else(|p| p.into_inner());
        let uri = connection_uri.expose_secret().clone();
        // Mirrors IF NOT EXISTS: a second run leaves a single record.
        if !applied.contains(&uri) {
            applied.push(uri);
        }
        Ok(())
    }
}
