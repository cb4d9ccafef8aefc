use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::{
    Context,
    error::Result,
    storage::{Session, SessionStorage, ttl_from_std},
};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS doc_sessions (
    id TEXT PRIMARY KEY,
    context JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)"#;

/// PostgreSQL-backed session storage. The context is stored as one JSONB
/// document per session.
pub struct PostgresSessionStorage {
    pool: PgPool,
    ttl: Option<TimeDelta>,
}

impl PostgresSessionStorage {
    pub async fn connect(database_url: &str, ttl: Option<Duration>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!("Connected to PostgreSQL session storage");

        Ok(Self {
            pool,
            ttl: ttl_from_std(ttl)?,
        })
    }
}

#[async_trait]
impl SessionStorage for PostgresSessionStorage {
    async fn save(&self, mut session: Session) -> Result<()> {
        session.touch();
        sqlx::query(
            "INSERT INTO doc_sessions (id, context, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET context = EXCLUDED.context, updated_at = EXCLUDED.updated_at",
        )
        .bind(&session.id)
        .bind(Json(session.context.snapshot()))
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<(Json<HashMap<String, Value>>, DateTime<Utc>)> =
            sqlx::query_as("SELECT context, updated_at FROM doc_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((Json(snapshot), updated_at)) = row else {
            return Ok(None);
        };

        let session = Session {
            id: id.to_string(),
            context: Context::from_snapshot(snapshot),
            updated_at,
        };

        if session.is_expired(self.ttl, Utc::now()) {
            self.delete(id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM doc_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let Some(ttl) = self.ttl else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM doc_sessions WHERE updated_at < $1")
            .bind(Utc::now() - ttl)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
