use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, types::Json};
use tracing::info;

use crate::{context::SharedContext, error::Result, storage::SessionStore};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS care_sessions (
    id TEXT PRIMARY KEY,
    context JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// PostgreSQL-backed session store. Contexts are stored whole as JSONB so the
/// plan and execution log survive across process instances.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!("PostgreSQL session store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SharedContext>> {
        let row = sqlx::query("SELECT context FROM care_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let Json(context): Json<SharedContext> = row.try_get("context")?;
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, context: &SharedContext) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO care_sessions (id, context, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (id) DO UPDATE SET context = EXCLUDED.context, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(Json(context))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM care_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
