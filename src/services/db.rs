//! Relational database collaborator: a single shared pool handle.

use sqlx::{PgPool, postgres::PgPoolOptions};

/// Owns the connection pool; concurrent requests multiplex over it.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    pool: PgPool,
}

impl DatabaseHandle {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Liveness probe used by the readiness surface.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
