//! Cache collaborator: a shared Redis connection manager handle.

use redis::aio::ConnectionManager;

#[derive(Clone)]
pub struct CacheHandle {
    connection: ConnectionManager,
}

impl CacheHandle {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    /// Liveness probe used by the readiness surface.
    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}
