//! Thin async wrapper over the shared Redis connection.
//!
//! Every caller treats the store as advisory: errors are surfaced as
//! `AppError::Redis` and the call sites decide (almost always) to fail open.

use crate::core::error::AppResult;
use redis::AsyncCommands;

/// Cloneable handle over one multiplexed Redis connection.
#[derive(Clone)]
pub struct Kv {
    conn: redis::aio::MultiplexedConnection,
}

impl Kv {
    /// Connects to Redis at the given URL.
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        log::info!("Connected to Redis");
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1) as u64).await?;
        Ok(())
    }

    /// Atomic increment; returns the post-increment value.
    pub async fn incr(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    /// Atomic decrement; returns the post-decrement value.
    pub async fn decr(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.decr(key, 1).await?)
    }

    pub async fn expire(&self, key: &str, ttl_secs: i64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl_secs).await?;
        Ok(())
    }

    pub async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Formats and stores a numeric gauge with a TTL.
    pub async fn set_gauge(&self, key: &str, value: f64, ttl_secs: i64) -> AppResult<()> {
        self.set_ex(key, &format!("{:.1}", value), ttl_secs).await
    }
}
