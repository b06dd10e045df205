// src/services/redis_service.rs
use crate::errors::FilterError;
use crate::services::flood::FloodStore;
use async_trait::async_trait;
use redis::{Client, Script};
use std::time::Duration;

/// Refuses once the counter reached the threshold, otherwise increments it and starts
/// the expiry on the first event of a window.
const CHECK_AND_REGISTER: &str = r#"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count >= tonumber(ARGV[2]) then
  return 0
end
count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return 1
"#;

pub struct RedisFloodStore {
    client: Client,
    script: Script,
}

impl RedisFloodStore {
    pub async fn new(redis_url: &str) -> Result<Self, FilterError> {
        let client = Client::open(redis_url)?;

        // Test connection
        let mut conn = client.get_async_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;

        Ok(Self {
            client,
            script: Script::new(CHECK_AND_REGISTER),
        })
    }
}

pub(crate) fn flood_key(action: &str) -> String {
    format!("refit:flood:{}", action)
}

#[async_trait]
impl FloodStore for RedisFloodStore {
    async fn try_register(
        &self,
        action: &str,
        threshold: u32,
        window: Duration,
    ) -> Result<bool, FilterError> {
        let mut conn = self.client.get_async_connection().await?;

        let admitted: i64 = self
            .script
            .key(flood_key(action))
            .arg(window.as_millis() as u64)
            .arg(threshold)
            .invoke_async(&mut conn)
            .await?;

        Ok(admitted == 1)
    }
}
