use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{config::Config, error::DispatchError, worker::DispatchLease};

const ACQUIRE_SCRIPT: &str = r#"
local owner = redis.call("GET", KEYS[1])
if owner == ARGV[1] then
    redis.call("EXPIRE", KEYS[1], ARGV[2])
    return 1
elseif not owner then
    redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[2])
    return 1
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed per-notification lease so two workers never run the same
/// notification at once.
pub struct RedisClient {
    connection: MultiplexedConnection,
    lease_ttl_seconds: u64,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|_| anyhow!("Failed to connect to redis client"))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            lease_ttl_seconds: config.dispatch_lease_ttl_seconds,
        })
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.ping::<String>()
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;
        Ok(())
    }

    fn lease_key(notification_id: Uuid) -> String {
        format!("dispatch:lease:{}", notification_id)
    }
}

#[async_trait]
impl DispatchLease for RedisClient {
    async fn try_acquire(&self, notification_id: Uuid, owner: &str) -> Result<bool, DispatchError> {
        let key = Self::lease_key(notification_id);
        let mut conn = self.connection.clone();

        let acquired: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(&key)
            .arg(owner)
            .arg(self.lease_ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Lease(e.to_string()))?;

        debug!(
            notification_id = %notification_id,
            owner,
            acquired = acquired == 1,
            "Dispatch lease requested"
        );

        Ok(acquired == 1)
    }

    async fn release(&self, notification_id: Uuid, owner: &str) -> Result<(), DispatchError> {
        let key = Self::lease_key(notification_id);
        let mut conn = self.connection.clone();

        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Lease(e.to_string()))?;

        Ok(())
    }
}
