//! Redis CoordinationStore implementation.
//!
//! Client and restock orders use separate logical databases in addition to
//! the class segment in every key.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, IntoConnectionInfo, Script};
use tracing::{debug, info};

use super::codec::{decode_manifest, encode_manifest};
use super::{
    ensure_class, CoordinationConfig, CoordinationError, CoordinationKey, CoordinationStore,
    KeyField, Result,
};
use crate::order::{OrderClass, OrderKey, OrderManifest};

/// INCR that sets the TTL in the same round trip when it creates the counter.
const INCR_WITH_TTL: &str = r#"
local n = redis.call('INCR', KEYS[1])
if n == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return n
"#;

/// Redis coordination store.
pub struct RedisCoordinationStore {
    client_conn: ConnectionManager,
    restock_conn: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
    incr_script: Script,
}

impl RedisCoordinationStore {
    /// Connect both partitions described by `config`.
    pub async fn connect(config: &CoordinationConfig) -> Result<Self> {
        let client_conn =
            Self::open(&config.redis_url, config.redis_password.as_deref(), config.client_db)
                .await?;
        let restock_conn =
            Self::open(&config.redis_url, config.redis_password.as_deref(), config.restock_db)
                .await?;

        info!(
            url = %config.redis_url,
            client_db = config.client_db,
            restock_db = config.restock_db,
            "Connected to Redis for coordination"
        );

        Ok(Self {
            client_conn,
            restock_conn,
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.ttl_secs,
            incr_script: Script::new(INCR_WITH_TTL),
        })
    }

    async fn open(url: &str, password: Option<&str>, db: i64) -> Result<ConnectionManager> {
        let mut info = url.into_connection_info()?;
        info.redis.db = db;
        if let Some(password) = password {
            info.redis.password = Some(password.to_string());
        }
        let client = Client::open(info)?;
        Ok(ConnectionManager::new(client).await?)
    }

    fn conn(&self, class: OrderClass) -> ConnectionManager {
        match class {
            OrderClass::Client => self.client_conn.clone(),
            OrderClass::Restock => self.restock_conn.clone(),
        }
    }

    fn render(&self, key: &CoordinationKey) -> String {
        key.render(&self.key_prefix)
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn save_items(&self, key: &OrderKey, manifest: &OrderManifest) -> Result<()> {
        ensure_class(key, manifest)?;
        let bytes = encode_manifest(manifest)?;
        let redis_key = self.render(&CoordinationKey::items(key));
        let mut conn = self.conn(key.class);

        let _: () = conn.set_ex(&redis_key, bytes, self.ttl_secs).await?;

        debug!(order = %key, "Saved order manifest to Redis");
        Ok(())
    }

    async fn load_items(&self, key: &OrderKey) -> Result<OrderManifest> {
        let redis_key = self.render(&CoordinationKey::items(key));
        let mut conn = self.conn(key.class);

        let bytes: Option<Vec<u8>> = conn.get(&redis_key).await?;
        match bytes {
            Some(b) => decode_manifest(&b),
            None => Err(CoordinationError::Missing(key.clone())),
        }
    }

    async fn increment_completion_count(&self, key: &OrderKey) -> Result<u64> {
        let redis_key = self.render(&CoordinationKey::count(key));
        let mut conn = self.conn(key.class);

        let count: u64 = self
            .incr_script
            .key(&redis_key)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn try_claim_finalize(&self, key: &OrderKey) -> Result<bool> {
        let redis_key = self.render(&CoordinationKey::finalize(key));
        let mut conn = self.conn(key.class);

        // SET NX replies OK when it wrote the key and nil otherwise
        let reply: Option<String> = redis::cmd("SET")
            .arg(&redis_key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn delete_all(&self, key: &OrderKey) -> Result<()> {
        let keys: Vec<String> = KeyField::ALL
            .iter()
            .map(|field| self.render(&CoordinationKey::new(key, *field)))
            .collect();
        let mut conn = self.conn(key.class);

        let _: () = conn.del(keys).await?;

        debug!(order = %key, "Deleted coordination state from Redis");
        Ok(())
    }
}
