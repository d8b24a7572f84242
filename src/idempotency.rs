use redis::AsyncCommands;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::warn;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// What a cache lookup found for a key.
#[derive(Debug, PartialEq)]
pub enum Lookup<T> {
    Miss,
    Replay(T),
    /// The key was already used for a request with a different body.
    Conflict,
}

#[derive(Serialize, Deserialize)]
struct StoredResponse {
    fingerprint: String,
    body: Value,
}

/// Remembers the first response produced for an `Idempotency-Key` so a retried
/// submission replays it instead of writing again. Keys are per caller, and a
/// reused key only replays when the request body matches. Uses Redis when
/// configured and process memory otherwise; both expire after `ttl_secs`.
#[derive(Clone)]
pub struct IdempotencyCache {
    redis: Option<redis::Client>,
    local: Arc<Mutex<HashMap<String, (Instant, String)>>>,
    ttl_secs: u64,
}

impl IdempotencyCache {
    pub fn new(redis: Option<redis::Client>, ttl_secs: u64) -> Self {
        Self {
            redis,
            local: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
        }
    }

    pub fn from_url(url: Option<&str>, ttl_secs: u64) -> Self {
        let redis = url.and_then(|url| match redis::Client::open(url) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(target = "catalog.idempotency", error = %err, "redis_url_invalid_using_memory");
                None
            }
        });
        Self::new(redis, ttl_secs)
    }

    pub fn scoped_key(scope: &str, actor: &str, key: &str) -> String {
        format!("idem:{scope}:{actor}:{key}")
    }

    /// Hex SHA-256 over the given parts, in order.
    pub fn fingerprint(parts: &[&[u8]]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        hex::encode(hasher.finalize())
    }

    pub async fn lookup<T: DeserializeOwned>(&self, key: &str, fingerprint: &str) -> Lookup<T> {
        let raw = match &self.redis {
            Some(client) => redis_get(client, key).await,
            None => self.local_get(key).await,
        };
        let Some(stored) = raw.and_then(|raw| serde_json::from_str::<StoredResponse>(&raw).ok())
        else {
            return Lookup::Miss;
        };
        if stored.fingerprint != fingerprint {
            return Lookup::Conflict;
        }
        match serde_json::from_value(stored.body) {
            Ok(body) => Lookup::Replay(body),
            Err(_) => Lookup::Miss,
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, fingerprint: &str, value: &T) {
        let Ok(body) = serde_json::to_value(value) else {
            return;
        };
        let stored = StoredResponse {
            fingerprint: fingerprint.to_string(),
            body,
        };
        let Ok(json) = serde_json::to_string(&stored) else {
            return;
        };
        match &self.redis {
            Some(client) => redis_set(client, key, json, self.ttl_secs).await,
            None => {
                let ttl = self.ttl();
                let now = Instant::now();
                let mut local = self.local.lock().await;
                local.retain(|_, (stored_at, _)| now.duration_since(*stored_at) < ttl);
                local.insert(key.to_string(), (now, json));
            }
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    async fn local_get(&self, key: &str) -> Option<String> {
        let mut local = self.local.lock().await;
        let (stored_at, json) = local.get(key)?;
        if stored_at.elapsed() < self.ttl() {
            return Some(json.clone());
        }
        local.remove(key);
        None
    }
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<String> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            warn!(target = "catalog.idempotency", error = %err, "redis_unavailable");
            return None;
        }
    };
    conn.get(key).await.ok()
}

async fn redis_set(client: &redis::Client, key: &str, json: String, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}
