//! Secrets live under a named key-value secret store; the core needs only a
//! `get(name) -> String` interface with a 5-minute in-process cache. The
//! cache is a process-scoped singleton protected by a `tokio::sync::RwLock`,
//! with a `reset()` hook for tests.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

const TTL: Duration = Duration::from_secs(5 * 60);

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_raw(&self, name: &str) -> anyhow::Result<String>;
}

#[async_trait]
impl SecretStore for std::sync::Arc<dyn SecretStore> {
    async fn get_raw(&self, name: &str) -> anyhow::Result<String> {
        (**self).get_raw(name).await
    }
}

/// Reads secrets directly from the process environment. Used when
/// `LOCAL_DEV` is set.
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_raw(&self, name: &str) -> anyhow::Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("secret {name} is not set in environment"))
    }
}

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Reads secrets from the project's secret manager over its `:access`
/// REST endpoint, authenticated with the GCE metadata server's access
/// token, the same metadata-server dance `queue::CloudTasksQueue` uses.
/// Used when `LOCAL_DEV` is unset.
pub struct GcpSecretStore {
    client: reqwest::Client,
    project_id: String,
}

impl GcpSecretStore {
    pub fn new(project_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            project_id,
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }
        let resp: TokenResponse = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.access_token)
    }
}

#[async_trait]
impl SecretStore for GcpSecretStore {
    async fn get_raw(&self, name: &str) -> anyhow::Result<String> {
        let url = format!(
            "https://secretmanager.googleapis.com/v1/projects/{}/secrets/{name}/versions/latest:access",
            self.project_id,
        );
        let token = self.access_token().await?;

        #[derive(serde::Deserialize)]
        struct AccessResponse {
            payload: Payload,
        }
        #[derive(serde::Deserialize)]
        struct Payload {
            data: String,
        }

        let response: AccessResponse = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, response.payload.data)?;
        Ok(String::from_utf8(decoded)?)
    }
}

struct CacheEntry {
    value: String,
    fetched_at: Instant,
}

pub struct SecretCache<S: SecretStore> {
    store: S,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl<S: SecretStore> SecretCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, name: &str) -> anyhow::Result<String> {
        if let Some(entry) = self.entries.read().await.get(name) {
            if entry.fetched_at.elapsed() < TTL {
                return Ok(entry.value.clone());
            }
        }

        let value = self.store.get_raw(name).await?;
        self.entries.write().await.insert(
            name.to_string(),
            CacheEntry {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Test-only: forces the next `get` to bypass the cache.
    pub async fn reset(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingStore {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SecretStore for CountingStore {
        async fn get_raw(&self, _name: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("secret-value".to_string())
        }
    }

    #[tokio::test]
    async fn caches_until_reset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SecretCache::new(CountingStore {
            calls: calls.clone(),
        });

        assert_eq!(cache.get("tasks-secret").await.unwrap(), "secret-value");
        assert_eq!(cache.get("tasks-secret").await.unwrap(), "secret-value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.reset().await;
        cache.get("tasks-secret").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
