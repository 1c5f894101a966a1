use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::{PanelError, PanelResult};
use super::factory::{AdapterFactory, DefaultFactory};
use super::traits::PanelClient;
use crate::models::config::HttpConfig;
use crate::models::PanelConfig;

#[derive(Clone)]
struct CachedClient {
    client: Arc<dyn PanelClient>,
    acquired_at: Instant,
}

/// Authenticated adapter cache keyed by panel id.
///
/// Reads of a fresh entry are lock-free. Construction is serialized per panel
/// so a slow or failing login on one panel never holds up another.
pub struct ClientRegistry {
    clients: Arc<DashMap<String, CachedClient>>, // panel_id -> client
    building: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    factory: Arc<dyn AdapterFactory>,
    max_age: Duration,
}

impl ClientRegistry {
    pub fn new(http: &HttpConfig) -> Self {
        Self::with_factory(
            Arc::new(DefaultFactory::new(http.clone())),
            Duration::from_secs(http.session_max_age),
        )
    }

    pub fn with_factory(factory: Arc<dyn AdapterFactory>, max_age: Duration) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            building: DashMap::new(),
            factory,
            max_age,
        }
    }

    fn fresh(&self, panel_id: &str) -> Option<Arc<dyn PanelClient>> {
        self.clients
            .get(panel_id)
            .filter(|entry| entry.acquired_at.elapsed() < self.max_age)
            .map(|entry| entry.client.clone())
    }

    /// Authenticated client for `panel`, building and logging in on a miss.
    /// A failed login is returned as-is and nothing is cached.
    pub async fn get(&self, panel: &PanelConfig) -> PanelResult<Arc<dyn PanelClient>> {
        if let Some(client) = self.fresh(&panel.id) {
            return Ok(client);
        }

        let lock = self
            .building
            .entry(panel.id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have finished the login while we waited
        if let Some(client) = self.fresh(&panel.id) {
            return Ok(client);
        }

        let client = self.factory.build(panel);
        let result = match client.authenticate().await {
            Ok(()) => {
                tracing::info!(panel = %panel.id, vendor = %panel.vendor, "Panel session acquired");
                self.clients.insert(
                    panel.id.clone(),
                    CachedClient {
                        client: client.clone(),
                        acquired_at: Instant::now(),
                    },
                );
                Ok(client)
            }
            Err(e) => {
                tracing::warn!(panel = %panel.id, vendor = %panel.vendor, error = %e, "Panel login failed");
                self.clients.remove(&panel.id);
                Err(e)
            }
        };

        // Waiters still hold their clone and re-check the cache once inside
        self.building
            .remove_if(&panel.id, |_, current| Arc::ptr_eq(current, &lock));
        result
    }

    /// Drop the cached session so the next `get` logs in again
    pub fn invalidate(&self, panel_id: &str) {
        if self.clients.remove(panel_id).is_some() {
            tracing::debug!(panel = %panel_id, "Panel session invalidated");
        }
    }

    /// Feed a call failure back; auth rejections evict the session
    pub fn note_failure(&self, panel_id: &str, error: &PanelError) {
        if error.is_auth() {
            self.invalidate(panel_id);
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Account, AccountPatch, AccountSpec, InboundOption, PanelCredentials, VendorKind,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        id: String,
        fail_auth: bool,
        logins: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PanelClient for StubClient {
        fn vendor(&self) -> VendorKind {
            VendorKind::Marzban
        }
        fn panel_id(&self) -> &str {
            &self.id
        }
        async fn authenticate(&self) -> PanelResult<()> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.fail_auth {
                Err(PanelError::AuthFailed("bad password".into()))
            } else {
                Ok(())
            }
        }
        async fn get_account(&self, username: &str) -> PanelResult<Account> {
            Err(PanelError::NotFound(username.into()))
        }
        async fn create_account(&self, _: &AccountSpec) -> PanelResult<Account> {
            unimplemented!()
        }
        async fn modify_account(&self, _: &str, _: &AccountPatch) -> PanelResult<Account> {
            unimplemented!()
        }
        async fn delete_account(&self, _: &str) -> PanelResult<()> {
            Ok(())
        }
        async fn enable_account(&self, _: &str) -> PanelResult<()> {
            Ok(())
        }
        async fn disable_account(&self, _: &str) -> PanelResult<()> {
            Ok(())
        }
        async fn reset_usage(&self, _: &str) -> PanelResult<()> {
            Ok(())
        }
        async fn rotate_subscription_link(&self, _: &str) -> PanelResult<String> {
            Ok(String::new())
        }
        async fn list_inbound_options(&self) -> PanelResult<Vec<InboundOption>> {
            Ok(Vec::new())
        }
        async fn system_stats(&self) -> PanelResult<BTreeMap<String, serde_json::Value>> {
            Ok(BTreeMap::new())
        }
    }

    struct StubFactory {
        fail_auth: bool,
        logins: Arc<AtomicUsize>,
    }

    impl AdapterFactory for StubFactory {
        fn build(&self, panel: &PanelConfig) -> Arc<dyn PanelClient> {
            Arc::new(StubClient {
                id: panel.id.clone(),
                fail_auth: self.fail_auth,
                logins: self.logins.clone(),
            })
        }
    }

    fn panel(id: &str) -> PanelConfig {
        PanelConfig::new(
            id,
            VendorKind::Marzban,
            "http://127.0.0.1:1",
            PanelCredentials::Token { token: "t".into() },
        )
    }

    fn registry(fail_auth: bool, max_age: Duration) -> (ClientRegistry, Arc<AtomicUsize>) {
        let logins = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(StubFactory {
            fail_auth,
            logins: logins.clone(),
        });
        (ClientRegistry::with_factory(factory, max_age), logins)
    }

    #[tokio::test]
    async fn test_cache_hit_reuses_session() {
        let (registry, logins) = registry(false, Duration::from_secs(60));
        registry.get(&panel("a")).await.unwrap();
        registry.get(&panel("a")).await.unwrap();
        registry.get(&panel("b")).await.unwrap();
        assert_eq!(logins.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
        assert!(registry.building.is_empty());
    }

    #[tokio::test]
    async fn test_failed_login_is_not_cached() {
        let (registry, logins) = registry(true, Duration::from_secs(60));
        let err = registry.get(&panel("a")).await.err().unwrap();
        assert!(err.is_auth());
        assert!(registry.is_empty());
        assert!(registry.get(&panel("a")).await.is_err());
        assert_eq!(logins.load(Ordering::SeqCst), 2);
        assert!(registry.building.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_and_age_force_relogin() {
        let (registry, logins) = registry(false, Duration::from_secs(60));
        registry.get(&panel("a")).await.unwrap();
        registry.note_failure("a", &PanelError::Transport("timeout".into()));
        registry.get(&panel("a")).await.unwrap();
        assert_eq!(logins.load(Ordering::SeqCst), 1);

        registry.note_failure("a", &PanelError::AuthFailed("401".into()));
        registry.get(&panel("a")).await.unwrap();
        assert_eq!(logins.load(Ordering::SeqCst), 2);

        let (stale, logins) = registry_with_zero_age();
        stale.get(&panel("a")).await.unwrap();
        stale.get(&panel("a")).await.unwrap();
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }

    fn registry_with_zero_age() -> (ClientRegistry, Arc<AtomicUsize>) {
        registry(false, Duration::ZERO)
    }
}
