use crate::models::config::{HttpConfig, UpstreamProxyConfig};
use reqwest::{Client, Proxy};
use std::time::Duration;

/// Create an HTTP client from the global HTTP settings
pub fn create_client(config: &HttpConfig, cookies: bool) -> Client {
    create_client_with_proxy(
        config.request_timeout,
        Some(&config.upstream_proxy),
        cookies,
    )
}

/// Create an HTTP client with specified proxy configuration.
/// `cookies` enables a per-client cookie jar for session-login vendors.
pub fn create_client_with_proxy(
    timeout_secs: u64,
    proxy_config: Option<&UpstreamProxyConfig>,
    cookies: bool,
) -> Client {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(timeout_secs.min(10)))
        .cookie_store(cookies)
        .user_agent(concat!("panelsync/", env!("CARGO_PKG_VERSION")));

    if let Some(config) = proxy_config {
        if config.enabled && !config.url.is_empty() {
            match Proxy::all(&config.url) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    tracing::info!("HTTP client upstream proxy enabled: {}", config.url);
                }
                Err(e) => {
                    tracing::error!("Invalid proxy address: {}, error: {}", config.url, e);
                }
            }
        }
    }

    builder.build().unwrap_or_else(|e| {
        tracing::warn!("HTTP client builder failed ({}), using defaults", e);
        Client::new()
    })
}
