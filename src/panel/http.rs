// Vendor HTTP plumbing shared by the JSON and form/cookie adapters.
// Maps HTTP outcomes onto the panel error taxonomy.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{PanelError, PanelResult};

const MAX_DETAIL_LEN: usize = 300;

pub struct VendorHttp {
    client: Client,
    base: String,
}

impl VendorHttp {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Build `{base}{path}`; `path` starts with `/`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Send and classify the status code
    pub async fn send(&self, request: RequestBuilder) -> PanelResult<Response> {
        let response = request.send().await.map_err(PanelError::from)?;
        classify(response).await
    }

    /// Send, classify and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PanelResult<T> {
        let response = self.send(request).await?;
        let text = response.text().await.map_err(PanelError::from)?;
        serde_json::from_str(&text).map_err(|e| {
            PanelError::VendorRejected(format!(
                "malformed response: {} ({})",
                e,
                truncate(&text, MAX_DETAIL_LEN)
            ))
        })
    }
}

/// 2xx passes; 401/403 -> AuthFailed; 404 -> NotFound; 5xx -> Transport;
/// remaining 4xx -> VendorRejected with the vendor's own message
pub async fn classify(response: Response) -> PanelResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = extract_detail(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PanelError::AuthFailed(detail),
        StatusCode::NOT_FOUND => PanelError::NotFound(detail),
        s if s.is_server_error() => PanelError::Transport(format!("HTTP {}: {}", s.as_u16(), detail)),
        s => PanelError::VendorRejected(format!("HTTP {}: {}", s.as_u16(), detail)),
    })
}

/// Pull a human message out of a vendor error body
pub fn extract_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        for key in ["detail", "msg", "message", "error"] {
            match value.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return Some(truncate(s, MAX_DETAIL_LEN)),
                // FastAPI validation errors: [{"loc": [...], "msg": "..."}]
                Some(Value::Array(items)) => {
                    let msgs: Vec<&str> = items
                        .iter()
                        .filter_map(|i| i.get("msg").and_then(|m| m.as_str()))
                        .collect();
                    if !msgs.is_empty() {
                        return Some(truncate(&msgs.join("; "), MAX_DETAIL_LEN));
                    }
                }
                Some(Value::Object(obj)) if !obj.is_empty() => {
                    return Some(truncate(&Value::Object(obj.clone()).to_string(), MAX_DETAIL_LEN))
                }
                _ => {}
            }
        }
    }

    Some(truncate(trimmed, MAX_DETAIL_LEN))
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

/// Rewrite `link` onto `domain` (scheme://host[:port]) keeping path and query.
/// Relative links are joined onto `domain` or, lacking one, onto `fallback_base`.
pub fn apply_subscription_domain(link: &str, domain: Option<&str>, fallback_base: &str) -> String {
    if link.is_empty() {
        return String::new();
    }

    let base = domain
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(fallback_base)
        .trim_end_matches('/');

    match url::Url::parse(link) {
        Ok(parsed) => {
            if domain.map_or(true, |d| d.trim().is_empty()) {
                return link.to_string();
            }
            let mut rewritten = format!("{}{}", base, parsed.path());
            if let Some(q) = parsed.query() {
                rewritten.push('?');
                rewritten.push_str(q);
            }
            rewritten
        }
        Err(_) => {
            let path = if link.starts_with('/') {
                link.to_string()
            } else {
                format!("/{}", link)
            };
            format!("{}{}", base, path)
        }
    }
}
