//! Client for a self-hosted fslist listing service: path-addressed
//! directory listing, raw-URL resolution and JWT/static-token auth.

use super::retry::with_backoff;
use super::token_cache::{CachedToken, FSLIST_TOKENS};
use super::{truncate_body, HTTP_TIMEOUT, USER_AGENT};
use crate::error::ProviderError;
use crate::models::{Account, ListPage, RemoteEntry};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Lifetime assumed for login tokens whose JWT payload carries no usable
/// `exp` claim.
const TOKEN_FALLBACK_HOURS: i64 = 24;

// ============ API response types ============

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListedFile {
    name: String,
    #[serde(default)]
    size: i64,
    is_dir: bool,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    content: Option<Vec<ListedFile>>,
}

#[derive(Debug, Deserialize)]
struct GetData {
    #[serde(default)]
    raw_url: String,
}

// ============ Client ============

pub struct FsListClient {
    http: Client,
    account: Account,
    base: String,
}

impl FsListClient {
    pub fn new(account: Account) -> Self {
        let base = normalize_base_url(&account.base_url);
        Self {
            http: Client::new(),
            account,
            base,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Interpret a task's source-folder field: empty and the literal "0"
    /// both mean the service root.
    pub fn normalize_root(folder: &str) -> String {
        let trimmed = folder.trim();
        if trimmed.is_empty() || trimmed == "0" {
            return "/".to_string();
        }
        ensure_leading_slash(trimmed)
    }

    /// List a directory. The service answers the whole directory in one
    /// response, so the page never carries a continuation cursor.
    pub async fn list_page(&self, path: &str) -> Result<ListPage, ProviderError> {
        let parent = ensure_leading_slash(path);
        let parent_ref = &parent;
        let data: ListData = with_backoff("fslist list", || async move {
            let token = self.access_token().await?;
            let body = serde_json::json!({
                "path": parent_ref,
                "password": "",
                "page": 1,
                "per_page": 0,
                "refresh": false,
            });
            self.post_json("/api/fs/list", &body, Some(&token)).await
        })
        .await?;

        let entries = data
            .content
            .unwrap_or_default()
            .into_iter()
            .map(|file| RemoteEntry {
                id: join_remote_path(&parent, &file.name),
                name: file.name,
                is_dir: file.is_dir,
                size: file.size,
            })
            .collect();

        Ok(ListPage {
            entries,
            next_cursor: None,
        })
    }

    /// Resolve an absolute remote path to the service's direct URL.
    pub async fn resolve_download(&self, path: &str) -> Result<String, ProviderError> {
        if path.trim().is_empty() {
            return Err(ProviderError::NotConfigured("empty remote path".to_string()));
        }
        let target = ensure_leading_slash(path);
        let target_ref = &target;
        let data: GetData = with_backoff("fslist get", || async move {
            let token = self.access_token().await?;
            let body = serde_json::json!({ "path": target_ref, "password": "" });
            self.post_json("/api/fs/get", &body, Some(&token)).await
        })
        .await?;

        if data.raw_url.is_empty() {
            return Err(ProviderError::BadResponse(
                "service returned no raw_url".to_string(),
            ));
        }
        Ok(data.raw_url)
    }

    /// Connectivity check: list the service root.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.list_page("/").await.map(|_| ())
    }

    // ============ Token lifecycle ============

    /// The token sent with every request: the configured static token when
    /// present, otherwise a cached login token refreshed single-flight.
    async fn access_token(&self) -> Result<String, ProviderError> {
        let static_token = self.account.static_token.trim();
        if !static_token.is_empty() {
            return Ok(static_token.to_string());
        }
        FSLIST_TOKENS
            .get_or_refresh(self.account.id, || self.login())
            .await
    }

    async fn login(&self) -> Result<CachedToken, ProviderError> {
        if self.account.username.is_empty() {
            return Err(ProviderError::NotConfigured(
                "account has neither a static token nor login credentials".to_string(),
            ));
        }

        let body = serde_json::json!({
            "username": self.account.username,
            "password": self.account.password,
        });
        let data: LoginData = self.post_json("/api/auth/login", &body, None).await?;
        if data.token.is_empty() {
            return Err(ProviderError::Token("login returned no token".to_string()));
        }

        let expires_at = match jwt_expiry(&data.token) {
            Some(exp) => exp,
            None => {
                log::debug!(
                    "Login token for account '{}' carries no usable exp, assuming {}h",
                    self.account.name,
                    TOKEN_FALLBACK_HOURS
                );
                Utc::now() + ChronoDuration::hours(TOKEN_FALLBACK_HOURS)
            }
        };
        log::info!(
            "Login token refreshed for account '{}' (expires {})",
            self.account.name,
            expires_at
        );

        Ok(CachedToken {
            token: data.token,
            expires_at,
        })
    }

    // ============ Request plumbing ============

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<T, ProviderError> {
        if self.base.is_empty() {
            return Err(ProviderError::NotConfigured(
                "account has no service URL".to_string(),
            ));
        }

        let mut request = self
            .http
            .post(format!("{}{}", self.base, path))
            .timeout(HTTP_TIMEOUT)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(body);
        if let Some(token) = token {
            request = request.header(reqwest::header::AUTHORIZATION, token.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        let text = response.text().await?;
        if status.is_server_error() {
            return Err(ProviderError::BadResponse(format!(
                "HTTP {}: {}",
                status,
                truncate_body(&text, 200)
            )));
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|e| ProviderError::BadResponse(format!("non-JSON response: {}", e)))?;
        if envelope.code != 200 {
            return Err(ProviderError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }
        envelope
            .data
            .ok_or_else(|| ProviderError::BadResponse("response carried no data".to_string()))
    }
}

// ============ Helpers ============

fn normalize_base_url(raw: &str) -> String {
    let mut base = raw.trim().to_string();
    if base.is_empty() {
        return base;
    }
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{}", base);
    }
    base.trim_end_matches('/').to_string()
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn join_remote_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// Read the `exp` claim out of a JWT payload without verifying the
/// signature; the daemon only needs the lifetime, not the authenticity.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("shelf.local:5244"),
            "http://shelf.local:5244"
        );
        assert_eq!(
            normalize_base_url("https://files.example.org/"),
            "https://files.example.org"
        );
        assert_eq!(normalize_base_url("  "), "");
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(FsListClient::normalize_root(""), "/");
        assert_eq!(FsListClient::normalize_root("0"), "/");
        assert_eq!(FsListClient::normalize_root(" 0 "), "/");
        assert_eq!(FsListClient::normalize_root("/media"), "/media");
        assert_eq!(FsListClient::normalize_root("media"), "/media");
    }

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("/", "media"), "/media");
        assert_eq!(join_remote_path("/media", "show"), "/media/show");
        assert_eq!(join_remote_path("/media/", "show"), "/media/show");
    }

    #[test]
    fn test_jwt_expiry_parses_exp() {
        // Header/payload are unsigned here; the parser never checks the MAC.
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"username":"admin","exp":1785551400}"#);
        let token = format!("{}.{}.bogus-signature", header, payload);
        let exp = jwt_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_785_551_400);
    }

    #[test]
    fn test_jwt_expiry_missing_claim() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"username":"admin"}"#);
        assert!(jwt_expiry(&format!("{}.{}.sig", header, payload)).is_none());
    }

    #[test]
    fn test_jwt_expiry_not_a_jwt() {
        assert!(jwt_expiry("opaque-static-token").is_none());
        assert!(jwt_expiry("a.b.c").is_none());
    }

    #[test]
    fn test_list_payload_shape() {
        let raw = r#"{
            "code": 200,
            "message": "success",
            "data": {
                "content": [
                    {"name": "show", "size": 0, "is_dir": true, "type": 1},
                    {"name": "ep01.mkv", "size": 734003200, "is_dir": false, "type": 2}
                ],
                "total": 2
            }
        }"#;
        let envelope: Envelope<ListData> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.code, 200);
        let content = envelope.data.unwrap().content.unwrap();
        assert_eq!(content.len(), 2);
        assert!(content[0].is_dir);
    }

    #[test]
    fn test_list_payload_null_content() {
        let raw = r#"{"code": 200, "message": "success", "data": {"content": null, "total": 0}}"#;
        let envelope: Envelope<ListData> = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.unwrap().content.is_none());
    }
}
