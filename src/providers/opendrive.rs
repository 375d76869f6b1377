//! Client for the OpenDrive REST API: client-credential token lifecycle,
//! cursor-paged listing and download-URL resolution.

use super::retry::with_backoff;
use super::token_cache::{CachedToken, OPENDRIVE_TOKENS};
use super::{truncate_body, HTTP_TIMEOUT, USER_AGENT};
use crate::error::ProviderError;
use crate::models::{Account, ListPage, RemoteEntry};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;

/// Fixed API endpoint of the drive service.
pub const API_BASE_URL: &str = "https://open-api.opendrive.cloud";

/// Listing page size.
const LIST_LIMIT: i64 = 100;

/// Cursor value the API uses for "no more pages".
pub const END_OF_LISTING: i64 = -1;

// ============ API response types ============

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    access_token: String,
    expired_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    file_id: i64,
    #[serde(rename = "filename")]
    file_name: String,
    #[serde(rename = "type")]
    file_type: i64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    trashed: i64,
}

impl DriveFile {
    fn is_dir(&self) -> bool {
        self.file_type == 1
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListData {
    #[serde(default)]
    file_list: Vec<DriveFile>,
    last_file_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadData {
    download_url: String,
}

// ============ Client ============

pub struct OpenDriveClient {
    http: Client,
    account: Account,
}

impl OpenDriveClient {
    pub fn new(account: Account) -> Self {
        Self {
            http: Client::new(),
            account,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// List one page of a folder. `cursor` is the previous page's
    /// `lastFileId`; entries in the trash are dropped.
    pub async fn list_page(
        &self,
        parent_id: i64,
        cursor: Option<i64>,
    ) -> Result<ListPage, ProviderError> {
        let data = with_backoff("opendrive list", || async move {
            let token = self.access_token().await?;
            let mut query: Vec<(&str, String)> = vec![
                ("parentFileId", parent_id.to_string()),
                ("limit", LIST_LIMIT.to_string()),
                ("trashed", "0".to_string()),
            ];
            if let Some(last_file_id) = cursor {
                query.push(("lastFileId", last_file_id.to_string()));
            }
            self.request_data(Method::GET, "/api/v2/file/list", &query, &token)
                .await
        })
        .await?;

        let list: ListData = serde_json::from_value(data)
            .map_err(|e| ProviderError::BadResponse(format!("bad listing payload: {}", e)))?;

        let entries = list
            .file_list
            .into_iter()
            .filter(|file| file.trashed == 0)
            .map(|file| RemoteEntry {
                id: file.file_id.to_string(),
                is_dir: file.is_dir(),
                name: file.file_name,
                size: file.size,
            })
            .collect();

        let next_cursor = if list.last_file_id == END_OF_LISTING {
            None
        } else {
            Some(list.last_file_id.to_string())
        };

        Ok(ListPage { entries, next_cursor })
    }

    /// Resolve a file id to the provider's short-lived direct download URL.
    pub async fn resolve_download(&self, file_id: i64) -> Result<String, ProviderError> {
        let data = with_backoff("opendrive download_info", || async move {
            let token = self.access_token().await?;
            let query = [("fileId", file_id.to_string())];
            self.request_data(Method::GET, "/api/v1/file/download_info", &query, &token)
                .await
        })
        .await?;

        let download: DownloadData = serde_json::from_value(data)
            .map_err(|e| ProviderError::BadResponse(format!("bad download payload: {}", e)))?;
        if download.download_url.is_empty() {
            return Err(ProviderError::BadResponse(
                "API returned no download URL".to_string(),
            ));
        }
        Ok(download.download_url)
    }

    /// Account connectivity check: requests a token without touching the
    /// cache.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.fetch_token().await.map(|_| ())
    }

    // ============ Token lifecycle ============

    /// The cached access token, refreshed single-flight when it is inside
    /// the 5-minute refresh window.
    async fn access_token(&self) -> Result<String, ProviderError> {
        OPENDRIVE_TOKENS
            .get_or_refresh(self.account.id, || self.fetch_token())
            .await
    }

    async fn fetch_token(&self) -> Result<CachedToken, ProviderError> {
        if self.account.client_id.is_empty() || self.account.client_secret.is_empty() {
            return Err(ProviderError::NotConfigured(
                "account has no client credentials".to_string(),
            ));
        }

        let body = serde_json::json!({
            "client_id": self.account.client_id,
            "client_secret": self.account.client_secret,
        });

        let response = self
            .http
            .post(format!("{}/api/v1/access_token", API_BASE_URL))
            .timeout(HTTP_TIMEOUT)
            .header("platform", "open_platform")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&body)
            .send()
            .await?;

        let data = read_envelope(response).await?;
        let token: TokenData = serde_json::from_value(data)
            .map_err(|e| ProviderError::Token(format!("bad token payload: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(ProviderError::Token(
                "API returned no access token".to_string(),
            ));
        }

        let expires_at = parse_token_expiry(&token.expired_at)?;
        log::info!(
            "Access token refreshed for account '{}' (expires {})",
            self.account.name,
            expires_at
        );

        Ok(CachedToken {
            token: token.access_token,
            expires_at,
        })
    }

    // ============ Request plumbing ============

    async fn request_data(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .http
            .request(method, format!("{}{}", API_BASE_URL, path))
            .timeout(HTTP_TIMEOUT)
            .query(query)
            .bearer_auth(token)
            .header("platform", "open_platform")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        read_envelope(response).await
    }
}

/// Classify and unwrap an API response: HTTP 429 and the provider's own 429
/// code map to `RateLimited`; 5xx and unparsable bodies are transient; a
/// well-formed non-zero code is an application error.
async fn read_envelope(response: reqwest::Response) -> Result<serde_json::Value, ProviderError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }

    let body = response.text().await?;
    if status.is_server_error() {
        return Err(ProviderError::BadResponse(format!(
            "HTTP {}: {}",
            status,
            truncate_body(&body, 200)
        )));
    }

    let envelope: ApiEnvelope = serde_json::from_str(&body)
        .map_err(|e| ProviderError::BadResponse(format!("non-JSON response: {}", e)))?;

    if envelope.code == 429 {
        return Err(ProviderError::RateLimited);
    }
    if envelope.code != 0 {
        return Err(ProviderError::Api {
            code: envelope.code,
            message: envelope.message,
        });
    }

    envelope
        .data
        .ok_or_else(|| ProviderError::BadResponse("response carried no data".to_string()))
}

/// The token endpoint reports expiry in either RFC-3339 or
/// `YYYY-MM-DD HH:MM:SS`.
fn parse_token_expiry(raw: &str) -> Result<DateTime<Utc>, ProviderError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ProviderError::Token(format!("unrecognized token expiry: {}", raw)))
}
