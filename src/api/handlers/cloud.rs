use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{fail, ok, ApiResult};
use crate::providers::Provider;
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct BrowseQuery {
    pub account_id: i64,
    /// Parent folder identifier; provider-specific (numeric id or path).
    /// Empty means the provider's root.
    #[serde(default)]
    pub parent: String,
}

/// Browse a remote folder through the account's provider
#[utoipa::path(
    get,
    path = "/api/v1/cloud/files",
    params(BrowseQuery),
    responses(
        (status = 200, description = "Folder contents"),
        (status = 404, description = "Unknown account"),
        (status = 502, description = "Provider listing failed")
    ),
    security(("bearerAuth" = [])),
    tag = "cloud"
)]
pub async fn browse_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BrowseQuery>,
) -> ApiResult {
    let account = state
        .store
        .account(query.account_id)
        .map_err(|_| fail(StatusCode::NOT_FOUND, "Cloud account not found"))?;

    let provider = Provider::from_account(&account)
        .map_err(|err| fail(StatusCode::BAD_REQUEST, err.to_string()))?;

    let parent = provider.normalize_root(&query.parent);
    let mut entries = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = provider
            .list_page(&parent, cursor.as_deref())
            .await
            .map_err(|err| {
                fail(
                    StatusCode::BAD_GATEWAY,
                    format!("Failed to list folder: {}", err),
                )
            })?;
        entries.extend(page.entries);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(ok(json!({ "parent": parent, "files": entries })))
}
