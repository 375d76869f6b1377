use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use super::{fail, ok, ok_message, ApiResult};
use crate::models::{Account, ACCOUNT_KIND_FSLIST, ACCOUNT_KIND_OPENDRIVE};
use crate::providers::{listing_cache::LISTING_CACHE, token_cache, Provider};
use crate::state::AppState;

fn validate_account(account: &mut Account) -> Result<(), String> {
    if account.kind.is_empty() {
        account.kind = ACCOUNT_KIND_OPENDRIVE.to_string();
    }
    match account.kind.as_str() {
        ACCOUNT_KIND_OPENDRIVE => {
            if account.name.is_empty()
                || account.client_id.is_empty()
                || account.client_secret.is_empty()
            {
                return Err(
                    "Drive accounts need a name, a client id and a client secret".to_string()
                );
            }
        }
        ACCOUNT_KIND_FSLIST => {
            if account.name.is_empty() || account.base_url.is_empty() {
                return Err("Listing-service accounts need a name and a URL".to_string());
            }
        }
        other => return Err(format!("Unsupported account kind '{}'", other)),
    }
    Ok(())
}

/// List all cloud accounts
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    responses((status = 200, description = "Accounts in ascending id order", body = [Account])),
    security(("bearerAuth" = [])),
    tag = "accounts"
)]
pub async fn list_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let accounts = state.store.list_accounts().map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to list accounts: {}", err),
        )
    })?;
    Ok(ok(accounts))
}

/// Create a cloud account
#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    request_body = Account,
    responses(
        (status = 200, description = "Account created"),
        (status = 400, description = "Validation failed")
    ),
    security(("bearerAuth" = [])),
    tag = "accounts"
)]
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    Json(mut account): Json<Account>,
) -> ApiResult {
    validate_account(&mut account).map_err(|msg| fail(StatusCode::BAD_REQUEST, msg))?;

    let id = state.store.create_account(&account).map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to create account: {}", err),
        )
    })?;
    account.id = id;
    Ok(ok(account))
}

/// Update a cloud account
#[utoipa::path(
    put,
    path = "/api/v1/accounts/{id}",
    params(("id" = i64, Path, description = "Account id")),
    request_body = Account,
    responses(
        (status = 200, description = "Account updated"),
        (status = 404, description = "Unknown account")
    ),
    security(("bearerAuth" = [])),
    tag = "accounts"
)]
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut account): Json<Account>,
) -> ApiResult {
    state
        .store
        .account(id)
        .map_err(|_| fail(StatusCode::NOT_FOUND, "Account not found"))?;

    validate_account(&mut account).map_err(|msg| fail(StatusCode::BAD_REQUEST, msg))?;
    account.id = id;

    state.store.update_account(&account).map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to update account: {}", err),
        )
    })?;

    // Cached tokens were minted from the old credentials.
    token_cache::evict_account(id);
    LISTING_CACHE.evict_account(id);
    Ok(ok(account))
}

/// Delete a cloud account and every task it owns
#[utoipa::path(
    delete,
    path = "/api/v1/accounts/{id}",
    params(("id" = i64, Path, description = "Account id")),
    responses((status = 200, description = "Account and owning tasks deleted")),
    security(("bearerAuth" = [])),
    tag = "accounts"
)]
pub async fn delete_handler(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    let tasks = state.store.tasks_for_account(id).unwrap_or_default();
    for task in &tasks {
        state.scheduler.stop(task.id);
        if let Err(err) = state.store.delete_manifest_for_task(task.id) {
            log::error!("Failed to drop manifest of task {}: {}", task.id, err);
        }
    }

    state.store.delete_account(id).map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to delete account: {}", err),
        )
    })?;

    token_cache::evict_account(id);
    LISTING_CACHE.evict_account(id);
    state.scheduler.refresh();
    Ok(ok_message("Account and its tasks deleted"))
}

/// Test an account's connectivity with the provider
#[utoipa::path(
    post,
    path = "/api/v1/accounts/test",
    request_body = Account,
    responses(
        (status = 200, description = "Connection ok"),
        (status = 502, description = "Provider unreachable")
    ),
    security(("bearerAuth" = [])),
    tag = "accounts"
)]
pub async fn test_handler(
    State(_state): State<Arc<AppState>>,
    Json(mut account): Json<Account>,
) -> ApiResult {
    validate_account(&mut account).map_err(|msg| fail(StatusCode::BAD_REQUEST, msg))?;

    let provider =
        Provider::from_account(&account).map_err(|err| fail(StatusCode::BAD_REQUEST, err.to_string()))?;
    provider
        .ping()
        .await
        .map_err(|err| fail(StatusCode::BAD_GATEWAY, format!("Connection failed: {}", err)))?;

    Ok(ok_message("Connection ok"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::sample_account;

    #[test]
    fn test_validate_opendrive_requires_credentials() {
        let mut account = sample_account("pan", ACCOUNT_KIND_OPENDRIVE);
        assert!(validate_account(&mut account).is_ok());

        account.client_secret.clear();
        assert!(validate_account(&mut account).is_err());
    }

    #[test]
    fn test_validate_fslist_requires_url() {
        let mut account = sample_account("shelf", ACCOUNT_KIND_FSLIST);
        assert!(validate_account(&mut account).is_ok());

        account.base_url.clear();
        assert!(validate_account(&mut account).is_err());
    }

    #[test]
    fn test_validate_defaults_empty_kind() {
        let mut account = sample_account("pan", "");
        validate_account(&mut account).unwrap();
        assert_eq!(account.kind, ACCOUNT_KIND_OPENDRIVE);
    }

    #[test]
    fn test_validate_rejects_unknown_kind() {
        let mut account = sample_account("odd", "gopher");
        assert!(validate_account(&mut account).is_err());
    }
}
