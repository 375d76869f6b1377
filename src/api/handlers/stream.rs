//! Pointer-URL resolution: turns a signed or plain stream URL back into a
//! 302 redirect to the provider's short-lived direct download URL.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::SignError;
use crate::models::ACCOUNT_KIND_FSLIST;
use crate::providers::Provider;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub sign: Option<String>,
}

/// Resolve a pointer URL
///
/// With `?sign=` the target is taken from the verified signature; without
/// it the path is `<account-id>/<tail>` where the tail is the provider
/// identity (a remote path for listing-service accounts, a file id for
/// drive accounts).
#[utoipa::path(
    get,
    path = "/api/v1/stream/s/{tail}",
    params(
        ("tail" = String, Path, description = "Display path or account-id/identity"),
        ("sign" = Option<String>, Query, description = "Signed resolve token")
    ),
    responses(
        (status = 302, description = "Redirect to the provider's direct URL"),
        (status = 400, description = "Malformed request"),
        (status = 403, description = "Signature invalid or expired"),
        (status = 404, description = "Unknown account"),
        (status = 502, description = "Provider resolve failed")
    ),
    tag = "stream"
)]
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(tail): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    match resolve(&state, &tail, query.sign.as_deref()).await {
        Ok(url) => (StatusCode::FOUND, [(header::LOCATION, url)]).into_response(),
        Err((status, message)) => {
            log::warn!("Stream resolve failed ({}): {}", status, message);
            (status, message).into_response()
        }
    }
}

async fn resolve(
    state: &AppState,
    tail: &str,
    sign: Option<&str>,
) -> Result<String, (StatusCode, String)> {
    let (account_id, identity) = match sign {
        Some(token) => {
            let target = state.signer.verify(token).map_err(|err| match err {
                SignError::Expired => (StatusCode::FORBIDDEN, "Signature expired".to_string()),
                SignError::Mismatch => (StatusCode::FORBIDDEN, "Signature mismatch".to_string()),
                SignError::Malformed => {
                    (StatusCode::FORBIDDEN, "Malformed signature".to_string())
                }
            })?;
            (target.account_id, Some(target.identity))
        }
        None => {
            let mut segments = tail.splitn(2, '/');
            let account_id: i64 = segments
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid account id".to_string()))?;
            let rest = segments.next().unwrap_or_default().to_string();
            if rest.is_empty() {
                return Err((StatusCode::BAD_REQUEST, "Missing file identity".to_string()));
            }
            (account_id, None)
        }
    };

    let account = state
        .store
        .account(account_id)
        .map_err(|_| (StatusCode::NOT_FOUND, "Unknown account".to_string()))?;

    let identity = match identity {
        Some(identity) => identity,
        None => {
            // Plain form: rebuild the identity from the path tail using the
            // account's kind.
            let rest = tail.splitn(2, '/').nth(1).unwrap_or_default();
            if account.kind == ACCOUNT_KIND_FSLIST {
                format!("/{}", rest)
            } else {
                let file_id = rest.split('/').next().unwrap_or_default();
                file_id
                    .parse::<i64>()
                    .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid file id".to_string()))?
                    .to_string()
            }
        }
    };

    let provider = Provider::from_account(&account)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    provider.resolve_download(&identity).await.map_err(|err| {
        (
            StatusCode::BAD_GATEWAY,
            format!("Failed to resolve download URL: {}", err),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ACCOUNT_KIND_OPENDRIVE;
    use crate::scanner::tests::test_deps;
    use crate::scheduler::Scheduler;
    use crate::signer::UrlSigner;
    use crate::store::test_support::sample_account;
    use crate::store::Store;
    use std::sync::Arc;

    fn test_state() -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        let scheduler = Scheduler::new(test_deps(store.clone()));
        let signer = Arc::new(UrlSigner::new(vec![1u8; 32]));
        AppState::new(store, scheduler, signer, vec![1u8; 32])
    }

    #[tokio::test]
    async fn test_plain_tail_with_bad_account_id() {
        let state = test_state();
        let err = resolve(&state, "not-a-number/7", None).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_plain_tail_missing_identity() {
        let state = test_state();
        let err = resolve(&state, "3", None).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_account_is_404() {
        let state = test_state();
        let err = resolve(&state, "42/1234", None).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_garbage_signature_is_403() {
        let state = test_state();
        let err = resolve(&state, "anything", Some("not:a:real:token"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_tampered_signature_is_403() {
        let state = test_state();
        state
            .store
            .create_account(&sample_account("pan", ACCOUNT_KIND_OPENDRIVE))
            .unwrap();

        let token = state.signer.sign(1, "1234");
        let mut forged: Vec<String> = token.split(':').map(String::from).collect();
        forged[3] = forged[3].chars().rev().collect();
        let err = resolve(&state, "ignored", Some(&forged.join(":")))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_opendrive_tail_requires_numeric_file_id() {
        let state = test_state();
        state
            .store
            .create_account(&sample_account("pan", ACCOUNT_KIND_OPENDRIVE))
            .unwrap();

        let err = resolve(&state, "1/not-numeric/show.mkv", None)
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
