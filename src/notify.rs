//! Outbound webhook notifications.

use crate::store::Store;

/// Dispatches `(title, body)` events to the admin user's webhook, if one is
/// configured. Delivery is fire-and-forget; failures are only logged.
#[derive(Clone)]
pub struct Notifier {
    store: Store,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
        }
    }

    pub fn notify(&self, title: &str, body: &str) {
        let webhook_url = match self.store.first_user() {
            Ok(user) => user.webhook_url,
            Err(_) => return,
        };
        if webhook_url.is_empty() {
            return;
        }

        // Field fan-out keeps the payload compatible with the common
        // webhook receivers (Bark, corporate chat bots, plain HTTP hooks).
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "content": body,
            "msg": body,
        });

        let http = self.http.clone();
        let title = title.to_string();
        tokio::spawn(async move {
            match http.post(&webhook_url).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    log::warn!(
                        "Webhook '{}' answered {} for notification '{}'",
                        webhook_url,
                        response.status(),
                        title
                    );
                }
                Ok(_) => {}
                Err(err) => log::error!("Failed to deliver notification '{}': {}", title, err),
            }
        });
    }
}
