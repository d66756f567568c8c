use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::model::{ChatId, InboundMessage};
use crate::transport::Transport;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
/// Updates fetched per `getUpdates` call.
const UPDATE_LIMIT: u32 = 10;
const MAX_BACKOFF_SECS: u64 = 60;

pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
    poll_timeout: Duration,
    request_timeout: Duration,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl TelegramTransport {
    /// `api_url` may point at a local Bot API server for debugging.
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        bot_token: &str,
        poll_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        // Telegram allows about 30 messages per second per bot; stay under it.
        let quota = Quota::per_second(nonzero!(25u32));
        Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
            poll_timeout,
            request_timeout,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// The server holds `getUpdates` open for up to `poll_timeout`.
    fn long_poll_timeout(&self) -> Duration {
        self.poll_timeout.saturating_add(self.request_timeout)
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, Report<TransportError>> {
        let method = "getUpdates";
        let params = [
            ("offset", offset.to_string()),
            ("timeout", self.poll_timeout.as_secs().to_string()),
            ("limit", UPDATE_LIMIT.to_string()),
            ("allowed_updates", r#"["message"]"#.to_owned()),
        ];

        let response = self
            .client
            .get(self.method_url(method))
            .query(&params)
            .timeout(self.long_poll_timeout())
            .send()
            .await
            .change_context(TransportError::Request {
                method: method.into(),
            })?;

        let body: ApiResponse<Vec<Update>> =
            response
                .json()
                .await
                .change_context(TransportError::ResponseParse {
                    method: method.into(),
                })?;

        body.into_result(method)
    }
}

impl Transport for TelegramTransport {
    fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>> {
        let request = SendMessage {
            chat_id,
            text: text.to_owned(),
        };
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let method = "sendMessage";
            let response = self
                .client
                .post(self.method_url(method))
                .json(&request)
                .send()
                .await
                .change_context(TransportError::Request {
                    method: method.into(),
                })
                .attach_with(|| format!("chat_id: {chat_id}"))?;

            let body: ApiResponse<serde_json::Value> =
                response
                    .json()
                    .await
                    .change_context(TransportError::ResponseParse {
                        method: method.into(),
                    })?;

            body.into_result(method)?;
            Ok(())
        })
    }

    fn receive(
        &self,
        tx: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>> {
        Box::pin(async move {
            let mut offset = 0i64;
            let mut backoff = Duration::from_secs(1);
            info!("telegram long polling started");

            loop {
                let updates = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = self.get_updates(offset) => result,
                };

                let updates = match updates {
                    Ok(updates) => {
                        backoff = Duration::from_secs(1);
                        updates
                    }
                    Err(e) => {
                        warn!(error = ?e, "telegram getUpdates failed, retrying...");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                        continue;
                    }
                };

                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(message) = update.into_inbound() else {
                        continue;
                    };
                    debug!(chat_id = message.chat_id, "telegram message received");
                    if tx.send(message).await.is_err() {
                        return Ok(());
                    }
                }
            }

            info!("telegram long polling stopped");
            Ok(())
        })
    }
}

// ── Bot API types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T, Report<TransportError>> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(Report::new(TransportError::Api {
                method: method.into(),
                description: self.description.unwrap_or_else(|| "no description".into()),
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

impl Update {
    fn into_inbound(self) -> Option<InboundMessage> {
        let message = self.message?;
        Some(InboundMessage {
            chat_id: message.chat.id,
            text: message.text?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: ChatId,
}

#[derive(Debug, Serialize)]
struct SendMessage {
    chat_id: ChatId,
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_with_text_become_inbound_messages() {
        let body = r#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"message_id": 1, "chat": {"id": -100, "type": "group"}, "text": "/xmrPrice"}},
                {"update_id": 11, "message": {"message_id": 2, "chat": {"id": 5, "type": "private"}, "sticker": {}}},
                {"update_id": 12}
            ]
        }"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        let updates = response.into_result("getUpdates").unwrap();
        assert_eq!(updates.len(), 3);

        let inbound: Vec<_> = updates.into_iter().filter_map(Update::into_inbound).collect();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].chat_id, -100);
        assert_eq!(inbound[0].text, "/xmrPrice");
    }

    #[test]
    fn api_error_carries_description() {
        let body = r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked by the user"}"#;
        let response: ApiResponse<serde_json::Value> = serde_json::from_str(body).unwrap();
        let err = response.into_result("sendMessage").unwrap_err();
        match err.current_context() {
            TransportError::Api { method, description } => {
                assert_eq!(method, "sendMessage");
                assert!(description.contains("blocked"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn method_url_includes_token() {
        let transport = TelegramTransport::new(
            reqwest::Client::new(),
            "http://localhost:8081/",
            "123:abc",
            Duration::from_secs(6),
            Duration::from_secs(5),
        );
        assert_eq!(
            transport.method_url("sendMessage"),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn long_poll_timeout_saturates() {
        let transport = TelegramTransport::new(
            reqwest::Client::new(),
            TELEGRAM_API_URL,
            "123:abc",
            Duration::MAX,
            Duration::from_secs(5),
        );
        assert_eq!(transport.long_poll_timeout(), Duration::MAX);
    }
}
