//! Telegram notifications for executed trades and errors

use crate::types::{TradeAction, TradeNotification};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram bot client for push notifications.
///
/// Notifications are best-effort: when the bot token or chat id is not
/// configured every send is a silent no-op, and delivery failures are logged
/// but never bubble up into the trading path.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
}

impl Notifier {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        if bot_token.is_none() || chat_id.is_none() {
            info!("[Notify] Telegram not configured, notifications disabled");
        }
        Self {
            client: Client::new(),
            bot_token,
            chat_id,
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    /// Fully configured notifier aimed at a stand-in endpoint
    #[cfg(test)]
    pub(crate) fn with_api_base(bot_token: &str, chat_id: &str, api_base: &str) -> Self {
        Self {
            client: Client::new(),
            bot_token: Some(bot_token.to_string()),
            chat_id: Some(chat_id.to_string()),
            api_base: api_base.to_string(),
        }
    }

    /// Send a plain text message to the configured chat
    pub async fn send_message(&self, text: &str) {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            debug!("[Notify] skipped (not configured): {}", text);
            return;
        };

        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!("[Notify] message sent");
                } else {
                    error!("[Notify] Telegram returned {}", response.status());
                }
            }
            Err(e) => {
                error!("[Notify] failed to send Telegram message: {}", e);
            }
        }
    }

    /// Announce a committed trade
    pub async fn send_trade_notification(&self, trade: &TradeNotification) {
        let verb = match trade.action {
            TradeAction::Buy => "Bought",
            TradeAction::Sell => "Sold",
        };
        let text = format!(
            "{} {} {} at {} ({} quote) | trigger {}",
            verb, trade.quantity, trade.symbol, trade.price, trade.quote_amount, trade.trigger_price
        );
        self.send_message(&text).await;
    }

    /// Announce a failure that needs operator attention
    pub async fn send_error_notification(&self, context: &str) {
        self.send_message(&format!("⚠️ {}", context)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn capture_endpoint() -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/bot123/sendMessage",
            post(move |Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    tx.send(body).ok();
                    Json(json!({"ok": true}))
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn delivers_to_the_configured_chat() {
        let (base, mut rx) = capture_endpoint().await;
        let notifier = Notifier::with_api_base("123", "777", &base);

        notifier.send_message("feed reconnected").await;

        let body = rx.try_recv().unwrap();
        assert_eq!(body["chat_id"], "777");
        assert_eq!(body["text"], "feed reconnected");
    }

    #[tokio::test]
    async fn unconfigured_notifier_is_a_no_op() {
        let notifier = Notifier::new(None, None);
        notifier.send_message("dropped").await;
    }
}
