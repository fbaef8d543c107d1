//! Telegram Bot API notifier.
//!
//! Sends rendered notification texts via the `sendMessage` method. The
//! subscriber id is the Telegram chat id.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;

use crate::error::NotifyError;
use crate::notify::Notifier;
use crate::registry::SubscriberId;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Delivers notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    send_message_url: String,
    http: Client,
}

impl TelegramNotifier {
    /// Build a notifier for the given bot token.
    #[must_use]
    pub fn new(bot_token: &str) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, bot_token)
    }

    /// Build a notifier against a non-default API base URL.
    #[must_use]
    pub fn with_api_base(api_base: &str, bot_token: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            send_message_url: format!(
                "{}/bot{bot_token}/sendMessage",
                api_base.trim_end_matches('/')
            ),
            http,
        }
    }
}

// The sendMessage URL embeds the bot token; keep it out of Debug output.
impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier").finish_non_exhaustive()
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, subscriber: SubscriberId, text: &str) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.send_message_url)
            .json(&SendMessage {
                chat_id: subscriber.get(),
                text,
            })
            .send()
            .map_err(|err| NotifyError::Transport {
                message: err.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
