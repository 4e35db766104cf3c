//! Telegram notification channel
//!
//! Bot API의 sendMessage 하나만 사용한다. 전송 성공 여부가 전달 기록의
//! 기준이므로 여기서의 Ok는 "채널이 수락했다"를 의미한다.

use crate::{
    error::{CatalogError, CatalogResult},
    retry::RetryConfig,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use vigia_foundation::{NotificationChannel, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram Bot API channel
pub struct TelegramChannel {
    client: Client,
    api_base_url: String,
    bot_token: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

impl TelegramChannel {
    /// Create a channel. Fails if the token is empty.
    pub fn new(
        api_base_url: impl Into<String>,
        bot_token: impl Into<String>,
    ) -> CatalogResult<Self> {
        let bot_token = bot_token.into();
        if bot_token.is_empty() {
            return Err(CatalogError::NotConfigured(
                "bot token is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_default();

        Ok(Self {
            client,
            api_base_url: api_base_url.into(),
            bot_token,
            retry_config: RetryConfig::default(),
        })
    }

    /// Override the retry policy
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn send_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base_url.trim_end_matches('/'),
            self.bot_token
        )
    }

    async fn send_once(&self, chat_id: i64, text: &str) -> CatalogResult<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.send_url())
            .json(&body)
            .send()
            .await
            .map_err(CatalogError::from)?;

        let status = response.status().as_u16();
        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

        if api.ok {
            debug!(chat_id, "Message accepted by channel");
            return Ok(());
        }

        let description = api.description.unwrap_or_else(|| "unknown error".to_string());
        let code = api.error_code.unwrap_or(status as i64);

        // 403 means the subscriber blocked the bot or deleted their account.
        // Not transient, and not the channel's fault either.
        if code == 403 {
            return Err(CatalogError::SubscriberRejected(description));
        }
        if code == 429 {
            return Err(CatalogError::RateLimited(description));
        }

        warn!(chat_id, code, %description, "Channel rejected message");
        Err(CatalogError::from_http_status(code as u16, &description))
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send(&self, subscriber_external_id: i64, rendered: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.send_once(subscriber_external_id, rendered).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_transient() || attempt >= self.retry_config.max_retries => {
                    return Err(e.into());
                }
                Err(e) => {
                    let delay = self.retry_config.delay_for_attempt(attempt);
                    warn!(
                        subscriber = subscriber_external_id,
                        attempt = attempt + 1,
                        ?delay,
                        "Send failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        let result = TelegramChannel::new("https://api.telegram.org", "");
        assert!(matches!(result, Err(CatalogError::NotConfigured(_))));
    }

    #[test]
    fn send_url_embeds_token() {
        let channel =
            TelegramChannel::new("https://api.telegram.org/", "123:abc").expect("valid token");
        assert_eq!(
            channel.send_url(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn api_error_response_parses() {
        let raw = r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked"}"#;
        let api: ApiResponse = serde_json::from_str(raw).expect("parses");
        assert!(!api.ok);
        assert_eq!(api.error_code, Some(403));
    }
}
