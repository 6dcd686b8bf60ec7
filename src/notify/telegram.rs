//! Telegram Bot API transport. Builder-style timeout/retry configuration;
//! bounded retry with exponential backoff on transport-level failures. API
//! rejections (`ok == false`) are not retried, the fallback chain decides
//! what happens next.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::transport::{
    ChannelInfo, ChannelTransport, MessageHandle, TransportError, VideoPayload,
};

pub struct TelegramTransport {
    base_url: String,
    token: String,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u8,
}

impl TelegramTransport {
    pub fn new(token: String) -> Self {
        Self {
            base_url: "https://api.telegram.org".to_string(),
            token,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    /// Token from `TELEGRAM_BOT_TOKEN`.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN is not set"))?;
        Ok(Self::new(token))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call_json<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, TransportError> {
        let url = self.method_url(method);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(resp) => return parse_api_response(resp).await,
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

async fn parse_api_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, TransportError> {
    let api: ApiResponse<T> = resp.json().await?;
    if api.ok {
        api.result.ok_or(TransportError::Api {
            code: 0,
            description: "ok response without result".into(),
        })
    } else {
        Err(TransportError::Api {
            code: api.error_code.unwrap_or(0),
            description: api.description.unwrap_or_else(|| "unknown error".into()),
        })
    }
}

#[async_trait]
impl ChannelTransport for TelegramTransport {
    async fn send_text(&self, chat: &str, text: &str) -> Result<MessageHandle, TransportError> {
        let msg: Message = self
            .call_json(
                "sendMessage",
                json!({ "chat_id": chat, "text": text, "disable_web_page_preview": false }),
            )
            .await?;
        Ok(MessageHandle {
            message_id: msg.message_id,
        })
    }

    async fn send_photo(
        &self,
        chat: &str,
        photo_url: &str,
        caption: &str,
    ) -> Result<MessageHandle, TransportError> {
        let msg: Message = self
            .call_json(
                "sendPhoto",
                json!({ "chat_id": chat, "photo": photo_url, "caption": caption }),
            )
            .await?;
        Ok(MessageHandle {
            message_id: msg.message_id,
        })
    }

    async fn send_media_group(
        &self,
        chat: &str,
        photo_urls: &[String],
        caption: &str,
    ) -> Result<MessageHandle, TransportError> {
        let media: Vec<_> = photo_urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                if i == 0 {
                    json!({ "type": "photo", "media": url, "caption": caption })
                } else {
                    json!({ "type": "photo", "media": url })
                }
            })
            .collect();

        let msgs: Vec<Message> = self
            .call_json("sendMediaGroup", json!({ "chat_id": chat, "media": media }))
            .await?;
        let first = msgs.first().ok_or(TransportError::Api {
            code: 0,
            description: "empty media group result".into(),
        })?;
        Ok(MessageHandle {
            message_id: first.message_id,
        })
    }

    async fn send_video(
        &self,
        chat: &str,
        video: VideoPayload,
        caption: &str,
    ) -> Result<MessageHandle, TransportError> {
        let msg: Message = match video {
            VideoPayload::Url(url) => {
                self.call_json(
                    "sendVideo",
                    json!({ "chat_id": chat, "video": url, "caption": caption }),
                )
                .await?
            }
            VideoPayload::Upload(path) => {
                let bytes = tokio::fs::read(&path).await?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("video.mp4")
                    .to_string();
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("video/mp4")
                    .map_err(TransportError::Http)?;
                let form = reqwest::multipart::Form::new()
                    .text("chat_id", chat.to_string())
                    .text("caption", caption.to_string())
                    .part("video", part);

                let resp = self
                    .client
                    .post(self.method_url("sendVideo"))
                    .timeout(self.timeout)
                    .multipart(form)
                    .send()
                    .await?;
                parse_api_response(resp).await?
            }
        };
        Ok(MessageHandle {
            message_id: msg.message_id,
        })
    }

    async fn resolve_channel_info(
        &self,
        identifier: &str,
    ) -> Result<ChannelInfo, TransportError> {
        let chat: Chat = self
            .call_json("getChat", json!({ "chat_id": identifier }))
            .await?;
        Ok(ChannelInfo {
            id: chat.id,
            title: chat.title.unwrap_or_default(),
            handle: chat.username,
        })
    }
}

// --- wire shapes ---

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    title: Option<String>,
    username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_maps_to_transport_error() {
        let raw = r#"{"ok": false, "error_code": 400, "description": "Bad Request: wrong file"}"#;
        let api: ApiResponse<Message> = serde_json::from_str(raw).unwrap();
        assert!(!api.ok);
        assert_eq!(api.error_code, Some(400));
    }

    #[test]
    fn ok_response_parses_message_id() {
        let raw = r#"{"ok": true, "result": {"message_id": 777}}"#;
        let api: ApiResponse<Message> = serde_json::from_str(raw).unwrap();
        assert_eq!(api.result.unwrap().message_id, 777);
    }
}
