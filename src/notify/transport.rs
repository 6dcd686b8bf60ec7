//! # Channel Transport
//! The outgoing-message interface the delivery engine folds its fallback
//! chain over. One implementation per messaging platform; constructed once
//! at startup and injected.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("transport rejected request (code {code}): {description}")]
    Api { code: i64, description: String },
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle of a successfully delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub id: i64,
    pub title: String,
    pub handle: Option<String>,
}

/// A video payload is either a URL the platform fetches itself or a staged
/// local file uploaded as multipart.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoPayload {
    Url(String),
    Upload(PathBuf),
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send_text(&self, chat: &str, text: &str) -> Result<MessageHandle, TransportError>;

    async fn send_photo(
        &self,
        chat: &str,
        photo_url: &str,
        caption: &str,
    ) -> Result<MessageHandle, TransportError>;

    /// Combined multi-photo message; the caption rides on the first photo.
    async fn send_media_group(
        &self,
        chat: &str,
        photo_urls: &[String],
        caption: &str,
    ) -> Result<MessageHandle, TransportError>;

    async fn send_video(
        &self,
        chat: &str,
        video: VideoPayload,
        caption: &str,
    ) -> Result<MessageHandle, TransportError>;

    async fn resolve_channel_info(&self, identifier: &str)
        -> Result<ChannelInfo, TransportError>;
}
