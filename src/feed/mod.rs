//! # Feed Source
//! The upstream interface the ingestion pipeline and the video fallback tier
//! consume. Constructed once at startup and passed in; components never reach
//! for a lazy global client.

pub mod wall_api;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Attachment;

pub use wall_api::WallApiFeed;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Missing or invalid credential. Fatal for the triggering operation;
    /// surfaced to the caller, never crashes the scheduler.
    #[error("feed authorization failed: {0}")]
    Auth(String),
    /// Unresolvable source or video identifier.
    #[error("feed object not found: {0}")]
    NotFound(String),
    #[error("feed http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed response malformed: {0}")]
    Malformed(String),
}

/// One raw feed entry, most-recent-first within a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPost {
    pub external_id: i64,
    pub text: String,
    pub view_count: u64,
    pub like_count: u64,
    pub repost_count: u64,
    /// Unix seconds.
    pub published_at: i64,
    pub attachments: Vec<Attachment>,
}

/// Playable-URL resolution result for a video attachment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    /// Best candidates first.
    pub playable_urls: Vec<String>,
    pub thumb_url: Option<String>,
    pub duration_seconds: Option<u32>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Resolve a human-entered name/handle to the numeric external id.
    async fn resolve_identifier(&self, name: &str) -> Result<i64, FeedError>;

    /// Fetch up to `count` most recent posts of a wall.
    async fn fetch_items(&self, external_id: i64, count: u32) -> Result<Vec<FeedPost>, FeedError>;

    /// Resolve playable URLs for a video attachment.
    async fn video_info(&self, owner_id: i64, video_id: i64) -> Result<VideoInfo, FeedError>;
}
