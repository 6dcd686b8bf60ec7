//! VK-style wall API client. JSON envelope: every call returns either
//! `{"response": ...}` or `{"error": {"error_code", "error_msg"}}`; error
//! code 5 is an invalid/expired token, 15/100/104 are unresolvable objects.

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::model::Attachment;

use super::{FeedError, FeedPost, FeedSource, VideoInfo};

const API_VERSION: &str = "5.199";

pub struct WallApiFeed {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl WallApiFeed {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Token from `WALL_API_TOKEN`; base URL overridable for tests.
    pub fn from_env() -> Result<Self, FeedError> {
        let token = std::env::var("WALL_API_TOKEN")
            .map_err(|_| FeedError::Auth("WALL_API_TOKEN is not set".into()))?;
        let base = std::env::var("WALL_API_BASE")
            .unwrap_or_else(|_| "https://api.vk.com".to_string());
        Ok(Self::new(base, token))
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, FeedError> {
        let url = format!("{}/method/{}", self.base_url, method);
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("access_token", self.access_token.clone()));
        query.push(("v", API_VERSION.to_string()));

        let resp = self.client.get(&url).query(&query).send().await?;
        let envelope: Envelope<T> = resp.json().await?;

        match envelope {
            Envelope {
                response: Some(r), ..
            } => Ok(r),
            Envelope {
                error: Some(e), ..
            } => {
                counter!("feed_api_errors_total").increment(1);
                tracing::warn!(method, code = e.error_code, msg = %e.error_msg, "feed api error");
                Err(match e.error_code {
                    5 => FeedError::Auth(e.error_msg),
                    15 | 100 | 104 => FeedError::NotFound(e.error_msg),
                    _ => FeedError::Malformed(format!("code {}: {}", e.error_code, e.error_msg)),
                })
            }
            _ => Err(FeedError::Malformed(format!(
                "{method}: neither response nor error present"
            ))),
        }
    }
}

#[async_trait]
impl FeedSource for WallApiFeed {
    async fn resolve_identifier(&self, name: &str) -> Result<i64, FeedError> {
        let groups: Vec<GroupInfo> = self
            .call("groups.getById", &[("group_id", name.to_string())])
            .await?;
        let g = groups
            .first()
            .ok_or_else(|| FeedError::NotFound(format!("group {name}")))?;
        // Wall owner ids of communities are negative.
        Ok(-g.id)
    }

    async fn fetch_items(&self, external_id: i64, count: u32) -> Result<Vec<FeedPost>, FeedError> {
        let wall: WallResponse = self
            .call(
                "wall.get",
                &[
                    ("owner_id", external_id.to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;

        counter!("feed_items_fetched_total").increment(wall.items.len() as u64);
        Ok(wall.items.into_iter().map(WallPost::into_feed_post).collect())
    }

    async fn video_info(&self, owner_id: i64, video_id: i64) -> Result<VideoInfo, FeedError> {
        let resp: VideoGetResponse = self
            .call(
                "video.get",
                &[("videos", format!("{owner_id}_{video_id}"))],
            )
            .await?;
        let v = resp
            .items
            .into_iter()
            .next()
            .ok_or_else(|| FeedError::NotFound(format!("video {owner_id}_{video_id}")))?;

        // Highest-quality files first.
        let mut urls: Vec<(u32, String)> = v
            .files
            .map(|f| f.into_ranked_urls())
            .unwrap_or_default();
        urls.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(VideoInfo {
            playable_urls: urls.into_iter().map(|(_, u)| u).collect(),
            thumb_url: v.image.and_then(|im| im.into_iter().max_by_key(|i| i.width)).map(|i| i.url),
            duration_seconds: v.duration,
        })
    }
}

// --- wire shapes ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: i32,
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct GroupInfo {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct WallResponse {
    #[serde(default)]
    items: Vec<WallPost>,
}

#[derive(Debug, Deserialize)]
struct WallPost {
    id: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    views: Option<CountField>,
    #[serde(default)]
    likes: Option<CountField>,
    #[serde(default)]
    reposts: Option<CountField>,
    #[serde(default)]
    attachments: Vec<WallAttachment>,
}

#[derive(Debug, Deserialize)]
struct CountField {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct WallAttachment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    photo: Option<PhotoAttachment>,
    #[serde(default)]
    video: Option<VideoAttachment>,
}

#[derive(Debug, Deserialize)]
struct PhotoAttachment {
    #[serde(default)]
    sizes: Vec<PhotoSize>,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    url: String,
    #[serde(default)]
    width: u32,
}

#[derive(Debug, Deserialize)]
struct VideoAttachment {
    owner_id: i64,
    id: i64,
    #[serde(default)]
    player: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    image: Option<Vec<PhotoSize>>,
    #[serde(default)]
    duration: Option<u32>,
    #[serde(default)]
    files: Option<VideoFiles>,
}

#[derive(Debug, Deserialize)]
struct VideoGetResponse {
    #[serde(default)]
    items: Vec<VideoAttachment>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoFiles {
    mp4_1080: Option<String>,
    mp4_720: Option<String>,
    mp4_480: Option<String>,
    mp4_360: Option<String>,
    mp4_240: Option<String>,
}

impl VideoFiles {
    fn into_ranked_urls(self) -> Vec<(u32, String)> {
        [
            (1080, self.mp4_1080),
            (720, self.mp4_720),
            (480, self.mp4_480),
            (360, self.mp4_360),
            (240, self.mp4_240),
        ]
        .into_iter()
        .filter_map(|(rank, url)| url.map(|u| (rank, u)))
        .collect()
    }
}

impl WallPost {
    fn into_feed_post(self) -> FeedPost {
        let attachments = self
            .attachments
            .into_iter()
            .filter_map(|a| match a.kind.as_str() {
                "photo" => a.photo.and_then(|p| {
                    p.sizes
                        .into_iter()
                        .max_by_key(|s| s.width)
                        .map(|s| Attachment::Photo { url: s.url })
                }),
                "video" => a.video.map(|v| Attachment::Video {
                    owner_id: v.owner_id,
                    video_id: v.id,
                    direct_url: v.player,
                    thumb_url: v
                        .image
                        .and_then(|im| im.into_iter().max_by_key(|i| i.width))
                        .map(|i| i.url),
                    title: v.title,
                }),
                _ => None,
            })
            .collect();

        FeedPost {
            external_id: self.id,
            text: self.text,
            view_count: self.views.map(|c| c.count).unwrap_or(0),
            like_count: self.likes.map(|c| c.count).unwrap_or(0),
            repost_count: self.reposts.map(|c| c.count).unwrap_or(0),
            published_at: self.date,
            attachments,
        }
    }
}
