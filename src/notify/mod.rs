//! # Delivery Engine
//! Formats one post for one channel and attempts an ordered list of delivery
//! steps, advancing to the next only on failure (see [`fallback`]). On the
//! first success in a fanout pass the post is marked forwarded (terminal) and
//! the owning source's last-checked timestamp is refreshed.

pub mod fallback;
pub mod telegram;
pub mod transport;

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use thiserror::Error;

use crate::fanout;
use crate::feed::{FeedError, FeedSource};
use crate::model::{Attachment, Channel, DeliveryRecord, Post, PostStatus};
use crate::store::Store;

pub use fallback::run_fallback;
pub use telegram::TelegramTransport;
pub use transport::{ChannelInfo, ChannelTransport, MessageHandle, TransportError, VideoPayload};

/// Platform caption limit; longer post text is cut to fit.
pub const CAPTION_LIMIT: usize = 1024;
pub const TEXT_LIMIT: usize = 4096;

const MEDIA_EXTENSIONS: [&str; 5] = [".mp4", ".mov", ".avi", ".mkv", ".webm"];

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("video resolution failed: {0}")]
    Feed(#[from] FeedError),
}

/// Why a post is being delivered; high-dynamics deliveries carry the growth
/// annotation shown in the caption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeliveryKind {
    Viral,
    HighDynamics {
        growth_rate: f64,
        window_minutes: f64,
    },
}

/// Explicit options record for one delivery. One shape for every call site;
/// no variant arities.
#[derive(Debug)]
pub struct DeliveryRequest<'a> {
    pub post: &'a Post,
    pub channel: &'a Channel,
    pub source_name: &'a str,
    pub kind: DeliveryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStep {
    MediaGroup,
    SinglePhoto,
    PhotoLinksText,
    Video,
    WatchLinkText,
    PlainText,
}

/// Pick the fallback chain for a post's media shape. Photos take precedence
/// over videos; the last step of every chain is text and should not fail for
/// format reasons.
pub fn plan_steps(post: &Post) -> Vec<DeliveryStep> {
    let photos = post.photo_urls().len();
    if photos >= 2 {
        vec![
            DeliveryStep::MediaGroup,
            DeliveryStep::SinglePhoto,
            DeliveryStep::PhotoLinksText,
        ]
    } else if photos == 1 {
        vec![DeliveryStep::SinglePhoto, DeliveryStep::PhotoLinksText]
    } else if post.first_video().is_some() {
        vec![DeliveryStep::Video, DeliveryStep::WatchLinkText]
    } else {
        vec![DeliveryStep::PlainText]
    }
}

/// Caption: source name, post text (cut to the platform limit), counters,
/// and the growth annotation for high-dynamics deliveries.
pub fn build_caption(post: &Post, source_name: &str, kind: DeliveryKind) -> String {
    let mut footer = format!(
        "\n\nViews: {} | Likes: {} | Reposts: {}",
        post.view_count, post.like_count, post.repost_count
    );
    if let DeliveryKind::HighDynamics {
        growth_rate,
        window_minutes,
    } = kind
    {
        footer.push_str(&format!(
            "\nTrending: {growth_rate:.1} views/min over the last {window_minutes:.0} min"
        ));
    }

    let header = format!("{source_name}\n\n");
    let budget = CAPTION_LIMIT
        .saturating_sub(header.chars().count())
        .saturating_sub(footer.chars().count());
    let text = truncate_chars(&post.text, budget);

    format!("{header}{text}{footer}")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

fn has_media_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn watch_link(owner_id: i64, video_id: i64, direct: Option<&str>) -> String {
    match direct {
        Some(url) => url.to_string(),
        None => format!("https://vk.com/video{owner_id}_{video_id}"),
    }
}

/// Result of fanning one post out to its resolved channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub channels: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct DeliveryEngine {
    store: Arc<dyn Store>,
    feed: Arc<dyn FeedSource>,
    transport: Arc<dyn ChannelTransport>,
    /// Used only to stage video bytes for upload.
    http: reqwest::Client,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn FeedSource>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            store,
            feed,
            transport,
            http: reqwest::Client::new(),
        }
    }

    /// Deliver one post to one channel through the fallback chain. Only the
    /// last attempted step's failure propagates.
    pub async fn deliver(
        &self,
        req: &DeliveryRequest<'_>,
    ) -> Result<MessageHandle, DeliveryError> {
        let steps = plan_steps(req.post);
        let caption = build_caption(req.post, req.source_name, req.kind);
        let chat = req.channel.transport_id.as_str();

        let (handle, step) = run_fallback(&steps, |step| {
            let step = *step;
            let caption = caption.clone();
            async move { self.attempt_step(step, req.post, chat, &caption).await }
        })
        .await?;

        counter!("delivery_success_total").increment(1);
        tracing::info!(
            post = %req.post.id,
            channel = %req.channel.id,
            step = ?step,
            "post delivered"
        );
        Ok(handle)
    }

    async fn attempt_step(
        &self,
        step: DeliveryStep,
        post: &Post,
        chat: &str,
        caption: &str,
    ) -> Result<MessageHandle, DeliveryError> {
        match step {
            DeliveryStep::MediaGroup => {
                let urls: Vec<String> =
                    post.photo_urls().iter().map(|u| u.to_string()).collect();
                Ok(self.transport.send_media_group(chat, &urls, caption).await?)
            }
            DeliveryStep::SinglePhoto => {
                let first = post
                    .photo_urls()
                    .first()
                    .copied()
                    .unwrap_or_default()
                    .to_string();
                Ok(self.transport.send_photo(chat, &first, caption).await?)
            }
            DeliveryStep::PhotoLinksText => {
                let mut text = caption.to_string();
                for url in post.photo_urls() {
                    text.push('\n');
                    text.push_str(url);
                }
                Ok(self
                    .transport
                    .send_text(chat, &truncate_chars(&text, TEXT_LIMIT))
                    .await?)
            }
            DeliveryStep::Video => self.video_step(post, chat, caption).await,
            DeliveryStep::WatchLinkText => self.watch_link_step(post, chat, caption).await,
            DeliveryStep::PlainText => Ok(self
                .transport
                .send_text(chat, &truncate_chars(caption, TEXT_LIMIT))
                .await?),
        }
    }

    /// Video tier: a direct playable URL with a recognized media extension is
    /// handed to the platform as-is; anything else goes through video-info
    /// resolution and a staged temporary upload. The staged file is a
    /// `NamedTempFile`, removed on every exit path by drop.
    async fn video_step(
        &self,
        post: &Post,
        chat: &str,
        caption: &str,
    ) -> Result<MessageHandle, DeliveryError> {
        let Some(Attachment::Video {
            owner_id,
            video_id,
            direct_url,
            ..
        }) = post.first_video()
        else {
            return Err(DeliveryError::Feed(FeedError::Malformed(
                "video step planned without a video attachment".into(),
            )));
        };

        if let Some(url) = direct_url {
            if has_media_extension(url) {
                return Ok(self
                    .transport
                    .send_video(chat, VideoPayload::Url(url.clone()), caption)
                    .await?);
            }
        }

        let info = self.feed.video_info(*owner_id, *video_id).await?;
        let playable = info.playable_urls.first().ok_or_else(|| {
            FeedError::NotFound(format!("playable url for {owner_id}_{video_id}"))
        })?;

        let staged = tempfile::Builder::new()
            .suffix(".mp4")
            .tempfile()
            .map_err(TransportError::Io)?;
        let bytes = self
            .http
            .get(playable)
            .send()
            .await
            .map_err(TransportError::Http)?
            .bytes()
            .await
            .map_err(TransportError::Http)?;
        tokio::fs::write(staged.path(), &bytes)
            .await
            .map_err(TransportError::Io)?;

        let sent = self
            .transport
            .send_video(
                chat,
                VideoPayload::Upload(staged.path().to_path_buf()),
                caption,
            )
            .await;
        drop(staged);
        Ok(sent?)
    }

    async fn watch_link_step(
        &self,
        post: &Post,
        chat: &str,
        caption: &str,
    ) -> Result<MessageHandle, DeliveryError> {
        let Some(Attachment::Video {
            owner_id,
            video_id,
            direct_url,
            thumb_url,
            ..
        }) = post.first_video()
        else {
            return Ok(self.transport.send_text(chat, caption).await?);
        };

        let link = watch_link(*owner_id, *video_id, direct_url.as_deref());
        let text = truncate_chars(&format!("{caption}\nWatch: {link}"), TEXT_LIMIT);
        match thumb_url {
            Some(thumb) => Ok(self.transport.send_photo(chat, thumb, &text).await?),
            None => Ok(self.transport.send_text(chat, &text).await?),
        }
    }

    /// Fan one post out to every channel resolved for its source. Per-channel
    /// failures do not roll back earlier successes; the first success marks
    /// the post forwarded and refreshes the source's last-checked timestamp.
    pub async fn fanout(&self, post: &Post, kind: DeliveryKind) -> anyhow::Result<FanoutReport> {
        let source = self.store.get_source(&post.source_id).await?;
        let channels = fanout::resolve_for_source(self.store.as_ref(), &post.source_id).await?;

        let mut report = FanoutReport {
            channels: channels.len(),
            ..Default::default()
        };
        if channels.is_empty() {
            tracing::debug!(post = %post.id, source = %source.name, "no channels mapped, skipping fanout");
            return Ok(report);
        }

        // Work on a fresh copy so delivery records accumulate across channels.
        let mut current = self.store.get_post(&post.id).await?;

        for channel in &channels {
            let req = DeliveryRequest {
                post: &current,
                channel,
                source_name: &source.name,
                kind,
            };
            match self.deliver(&req).await {
                Ok(handle) => {
                    let first_success = report.delivered == 0;
                    report.delivered += 1;

                    current.deliveries.push(DeliveryRecord {
                        channel_id: channel.id.clone(),
                        message_id: handle.message_id,
                        at: Utc::now(),
                    });
                    if first_success && current.status.can_transition(PostStatus::Forwarded) {
                        // Terminal; the next sweep will not re-forward.
                        current.set_status(PostStatus::Forwarded).ok();
                    }
                    current.updated_at = Utc::now();
                    self.store.update_post(current.clone()).await?;
                    self.store.increment_forwarded(&channel.id).await?;
                    if first_success {
                        self.store.touch_source(&source.id, Utc::now()).await?;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("delivery_failed_total").increment(1);
                    tracing::warn!(
                        post = %current.id,
                        channel = %channel.id,
                        error = %e,
                        "delivery failed after final fallback"
                    );
                }
            }
        }
        Ok(report)
    }
}
