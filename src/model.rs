//! # Domain Model
//! Entities shared by the scheduler, ingestion pipeline, and delivery engine.
//! Status transitions and boundary validation live here so that malformed
//! configuration is rejected before it reaches core logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::{MULTIPLIER_MAX, MULTIPLIER_MIN};

pub type SourceId = String;
pub type GroupId = String;
pub type ChannelId = String;
pub type PostId = String;

/// Minimum allowed polling frequency; smaller values are rejected at the
/// boundary. A frequency of 0 is not an error: the scheduler falls back
/// to an hourly job.
pub const MIN_CHECK_FREQUENCY_MINUTES: u32 = 5;
pub const POSTS_TO_CHECK_MIN: u32 = 10;
pub const POSTS_TO_CHECK_MAX: u32 = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("statistical multiplier {0} outside [{MULTIPLIER_MIN}, {MULTIPLIER_MAX}]")]
    MultiplierOutOfRange(f64),
    #[error("check frequency {0} min is below the {MIN_CHECK_FREQUENCY_MINUTES} min minimum")]
    FrequencyTooLow(u32),
    #[error("posts_to_check {0} outside [{POSTS_TO_CHECK_MIN}, {POSTS_TO_CHECK_MAX}]")]
    PostsToCheckOutOfRange(u32),
    #[error("high-dynamics config requires growth_rate_threshold > 0 and min_data_points > 0")]
    BadHighDynamicsConfig,
    #[error("status cannot move from {from:?} to {to:?}")]
    BadStatusTransition { from: PostStatus, to: PostStatus },
}

/// How the virality cutoff for a source is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    /// Cutoff recomputed from a fresh view-count sample when unset.
    Auto,
    /// Admin-pinned cutoff; `manual_threshold` wins.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Cutoff = mean of the sample.
    Average,
    /// Cutoff = mean + multiplier * population stddev.
    Statistical,
}

/// Early-detection settings for posts that grow fast before crossing the
/// viral threshold. A concrete sub-record, validated at construction; the
/// rest of the code never has to defend against a half-filled bag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighDynamicsConfig {
    pub enabled: bool,
    /// Views per minute a post must average to qualify.
    pub growth_rate_threshold: f64,
    /// Number of most-recent history samples the average is taken over.
    /// Posts with fewer samples are not yet eligible.
    pub min_data_points: usize,
}

impl Default for HighDynamicsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            growth_rate_threshold: 100.0,
            min_data_points: 3,
        }
    }
}

/// A polled feed endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    /// Human-readable name, also the identifier handed to the feed for
    /// resolution when `external_id` is not known yet.
    pub name: String,
    pub external_id: i64,
    pub threshold_type: ThresholdType,
    pub threshold_method: ThresholdMethod,
    /// Absent means "use the default"; distinct from an explicit 0, which is
    /// out of range and rejected. The value survives method switches even
    /// while the average method ignores it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistical_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_threshold: Option<u64>,
    pub check_frequency_minutes: u32,
    pub posts_to_check: u32,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Enables per-sweep view-history sampling.
    #[serde(default)]
    pub tracking_enabled: bool,
    #[serde(default)]
    pub high_dynamics: HighDynamicsConfig,
}

impl Source {
    /// Boundary validation; call before persisting an admin edit.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(m) = self.statistical_multiplier {
            if !(MULTIPLIER_MIN..=MULTIPLIER_MAX).contains(&m) {
                return Err(ValidationError::MultiplierOutOfRange(m));
            }
        }
        if self.check_frequency_minutes != 0
            && self.check_frequency_minutes < MIN_CHECK_FREQUENCY_MINUTES
        {
            return Err(ValidationError::FrequencyTooLow(self.check_frequency_minutes));
        }
        if !(POSTS_TO_CHECK_MIN..=POSTS_TO_CHECK_MAX).contains(&self.posts_to_check) {
            return Err(ValidationError::PostsToCheckOutOfRange(self.posts_to_check));
        }
        if self.high_dynamics.enabled
            && (self.high_dynamics.growth_rate_threshold <= 0.0
                || self.high_dynamics.min_data_points == 0)
        {
            return Err(ValidationError::BadHighDynamicsConfig);
        }
        Ok(())
    }
}

/// Named set of sources sharing stop-words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub source_ids: Vec<SourceId>,
    #[serde(default)]
    pub stop_words: Vec<String>,
    pub active: bool,
}

/// A messaging delivery destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// Identifier understood by the transport (chat id or @handle).
    pub transport_id: String,
    pub title: String,
    pub active: bool,
    #[serde(default)]
    pub forwarded_count: u64,
}

/// The subject of a mapping is a source XOR a group, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSubject {
    Source(SourceId),
    Group(GroupId),
}

/// Source-or-group → channel edge; unique per (subject, channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: String,
    pub subject: MappingSubject,
    pub channel_id: ChannelId,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Approved,
    Rejected,
    Forwarded,
}

impl PostStatus {
    /// Transitions only move forward; `Forwarded` is terminal.
    pub fn can_transition(self, to: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, to),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Forwarded) | (Approved, Forwarded)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Attachment {
    Photo {
        url: String,
    },
    Video {
        owner_id: i64,
        video_id: i64,
        /// Playable URL when the feed handed one out directly.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direct_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumb_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

/// One successful delivery of a post to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub channel_id: ChannelId,
    pub message_id: i64,
    pub at: DateTime<Utc>,
}

/// One ingested feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub source_id: SourceId,
    pub external_post_id: i64,
    pub text: String,
    pub view_count: u64,
    pub like_count: u64,
    pub repost_count: u64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub is_viral: bool,
    #[serde(default)]
    pub was_high_dynamics: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_dynamics_sent_at: Option<DateTime<Utc>>,
    pub status: PostStatus,
    #[serde(default)]
    pub deliveries: Vec<DeliveryRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Apply a status change, enforcing the forward-only machine.
    pub fn set_status(&mut self, to: PostStatus) -> Result<(), ValidationError> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition(to) {
            return Err(ValidationError::BadStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn photo_urls(&self) -> Vec<&str> {
        self.attachments
            .iter()
            .filter_map(|a| match a {
                Attachment::Photo { url } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn first_video(&self) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|a| matches!(a, Attachment::Video { .. }))
    }
}

/// One view-count sample for a post. `growth_rate` is views per minute since
/// the previous sample; zero for the first sample of a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewHistoryEntry {
    pub post_id: PostId,
    pub view_count: u64,
    pub at: DateTime<Utc>,
    pub view_delta: i64,
    pub time_delta_minutes: f64,
    pub growth_rate: f64,
}
