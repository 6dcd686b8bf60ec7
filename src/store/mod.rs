//! # Document Store
//! Async persistence seam consumed by the sweeps and the delivery engine.
//! The trait is the interface the core owns; `MemStore` is the in-process
//! implementation used by the binary and the tests. Compound-key uniqueness
//! for posts and mappings is enforced here, surfacing `StoreError::Conflict`
//! which callers count as a skip, not a failure.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    Channel, ChannelId, Mapping, Post, PostId, PostStatus, Source, SourceGroup, SourceId,
    ViewHistoryEntry,
};

pub use memory::MemStore;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- sources ---
    async fn list_sources(&self) -> Result<Vec<Source>>;
    async fn get_source(&self, id: &SourceId) -> Result<Source, StoreError>;
    async fn put_source(&self, source: Source) -> Result<()>;
    /// Persist a freshly computed auto threshold.
    async fn set_calculated_threshold(
        &self,
        id: &SourceId,
        threshold: u64,
    ) -> Result<(), StoreError>;
    async fn touch_source(&self, id: &SourceId, at: DateTime<Utc>) -> Result<(), StoreError>;

    // --- groups ---
    async fn list_groups(&self) -> Result<Vec<SourceGroup>>;
    async fn put_group(&self, group: SourceGroup) -> Result<()>;

    // --- channels ---
    async fn get_channel(&self, id: &ChannelId) -> Result<Channel, StoreError>;
    async fn put_channel(&self, channel: Channel) -> Result<()>;
    async fn increment_forwarded(&self, id: &ChannelId) -> Result<(), StoreError>;

    // --- mappings ---
    async fn list_mappings(&self) -> Result<Vec<Mapping>>;
    /// Unique per (subject, channel).
    async fn put_mapping(&self, mapping: Mapping) -> Result<(), StoreError>;

    // --- posts ---
    async fn find_post(
        &self,
        source_id: &SourceId,
        external_post_id: i64,
    ) -> Result<Option<Post>>;
    /// Insert a new post; `(source_id, external_post_id)` must be free.
    async fn insert_post(&self, post: Post) -> Result<(), StoreError>;
    async fn update_post(&self, post: Post) -> Result<(), StoreError>;
    async fn get_post(&self, id: &PostId) -> Result<Post, StoreError>;
    async fn posts_created_since(
        &self,
        source_id: &SourceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>>;
    async fn posts_with_status(&self, status: PostStatus) -> Result<Vec<Post>>;

    // --- view history ---
    async fn append_view_history(&self, entry: ViewHistoryEntry) -> Result<()>;
    async fn last_view_entry(&self, post_id: &PostId) -> Result<Option<ViewHistoryEntry>>;
    /// Up to `n` most recent entries for a post, oldest-first.
    async fn recent_view_entries(
        &self,
        post_id: &PostId,
        n: usize,
    ) -> Result<Vec<ViewHistoryEntry>>;
    /// Range delete by timestamp, across all posts. Returns removed count.
    async fn prune_view_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
