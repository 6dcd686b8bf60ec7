//! In-memory `Store` backed by a single `RwLock`'d state block. Short
//! critical sections only; nothing is held across an await point.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    Channel, ChannelId, Mapping, MappingSubject, Post, PostId, PostStatus, Source, SourceGroup,
    SourceId, ViewHistoryEntry,
};

use super::{Store, StoreError};

#[derive(Default)]
struct Inner {
    sources: HashMap<SourceId, Source>,
    groups: HashMap<String, SourceGroup>,
    channels: HashMap<ChannelId, Channel>,
    mappings: HashMap<String, Mapping>,
    posts: HashMap<PostId, Post>,
    /// Compound-key index: (source_id, external_post_id) → post id.
    post_index: HashMap<(SourceId, i64), PostId>,
    view_history: Vec<ViewHistoryEntry>,
}

#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("store rwlock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("store rwlock poisoned")
    }
}

#[async_trait]
impl Store for MemStore {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut v: Vec<_> = self.read().sources.values().cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(v)
    }

    async fn get_source(&self, id: &SourceId) -> Result<Source, StoreError> {
        self.read()
            .sources
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("source {id}")))
    }

    async fn put_source(&self, source: Source) -> Result<()> {
        self.write().sources.insert(source.id.clone(), source);
        Ok(())
    }

    async fn set_calculated_threshold(
        &self,
        id: &SourceId,
        threshold: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.write();
        let src = inner
            .sources
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("source {id}")))?;
        src.calculated_threshold = Some(threshold);
        Ok(())
    }

    async fn touch_source(&self, id: &SourceId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.write();
        let src = inner
            .sources
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("source {id}")))?;
        src.last_checked_at = Some(at);
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<SourceGroup>> {
        let mut v: Vec<_> = self.read().groups.values().cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(v)
    }

    async fn put_group(&self, group: SourceGroup) -> Result<()> {
        self.write().groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn get_channel(&self, id: &ChannelId) -> Result<Channel, StoreError> {
        self.read()
            .channels
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("channel {id}")))
    }

    async fn put_channel(&self, channel: Channel) -> Result<()> {
        self.write().channels.insert(channel.id.clone(), channel);
        Ok(())
    }

    async fn increment_forwarded(&self, id: &ChannelId) -> Result<(), StoreError> {
        let mut inner = self.write();
        let ch = inner
            .channels
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("channel {id}")))?;
        ch.forwarded_count += 1;
        Ok(())
    }

    async fn list_mappings(&self) -> Result<Vec<Mapping>> {
        let mut v: Vec<_> = self.read().mappings.values().cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(v)
    }

    async fn put_mapping(&self, mapping: Mapping) -> Result<(), StoreError> {
        let mut inner = self.write();
        let dup = inner.mappings.values().any(|m| {
            m.id != mapping.id
                && m.subject == mapping.subject
                && m.channel_id == mapping.channel_id
        });
        if dup {
            let subject = match &mapping.subject {
                MappingSubject::Source(s) => format!("source {s}"),
                MappingSubject::Group(g) => format!("group {g}"),
            };
            return Err(StoreError::Conflict(format!(
                "mapping ({subject}, channel {})",
                mapping.channel_id
            )));
        }
        inner.mappings.insert(mapping.id.clone(), mapping);
        Ok(())
    }

    async fn find_post(
        &self,
        source_id: &SourceId,
        external_post_id: i64,
    ) -> Result<Option<Post>> {
        let inner = self.read();
        Ok(inner
            .post_index
            .get(&(source_id.clone(), external_post_id))
            .and_then(|id| inner.posts.get(id))
            .cloned())
    }

    async fn insert_post(&self, post: Post) -> Result<(), StoreError> {
        let mut inner = self.write();
        let key = (post.source_id.clone(), post.external_post_id);
        if inner.post_index.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "post ({}, {})",
                key.0, key.1
            )));
        }
        inner.post_index.insert(key, post.id.clone());
        inner.posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn update_post(&self, post: Post) -> Result<(), StoreError> {
        let mut inner = self.write();
        if !inner.posts.contains_key(&post.id) {
            return Err(StoreError::NotFound(format!("post {}", post.id)));
        }
        inner.posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn get_post(&self, id: &PostId) -> Result<Post, StoreError> {
        self.read()
            .posts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("post {id}")))
    }

    async fn posts_created_since(
        &self,
        source_id: &SourceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        let mut v: Vec<_> = self
            .read()
            .posts
            .values()
            .filter(|p| &p.source_id == source_id && p.created_at >= since)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(v)
    }

    async fn posts_with_status(&self, status: PostStatus) -> Result<Vec<Post>> {
        let mut v: Vec<_> = self
            .read()
            .posts
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(v)
    }

    async fn append_view_history(&self, entry: ViewHistoryEntry) -> Result<()> {
        self.write().view_history.push(entry);
        Ok(())
    }

    async fn last_view_entry(&self, post_id: &PostId) -> Result<Option<ViewHistoryEntry>> {
        let inner = self.read();
        Ok(inner
            .view_history
            .iter()
            .filter(|e| &e.post_id == post_id)
            .max_by_key(|e| e.at)
            .cloned())
    }

    async fn recent_view_entries(
        &self,
        post_id: &PostId,
        n: usize,
    ) -> Result<Vec<ViewHistoryEntry>> {
        let inner = self.read();
        let mut entries: Vec<_> = inner
            .view_history
            .iter()
            .filter(|e| &e.post_id == post_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.at);
        let start = entries.len().saturating_sub(n);
        Ok(entries.split_off(start))
    }

    async fn prune_view_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.write();
        let before = inner.view_history.len();
        inner.view_history.retain(|e| e.at >= cutoff);
        Ok(before - inner.view_history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn post(id: &str, source: &str, ext: i64) -> Post {
        let now = Utc::now();
        Post {
            id: id.into(),
            source_id: source.into(),
            external_post_id: ext,
            text: String::new(),
            view_count: 0,
            like_count: 0,
            repost_count: 0,
            attachments: vec![],
            is_viral: false,
            was_high_dynamics: false,
            high_dynamics_sent_at: None,
            status: PostStatus::Pending,
            deliveries: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn compound_key_conflict_on_second_insert() {
        let store = MemStore::new();
        store.insert_post(post("p1", "s1", 7)).await.unwrap();
        let err = store.insert_post(post("p2", "s1", 7)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // Same external id under another source is fine.
        store.insert_post(post("p3", "s2", 7)).await.unwrap();
    }

    #[tokio::test]
    async fn mapping_unique_per_subject_and_channel() {
        let store = MemStore::new();
        let m = Mapping {
            id: "m1".into(),
            subject: MappingSubject::Source("s1".into()),
            channel_id: "c1".into(),
            active: true,
        };
        store.put_mapping(m.clone()).await.unwrap();
        // Re-putting the same mapping id is an update, not a conflict.
        store.put_mapping(m.clone()).await.unwrap();
        let dup = Mapping {
            id: "m2".into(),
            ..m
        };
        assert!(matches!(
            store.put_mapping(dup).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn view_history_prune_is_global() {
        let store = MemStore::new();
        let now = Utc::now();
        for (pid, age_h) in [("p1", 100), ("p2", 100), ("p1", 1)] {
            store
                .append_view_history(ViewHistoryEntry {
                    post_id: pid.into(),
                    view_count: 1,
                    at: now - Duration::hours(age_h),
                    view_delta: 0,
                    time_delta_minutes: 0.0,
                    growth_rate: 0.0,
                })
                .await
                .unwrap();
        }
        let removed = store
            .prune_view_history_before(now - Duration::days(4))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.last_view_entry(&"p2".into()).await.unwrap().is_none());
        assert!(store.last_view_entry(&"p1".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recent_entries_are_oldest_first_and_capped() {
        let store = MemStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .append_view_history(ViewHistoryEntry {
                    post_id: "p1".into(),
                    view_count: i,
                    at: now + Duration::minutes(i as i64),
                    view_delta: 0,
                    time_delta_minutes: 0.0,
                    growth_rate: i as f64,
                })
                .await
                .unwrap();
        }
        let recent = store.recent_view_entries(&"p1".into(), 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].view_count, 2);
        assert_eq!(recent[2].view_count, 4);
    }
}
