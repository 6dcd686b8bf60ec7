//! # Mapping Resolver
//! Computes the deduplicated set of destination channels for a source: direct
//! mappings first, then mappings of every active group listing the source.
//! Pure over its inputs; `resolve_for_source` is the store-backed wrapper.

use std::collections::HashSet;

use crate::model::{Channel, ChannelId, Mapping, MappingSubject, SourceGroup, SourceId};
use crate::store::Store;

/// Union of direct and group-level mappings, deduplicated by channel id
/// (first occurrence kept). Inactive mappings, groups, and channels are
/// excluded.
pub fn resolve_channels(
    source_id: &SourceId,
    mappings: &[Mapping],
    groups: &[SourceGroup],
    channels: &[Channel],
) -> Vec<Channel> {
    let member_groups: HashSet<&str> = groups
        .iter()
        .filter(|g| g.active && g.source_ids.contains(source_id))
        .map(|g| g.id.as_str())
        .collect();

    let mut seen: HashSet<ChannelId> = HashSet::new();
    let mut out = Vec::new();

    let mut push = |channel_id: &ChannelId| {
        if !seen.insert(channel_id.clone()) {
            return;
        }
        if let Some(ch) = channels.iter().find(|c| &c.id == channel_id) {
            if ch.active {
                out.push(ch.clone());
            }
        }
    };

    for m in mappings.iter().filter(|m| m.active) {
        if matches!(&m.subject, MappingSubject::Source(s) if s == source_id) {
            push(&m.channel_id);
        }
    }
    for m in mappings.iter().filter(|m| m.active) {
        if matches!(&m.subject, MappingSubject::Group(g) if member_groups.contains(g.as_str())) {
            push(&m.channel_id);
        }
    }

    out
}

/// Load the mapping graph from the store and resolve.
pub async fn resolve_for_source(
    store: &dyn Store,
    source_id: &SourceId,
) -> anyhow::Result<Vec<Channel>> {
    let mappings = store.list_mappings().await?;
    let groups = store.list_groups().await?;

    // Only the mapped channels are needed; fetch them individually rather
    // than snapshotting the whole channel table.
    let mut channels = Vec::new();
    let mut wanted: HashSet<&ChannelId> = HashSet::new();
    for m in &mappings {
        if m.active {
            wanted.insert(&m.channel_id);
        }
    }
    for id in wanted {
        if let Ok(ch) = store.get_channel(id).await {
            channels.push(ch);
        }
    }

    Ok(resolve_channels(source_id, &mappings, &groups, &channels))
}
