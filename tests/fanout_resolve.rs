// tests/fanout_resolve.rs
//
// Store-backed mapping resolution: a source in two groups both mapped to the
// same channel resolves to exactly one delivery target.

use std::sync::Arc;

use viral_feed_relay::fanout::resolve_for_source;
use viral_feed_relay::model::{Channel, Mapping, MappingSubject, SourceGroup};
use viral_feed_relay::store::{MemStore, Store};

fn channel(id: &str, active: bool) -> Channel {
    Channel {
        id: id.into(),
        transport_id: format!("@{id}"),
        title: id.into(),
        active,
        forwarded_count: 0,
    }
}

fn group(id: &str, sources: &[&str]) -> SourceGroup {
    SourceGroup {
        id: id.into(),
        name: id.into(),
        source_ids: sources.iter().map(|s| s.to_string()).collect(),
        stop_words: vec![],
        active: true,
    }
}

fn mapping(id: &str, subject: MappingSubject, channel: &str) -> Mapping {
    Mapping {
        id: id.into(),
        subject,
        channel_id: channel.into(),
        active: true,
    }
}

#[tokio::test]
async fn source_in_two_groups_mapped_to_same_channel_resolves_once() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    store.put_channel(channel("c", true)).await.unwrap();
    store.put_group(group("g1", &["s1"])).await.unwrap();
    store.put_group(group("g2", &["s1"])).await.unwrap();
    store
        .put_mapping(mapping("m1", MappingSubject::Group("g1".into()), "c"))
        .await
        .unwrap();
    store
        .put_mapping(mapping("m2", MappingSubject::Group("g2".into()), "c"))
        .await
        .unwrap();

    let resolved = resolve_for_source(store.as_ref(), &"s1".to_string())
        .await
        .unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, "c");
}

#[tokio::test]
async fn direct_and_group_mappings_union_without_duplicates() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    store.put_channel(channel("direct", true)).await.unwrap();
    store.put_channel(channel("shared", true)).await.unwrap();
    store.put_channel(channel("dark", false)).await.unwrap();
    store.put_group(group("g", &["s1", "s2"])).await.unwrap();

    store
        .put_mapping(mapping("m1", MappingSubject::Source("s1".into()), "direct"))
        .await
        .unwrap();
    store
        .put_mapping(mapping("m2", MappingSubject::Source("s1".into()), "shared"))
        .await
        .unwrap();
    store
        .put_mapping(mapping("m3", MappingSubject::Group("g".into()), "shared"))
        .await
        .unwrap();
    store
        .put_mapping(mapping("m4", MappingSubject::Group("g".into()), "dark"))
        .await
        .unwrap();

    let resolved = resolve_for_source(store.as_ref(), &"s1".to_string())
        .await
        .unwrap();
    let ids: Vec<&str> = resolved.iter().map(|c| c.id.as_str()).collect();
    // Inactive "dark" excluded; "shared" appears once.
    assert_eq!(ids, vec!["direct", "shared"]);

    // s2 only reaches the group's channels.
    let s2 = resolve_for_source(store.as_ref(), &"s2".to_string())
        .await
        .unwrap();
    assert_eq!(
        s2.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        vec!["shared"]
    );
}
