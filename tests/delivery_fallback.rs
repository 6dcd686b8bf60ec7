// tests/delivery_fallback.rs
//
// Media-type fallback: a failing media-group send falls back to a single
// photo, then to a text message with photo links. Only one delivery record
// is appended, for the tier that finally succeeded.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use viral_feed_relay::feed::{FeedError, FeedPost, FeedSource, VideoInfo};
use viral_feed_relay::model::{
    Attachment, Channel, HighDynamicsConfig, Mapping, MappingSubject, Post, PostStatus, Source,
    ThresholdMethod, ThresholdType,
};
use viral_feed_relay::notify::{
    ChannelInfo, ChannelTransport, DeliveryEngine, DeliveryKind, MessageHandle, TransportError,
    VideoPayload,
};
use viral_feed_relay::store::{MemStore, Store};

struct NoVideoFeed;

#[async_trait]
impl FeedSource for NoVideoFeed {
    async fn resolve_identifier(&self, _n: &str) -> Result<i64, FeedError> {
        Ok(-1)
    }
    async fn fetch_items(&self, _i: i64, _c: u32) -> Result<Vec<FeedPost>, FeedError> {
        Ok(vec![])
    }
    async fn video_info(&self, o: i64, v: i64) -> Result<VideoInfo, FeedError> {
        Err(FeedError::NotFound(format!("{o}_{v}")))
    }
}

/// Fails configured tiers; records every attempt in order.
#[derive(Default)]
struct FlakyTransport {
    fail_media_group: bool,
    fail_photo: bool,
    attempts: Mutex<Vec<&'static str>>,
}

fn rejected(what: &str) -> TransportError {
    TransportError::Api {
        code: 400,
        description: format!("{what} rejected"),
    }
}

#[async_trait]
impl ChannelTransport for FlakyTransport {
    async fn send_text(&self, _c: &str, _t: &str) -> Result<MessageHandle, TransportError> {
        self.attempts.lock().unwrap().push("text");
        Ok(MessageHandle { message_id: 30 })
    }
    async fn send_photo(
        &self,
        _c: &str,
        _u: &str,
        _cap: &str,
    ) -> Result<MessageHandle, TransportError> {
        self.attempts.lock().unwrap().push("photo");
        if self.fail_photo {
            return Err(rejected("photo"));
        }
        Ok(MessageHandle { message_id: 20 })
    }
    async fn send_media_group(
        &self,
        _c: &str,
        _u: &[String],
        _cap: &str,
    ) -> Result<MessageHandle, TransportError> {
        self.attempts.lock().unwrap().push("media_group");
        if self.fail_media_group {
            return Err(rejected("media group"));
        }
        Ok(MessageHandle { message_id: 10 })
    }
    async fn send_video(
        &self,
        _c: &str,
        _v: VideoPayload,
        _cap: &str,
    ) -> Result<MessageHandle, TransportError> {
        self.attempts.lock().unwrap().push("video");
        Ok(MessageHandle { message_id: 40 })
    }
    async fn resolve_channel_info(&self, _i: &str) -> Result<ChannelInfo, TransportError> {
        Ok(ChannelInfo {
            id: 0,
            title: String::new(),
            handle: None,
        })
    }
}

fn two_photo_post() -> Post {
    let now = Utc::now();
    Post {
        id: "s1:1".into(),
        source_id: "s1".into(),
        external_post_id: 1,
        text: "gallery".into(),
        view_count: 1_000,
        like_count: 10,
        repost_count: 2,
        attachments: vec![
            Attachment::Photo { url: "a.jpg".into() },
            Attachment::Photo { url: "b.jpg".into() },
        ],
        is_viral: true,
        was_high_dynamics: false,
        high_dynamics_sent_at: None,
        status: PostStatus::Pending,
        deliveries: vec![],
        created_at: now,
        updated_at: now,
    }
}

async fn seeded_store(post: Post) -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    store
        .put_source(Source {
            id: "s1".into(),
            name: "wall".into(),
            external_id: -1,
            threshold_type: ThresholdType::Manual,
            threshold_method: ThresholdMethod::Average,
            statistical_multiplier: None,
            manual_threshold: Some(500),
            calculated_threshold: None,
            check_frequency_minutes: 15,
            posts_to_check: 50,
            active: true,
            last_checked_at: None,
            tracking_enabled: false,
            high_dynamics: HighDynamicsConfig::default(),
        })
        .await
        .unwrap();
    store
        .put_channel(Channel {
            id: "c1".into(),
            transport_id: "@relay".into(),
            title: "Relay".into(),
            active: true,
            forwarded_count: 0,
        })
        .await
        .unwrap();
    store
        .put_mapping(Mapping {
            id: "m1".into(),
            subject: MappingSubject::Source("s1".into()),
            channel_id: "c1".into(),
            active: true,
        })
        .await
        .unwrap();
    store.insert_post(post).await.unwrap();
    store
}

async fn run_fanout(transport: FlakyTransport) -> (Arc<dyn Store>, Arc<FlakyTransport>) {
    let post = two_photo_post();
    let store = seeded_store(post.clone()).await;
    let transport = Arc::new(transport);
    let transport_dyn: Arc<dyn ChannelTransport> = transport.clone();
    let engine = DeliveryEngine::new(Arc::clone(&store), Arc::new(NoVideoFeed), transport_dyn);

    let report = engine.fanout(&post, DeliveryKind::Viral).await.unwrap();
    assert_eq!(report.channels, 1);
    (store, transport)
}

#[tokio::test]
async fn media_group_success_sends_nothing_else() {
    let (store, transport) = run_fanout(FlakyTransport::default()).await;
    assert_eq!(*transport.attempts.lock().unwrap(), vec!["media_group"]);

    let post = store.get_post(&"s1:1".to_string()).await.unwrap();
    assert_eq!(post.deliveries.len(), 1);
    assert_eq!(post.deliveries[0].message_id, 10);
}

#[tokio::test]
async fn double_failure_lands_on_text_tier() {
    let (store, transport) = run_fanout(FlakyTransport {
        fail_media_group: true,
        fail_photo: true,
        ..Default::default()
    })
    .await;

    assert_eq!(
        *transport.attempts.lock().unwrap(),
        vec!["media_group", "photo", "text"]
    );

    // Exactly one recorded delivery, from the tier that succeeded.
    let post = store.get_post(&"s1:1".to_string()).await.unwrap();
    assert_eq!(post.deliveries.len(), 1);
    assert_eq!(post.deliveries[0].message_id, 30);
    assert_eq!(post.status, PostStatus::Forwarded);

    let channel = store.get_channel(&"c1".to_string()).await.unwrap();
    assert_eq!(channel.forwarded_count, 1);
}

#[tokio::test]
async fn middle_tier_success_stops_the_chain() {
    let (store, transport) = run_fanout(FlakyTransport {
        fail_media_group: true,
        ..Default::default()
    })
    .await;

    assert_eq!(
        *transport.attempts.lock().unwrap(),
        vec!["media_group", "photo"]
    );
    let post = store.get_post(&"s1:1".to_string()).await.unwrap();
    assert_eq!(post.deliveries[0].message_id, 20);
}

#[tokio::test]
async fn forwarded_status_is_terminal_after_fanout() {
    let (store, _transport) = run_fanout(FlakyTransport::default()).await;
    let mut post = store.get_post(&"s1:1".to_string()).await.unwrap();
    assert_eq!(post.status, PostStatus::Forwarded);
    assert!(post.set_status(PostStatus::Pending).is_err());
    assert!(post.set_status(PostStatus::Approved).is_err());
    assert!(post.set_status(PostStatus::Rejected).is_err());
}
