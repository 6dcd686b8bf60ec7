// tests/approval_sweep.rs
//
// The pending-approval sweep forwards approved, undelivered posts and leaves
// everything else alone.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use viral_feed_relay::approval::ApprovalSweep;
use viral_feed_relay::feed::{FeedError, FeedPost, FeedSource, VideoInfo};
use viral_feed_relay::model::{
    Channel, DeliveryRecord, HighDynamicsConfig, Mapping, MappingSubject, Post, PostStatus,
    Source, ThresholdMethod, ThresholdType,
};
use viral_feed_relay::notify::{
    ChannelInfo, ChannelTransport, DeliveryEngine, MessageHandle, TransportError, VideoPayload,
};
use viral_feed_relay::store::{MemStore, Store};

struct EmptyFeed;

#[async_trait]
impl FeedSource for EmptyFeed {
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

#[derive(Default)]
struct CountingTransport {
    sends: Mutex<usize>,
}

#[async_trait]
impl ChannelTransport for CountingTransport {
    async fn send_text(&self, _c: &str, _t: &str) -> Result<MessageHandle, TransportError> {
        *self.sends.lock().unwrap() += 1;
        Ok(MessageHandle { message_id: 1 })
    }
    async fn send_photo(
        &self,
        _c: &str,
        _u: &str,
        _cap: &str,
    ) -> Result<MessageHandle, TransportError> {
        *self.sends.lock().unwrap() += 1;
        Ok(MessageHandle { message_id: 2 })
    }
    async fn send_media_group(
        &self,
        _c: &str,
        _u: &[String],
        _cap: &str,
    ) -> Result<MessageHandle, TransportError> {
        *self.sends.lock().unwrap() += 1;
        Ok(MessageHandle { message_id: 3 })
    }
    async fn send_video(
        &self,
        _c: &str,
        _v: VideoPayload,
        _cap: &str,
    ) -> Result<MessageHandle, TransportError> {
        *self.sends.lock().unwrap() += 1;
        Ok(MessageHandle { message_id: 4 })
    }
    async fn resolve_channel_info(&self, _i: &str) -> Result<ChannelInfo, TransportError> {
        Ok(ChannelInfo {
            id: 0,
            title: String::new(),
            handle: None,
        })
    }
}

fn post(id: &str, ext: i64, status: PostStatus) -> Post {
    let now = Utc::now();
    Post {
        id: id.into(),
        source_id: "s1".into(),
        external_post_id: ext,
        text: "held for review".into(),
        view_count: 50,
        like_count: 0,
        repost_count: 0,
        attachments: vec![],
        is_viral: false,
        was_high_dynamics: false,
        high_dynamics_sent_at: None,
        status,
        deliveries: vec![],
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn only_approved_undelivered_posts_are_forwarded() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let transport = Arc::new(CountingTransport::default());
    let transport_dyn: Arc<dyn ChannelTransport> = transport.clone();
    let delivery = Arc::new(DeliveryEngine::new(
        Arc::clone(&store),
        Arc::new(EmptyFeed),
        transport_dyn,
    ));
    let sweep = ApprovalSweep::new(Arc::clone(&store), delivery);

    store
        .put_source(Source {
            id: "s1".into(),
            name: "wall".into(),
            external_id: -1,
            threshold_type: ThresholdType::Manual,
            threshold_method: ThresholdMethod::Average,
            statistical_multiplier: None,
            manual_threshold: Some(100),
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

    store
        .insert_post(post("s1:1", 1, PostStatus::Approved))
        .await
        .unwrap();
    store
        .insert_post(post("s1:2", 2, PostStatus::Rejected))
        .await
        .unwrap();
    store
        .insert_post(post("s1:3", 3, PostStatus::Pending))
        .await
        .unwrap();
    // Approved but already delivered once: must not be re-sent.
    let mut delivered = post("s1:4", 4, PostStatus::Approved);
    delivered.deliveries.push(DeliveryRecord {
        channel_id: "c1".into(),
        message_id: 99,
        at: Utc::now(),
    });
    store.insert_post(delivered).await.unwrap();

    let report = sweep.run_once().await.unwrap();
    assert_eq!(report.picked_up, 1);
    assert_eq!(report.forwarded, 1);
    assert_eq!(*transport.sends.lock().unwrap(), 1);

    let forwarded = store.get_post(&"s1:1".to_string()).await.unwrap();
    assert_eq!(forwarded.status, PostStatus::Forwarded);

    // A second pass finds nothing left to do.
    let again = sweep.run_once().await.unwrap();
    assert_eq!(again.picked_up, 0);
    assert_eq!(*transport.sends.lock().unwrap(), 1);

    for id in ["s1:2", "s1:3"] {
        let untouched = store.get_post(&id.to_string()).await.unwrap();
        assert!(untouched.deliveries.is_empty());
    }
}
