//! # Ingestion Pipeline
//! The per-source sweep: resolve the effective virality threshold, fetch the
//! most recent wall posts, drop stop-worded ones, upsert the rest strictly in
//! feed order, fan out posts that just crossed the threshold, and sample view
//! history for the high-dynamics detector.

pub mod scheduler;

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::feed::{FeedError, FeedSource};
use crate::model::{
    Post, PostStatus, Source, SourceId, ThresholdMethod, ThresholdType, ValidationError,
    ViewHistoryEntry,
};
use crate::notify::{DeliveryEngine, DeliveryKind};
use crate::stats::{self, ThresholdStats};
use crate::stopwords::StopWordSet;
use crate::store::{Store, StoreError};

/// View-history samples older than this are dropped on every append, across
/// all posts.
pub const VIEW_HISTORY_RETENTION_DAYS: i64 = 4;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of one per-source sweep. Skips (duplicate-key races) are tallied
/// separately from errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub fetched: usize,
    pub filtered: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub forwarded: usize,
    pub errors: usize,
}

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sweep_runs_total", "Per-source sweeps executed.");
        describe_counter!("sweep_items_fetched_total", "Feed items fetched by sweeps.");
        describe_counter!(
            "sweep_items_filtered_total",
            "Items dropped by the stop-word filter."
        );
        describe_counter!(
            "sweep_items_skipped_total",
            "Duplicate-key upserts counted as skips."
        );
        describe_counter!("sweep_item_errors_total", "Per-item failures inside sweeps.");
        describe_counter!("sweep_forwarded_total", "Posts fanned out by sweeps.");
        describe_gauge!("sweep_last_run_ts", "Unix ts when any sweep last ran.");
    });
}

/// Normalize post text before stop-word matching and persistence: entity
/// decode, tag strip, whitespace collapse, length cap.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    // Horizontal whitespace only; newlines carry formatting in wall posts.
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[ \t\r\f\x{A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    if out.chars().count() > 4096 {
        out = out.chars().take(4096).collect();
    }
    out
}

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    feed: Arc<dyn FeedSource>,
    delivery: Arc<DeliveryEngine>,
    global_stop_words: Vec<String>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn FeedSource>,
        delivery: Arc<DeliveryEngine>,
        global_stop_words: Vec<String>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            feed,
            delivery,
            global_stop_words,
        }
    }

    /// Run one sweep for a source. Per-item failures are counted and never
    /// abort the sweep; an upstream auth failure aborts and surfaces.
    pub async fn sweep_source(&self, source_id: &SourceId) -> Result<SweepReport, SweepError> {
        let source = self.store.get_source(source_id).await?;
        let threshold = self.effective_threshold(&source).await?;

        let items = self
            .feed
            .fetch_items(source.external_id, source.posts_to_check)
            .await?;

        let groups = self.store.list_groups().await.map_err(SweepError::Other)?;
        let stop_words = StopWordSet::for_source(&self.global_stop_words, &groups, source_id);

        let mut report = SweepReport {
            fetched: items.len(),
            ..Default::default()
        };

        // Feed order (most-recent-first), strictly sequential: each item's
        // persistence and history append completes before the next starts.
        for item in items {
            let text = normalize_text(&item.text);
            if stop_words.matches(&text) {
                report.filtered += 1;
                continue;
            }

            let is_now_viral = item.view_count > threshold;
            let now = Utc::now();

            let existing = self
                .store
                .find_post(source_id, item.external_id)
                .await
                .map_err(SweepError::Other)?;
            let was_viral = existing.as_ref().map(|p| p.is_viral).unwrap_or(false);
            let became_viral = is_now_viral && !was_viral;

            let post = match existing {
                Some(mut post) => {
                    post.text = text;
                    post.view_count = item.view_count;
                    post.like_count = item.like_count;
                    post.repost_count = item.repost_count;
                    post.is_viral = is_now_viral;
                    post.attachments = item.attachments.clone();
                    post.updated_at = now;
                    match self.store.update_post(post.clone()).await {
                        Ok(()) => {
                            report.updated += 1;
                            post
                        }
                        Err(e) => {
                            report.errors += 1;
                            counter!("sweep_item_errors_total").increment(1);
                            tracing::warn!(source = %source.name, item = item.external_id, error = %e, "post update failed");
                            continue;
                        }
                    }
                }
                None => {
                    let post = Post {
                        id: format!("{source_id}:{}", item.external_id),
                        source_id: source_id.clone(),
                        external_post_id: item.external_id,
                        text,
                        view_count: item.view_count,
                        like_count: item.like_count,
                        repost_count: item.repost_count,
                        attachments: item.attachments.clone(),
                        is_viral: is_now_viral,
                        was_high_dynamics: false,
                        high_dynamics_sent_at: None,
                        status: PostStatus::Pending,
                        deliveries: vec![],
                        created_at: now,
                        updated_at: now,
                    };
                    match self.store.insert_post(post.clone()).await {
                        Ok(()) => {
                            report.created += 1;
                            post
                        }
                        Err(StoreError::Conflict(_)) => {
                            // A concurrent sweep got there first.
                            report.skipped += 1;
                            counter!("sweep_items_skipped_total").increment(1);
                            continue;
                        }
                        Err(e) => {
                            report.errors += 1;
                            counter!("sweep_item_errors_total").increment(1);
                            tracing::warn!(source = %source.name, item = item.external_id, error = %e, "post insert failed");
                            continue;
                        }
                    }
                }
            };

            // Fan out on the not-viral → viral edge, and re-attempt viral
            // posts whose earlier fanout never landed anywhere: a post only
            // leaves `Pending` once one channel delivery succeeds.
            let wants_fanout =
                became_viral || (post.is_viral && post.deliveries.is_empty());
            if wants_fanout && post.status == PostStatus::Pending {
                match self.delivery.fanout(&post, DeliveryKind::Viral).await {
                    Ok(f) if f.delivered > 0 => {
                        report.forwarded += 1;
                        counter!("sweep_forwarded_total").increment(1);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        report.errors += 1;
                        counter!("sweep_item_errors_total").increment(1);
                        tracing::warn!(post = %post.id, error = %e, "fanout failed");
                    }
                }
            }

            if source.tracking_enabled {
                if let Err(e) = self.record_view_sample(&post).await {
                    report.errors += 1;
                    counter!("sweep_item_errors_total").increment(1);
                    tracing::warn!(post = %post.id, error = %e, "view history append failed");
                }
            }
        }

        self.store.touch_source(source_id, Utc::now()).await?;

        counter!("sweep_runs_total").increment(1);
        counter!("sweep_items_fetched_total").increment(report.fetched as u64);
        counter!("sweep_items_filtered_total").increment(report.filtered as u64);
        gauge!("sweep_last_run_ts").set(Utc::now().timestamp() as f64);

        tracing::info!(
            source = %source.name,
            fetched = report.fetched,
            filtered = report.filtered,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            forwarded = report.forwarded,
            errors = report.errors,
            "sweep finished"
        );
        Ok(report)
    }

    /// `manual_threshold` when pinned; otherwise the calculated one,
    /// recomputed synchronously against a fresh sample when unset or zero.
    async fn effective_threshold(&self, source: &Source) -> Result<u64, SweepError> {
        match source.threshold_type {
            ThresholdType::Manual => Ok(source.manual_threshold.unwrap_or(0)),
            ThresholdType::Auto => match source.calculated_threshold {
                Some(t) if t > 0 => Ok(t),
                _ => {
                    let stats = self
                        .sample_stats(
                            source,
                            source.threshold_method,
                            stats::SAMPLE_SIZE_DEFAULT,
                            source.statistical_multiplier,
                        )
                        .await?;
                    self.store
                        .set_calculated_threshold(&source.id, stats.threshold)
                        .await?;
                    tracing::info!(
                        source = %source.name,
                        threshold = stats.threshold,
                        "auto threshold recomputed"
                    );
                    Ok(stats.threshold)
                }
            },
        }
    }

    async fn sample_stats(
        &self,
        source: &Source,
        method: ThresholdMethod,
        sample_size: u32,
        multiplier: Option<f64>,
    ) -> Result<ThresholdStats, SweepError> {
        let sample_size = stats::clamp_sample_size(sample_size);
        let items = self.feed.fetch_items(source.external_id, sample_size).await?;
        let views: Vec<u64> = items.iter().map(|i| i.view_count).collect();
        Ok(stats::compute(&views, method, multiplier))
    }

    /// Admin operation: recompute and persist the threshold with explicit
    /// parameters, switching the source's method. A multiplier of `None`
    /// leaves the stored multiplier untouched, so it survives method
    /// switches even while unused.
    pub async fn recalculate_threshold(
        &self,
        source_id: &SourceId,
        method: ThresholdMethod,
        sample_size: u32,
        multiplier: Option<f64>,
    ) -> Result<ThresholdStats, SweepError> {
        let mut source = self.store.get_source(source_id).await?;
        if let Some(m) = multiplier {
            source.statistical_multiplier = Some(m);
        }
        source.threshold_method = method;
        source.validate()?;

        let stats = self
            .sample_stats(&source, method, sample_size, source.statistical_multiplier)
            .await?;
        source.calculated_threshold = Some(stats.threshold);
        self.store
            .put_source(source)
            .await
            .map_err(SweepError::Other)?;
        Ok(stats)
    }

    /// Admin operation: fresh distribution stats without persisting anything.
    pub async fn threshold_stats(
        &self,
        source_id: &SourceId,
    ) -> Result<ThresholdStats, SweepError> {
        let source = self.store.get_source(source_id).await?;
        self.sample_stats(
            &source,
            source.threshold_method,
            stats::SAMPLE_SIZE_DEFAULT,
            source.statistical_multiplier,
        )
        .await
    }

    /// Append one view-count sample and prune the global retention window.
    /// Growth rate is views per minute since the previous sample; zero for
    /// the first sample or a non-positive time delta.
    async fn record_view_sample(&self, post: &Post) -> anyhow::Result<()> {
        let now = Utc::now();
        let last = self.store.last_view_entry(&post.id).await?;

        let entry = match last {
            Some(prev) => {
                let view_delta = post.view_count as i64 - prev.view_count as i64;
                let time_delta_minutes = (now - prev.at).num_milliseconds() as f64 / 60_000.0;
                let growth_rate = if time_delta_minutes > 0.0 {
                    view_delta as f64 / time_delta_minutes
                } else {
                    0.0
                };
                ViewHistoryEntry {
                    post_id: post.id.clone(),
                    view_count: post.view_count,
                    at: now,
                    view_delta,
                    time_delta_minutes,
                    growth_rate,
                }
            }
            None => ViewHistoryEntry {
                post_id: post.id.clone(),
                view_count: post.view_count,
                at: now,
                view_delta: 0,
                time_delta_minutes: 0.0,
                growth_rate: 0.0,
            },
        };
        self.store.append_view_history(entry).await?;
        self.store
            .prune_view_history_before(now - Duration::days(VIEW_HISTORY_RETENTION_DAYS))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_tags_and_entities() {
        let s = "<b>Hello&nbsp;&nbsp; world</b><br/>line";
        assert_eq!(normalize_text(s), "Hello world line");
    }

    #[test]
    fn normalize_caps_length() {
        let s = "y".repeat(10_000);
        assert_eq!(normalize_text(&s).chars().count(), 4096);
    }

    #[test]
    fn normalize_keeps_newlines() {
        assert_eq!(normalize_text("a\nb"), "a\nb");
    }
}
