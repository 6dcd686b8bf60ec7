//! # High-Dynamics Sweep
//! Early detection for posts that grow fast before crossing the viral
//! threshold. Each eligible post is evaluated at most once, ever: the
//! `was_high_dynamics` flag is set after the first evaluation that fires,
//! and a later, faster spike on the same post is never re-examined.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;

use crate::model::Source;
use crate::notify::{DeliveryEngine, DeliveryKind};
use crate::store::Store;

/// Eligibility window: only posts created within the last 24 h are scanned.
const SCAN_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DynamicsReport {
    pub scanned: usize,
    pub triggered: usize,
    pub errors: usize,
}

pub struct DynamicsSweep {
    store: Arc<dyn Store>,
    delivery: Arc<DeliveryEngine>,
}

impl DynamicsSweep {
    pub fn new(store: Arc<dyn Store>, delivery: Arc<DeliveryEngine>) -> Self {
        Self { store, delivery }
    }

    /// Scan every active source with tracking and detection enabled.
    pub async fn run_once(&self) -> anyhow::Result<DynamicsReport> {
        let mut report = DynamicsReport::default();
        let sources = self.store.list_sources().await?;

        for source in sources
            .iter()
            .filter(|s| s.active && s.tracking_enabled && s.high_dynamics.enabled)
        {
            match self.sweep_source(source).await {
                Ok(r) => {
                    report.scanned += r.scanned;
                    report.triggered += r.triggered;
                    report.errors += r.errors;
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(source = %source.name, error = %e, "high-dynamics sweep failed");
                }
            }
        }

        if report.triggered > 0 {
            tracing::info!(
                scanned = report.scanned,
                triggered = report.triggered,
                "high-dynamics sweep fired"
            );
        }
        Ok(report)
    }

    async fn sweep_source(&self, source: &Source) -> anyhow::Result<DynamicsReport> {
        let mut report = DynamicsReport::default();
        let since = Utc::now() - Duration::hours(SCAN_WINDOW_HOURS);
        let cfg = source.high_dynamics;

        let candidates = self.store.posts_created_since(&source.id, since).await?;
        for post in candidates
            .into_iter()
            .filter(|p| !p.is_viral && !p.was_high_dynamics)
        {
            report.scanned += 1;

            let entries = self
                .store
                .recent_view_entries(&post.id, cfg.min_data_points)
                .await?;
            if entries.is_empty() || entries.len() < cfg.min_data_points {
                // Not yet eligible; the flag stays unset so a later sweep
                // re-examines once enough samples exist.
                continue;
            }

            let avg_rate =
                entries.iter().map(|e| e.growth_rate).sum::<f64>() / entries.len() as f64;
            if avg_rate < cfg.growth_rate_threshold {
                continue;
            }

            let window_minutes = (entries[entries.len() - 1].at - entries[0].at)
                .num_milliseconds() as f64
                / 60_000.0;

            let kind = DeliveryKind::HighDynamics {
                growth_rate: avg_rate,
                window_minutes,
            };
            match self.delivery.fanout(&post, kind).await {
                Ok(_) => {
                    // Evaluated and delivered; never looked at again, even if
                    // some channels failed in this pass.
                    let mut updated = self.store.get_post(&post.id).await?;
                    updated.was_high_dynamics = true;
                    updated.high_dynamics_sent_at = Some(Utc::now());
                    updated.updated_at = Utc::now();
                    self.store.update_post(updated).await?;

                    report.triggered += 1;
                    counter!("dynamics_triggered_total").increment(1);
                    tracing::info!(
                        post = %post.id,
                        rate = avg_rate,
                        threshold = cfg.growth_rate_threshold,
                        "high-dynamics post forwarded"
                    );
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(post = %post.id, error = %e, "high-dynamics fanout failed");
                }
            }
        }
        Ok(report)
    }
}
