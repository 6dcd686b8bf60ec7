//! # Pending-Approval Sweep
//! Fixed-rate task that picks up posts an admin has approved and fans them
//! out. Posts that already carry a delivery record are left alone; partial
//! fanout failures are not rolled back.

use std::sync::Arc;

use crate::model::PostStatus;
use crate::notify::{DeliveryEngine, DeliveryKind};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalReport {
    pub picked_up: usize,
    pub forwarded: usize,
    pub errors: usize,
}

pub struct ApprovalSweep {
    store: Arc<dyn Store>,
    delivery: Arc<DeliveryEngine>,
}

impl ApprovalSweep {
    pub fn new(store: Arc<dyn Store>, delivery: Arc<DeliveryEngine>) -> Self {
        Self { store, delivery }
    }

    pub async fn run_once(&self) -> anyhow::Result<ApprovalReport> {
        let mut report = ApprovalReport::default();

        let approved = self.store.posts_with_status(PostStatus::Approved).await?;
        for post in approved.into_iter().filter(|p| p.deliveries.is_empty()) {
            report.picked_up += 1;
            match self.delivery.fanout(&post, DeliveryKind::Viral).await {
                Ok(f) if f.delivered > 0 => report.forwarded += 1,
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(post = %post.id, error = %e, "approval fanout failed");
                }
            }
        }

        if report.picked_up > 0 {
            tracing::info!(
                picked_up = report.picked_up,
                forwarded = report.forwarded,
                "approval sweep finished"
            );
        }
        Ok(report)
    }
}
