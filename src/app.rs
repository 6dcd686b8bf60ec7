//! # Application Wiring
//! Builds the component graph once at startup from injected interfaces (feed,
//! transport, store) and exposes the operations the external admin surface
//! calls into: trigger a sweep, recalculate/inspect thresholds, reconcile
//! schedules. Explicit start/shutdown instead of lazy globals.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::approval::ApprovalSweep;
use crate::dynamics::DynamicsSweep;
use crate::feed::FeedSource;
use crate::ingest::scheduler::{ReconcilePlan, Scheduler};
use crate::ingest::{IngestPipeline, SweepError, SweepReport};
use crate::model::{SourceId, ThresholdMethod};
use crate::notify::{ChannelTransport, DeliveryEngine};
use crate::stats::ThresholdStats;
use crate::store::Store;

pub struct App {
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<IngestPipeline>,
    pub scheduler: Arc<Scheduler>,
    system_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn FeedSource>,
        transport: Arc<dyn ChannelTransport>,
        global_stop_words: Vec<String>,
    ) -> Arc<Self> {
        let delivery = Arc::new(DeliveryEngine::new(
            Arc::clone(&store),
            Arc::clone(&feed),
            transport,
        ));
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&feed),
            Arc::clone(&delivery),
            global_stop_words,
        ));
        let dynamics = Arc::new(DynamicsSweep::new(Arc::clone(&store), Arc::clone(&delivery)));
        let approval = Arc::new(ApprovalSweep::new(Arc::clone(&store), Arc::clone(&delivery)));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&pipeline),
            dynamics,
            approval,
        ));

        Arc::new(Self {
            store,
            pipeline,
            scheduler,
            system_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the fixed-rate system tasks. Idempotent only in the sense that
    /// callers are expected to invoke it once at startup.
    pub fn start(&self) {
        let handles = Arc::clone(&self.scheduler).spawn_system_tasks();
        self.system_tasks
            .lock()
            .expect("system task mutex poisoned")
            .extend(handles);
        tracing::info!("scheduler system tasks started");
    }

    /// Abort tickers. Sweeps already in flight complete on their own tasks.
    pub fn shutdown(&self) {
        for h in self
            .system_tasks
            .lock()
            .expect("system task mutex poisoned")
            .drain(..)
        {
            h.abort();
        }
        self.scheduler.registry().shutdown();
        tracing::info!("scheduler stopped");
    }

    /// On-demand sweep, same code path as the scheduled one. No mutual
    /// exclusion against a concurrently running scheduled sweep.
    pub async fn trigger_sweep(&self, source_id: &SourceId) -> Result<SweepReport, SweepError> {
        self.pipeline.sweep_source(source_id).await
    }

    pub async fn recalculate_threshold(
        &self,
        source_id: &SourceId,
        method: ThresholdMethod,
        sample_size: u32,
        multiplier: Option<f64>,
    ) -> Result<ThresholdStats, SweepError> {
        self.pipeline
            .recalculate_threshold(source_id, method, sample_size, multiplier)
            .await
    }

    pub async fn threshold_stats(&self, source_id: &SourceId) -> Result<ThresholdStats, SweepError> {
        self.pipeline.threshold_stats(source_id).await
    }

    pub async fn reconcile(&self) -> anyhow::Result<ReconcilePlan> {
        self.scheduler.reconcile().await
    }
}
