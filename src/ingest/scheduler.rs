//! # Scheduler
//! One recurring job per active source plus three fixed-rate system tasks
//! (reconciliation, pending-approval sweep, high-dynamics sweep). The job
//! registry is an explicit struct owning a map from source id to job handle;
//! reconciliation is a pure diff over (desired set, current set).
//!
//! Removal aborts only the ticker task. Each tick runs its sweep in a
//! detached child task, so a sweep that is mid-flight when its source is
//! deactivated always completes; deactivation merely stops future ticks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::approval::ApprovalSweep;
use crate::dynamics::DynamicsSweep;
use crate::ingest::IngestPipeline;
use crate::model::SourceId;
use crate::store::Store;

pub const RECONCILE_INTERVAL_SECS: u64 = 5 * 60;
pub const APPROVAL_INTERVAL_SECS: u64 = 10 * 60;
pub const DYNAMICS_INTERVAL_SECS: u64 = 5 * 60;

/// Polling interval for a source. A frequency of 0 falls back to hourly.
pub fn job_interval_minutes(check_frequency_minutes: u32) -> u32 {
    if check_frequency_minutes == 0 {
        60
    } else {
        check_frequency_minutes
    }
}

struct Job {
    interval_minutes: u32,
    handle: JoinHandle<()>,
}

/// Concurrency-safe map source-id → job handle.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<SourceId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, aborting any previous ticker for the same source.
    pub fn upsert(&self, source_id: SourceId, interval_minutes: u32, handle: JoinHandle<()>) {
        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        if let Some(old) = jobs.insert(
            source_id,
            Job {
                interval_minutes,
                handle,
            },
        ) {
            old.handle.abort();
        }
    }

    /// Abort and drop a source's ticker. A sweep already in flight keeps
    /// running to completion in its own task.
    pub fn remove(&self, source_id: &SourceId) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        match jobs.remove(source_id) {
            Some(job) => {
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn interval_of(&self, source_id: &SourceId) -> Option<u32> {
        self.jobs
            .lock()
            .expect("job registry mutex poisoned")
            .get(source_id)
            .map(|j| j.interval_minutes)
    }

    /// Ordered (source id → interval) view, for diffing and assertions.
    pub fn snapshot(&self) -> BTreeMap<SourceId, u32> {
        self.jobs
            .lock()
            .expect("job registry mutex poisoned")
            .iter()
            .map(|(id, j)| (id.clone(), j.interval_minutes))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }
}

/// What a reconciliation pass decided to do. Computed purely from the two
/// maps; applying it is a separate step.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcilePlan {
    pub add: Vec<(SourceId, u32)>,
    pub reschedule: Vec<(SourceId, u32)>,
    pub remove: Vec<SourceId>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.reschedule.is_empty() && self.remove.is_empty()
    }
}

/// Pure diff: desired vs. currently registered jobs.
pub fn diff_jobs(
    desired: &BTreeMap<SourceId, u32>,
    current: &BTreeMap<SourceId, u32>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    for (id, &interval) in desired {
        match current.get(id) {
            None => plan.add.push((id.clone(), interval)),
            Some(&have) if have != interval => plan.reschedule.push((id.clone(), interval)),
            Some(_) => {}
        }
    }
    for id in current.keys() {
        if !desired.contains_key(id) {
            plan.remove.push(id.clone());
        }
    }
    plan
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    pipeline: Arc<IngestPipeline>,
    dynamics: Arc<DynamicsSweep>,
    approval: Arc<ApprovalSweep>,
    registry: Arc<JobRegistry>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<IngestPipeline>,
        dynamics: Arc<DynamicsSweep>,
        approval: Arc<ApprovalSweep>,
    ) -> Self {
        Self {
            store,
            pipeline,
            dynamics,
            approval,
            registry: Arc::new(JobRegistry::new()),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Bring the job registry in line with the active source set. Reconciling
    /// an unchanged set is a no-op and leaves the registry identical.
    pub async fn reconcile(&self) -> anyhow::Result<ReconcilePlan> {
        let sources = self.store.list_sources().await?;
        let desired: BTreeMap<SourceId, u32> = sources
            .iter()
            .filter(|s| s.active)
            .map(|s| (s.id.clone(), job_interval_minutes(s.check_frequency_minutes)))
            .collect();

        let plan = diff_jobs(&desired, &self.registry.snapshot());

        for id in &plan.remove {
            self.registry.remove(id);
            tracing::info!(source = %id, "source job removed");
        }
        for (id, interval) in plan.add.iter().chain(plan.reschedule.iter()) {
            let handle = self.spawn_source_job(id.clone(), *interval);
            self.registry.upsert(id.clone(), *interval, handle);
            tracing::info!(source = %id, interval_min = interval, "source job scheduled");
        }

        counter!("reconcile_runs_total").increment(1);
        gauge!("scheduled_jobs").set(self.registry.len() as f64);
        Ok(plan)
    }

    fn spawn_source_job(&self, source_id: SourceId, interval_minutes: u32) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(u64::from(interval_minutes) * 60));
            loop {
                ticker.tick().await;
                let pipeline = Arc::clone(&pipeline);
                let id = source_id.clone();
                // Detached: aborting this ticker never cancels a running sweep.
                let sweep = tokio::spawn(async move {
                    if let Err(e) = pipeline.sweep_source(&id).await {
                        tracing::warn!(source = %id, error = %e, "scheduled sweep failed");
                    }
                });
                let _ = sweep.await;
            }
        })
    }

    /// Spawn the three fixed-rate system tasks. The returned handles live for
    /// the process lifetime; callers usually just detach them.
    pub fn spawn_system_tasks(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);

        let me = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(RECONCILE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                if let Err(e) = me.reconcile().await {
                    tracing::warn!(error = %e, "reconciliation failed");
                }
            }
        }));

        let approval = Arc::clone(&self.approval);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(APPROVAL_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                if let Err(e) = approval.run_once().await {
                    tracing::warn!(error = %e, "approval sweep failed");
                }
            }
        }));

        let dynamics = Arc::clone(&self.dynamics);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(DYNAMICS_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                if let Err(e) = dynamics.run_once().await {
                    tracing::warn!(error = %e, "high-dynamics sweep failed");
                }
            }
        }));

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_frequency_falls_back_to_hourly() {
        assert_eq!(job_interval_minutes(0), 60);
        assert_eq!(job_interval_minutes(45), 45);
        assert_eq!(job_interval_minutes(180), 180);
        assert_eq!(job_interval_minutes(60), 60);
    }

    #[test]
    fn diff_detects_add_reschedule_remove() {
        let desired: BTreeMap<SourceId, u32> =
            [("a".into(), 45), ("b".into(), 60), ("c".into(), 15)].into();
        let current: BTreeMap<SourceId, u32> =
            [("b".into(), 30), ("c".into(), 15), ("d".into(), 5)].into();

        let plan = diff_jobs(&desired, &current);
        assert_eq!(plan.add, vec![("a".to_string(), 45)]);
        assert_eq!(plan.reschedule, vec![("b".to_string(), 60)]);
        assert_eq!(plan.remove, vec!["d".to_string()]);
    }

    #[test]
    fn diff_of_identical_sets_is_noop() {
        let set: BTreeMap<SourceId, u32> = [("a".into(), 45), ("b".into(), 60)].into();
        assert!(diff_jobs(&set, &set.clone()).is_noop());
    }
}
