//! Per-subscription cron jobs.
//!
//! Every enabled subscription owns exactly one job. A tick sleeps a random
//! jitter, re-checks that its job is still the registered one, then runs the
//! ingestion worker. A failed tick disables the subscription according to the
//! configured [`FailurePolicy`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use feedloom_core::resolve_cron_label;
use feedloom_storage::{PersistenceError, Storage};
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::FailurePolicy;
use crate::ingest::SubscriptionRunner;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("subscription {0} is already scheduled")]
    AlreadyScheduled(Uuid),
    #[error("subscription {0} is not scheduled")]
    NotScheduled(Uuid),
    #[error("unknown cron label {label:?} for subscription {subscription_id}")]
    UnknownCronLabel { subscription_id: Uuid, label: String },
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("scheduler error: {0}")]
    Scheduler(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub max_jitter: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_jitter: Duration::from_secs(5),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Read-only view of one registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub subscription_id: Uuid,
    pub job_id: Uuid,
    pub cron: &'static str,
    pub running: bool,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub scheduled: usize,
    pub skipped: usize,
}

struct JobHandle {
    job_id: Uuid,
    cron: &'static str,
    running: Arc<Mutex<()>>,
    consecutive_failures: u32,
}

pub struct ScheduleRegistry {
    scheduler: JobScheduler,
    jobs: Mutex<HashMap<Uuid, JobHandle>>,
    runner: Arc<dyn SubscriptionRunner>,
    storage: Arc<dyn Storage>,
    config: ScheduleConfig,
    this: Weak<ScheduleRegistry>,
    #[cfg(test)]
    reject_removals: std::sync::atomic::AtomicBool,
}

impl ScheduleRegistry {
    pub async fn new(
        runner: Arc<dyn SubscriptionRunner>,
        storage: Arc<dyn Storage>,
        config: ScheduleConfig,
    ) -> Result<Arc<Self>, ScheduleError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|err| ScheduleError::Scheduler(err.to_string()))?;
        Ok(Arc::new_cyclic(|this| Self {
            scheduler,
            jobs: Mutex::new(HashMap::new()),
            runner,
            storage,
            config,
            this: this.clone(),
            #[cfg(test)]
            reject_removals: Default::default(),
        }))
    }

    /// Register a job for `subscription_id`. At most one job exists per subscription.
    pub async fn schedule(&self, subscription_id: Uuid, cron_label: &str) -> Result<(), ScheduleError> {
        let Some(cron) = resolve_cron_label(cron_label) else {
            warn!(%subscription_id, label = cron_label, "unknown cron label; subscription left unscheduled");
            return Err(ScheduleError::UnknownCronLabel {
                subscription_id,
                label: cron_label.to_string(),
            });
        };

        self.schedule_expression(subscription_id, cron).await
    }

    async fn schedule_expression(&self, subscription_id: Uuid, cron: &'static str) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&subscription_id) {
            warn!(%subscription_id, "subscription already scheduled; ignoring");
            return Err(ScheduleError::AlreadyScheduled(subscription_id));
        }

        let registry = self.this.clone();
        let job = Job::new_async(cron, move |job_id, _scheduler| {
            let registry = registry.clone();
            Box::pin(async move {
                if let Some(registry) = registry.upgrade() {
                    registry.fire(subscription_id, job_id).await;
                }
            })
        })
        .map_err(|err| {
            warn!(%subscription_id, cron, error = %err, "invalid cron expression; subscription left unscheduled");
            ScheduleError::InvalidCron {
                expression: cron.to_string(),
                reason: err.to_string(),
            }
        })?;

        let job_id = self.scheduler.add(job).await.map_err(|err| {
            error!(%subscription_id, error = %err, "failed to register cron job");
            ScheduleError::Scheduler(err.to_string())
        })?;

        jobs.insert(
            subscription_id,
            JobHandle {
                job_id,
                cron,
                running: Arc::new(Mutex::new(())),
                consecutive_failures: 0,
            },
        );
        info!(%subscription_id, %job_id, cron, "subscription scheduled");
        Ok(())
    }

    /// Stop and forget the subscription's job. Ticks already waiting on jitter
    /// will see the handle gone and do nothing. If the scheduler refuses the
    /// removal the handle stays registered, so a later call can retry it.
    pub async fn unschedule(&self, subscription_id: Uuid) -> Result<(), ScheduleError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job_id) = jobs.get(&subscription_id).map(|handle| handle.job_id) else {
            debug!(%subscription_id, "unschedule requested for unknown subscription");
            return Err(ScheduleError::NotScheduled(subscription_id));
        };

        if let Err(reason) = self.remove_job(job_id).await {
            error!(%subscription_id, %job_id, error = %reason, "failed to remove cron job; handle kept for retry");
            return Err(ScheduleError::Scheduler(reason));
        }
        jobs.remove(&subscription_id);
        info!(%subscription_id, %job_id, "subscription unscheduled");
        Ok(())
    }

    async fn remove_job(&self, job_id: Uuid) -> Result<(), String> {
        #[cfg(test)]
        let rejected = self.reject_removals.load(std::sync::atomic::Ordering::SeqCst);
        #[cfg(not(test))]
        let rejected = false;
        if rejected {
            return Err("removal rejected".into());
        }
        self.scheduler.remove(&job_id).await.map_err(|err| err.to_string())
    }

    pub async fn is_scheduled(&self, subscription_id: Uuid) -> bool {
        self.jobs.lock().await.contains_key(&subscription_id)
    }

    pub async fn job(&self, subscription_id: Uuid) -> Option<JobInfo> {
        self.jobs
            .lock()
            .await
            .get(&subscription_id)
            .map(|handle| job_info(subscription_id, handle))
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs = self
            .jobs
            .lock()
            .await
            .iter()
            .map(|(id, handle)| job_info(*id, handle))
            .collect::<Vec<_>>();
        jobs.sort_by_key(|job| job.subscription_id);
        jobs
    }

    /// Persist `enabled = true` and schedule with the stored cron label.
    pub async fn enable(&self, subscription_id: Uuid) -> Result<(), ScheduleError> {
        let subscription = self
            .storage
            .get_subscription(subscription_id)
            .await?
            .ok_or(PersistenceError::NotFound(subscription_id))?;
        if resolve_cron_label(&subscription.cron).is_none() {
            warn!(%subscription_id, label = %subscription.cron, "cannot enable subscription with unknown cron label");
            return Err(ScheduleError::UnknownCronLabel {
                subscription_id,
                label: subscription.cron,
            });
        }

        self.storage.set_subscription_enabled(subscription_id, true).await?;
        match self.schedule(subscription_id, &subscription.cron).await {
            Ok(()) | Err(ScheduleError::AlreadyScheduled(_)) => Ok(()),
            Err(err) => {
                if let Err(rollback) = self.storage.set_subscription_enabled(subscription_id, false).await {
                    error!(%subscription_id, error = %rollback, "failed to roll back enable");
                }
                Err(err)
            }
        }
    }

    /// Persist `enabled = false` and drop the job. The job is dropped even if
    /// persisting fails.
    pub async fn disable(&self, subscription_id: Uuid) -> Result<(), ScheduleError> {
        let persisted = self.storage.set_subscription_enabled(subscription_id, false).await;
        let unscheduled = self.unschedule(subscription_id).await;
        persisted?;
        match unscheduled {
            Ok(()) | Err(ScheduleError::NotScheduled(_)) => {
                info!(%subscription_id, "subscription disabled");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Schedule every enabled subscription. Subscriptions that cannot be
    /// scheduled are logged and counted as skipped.
    pub async fn seed(&self) -> Result<SeedSummary, ScheduleError> {
        let mut summary = SeedSummary::default();
        for subscription in self.storage.list_enabled_subscriptions().await? {
            match self.schedule(subscription.id, &subscription.cron).await {
                Ok(()) => summary.scheduled += 1,
                Err(_) => summary.skipped += 1,
            }
        }
        info!(scheduled = summary.scheduled, skipped = summary.skipped, "schedule registry seeded");
        Ok(summary)
    }

    pub async fn start(&self) -> Result<(), ScheduleError> {
        self.scheduler
            .start()
            .await
            .map_err(|err| ScheduleError::Scheduler(err.to_string()))
    }

    pub async fn shutdown(&self) -> Result<(), ScheduleError> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|err| ScheduleError::Scheduler(err.to_string()))
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    async fn fire(&self, subscription_id: Uuid, job_id: Uuid) {
        let jitter = self.jitter();
        let span = info_span!(
            "subscription_tick",
            %subscription_id,
            %job_id,
            jitter_ms = jitter.as_millis() as u64
        );
        self.tick(subscription_id, job_id, jitter).instrument(span).await
    }

    async fn tick(&self, subscription_id: Uuid, job_id: Uuid, jitter: Duration) {
        tokio::time::sleep(jitter).await;

        let running = {
            let jobs = self.jobs.lock().await;
            match jobs.get(&subscription_id) {
                Some(handle) if handle.job_id == job_id => Arc::clone(&handle.running),
                _ => {
                    debug!("job no longer registered; skipping tick");
                    return;
                }
            }
        };
        let Ok(_running) = running.try_lock() else {
            warn!("previous tick still running; skipping");
            return;
        };

        let subscription = match self.storage.get_subscription(subscription_id).await {
            Ok(Some(subscription)) if subscription.enabled => subscription,
            Ok(_) => {
                warn!("subscription missing or disabled; dropping its job");
                let _ = self.unschedule(subscription_id).await;
                return;
            }
            Err(err) => {
                error!(error = %err, "loading subscription failed; retrying next tick");
                return;
            }
        };

        match self.runner.run(&subscription).await {
            Ok(outcome) => {
                debug!(fetched = outcome.fetched, created = outcome.created.len(), "tick complete");
                self.record_outcome(subscription_id, job_id, true).await;
            }
            Err(err) => {
                error!(error = %err, "ingestion failed");
                let Some(failures) = self.record_outcome(subscription_id, job_id, false).await else {
                    return;
                };
                let disable = match self.config.failure_policy {
                    FailurePolicy::DisableOnFirstFailure => true,
                    FailurePolicy::HonorMaxRetry => failures > subscription.max_retry,
                };
                if !disable {
                    warn!(failures, max_retry = subscription.max_retry, "keeping subscription scheduled");
                    return;
                }
                warn!(failures, "disabling subscription after failed tick");
                if let Err(err) = self.disable(subscription_id).await {
                    error!(error = %err, "failed to disable subscription");
                }
            }
        }
    }

    /// Update the failure streak of the job, if it is still the registered one.
    async fn record_outcome(&self, subscription_id: Uuid, job_id: Uuid, succeeded: bool) -> Option<u32> {
        let mut jobs = self.jobs.lock().await;
        let handle = jobs.get_mut(&subscription_id).filter(|h| h.job_id == job_id)?;
        if succeeded {
            handle.consecutive_failures = 0;
        } else {
            handle.consecutive_failures += 1;
        }
        Some(handle.consecutive_failures)
    }
}

fn job_info(subscription_id: Uuid, handle: &JobHandle) -> JobInfo {
    JobInfo {
        subscription_id,
        job_id: handle.job_id,
        cron: handle.cron,
        running: handle.running.try_lock().is_err(),
        consecutive_failures: handle.consecutive_failures,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use feedloom_core::{Subscription, CRON_LABELS};
    use feedloom_storage::{FetchError, MemoryStore};

    use super::*;
    use crate::ingest::{IngestError, IngestOutcome};

    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SubscriptionRunner for CountingRunner {
        async fn run(&self, subscription: &Subscription) -> Result<IngestOutcome, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(IngestError::Fetch(FetchError::HttpStatus {
                    status: 500,
                    url: subscription.url.clone(),
                }));
            }
            Ok(IngestOutcome::default())
        }
    }

    fn subscription(cron: &str, max_retry: u32) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            url: "https://example.com/feed.xml".into(),
            cron: cron.into(),
            enabled: true,
            title: None,
            proxy: None,
            max_retry,
        }
    }

    async fn registry(
        runner: Arc<CountingRunner>,
        store: Arc<MemoryStore>,
        failure_policy: FailurePolicy,
    ) -> Arc<ScheduleRegistry> {
        ScheduleRegistry::new(
            runner,
            store,
            ScheduleConfig {
                max_jitter: Duration::ZERO,
                failure_policy,
            },
        )
        .await
        .unwrap()
    }

    async fn job_id(registry: &ScheduleRegistry, id: Uuid) -> Uuid {
        registry.job(id).await.expect("scheduled").job_id
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn jitter_stays_within_configured_bound() {
        let store = Arc::new(MemoryStore::new());
        let bounded = ScheduleRegistry::new(
            Arc::new(CountingRunner::default()),
            store.clone(),
            ScheduleConfig {
                max_jitter: Duration::from_millis(10),
                failure_policy: FailurePolicy::default(),
            },
        )
        .await
        .unwrap();
        for _ in 0..1_000 {
            assert!(bounded.jitter() <= Duration::from_millis(10));
        }

        let none = registry(Arc::default(), store, FailurePolicy::default()).await;
        assert_eq!(none.jitter(), Duration::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scheduler_fired_failure_disables_its_own_job() {
        let sub = subscription("every hour", 0);
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let runner = Arc::new(CountingRunner::default());
        runner.fail.store(true, Ordering::SeqCst);
        let registry = ScheduleRegistry::new(
            Arc::clone(&runner) as Arc<dyn SubscriptionRunner>,
            Arc::clone(&store) as Arc<dyn Storage>,
            ScheduleConfig {
                max_jitter: Duration::from_millis(10),
                failure_policy: FailurePolicy::default(),
            },
        )
        .await
        .unwrap();

        registry.schedule_expression(sub.id, "* * * * * *").await.unwrap();
        registry.start().await.unwrap();

        let mut waited = Duration::ZERO;
        while registry.is_scheduled(sub.id).await && waited < Duration::from_secs(10) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        registry.shutdown().await.unwrap();

        assert!(!registry.is_scheduled(sub.id).await);
        assert!(!store.get_subscription(sub.id).await.unwrap().unwrap().enabled);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejected_removal_keeps_handle_for_retry() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(Arc::default(), store, FailurePolicy::default()).await;
        let id = Uuid::new_v4();
        registry.schedule(id, "every hour").await.unwrap();
        let original = job_id(&registry, id).await;

        registry.reject_removals.store(true, Ordering::SeqCst);
        assert!(matches!(
            registry.unschedule(id).await,
            Err(ScheduleError::Scheduler(_))
        ));
        assert_eq!(job_id(&registry, id).await, original);

        registry.reject_removals.store(false, Ordering::SeqCst);
        registry.unschedule(id).await.unwrap();
        assert!(!registry.is_scheduled(id).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_expression_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(Arc::default(), store, FailurePolicy::default()).await;
        let id = Uuid::new_v4();

        let err = registry.schedule_expression(id, "not a cron line").await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
        assert!(!registry.is_scheduled(id).await);
    }

    #[tokio::test]
    async fn every_label_builds_a_job() {
        for (label, expression) in CRON_LABELS {
            let job = Job::new_async(*expression, |_id, _scheduler| Box::pin(async {}));
            assert!(job.is_ok(), "{label} -> {expression}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_job_per_subscription() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(Arc::default(), store, FailurePolicy::default()).await;
        let id = Uuid::new_v4();

        registry.schedule(id, "every hour").await.unwrap();
        let err = registry.schedule(id, "every day").await.unwrap_err();
        assert!(matches!(err, ScheduleError::AlreadyScheduled(got) if got == id));
        assert_eq!(registry.jobs().await.len(), 1);
        assert_eq!(registry.job(id).await.unwrap().cron, "0 0 * * * *");

        registry.unschedule(id).await.unwrap();
        assert!(!registry.is_scheduled(id).await);
        assert!(matches!(
            registry.unschedule(id).await,
            Err(ScheduleError::NotScheduled(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_label_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(Arc::default(), store, FailurePolicy::default()).await;
        let id = Uuid::new_v4();

        let err = registry.schedule(id, "every fortnight").await.unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownCronLabel { .. }));
        assert!(!registry.is_scheduled(id).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn seed_schedules_enabled_and_skips_bad_labels() {
        let good = subscription("every 15 minutes", 0);
        let bad = subscription("whenever", 0);
        let mut off = subscription("every hour", 0);
        off.enabled = false;
        let store = Arc::new(MemoryStore::with_subscriptions([good.clone(), bad.clone(), off.clone()]));
        let registry = registry(Arc::default(), store, FailurePolicy::default()).await;

        let summary = registry.seed().await.unwrap();
        assert_eq!(summary, SeedSummary { scheduled: 1, skipped: 1 });
        assert!(registry.is_scheduled(good.id).await);
        assert!(!registry.is_scheduled(bad.id).await);
        assert!(!registry.is_scheduled(off.id).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tick_runs_worker_for_current_job() {
        let sub = subscription("every hour", 0);
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let runner = Arc::new(CountingRunner::default());
        let registry = registry(Arc::clone(&runner), store, FailurePolicy::default()).await;
        registry.schedule(sub.id, &sub.cron).await.unwrap();

        let job_id = job_id(&registry, sub.id).await;
        registry.tick(sub.id, job_id, Duration::ZERO).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        // A stale job id from an earlier registration is ignored.
        registry.tick(sub.id, Uuid::new_v4(), Duration::ZERO).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unschedule_cancels_tick_waiting_on_jitter() {
        let sub = subscription("every hour", 0);
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let runner = Arc::new(CountingRunner::default());
        let registry = registry(Arc::clone(&runner), store, FailurePolicy::default()).await;
        registry.schedule(sub.id, &sub.cron).await.unwrap();
        let job_id = job_id(&registry, sub.id).await;

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry.tick(sub.id, job_id, Duration::from_millis(200)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.unschedule(sub.id).await.unwrap();
        pending.await.unwrap();

        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_tick_is_skipped() {
        let sub = subscription("every hour", 0);
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let runner = Arc::new(CountingRunner {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let registry = registry(Arc::clone(&runner), store, FailurePolicy::default()).await;
        registry.schedule(sub.id, &sub.cron).await.unwrap();
        let job_id = job_id(&registry, sub.id).await;

        let first = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.tick(sub.id, job_id, Duration::ZERO).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.job(sub.id).await.unwrap().running);
        registry.tick(sub.id, job_id, Duration::ZERO).await;
        first.await.unwrap();

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_tick_disables_subscription() {
        let sub = subscription("every hour", 5);
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let runner = Arc::new(CountingRunner::default());
        runner.fail.store(true, Ordering::SeqCst);
        let registry = registry(Arc::clone(&runner), Arc::clone(&store), FailurePolicy::default()).await;
        registry.schedule(sub.id, &sub.cron).await.unwrap();
        let job_id = job_id(&registry, sub.id).await;

        registry.tick(sub.id, job_id, Duration::ZERO).await;

        assert!(!registry.is_scheduled(sub.id).await);
        let stored = store.get_subscription(sub.id).await.unwrap().unwrap();
        assert!(!stored.enabled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn honor_max_retry_tolerates_failures_up_to_limit() {
        let sub = subscription("every hour", 2);
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let runner = Arc::new(CountingRunner::default());
        runner.fail.store(true, Ordering::SeqCst);
        let registry = registry(Arc::clone(&runner), Arc::clone(&store), FailurePolicy::HonorMaxRetry).await;
        registry.schedule(sub.id, &sub.cron).await.unwrap();
        let job_id = job_id(&registry, sub.id).await;

        registry.tick(sub.id, job_id, Duration::ZERO).await;
        registry.tick(sub.id, job_id, Duration::ZERO).await;
        assert_eq!(registry.job(sub.id).await.unwrap().consecutive_failures, 2);

        // A success resets the streak.
        runner.fail.store(false, Ordering::SeqCst);
        registry.tick(sub.id, job_id, Duration::ZERO).await;
        assert_eq!(registry.job(sub.id).await.unwrap().consecutive_failures, 0);

        runner.fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            registry.tick(sub.id, job_id, Duration::ZERO).await;
        }
        assert!(!registry.is_scheduled(sub.id).await);
        assert!(!store.get_subscription(sub.id).await.unwrap().unwrap().enabled);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn enable_and_disable_round_trip_through_storage() {
        let mut sub = subscription("every 6 hours", 0);
        sub.enabled = false;
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let registry = registry(Arc::default(), Arc::clone(&store), FailurePolicy::default()).await;

        registry.enable(sub.id).await.unwrap();
        assert!(registry.is_scheduled(sub.id).await);
        assert!(store.get_subscription(sub.id).await.unwrap().unwrap().enabled);

        registry.disable(sub.id).await.unwrap();
        assert!(!registry.is_scheduled(sub.id).await);
        assert!(!store.get_subscription(sub.id).await.unwrap().unwrap().enabled);

        assert!(matches!(
            registry.enable(Uuid::new_v4()).await,
            Err(ScheduleError::Persistence(PersistenceError::NotFound(_)))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tick_for_disabled_subscription_drops_job() {
        let sub = subscription("every hour", 0);
        let store = Arc::new(MemoryStore::with_subscriptions([sub.clone()]));
        let runner = Arc::new(CountingRunner::default());
        let registry = registry(Arc::clone(&runner), Arc::clone(&store), FailurePolicy::default()).await;
        registry.schedule(sub.id, &sub.cron).await.unwrap();
        let job_id = job_id(&registry, sub.id).await;

        store.set_subscription_enabled(sub.id, false).await.unwrap();
        registry.tick(sub.id, job_id, Duration::ZERO).await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(!registry.is_scheduled(sub.id).await);
    }
}
