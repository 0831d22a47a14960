use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use easel_cache::{FingerprintCache, Reservation, Reserve};
use easel_core::{
    ArtifactDescriptor, ArtifactStore, ErrorKind, FailureInfo, Fingerprint, GeneratedImage, GenerationRequest,
    ProviderError,
};
use easel_providers::ImageProvider;
use easel_ratelimit::ProviderLimiters;
use jiff::Timestamp;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::job::{BatchId, BatchSnapshot, BatchStatus, GenerationJob, JobId, JobStatus};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::JobStateStore;

/// Tunables for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Worker pool size
    pub concurrency: usize,
    /// Bounded depth of the shared work queue
    pub queue_depth: usize,
    /// Per-attempt timeout handed to adapters
    pub request_timeout: Duration,
    /// Retry/backoff policy
    pub retry: RetryPolicy,
}

impl DispatcherSettings {
    /// Build from configuration
    pub fn from_config(config: &easel_config::DispatcherConfig) -> anyhow::Result<Self> {
        Ok(Self {
            concurrency: config.concurrency,
            queue_depth: config.queue_depth,
            request_timeout: config.request_timeout()?,
            retry: RetryPolicy::from_config(&config.retry)?,
        })
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_depth: 256,
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-submission options
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Regenerate even when a cached artifact exists. Still goes through
    /// the reservation protocol, so concurrent forced requests for one
    /// fingerprint collapse to a single provider call.
    pub force: bool,
}

/// The generation orchestrator
///
/// Owns every job from submission to its terminal state. Cheap to clone;
/// all clones share one engine. Construction spawns the worker pool, so a
/// tokio runtime must be current.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    cache: FingerprintCache,
    limiters: ProviderLimiters,
    providers: HashMap<String, Arc<dyn ImageProvider>>,
    store: Arc<dyn JobStateStore>,
    artifacts: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    request_timeout: Duration,
    queue_tx: mpsc::Sender<JobId>,
    jobs: DashMap<JobId, JobCell>,
    batches: DashMap<BatchId, BatchState>,
    shutdown: CancellationToken,
}

struct JobCell {
    /// Latest snapshot; watchers are the job's result subscribers
    tx: watch::Sender<GenerationJob>,
    /// Cooperative cancellation flag, checked at attempt boundaries
    cancel: AtomicBool,
    /// Held while this job owns the single-flight reservation for its
    /// fingerprint, from admission through its final attempt
    reservation: std::sync::Mutex<Option<Reservation>>,
}

struct BatchState {
    members: Vec<JobId>,
    created_at: Timestamp,
}

/// Caller's handle to one submitted job
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    rx: watch::Receiver<GenerationJob>,
}

impl JobHandle {
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Current snapshot
    pub fn snapshot(&self) -> GenerationJob {
        self.rx.borrow().clone()
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait(&mut self) -> GenerationJob {
        loop {
            {
                let job = self.rx.borrow_and_update();
                if job.status.is_terminal() {
                    return job.clone();
                }
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

/// Caller's handle to a batch submission
///
/// Holds one handle per submitted request; requests that deduplicated onto
/// an existing member share that member's job id.
pub struct BatchHandle {
    id: BatchId,
    jobs: Vec<JobHandle>,
}

impl BatchHandle {
    pub const fn id(&self) -> BatchId {
        self.id
    }

    pub fn jobs(&self) -> &[JobHandle] {
        &self.jobs
    }

    /// Wait until every member is terminal, returning final snapshots
    pub async fn wait(&mut self) -> Vec<GenerationJob> {
        let mut snapshots = Vec::with_capacity(self.jobs.len());
        for job in &mut self.jobs {
            snapshots.push(job.wait().await);
        }
        snapshots
    }
}

impl Dispatcher {
    /// Build the engine and spawn its worker pool
    pub fn new(
        settings: DispatcherSettings,
        providers: HashMap<String, Arc<dyn ImageProvider>>,
        limiters: ProviderLimiters,
        store: Arc<dyn JobStateStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_depth);

        let inner = Arc::new(Inner {
            cache: FingerprintCache::new(),
            limiters,
            providers,
            store,
            artifacts,
            retry: settings.retry,
            request_timeout: settings.request_timeout,
            queue_tx,
            jobs: DashMap::new(),
            batches: DashMap::new(),
            shutdown: CancellationToken::new(),
        });

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        for worker in 0..settings.concurrency {
            let inner = Arc::clone(&inner);
            let queue_rx = Arc::clone(&queue_rx);
            tokio::spawn(async move {
                worker_loop(inner, queue_rx, worker).await;
            });
        }

        Self { inner }
    }

    /// Submit one request
    pub async fn submit(
        &self,
        request: GenerationRequest,
        options: SubmitOptions,
    ) -> Result<JobHandle, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        self.inner.check_admissible(&request)?;
        Ok(self.inner.admit(request, options.force).await)
    }

    /// Submit a batch
    ///
    /// Members that fail validation become terminal `error` jobs rather than
    /// rejecting the whole batch, so partial successes stay visible.
    /// Duplicate fingerprints within the batch collapse to one job with
    /// multiple subscriber handles.
    pub async fn submit_batch(&self, requests: Vec<GenerationRequest>) -> Result<BatchHandle, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        if requests.is_empty() {
            return Err(EngineError::InvalidRequest("batch must contain at least one request".to_owned()));
        }

        let id = BatchId::new();
        let mut jobs: Vec<JobHandle> = Vec::with_capacity(requests.len());
        let mut seen: HashMap<Fingerprint, JobHandle> = HashMap::new();
        let mut members = Vec::new();

        for request in requests {
            let handle = match self.inner.check_admissible(&request) {
                Ok(()) => {
                    let fingerprint = Fingerprint::of(&request);
                    if let Some(existing) = seen.get(&fingerprint) {
                        // Duplicate within this batch: subscribe, don't dispatch
                        existing.clone()
                    } else {
                        let handle = self.inner.admit(request, false).await;
                        seen.insert(fingerprint, handle.clone());
                        members.push(handle.id);
                        handle
                    }
                }
                Err(error) => {
                    let handle = self.inner.admit_rejected(request, &error).await;
                    members.push(handle.id);
                    handle
                }
            };
            jobs.push(handle);
        }

        self.inner.batches.insert(
            id,
            BatchState {
                members,
                created_at: Timestamp::now(),
            },
        );

        tracing::debug!(batch = %id, members = jobs.len(), "batch submitted");
        Ok(BatchHandle { id, jobs })
    }

    /// Snapshot one job
    pub async fn job(&self, id: JobId) -> Result<GenerationJob, EngineError> {
        if let Some(cell) = self.inner.jobs.get(&id) {
            return Ok(cell.tx.borrow().clone());
        }
        // Cold records survive in the store even when the in-memory cell is
        // gone (e.g. after restart with a durable store)
        self.inner.store.load(id).await.map_err(|_| EngineError::JobNotFound(id))
    }

    /// Snapshot one batch with derived aggregate status
    pub fn batch(&self, id: BatchId) -> Result<BatchSnapshot, EngineError> {
        let state = self.inner.batches.get(&id).ok_or(EngineError::BatchNotFound(id))?;

        let jobs: Vec<GenerationJob> = state
            .members
            .iter()
            .filter_map(|member| self.inner.jobs.get(member).map(|cell| cell.tx.borrow().clone()))
            .collect();
        let status = BatchStatus::derive(jobs.iter().map(|job| job.status));

        Ok(BatchSnapshot {
            id,
            status,
            jobs,
            created_at: state.created_at,
        })
    }

    /// Cancel one job
    ///
    /// Queued jobs finalize as `cancelled` immediately and never reach an
    /// adapter. Running jobs are flagged: the in-flight attempt finishes
    /// and its cache effect stands, but the job is reported `cancelled`.
    pub async fn cancel_job(&self, id: JobId) -> Result<(), EngineError> {
        if self.inner.cancel_member(id).await {
            Ok(())
        } else {
            Err(EngineError::JobNotFound(id))
        }
    }

    /// Cancel every member of a batch
    pub async fn cancel_batch(&self, id: BatchId) -> Result<(), EngineError> {
        let members = {
            let state = self.inner.batches.get(&id).ok_or(EngineError::BatchNotFound(id))?;
            state.members.clone()
        };
        for member in members {
            self.inner.cancel_member(member).await;
        }
        Ok(())
    }

    /// Stop accepting work and wind the worker pool down
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    /// Reject before admission: unknown provider or invalid bounds
    fn check_admissible(&self, request: &GenerationRequest) -> Result<(), EngineError> {
        request
            .validate()
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        if !self.providers.contains_key(&request.provider) {
            return Err(EngineError::ProviderNotFound(request.provider.clone()));
        }
        Ok(())
    }

    /// Admit a validated request: consult the cache, reserve or attach,
    /// and enqueue if this job owns the generation
    async fn admit(self: &Arc<Self>, request: GenerationRequest, force: bool) -> JobHandle {
        let mut job = GenerationJob::new(request);
        let fingerprint = job.fingerprint;

        if !force && let Some(entry) = self.cache.lookup(fingerprint) {
            tracing::debug!(job = %job.id, fingerprint = %fingerprint, "cache hit");
            finish_from_cache(&mut job, entry);
            return self.install(job, None).await;
        }

        match self.cache.reserve(fingerprint, force) {
            Reserve::Cached(entry) => {
                // A commit raced in between lookup and reserve
                finish_from_cache(&mut job, entry);
                self.install(job, None).await
            }
            Reserve::Reserved(reservation) => {
                let id = job.id;
                let handle = self.install(job, Some(reservation)).await;
                if self.queue_tx.send(id).await.is_err() {
                    // Worker pool is gone; resolve rather than strand waiters
                    self.fail_unqueued(id);
                }
                handle
            }
            Reserve::InFlight(waiter) => {
                tracing::debug!(job = %job.id, fingerprint = %fingerprint, "attached to in-flight generation");
                let id = job.id;
                let handle = self.install(job, None).await;
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = waiter.outcome().await;
                    inner.resolve_attached(id, outcome).await;
                });
                handle
            }
        }
    }

    /// Record a batch member that failed admission as a terminal error job
    async fn admit_rejected(self: &Arc<Self>, request: GenerationRequest, error: &EngineError) -> JobHandle {
        let provider = request.provider.clone();
        let mut job = GenerationJob::new(request);
        job.status = JobStatus::Error;
        job.finished_at = Some(Timestamp::now());
        job.last_error = Some(FailureInfo {
            kind: ErrorKind::InvalidRequest,
            provider,
            message: error.to_string(),
            attempts: 0,
        });
        self.install(job, None).await
    }

    /// Install the job cell, persist the initial snapshot, return a handle
    async fn install(self: &Arc<Self>, job: GenerationJob, reservation: Option<Reservation>) -> JobHandle {
        let id = job.id;
        let (tx, rx) = watch::channel(job.clone());
        self.jobs.insert(
            id,
            JobCell {
                tx,
                cancel: AtomicBool::new(false),
                reservation: std::sync::Mutex::new(reservation),
            },
        );
        self.persist_snapshot(&job).await;
        JobHandle { id, rx }
    }

    /// Cancel one member; returns false when the id is unknown
    async fn cancel_member(self: &Arc<Self>, id: JobId) -> bool {
        {
            let Some(cell) = self.jobs.get(&id) else {
                return false;
            };
            cell.cancel.store(true, Ordering::SeqCst);
        }

        if self.cancel_queued(id) {
            tracing::debug!(job = %id, "cancelled while queued");
            self.persist_current(id).await;
        } else {
            tracing::debug!(job = %id, "cancellation flagged");
        }
        true
    }

    /// Flip a queued job straight to cancelled and release its reservation;
    /// returns whether this call performed the flip
    fn cancel_queued(&self, id: JobId) -> bool {
        let (flipped, reservation) = {
            let Some(cell) = self.jobs.get(&id) else {
                return false;
            };

            // Exactly one of cancel/worker flips a queued job; the watch
            // sender serializes the two
            let flipped = cell.tx.send_if_modified(|job| {
                if job.status == JobStatus::Queued {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(Timestamp::now());
                    true
                } else {
                    false
                }
            });

            let reservation = if flipped {
                cell.reservation
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take()
            } else {
                None
            };
            (flipped, reservation)
        };

        if let Some(reservation) = reservation {
            // This job owned the single-flight slot; release waiters so a
            // later submission can regenerate cleanly
            let snapshot = self.snapshot(id);
            reservation.abort(FailureInfo {
                kind: ErrorKind::Cancelled,
                provider: snapshot.as_ref().map(|j| j.request.provider.clone()).unwrap_or_default(),
                message: "generation cancelled before dispatch".to_owned(),
                attempts: snapshot.map_or(0, |j| j.attempts),
            });
        }
        flipped
    }

    /// Resolve a job that was attached to another job's reservation
    async fn resolve_attached(self: &Arc<Self>, id: JobId, outcome: Result<ArtifactDescriptor, FailureInfo>) {
        let cancelled = self
            .jobs
            .get(&id)
            .is_some_and(|cell| cell.cancel.load(Ordering::SeqCst));

        self.transition(id, |job| {
            if job.status.is_terminal() {
                return;
            }
            job.finished_at = Some(Timestamp::now());
            match outcome {
                Ok(entry) => {
                    job.artifact = Some(entry);
                    job.status = if cancelled { JobStatus::Cancelled } else { JobStatus::Done };
                }
                Err(failure) => {
                    job.last_error = Some(failure);
                    job.status = if cancelled { JobStatus::Cancelled } else { JobStatus::Error };
                }
            }
        });
        self.persist_current(id).await;
    }

    /// Claim a dequeued job for this worker; None when it was cancelled (or
    /// otherwise resolved) while queued
    fn claim(&self, id: JobId) -> Option<GenerationRequest> {
        let cell = self.jobs.get(&id)?;

        // A cancel can land between an attempt's flag check and its retry
        // re-queue; catching the flag here keeps a cancelled job from
        // spending another adapter attempt
        if cell.cancel.load(Ordering::SeqCst) {
            drop(cell);
            self.cancel_queued(id);
            return None;
        }

        let mut claimed = None;
        cell.tx.send_if_modified(|job| {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Running;
                job.attempts += 1;
                if job.started_at.is_none() {
                    job.started_at = Some(Timestamp::now());
                }
                claimed = Some(job.request.clone());
                true
            } else {
                false
            }
        });
        claimed
    }

    /// Run one attempt of a claimed job
    async fn run_attempt(self: &Arc<Self>, id: JobId, request: GenerationRequest) {
        // Checked at admission; only reachable if the provider set mutates,
        // which it never does after construction
        let Some(provider) = self.providers.get(&request.provider).cloned() else {
            self.finish_attempt(
                id,
                Err(ProviderError::Unknown(format!("provider {} disappeared", request.provider))),
            )
            .await;
            return;
        };

        if let Err(error) = self.limiters.acquire(&request.provider).await {
            // Only reachable if limiter construction and provider set drift
            self.finish_attempt(id, Err(ProviderError::Unknown(error.to_string()))).await;
            return;
        }

        tracing::debug!(job = %id, provider = %request.provider, "attempt started");
        let result = provider.generate(&request, self.request_timeout).await;
        self.finish_attempt(id, result).await;
    }

    /// Apply one attempt's outcome: commit, retry, or terminal failure
    async fn finish_attempt(self: &Arc<Self>, id: JobId, result: Result<GeneratedImage, ProviderError>) {
        let Some((attempts, provider_name, cancelled)) = self.jobs.get(&id).map(|cell| {
            let job = cell.tx.borrow();
            (job.attempts, job.request.provider.clone(), cell.cancel.load(Ordering::SeqCst))
        }) else {
            return;
        };

        match result {
            Ok(image) => match self.store_artifact(id, &image).await {
                Ok(descriptor) => {
                    if let Some(reservation) = self.take_reservation(id) {
                        reservation.commit(descriptor.clone());
                    }
                    self.transition(id, |job| {
                        job.artifact = Some(descriptor);
                        job.finished_at = Some(Timestamp::now());
                        // A flagged job keeps its attempt's cache effect but
                        // reports cancelled to the caller
                        job.status = if cancelled { JobStatus::Cancelled } else { JobStatus::Done };
                    });
                    tracing::info!(job = %id, provider = %provider_name, attempts, "generation complete");
                }
                Err(failure) => {
                    self.fail_terminal(id, failure, cancelled).await;
                }
            },
            Err(error) => {
                let failure = FailureInfo::from_error(&error, &provider_name, attempts);
                if cancelled {
                    if let Some(reservation) = self.take_reservation(id) {
                        reservation.abort(failure.clone());
                    }
                    self.transition(id, |job| {
                        job.last_error = Some(failure);
                        job.finished_at = Some(Timestamp::now());
                        job.status = JobStatus::Cancelled;
                    });
                } else {
                    match self.retry.decide(attempts, error.kind()) {
                        RetryDecision::Retry(delay) => {
                            // Honor a provider backoff hint as a floor
                            let delay = match &error {
                                ProviderError::RateLimited {
                                    retry_after: Some(hint),
                                } => delay.max(*hint),
                                _ => delay,
                            };
                            tracing::debug!(job = %id, attempts, ?delay, "attempt failed, retrying");
                            self.schedule_retry(id, failure, delay);
                        }
                        RetryDecision::GiveUp => {
                            tracing::warn!(job = %id, provider = %provider_name, attempts, kind = ?failure.kind, "generation failed terminally");
                            self.fail_terminal(id, failure, false).await;
                        }
                    }
                }
            }
        }
        self.persist_current(id).await;
    }

    /// Re-queue after the backoff delay without occupying a worker slot
    fn schedule_retry(self: &Arc<Self>, id: JobId, failure: FailureInfo, delay: Duration) {
        self.transition(id, |job| {
            job.last_error = Some(failure);
            job.status = JobStatus::Queued;
        });

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_queued = inner
                .jobs
                .get(&id)
                .is_some_and(|cell| cell.tx.borrow().status == JobStatus::Queued);
            if still_queued && inner.queue_tx.send(id).await.is_err() {
                inner.fail_unqueued(id);
                inner.persist_current(id).await;
            }
        });
    }

    /// Record a terminal failure and release waiters
    async fn fail_terminal(self: &Arc<Self>, id: JobId, failure: FailureInfo, cancelled: bool) {
        if let Some(reservation) = self.take_reservation(id) {
            reservation.abort(failure.clone());
        }
        self.transition(id, |job| {
            job.last_error = Some(failure);
            job.finished_at = Some(Timestamp::now());
            job.status = if cancelled { JobStatus::Cancelled } else { JobStatus::Error };
        });
    }

    /// Worker pool vanished under a queued job
    fn fail_unqueued(self: &Arc<Self>, id: JobId) {
        let provider = self.snapshot(id).map(|j| j.request.provider).unwrap_or_default();
        let failure = FailureInfo {
            kind: ErrorKind::Unknown,
            provider,
            message: "engine stopped before the job could run".to_owned(),
            attempts: 0,
        };
        if let Some(reservation) = self.take_reservation(id) {
            reservation.abort(failure.clone());
        }
        self.transition(id, |job| {
            job.last_error = Some(failure);
            job.finished_at = Some(Timestamp::now());
            job.status = JobStatus::Error;
        });
    }

    /// Write artifact bytes and build the descriptor committed to the cache
    async fn store_artifact(&self, id: JobId, image: &GeneratedImage) -> Result<ArtifactDescriptor, FailureInfo> {
        let Some(job) = self.snapshot(id) else {
            return Err(FailureInfo {
                kind: ErrorKind::Unknown,
                provider: String::new(),
                message: "job vanished mid-attempt".to_owned(),
                attempts: 0,
            });
        };

        match self.artifacts.write(&image.bytes).await {
            Ok(reference) => Ok(ArtifactDescriptor {
                sha256: format!("{:x}", Sha256::digest(&image.bytes)),
                reference,
                provider: job.request.provider,
                model: job.request.model,
                created_at: Timestamp::now(),
                response_id: image.response_id.clone(),
                usage: image.usage,
            }),
            Err(error) => Err(FailureInfo {
                kind: ErrorKind::Unknown,
                provider: job.request.provider,
                message: format!("artifact storage failed: {error}"),
                attempts: job.attempts,
            }),
        }
    }

    fn take_reservation(&self, id: JobId) -> Option<Reservation> {
        self.jobs.get(&id).and_then(|cell| {
            cell.reservation
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take()
        })
    }

    fn transition(&self, id: JobId, f: impl FnOnce(&mut GenerationJob)) {
        if let Some(cell) = self.jobs.get(&id) {
            cell.tx.send_modify(f);
        }
    }

    fn snapshot(&self, id: JobId) -> Option<GenerationJob> {
        self.jobs.get(&id).map(|cell| cell.tx.borrow().clone())
    }

    async fn persist_current(&self, id: JobId) {
        if let Some(job) = self.snapshot(id) {
            self.persist_snapshot(&job).await;
        }
    }

    async fn persist_snapshot(&self, job: &GenerationJob) {
        if let Err(error) = self.store.persist(job).await {
            tracing::warn!(job = %job.id, error = %error, "failed to persist job snapshot");
        }
    }
}

/// Apply a cache hit to a freshly created job
fn finish_from_cache(job: &mut GenerationJob, entry: ArtifactDescriptor) {
    job.artifact = Some(entry);
    job.status = JobStatus::Done;
    job.finished_at = Some(Timestamp::now());
}

/// One worker: drain the shared queue until shutdown
///
/// Jobs are admitted in submission order because the queue is FIFO;
/// completion order is up to provider latency.
async fn worker_loop(inner: Arc<Inner>, queue_rx: Arc<Mutex<mpsc::Receiver<JobId>>>, worker: usize) {
    loop {
        let id = {
            let mut rx = queue_rx.lock().await;
            tokio::select! {
                () = inner.shutdown.cancelled() => return,
                received = rx.recv() => match received {
                    Some(id) => id,
                    None => return,
                },
            }
        };

        let Some(request) = inner.claim(id) else {
            // Cancelled (or otherwise resolved) while queued; never touch
            // the adapter
            inner.persist_current(id).await;
            continue;
        };
        inner.persist_current(id).await;

        tracing::debug!(worker, job = %id, "job claimed");
        inner.run_attempt(id, request).await;
    }
}
