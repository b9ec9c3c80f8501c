//! The operation scheduler.
//!
//! Submissions go into a FIFO queue. A single loop task moves them into the
//! running set while it holds fewer than `max_concurrent` entries, and each
//! running operation executes as its own task. The loop sleeps for the
//! configured backoff when it has nothing to do and is woken early by
//! submissions and settlements.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use serde::Serialize;
use stowage_core::{
    DuplicatePolicy, EntryStat, EntryTree, FileEntry, FsPath, OperationId, PointInTime,
    SchedulerConfig, WorkspaceHandle,
};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Destination, WorkspaceProvider};
use crate::error::{OperationError, OperationResult};
use crate::event::{EventCallback, EventDistributor, OperationEvent, SubscriptionId};
use crate::job;
use crate::operation::{
    ArchiveRequest, DownloadRequest, ImportRequest, ImportSource, Operation, OperationKind,
    RestoreRequest, TransferRequest,
};

/// Where a known operation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
}

/// Queues, runs and supervises bulk operations.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<SchedulerConfig>,
    provider: Arc<dyn WorkspaceProvider>,
    events: EventDistributor,
    queue: Mutex<Queue>,
    /// Wakes the loop after a submission or a settlement.
    wake: Notify,
    /// Wakes `stop()` whenever a running operation settles.
    settled: Notify,
    runner: Mutex<Option<LoopHandle>>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Arc<Operation>>,
    running: IndexMap<OperationId, RunningOperation>,
}

impl Queue {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

struct RunningOperation {
    operation: Arc<Operation>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct LoopHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn new(provider: Arc<dyn WorkspaceProvider>) -> Self {
        Self::with_config(provider, SchedulerConfig::default())
    }

    pub fn with_config(provider: Arc<dyn WorkspaceProvider>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                provider,
                events: EventDistributor::new(),
                queue: Mutex::new(Queue::default()),
                wake: Notify::new(),
                settled: Notify::new(),
                runner: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventDistributor {
        &self.inner.events
    }

    /// Queue an operation against `workspace`.
    ///
    /// Returns `None` without queueing anything when the workspace cannot be
    /// resolved. The workspace's identity and name are captured here.
    pub async fn submit(
        &self,
        workspace: WorkspaceHandle,
        kind: OperationKind,
    ) -> Option<OperationId> {
        let info = match self.inner.provider.info(workspace).await {
            Ok(info) => info,
            Err(e) => {
                warn!(%workspace, kind = %kind.operation_type(), "Rejecting operation: {e}");
                return None;
            }
        };

        let operation = Arc::new(Operation::new(workspace, info, kind));
        let id = operation.id;
        debug!(operation = %id, kind = %operation.operation_type(), %workspace, "Operation added");

        self.inner
            .events
            .publish(OperationEvent::Added(Arc::clone(&operation)))
            .await;
        self.inner.queue().pending.push_back(operation);
        self.start();
        self.inner.wake.notify_one();
        Some(id)
    }

    pub async fn import(
        &self,
        workspace: WorkspaceHandle,
        sources: Vec<ImportSource>,
        destination: FsPath,
        policy: DuplicatePolicy,
    ) -> Option<OperationId> {
        let request = ImportRequest {
            sources,
            destination,
            policy,
        };
        self.submit(workspace, OperationKind::Import(request)).await
    }

    pub async fn move_entries(
        &self,
        workspace: WorkspaceHandle,
        sources: Vec<EntryStat>,
        destination: FsPath,
        policy: DuplicatePolicy,
    ) -> Option<OperationId> {
        let request = TransferRequest {
            sources,
            destination,
            policy,
        };
        self.submit(workspace, OperationKind::Move(request)).await
    }

    pub async fn copy_entries(
        &self,
        workspace: WorkspaceHandle,
        sources: Vec<EntryStat>,
        destination: FsPath,
        policy: DuplicatePolicy,
    ) -> Option<OperationId> {
        let request = TransferRequest {
            sources,
            destination,
            policy,
        };
        self.submit(workspace, OperationKind::Copy(request)).await
    }

    /// Restore `entries` to their state at `at`, in place.
    pub async fn restore(
        &self,
        workspace: WorkspaceHandle,
        entries: Vec<EntryStat>,
        at: PointInTime,
        policy: DuplicatePolicy,
    ) -> Option<OperationId> {
        let request = RestoreRequest {
            entries,
            at,
            policy,
        };
        self.submit(workspace, OperationKind::Restore(request)).await
    }

    pub async fn download(
        &self,
        workspace: WorkspaceHandle,
        entry: FileEntry,
        destination: Arc<dyn Destination>,
        at: Option<PointInTime>,
    ) -> Option<OperationId> {
        let request = DownloadRequest {
            entry,
            destination,
            at,
        };
        self.submit(workspace, OperationKind::Download(request)).await
    }

    /// Download `trees` as one zip archive, naming entries relative to `root`.
    pub async fn download_archive(
        &self,
        workspace: WorkspaceHandle,
        trees: Vec<EntryTree>,
        destination: Arc<dyn Destination>,
        root: FsPath,
    ) -> Option<OperationId> {
        let request = ArchiveRequest::new(trees, destination, root);
        self.submit(workspace, OperationKind::DownloadArchive(request))
            .await
    }

    /// Request cancellation of an operation.
    ///
    /// A running operation stops at its next checkpoint. A pending one is
    /// removed from the queue and reported `Cancelled` right away. Returns
    /// false when `id` is neither pending nor running.
    pub async fn cancel(&self, id: OperationId) -> bool {
        let (removed, idle) = {
            let mut queue = self.inner.queue();
            if let Some(running) = queue.running.get(&id) {
                debug!(operation = %id, "Cancelling running operation");
                running.cancel.cancel();
                return true;
            }
            let Some(position) = queue.pending.iter().position(|op| op.id == id) else {
                return false;
            };
            let removed = queue.pending.remove(position);
            (removed, queue.is_idle())
        };

        if let Some(operation) = removed {
            info!(operation = %id, "Pending operation cancelled");
            self.inner
                .events
                .publish(OperationEvent::Cancelled(operation))
                .await;
        }
        if idle {
            self.inner.events.publish(OperationEvent::AllFinished).await;
        }
        true
    }

    /// Cancel every running and pending operation.
    pub async fn cancel_all(&self) {
        let (pending, idle) = {
            let mut queue = self.inner.queue();
            for running in queue.running.values() {
                running.cancel.cancel();
            }
            let pending: Vec<_> = queue.pending.drain(..).collect();
            (pending, queue.is_idle())
        };

        let any_pending = !pending.is_empty();
        for operation in pending {
            self.inner
                .events
                .publish(OperationEvent::Cancelled(operation))
                .await;
        }
        if any_pending && idle {
            self.inner.events.publish(OperationEvent::AllFinished).await;
        }
    }

    /// True while anything is pending or running.
    pub fn has_operations(&self) -> bool {
        !self.inner.queue().is_idle()
    }

    pub fn status(&self, id: OperationId) -> Option<OperationStatus> {
        let queue = self.inner.queue();
        if queue.running.contains_key(&id) {
            Some(OperationStatus::Running)
        } else if queue.pending.iter().any(|op| op.id == id) {
            Some(OperationStatus::Pending)
        } else {
            None
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.queue().running.len()
    }

    /// Descriptors of the running operations, oldest first.
    pub fn running(&self) -> Vec<Arc<Operation>> {
        self.inner
            .queue()
            .running
            .values()
            .map(|running| Arc::clone(&running.operation))
            .collect()
    }

    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.inner.events.subscribe(callback)
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&OperationEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_fn(callback)
    }

    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<OperationEvent>) {
        self.inner.events.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Start the run loop unless it is already running.
    ///
    /// Must be called from within a Tokio runtime. Submitting starts the loop
    /// as well.
    pub fn start(&self) {
        let mut runner = self.inner.runner();
        if runner.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            return;
        }
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_loop(Arc::clone(&self.inner), stop.clone()));
        *runner = Some(LoopHandle { stop, task });
        debug!("Scheduler loop started");
    }

    /// Cancel everything, wait until no operation is running, then halt the
    /// run loop.
    pub async fn stop(&self) {
        self.cancel_all().await;

        let backoff = self.inner.config.poll_interval();
        loop {
            let settled = self.inner.settled.notified();
            let tasks: Vec<JoinHandle<()>> = {
                let mut queue = self.inner.queue();
                if queue.running.is_empty() {
                    break;
                }
                queue
                    .running
                    .values_mut()
                    .filter_map(|running| running.task.take())
                    .collect()
            };

            // Operations whose task is not recorded yet are still launching.
            if tasks.is_empty() {
                tokio::select! {
                    _ = settled => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
                continue;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("Operation task ended abnormally: {e}");
                }
            }
        }

        let handle = self.inner.runner().take();
        if let Some(LoopHandle { stop, task }) = handle {
            stop.cancel();
            if let Err(e) = task.await {
                warn!("Scheduler loop ended abnormally: {e}");
            }
        }
        debug!("Scheduler stopped");
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue();
        f.debug_struct("Scheduler")
            .field("pending", &queue.pending.len())
            .field("running", &queue.running.len())
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .finish()
    }
}

impl Inner {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runner(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.runner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the oldest pending operation into the running set if a slot is
    /// free.
    fn dequeue(&self) -> Option<(Arc<Operation>, CancellationToken)> {
        let mut queue = self.queue();
        if queue.running.len() >= self.config.max_concurrent {
            return None;
        }
        let operation = queue.pending.pop_front()?;
        let cancel = CancellationToken::new();
        queue.running.insert(
            operation.id,
            RunningOperation {
                operation: Arc::clone(&operation),
                cancel: cancel.clone(),
                task: None,
            },
        );
        Some((operation, cancel))
    }

    async fn launch(self: &Arc<Self>, operation: Arc<Operation>, cancel: CancellationToken) {
        debug!(operation = %operation.id, kind = %operation.operation_type(), "Operation started");
        self.events
            .publish(OperationEvent::Started(Arc::clone(&operation)))
            .await;

        let task = tokio::spawn(Arc::clone(self).execute(Arc::clone(&operation), cancel));
        if let Some(running) = self.queue().running.get_mut(&operation.id) {
            running.task = Some(task);
        }
    }

    async fn execute(self: Arc<Self>, operation: Arc<Operation>, cancel: CancellationToken) {
        let job = tokio::spawn(job::run(
            Arc::clone(&operation),
            Arc::clone(&self.provider),
            cancel,
            self.events.clone(),
            Arc::clone(&self.config),
        ));

        let result = match job.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(OperationError::Unhandled {
                message: panic_message(e.into_panic()),
            }),
            Err(e) => Err(OperationError::Unhandled {
                message: e.to_string(),
            }),
        };
        self.settle(operation, result).await;
    }

    /// Publish the terminal event, then drop the operation from the running
    /// set.
    async fn settle(&self, operation: Arc<Operation>, result: OperationResult<()>) {
        let id = operation.id;
        let event = match result {
            Ok(()) => {
                info!(operation = %id, "Operation finished");
                OperationEvent::Finished(operation)
            }
            Err(e) if e.is_cancelled() => {
                info!(operation = %id, "Operation cancelled");
                OperationEvent::Cancelled(operation)
            }
            Err(e) => {
                warn!(operation = %id, kind = %e.kind(), "Operation failed: {e}");
                OperationEvent::Failed {
                    operation,
                    error: e.failure(),
                }
            }
        };
        self.events.publish(event).await;

        let idle = {
            let mut queue = self.queue();
            queue.running.shift_remove(&id);
            queue.is_idle()
        };
        self.wake.notify_one();
        self.settled.notify_waiters();

        if idle {
            debug!("All operations finished");
            self.events.publish(OperationEvent::AllFinished).await;
        }
    }
}

async fn run_loop(inner: Arc<Inner>, stop: CancellationToken) {
    let backoff = inner.config.poll_interval();

    while !stop.is_cancelled() {
        if let Some((operation, cancel)) = inner.dequeue() {
            inner.launch(operation, cancel).await;
            continue;
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(backoff) => {}
        }
    }
    debug!("Scheduler loop halted");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("job panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("job panicked: {message}")
    } else {
        "job panicked".to_string()
    }
}
