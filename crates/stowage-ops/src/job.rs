//! Shared plumbing for the job runners and the dispatch into them.

use std::collections::HashSet;
use std::sync::Arc;

use stowage_core::{EntryTree, FsPath, SchedulerConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{
    BackendError, BackendResult, BoxFuture, Destination, ProgressUpdate, Workspace,
    WorkspaceProvider,
};
use crate::error::{OperationError, OperationResult};
use crate::event::{EventDistributor, OperationEvent};
use crate::operation::{Operation, OperationKind};
use crate::progress::OperationProgress;
use crate::{copy, download, download_archive, import, move_op, restore};

/// Everything a job runner needs while it executes one operation.
pub(crate) struct JobContext {
    pub operation: Arc<Operation>,
    pub workspace: Arc<dyn Workspace>,
    pub cancel: CancellationToken,
    pub events: EventDistributor,
    pub config: Arc<SchedulerConfig>,
}

impl JobContext {
    /// Fail with [`OperationError::Cancelled`] once cancellation was requested.
    ///
    /// Runners call this before starting every unit of work.
    pub fn checkpoint(&self) -> OperationResult<()> {
        if self.cancel.is_cancelled() {
            debug!(operation = %self.operation.id, "Cancellation observed at checkpoint");
            return Err(OperationError::Cancelled);
        }
        Ok(())
    }

    pub async fn report(&self, progress: OperationProgress) {
        self.events
            .publish(OperationEvent::Progress {
                operation: Arc::clone(&self.operation),
                progress,
            })
            .await;
    }

    pub async fn finalizing(&self) {
        self.events
            .publish(OperationEvent::Finalizing(Arc::clone(&self.operation)))
            .await;
    }

    /// A fresh temporary name inside `dir`.
    pub fn temp_path(&self, dir: &FsPath) -> OperationResult<FsPath> {
        let name = format!("{}{}", self.config.temp_prefix, Uuid::new_v4().simple());
        Ok(dir.join(&name)?)
    }

    /// Drive a delegate call while relaying the progress it sends.
    ///
    /// Updates still queued when the call completes are relayed before the
    /// result is returned.
    pub async fn track<T, F>(
        &self,
        mut work: BoxFuture<'_, BackendResult<T>>,
        mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
        mut on_update: F,
    ) -> BackendResult<T>
    where
        F: FnMut(ProgressUpdate) -> OperationProgress,
    {
        loop {
            tokio::select! {
                result = &mut work => {
                    while let Ok(update) = updates.try_recv() {
                        self.report(on_update(update)).await;
                    }
                    return result;
                }
                Some(update) = updates.recv() => {
                    self.report(on_update(update)).await;
                }
            }
        }
    }

    /// Create `dir` and its missing ancestors. Folders that already exist are
    /// fine; `known` remembers what was ensured by earlier calls.
    pub async fn ensure_folders(
        &self,
        dir: &FsPath,
        known: &mut HashSet<FsPath>,
    ) -> OperationResult<()> {
        for folder in dir.ancestors_inclusive() {
            if known.contains(&folder) {
                continue;
            }
            match self.workspace.create_folder(&folder).await {
                Ok(()) | Err(BackendError::AlreadyExists { .. }) => {}
                Err(e) => return Err(OperationError::delegate("create folder", &folder)(e)),
            }
            known.insert(folder);
        }
        Ok(())
    }
}

/// Reject a tree whose listing stopped at a ceiling.
pub(crate) fn within_limits(tree: EntryTree, path: &FsPath) -> OperationResult<EntryTree> {
    match tree.limit() {
        Some(limit) => Err(OperationError::limit(limit, path)),
        None => Ok(tree),
    }
}

/// Delete a partially written download destination.
pub(crate) async fn remove_destination(destination: &dyn Destination) {
    if let Err(e) = destination.remove().await {
        warn!(destination = %destination.name(), "Failed to remove destination: {e}");
    }
}

/// Resolve the workspace and run the job matching the operation's kind.
pub(crate) async fn run(
    operation: Arc<Operation>,
    provider: Arc<dyn WorkspaceProvider>,
    cancel: CancellationToken,
    events: EventDistributor,
    config: Arc<SchedulerConfig>,
) -> OperationResult<()> {
    let handle = operation.workspace;
    let workspace = provider
        .workspace(handle)
        .await
        .map_err(|source| OperationError::WorkspaceUnavailable { handle, source })?;

    let ctx = JobContext {
        operation: Arc::clone(&operation),
        workspace,
        cancel,
        events,
        config,
    };

    match &operation.kind {
        OperationKind::Import(request) => import::run(&ctx, request).await,
        OperationKind::Move(request) => move_op::run(&ctx, request).await,
        OperationKind::Copy(request) => copy::run(&ctx, request).await,
        OperationKind::Restore(request) => restore::run(&ctx, request).await,
        OperationKind::Download(request) => download::run(&ctx, request).await,
        OperationKind::DownloadArchive(request) => download_archive::run(&ctx, request).await,
    }
}
