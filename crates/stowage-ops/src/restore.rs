//! Restore of entries to their content at a past point in time.

use std::collections::HashSet;

use stowage_core::{EntryStat, EntryTree, FsPath, tree_totals};
use tokio::sync::mpsc;
use tracing::warn;

use crate::backend::{HistorySession, StagingTransaction};
use crate::error::{OperationError, OperationResult};
use crate::job::{self, JobContext};
use crate::operation::RestoreRequest;
use crate::progress::ProgressTracker;
use crate::staging;

pub(crate) async fn run(ctx: &JobContext, request: &RestoreRequest) -> OperationResult<()> {
    let mut session = ctx.workspace.history();
    let result = restore(ctx, request, session.as_mut()).await;

    if let Err(e) = session.stop().await {
        warn!(operation = %ctx.operation.id, "Failed to stop history session: {e}");
    }
    result
}

async fn restore(
    ctx: &JobContext,
    request: &RestoreRequest,
    session: &mut dyn HistorySession,
) -> OperationResult<()> {
    let root = FsPath::root();
    session
        .start(request.at)
        .await
        .map_err(OperationError::delegate("open history of", &root))?;

    let mut trees = Vec::with_capacity(request.entries.len());
    for entry in &request.entries {
        ctx.checkpoint()?;
        trees.push(past_tree(&*session, entry.path()).await?);
    }

    let (file_count, total_bytes) = tree_totals(&trees);
    let mut tracker = ProgressTracker::new(file_count, total_bytes);
    let mut transaction = ctx.workspace.transaction();

    let staged = stage(ctx, &*session, &trees, &mut tracker, transaction.as_mut()).await;
    staging::commit_or_discard(ctx, transaction.as_mut(), staged, request.policy, &root).await
}

/// The entry at `path` as it was, resolved to a tree.
async fn past_tree(session: &dyn HistorySession, path: &FsPath) -> OperationResult<EntryTree> {
    let stat = session
        .entry_stat(path)
        .await
        .map_err(OperationError::delegate("look up", path))?;

    match stat {
        EntryStat::File(file) => Ok(EntryTree::single(file)),
        EntryStat::Folder(folder) => {
            let tree = session
                .list_tree(&folder.path)
                .await
                .map_err(OperationError::delegate("list", &folder.path))?;
            job::within_limits(tree, &folder.path)
        }
    }
}

async fn stage(
    ctx: &JobContext,
    session: &dyn HistorySession,
    trees: &[EntryTree],
    tracker: &mut ProgressTracker,
    transaction: &mut dyn StagingTransaction,
) -> OperationResult<()> {
    let mut folders = HashSet::new();

    for file in trees.iter().flat_map(|tree| &tree.files) {
        ctx.checkpoint()?;

        let dir = file.path.parent().unwrap_or_else(FsPath::root);
        ctx.ensure_folders(&dir, &mut folders).await?;
        let temp = ctx.temp_path(&dir)?;
        transaction.add_file(temp.clone(), file.path.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        ctx.track(session.restore_file(&file.path, &temp, tx), rx, |update| {
            tracker.progress(&file.name, update.bytes, file.size)
        })
        .await
        .map_err(OperationError::delegate("restore", &file.path))?;

        ctx.report(tracker.progress(&file.name, file.size, file.size))
            .await;
        tracker.complete(1, file.size);
    }

    Ok(())
}
