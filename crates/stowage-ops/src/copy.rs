//! Copy of workspace entries into a destination folder.

use stowage_core::{EntryStat, EntryTree, tree_totals};
use tokio::sync::mpsc;

use crate::backend::StagingTransaction;
use crate::error::{OperationError, OperationResult};
use crate::job::{self, JobContext};
use crate::operation::TransferRequest;
use crate::progress::ProgressTracker;
use crate::staging;

pub(crate) async fn run(ctx: &JobContext, request: &TransferRequest) -> OperationResult<()> {
    // Every tree is listed before anything is staged, so a listing that hit a
    // ceiling fails the operation without side effects.
    let mut trees = Vec::with_capacity(request.sources.len());
    for source in &request.sources {
        ctx.checkpoint()?;
        trees.push(source_tree(ctx, source).await?);
    }

    let (file_count, total_bytes) = tree_totals(&trees);
    let mut tracker = ProgressTracker::new(file_count, total_bytes);
    let mut transaction = ctx.workspace.transaction();

    let staged = stage(ctx, request, &trees, &mut tracker, transaction.as_mut()).await;
    staging::commit_or_discard(
        ctx,
        transaction.as_mut(),
        staged,
        request.policy,
        &request.destination,
    )
    .await
}

async fn source_tree(ctx: &JobContext, source: &EntryStat) -> OperationResult<EntryTree> {
    match source {
        EntryStat::File(file) => Ok(EntryTree::single(file.clone())),
        EntryStat::Folder(folder) => {
            let tree = ctx
                .workspace
                .list_tree(&folder.path)
                .await
                .map_err(OperationError::delegate("list", &folder.path))?;
            job::within_limits(tree, &folder.path)
        }
    }
}

async fn stage(
    ctx: &JobContext,
    request: &TransferRequest,
    trees: &[EntryTree],
    tracker: &mut ProgressTracker,
    transaction: &mut dyn StagingTransaction,
) -> OperationResult<()> {
    for (source, tree) in request.sources.iter().zip(trees) {
        ctx.checkpoint()?;

        let target = request.destination.join(source.name())?;
        let temp = ctx.temp_path(&request.destination)?;
        transaction.add_file(temp.clone(), target);

        match source {
            EntryStat::File(file) => {
                ctx.workspace
                    .copy_file(&file.path, &temp)
                    .await
                    .map_err(OperationError::delegate("copy", &file.path))?;
                ctx.report(tracker.progress(&file.name, file.size, file.size))
                    .await;
            }
            EntryStat::Folder(folder) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let total = tree.total_size;
                ctx.track(ctx.workspace.copy_folder(&folder.path, &temp, tx), rx, |update| {
                    tracker.progress_files(&folder.name, update.bytes, total, update.files as usize)
                })
                .await
                .map_err(OperationError::delegate("copy", &folder.path))?;
                ctx.report(tracker.progress_files(&folder.name, total, total, tree.file_count()))
                    .await;
            }
        }

        tracker.complete(tree.file_count(), tree.total_size);
    }

    Ok(())
}
