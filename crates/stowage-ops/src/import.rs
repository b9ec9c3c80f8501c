//! Import of external files into a workspace folder.

use std::collections::HashSet;

use stowage_core::PathError;
use tokio::sync::mpsc;

use crate::backend::StagingTransaction;
use crate::error::{OperationError, OperationResult};
use crate::job::JobContext;
use crate::operation::ImportRequest;
use crate::progress::ProgressTracker;
use crate::staging;

pub(crate) async fn run(ctx: &JobContext, request: &ImportRequest) -> OperationResult<()> {
    let total_bytes = request.sources.iter().map(|s| s.size).sum();
    let mut tracker = ProgressTracker::new(request.sources.len(), total_bytes);
    let mut transaction = ctx.workspace.transaction();

    let staged = stage(ctx, request, &mut tracker, transaction.as_mut()).await;
    staging::commit_or_discard(
        ctx,
        transaction.as_mut(),
        staged,
        request.policy,
        &request.destination,
    )
    .await
}

async fn stage(
    ctx: &JobContext,
    request: &ImportRequest,
    tracker: &mut ProgressTracker,
    transaction: &mut dyn StagingTransaction,
) -> OperationResult<()> {
    let mut folders = HashSet::new();

    for source in &request.sources {
        ctx.checkpoint()?;

        let target = request.destination.join_relative(&source.relative_path)?;
        // An empty relative path would name the destination itself.
        let dir = match target.parent() {
            Some(dir) if target != request.destination => dir,
            _ => {
                return Err(PathError::InvalidName {
                    name: source.relative_path.clone(),
                }
                .into());
            }
        };
        let name = target.name().unwrap_or_default().to_string();

        ctx.ensure_folders(&dir, &mut folders).await?;
        let temp = ctx.temp_path(&dir)?;
        transaction.add_file(temp.clone(), target.clone());

        let reader = source
            .file
            .open()
            .await
            .map_err(OperationError::delegate("import", &target))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let size = source.size;
        ctx.track(ctx.workspace.import_file(reader, &temp, tx), rx, |update| {
            tracker.progress(&name, update.bytes, size)
        })
        .await
        .map_err(OperationError::delegate("import", &target))?;

        ctx.report(tracker.progress(&name, size, size)).await;
        tracker.complete(1, size);
    }

    Ok(())
}
