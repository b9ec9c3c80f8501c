//! Move of workspace entries into a destination folder.
//!
//! Moves happen one entry at a time and are visible immediately. Each
//! completed move is recorded in a transaction with the original location as
//! its final side, so a later failure can move the entries back by committing
//! that transaction. The compensation is best-effort: an entry whose original
//! location got taken in the meantime is not moved back.

use stowage_core::DuplicatePolicy;
use tracing::{debug, warn};

use crate::backend::{BackendError, StagingTransaction};
use crate::error::{OperationError, OperationResult};
use crate::job::JobContext;
use crate::operation::TransferRequest;
use crate::progress::ProgressTracker;

pub(crate) async fn run(ctx: &JobContext, request: &TransferRequest) -> OperationResult<()> {
    let mut reversal = ctx.workspace.transaction();
    let result = move_all(ctx, request, reversal.as_mut()).await;

    if let Err(err) = &result {
        if !reversal.is_empty() {
            debug!(
                operation = %ctx.operation.id,
                moved = reversal.len(),
                "Move interrupted ({err}), moving entries back"
            );
            if let Err(e) = reversal.commit(DuplicatePolicy::IgnoreExisting).await {
                warn!(operation = %ctx.operation.id, "Failed to move entries back: {e}");
            }
        }
    }
    result
}

async fn move_all(
    ctx: &JobContext,
    request: &TransferRequest,
    reversal: &mut dyn StagingTransaction,
) -> OperationResult<()> {
    let total_bytes = request.sources.iter().map(|s| s.size()).sum();
    let mut tracker = ProgressTracker::new(request.sources.len(), total_bytes);

    for source in &request.sources {
        ctx.checkpoint()?;

        let src = source.path();
        let target = request.destination.join(source.name())?;

        match request.policy {
            DuplicatePolicy::AddCounter => {
                let landed = ctx
                    .workspace
                    .move_with_counter(src, &target)
                    .await
                    .map_err(OperationError::delegate("move", src))?;
                reversal.add_file(landed, src.clone());
            }
            policy => {
                let overwrite = policy == DuplicatePolicy::Replace;
                match ctx.workspace.rename(src, &target, overwrite).await {
                    Ok(()) => reversal.add_file(target, src.clone()),
                    Err(BackendError::AlreadyExists { .. }) if !overwrite => {
                        debug!(source = %src, "Target exists, leaving source in place");
                    }
                    Err(e) => return Err(OperationError::delegate("move", src)(e)),
                }
            }
        }

        let size = source.size();
        ctx.report(tracker.progress(source.name(), size, size)).await;
        tracker.complete(1, size);
    }

    Ok(())
}
