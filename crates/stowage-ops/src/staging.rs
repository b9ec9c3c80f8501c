//! Finishing a staging transaction: one commit, or a full discard.

use stowage_core::{DuplicatePolicy, FsPath};
use tracing::{debug, warn};

use crate::backend::StagingTransaction;
use crate::error::{OperationError, OperationResult};
use crate::job::JobContext;

/// Commit `transaction` when staging succeeded, otherwise discard it.
///
/// A cancellation requested after the last unit was staged still wins over
/// the commit. When the commit itself fails, whatever is still staged is
/// discarded as well. `path` names the operation's target in error messages.
pub(crate) async fn commit_or_discard(
    ctx: &JobContext,
    transaction: &mut dyn StagingTransaction,
    staged: OperationResult<()>,
    policy: DuplicatePolicy,
    path: &FsPath,
) -> OperationResult<()> {
    let outcome = match staged.and_then(|()| ctx.checkpoint()) {
        Ok(()) => {
            ctx.finalizing().await;
            debug!(
                operation = %ctx.operation.id,
                staged = transaction.len(),
                %policy,
                "Committing staged entries"
            );
            transaction
                .commit(policy)
                .await
                .map_err(OperationError::delegate("commit staged entries into", path))
        }
        Err(e) => Err(e),
    };

    if outcome.is_err() {
        if let Err(e) = transaction.clear().await {
            warn!(operation = %ctx.operation.id, "Failed to discard staged entries: {e}");
        }
    }
    outcome
}
