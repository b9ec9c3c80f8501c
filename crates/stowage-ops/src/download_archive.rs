//! Download of several entry trees as one zip archive.

use tracing::warn;

use crate::archive::ZipArchiveWriter;
use crate::error::{OperationError, OperationResult};
use crate::job::{self, JobContext};
use crate::operation::ArchiveRequest;
use crate::progress::ProgressTracker;

pub(crate) async fn run(ctx: &JobContext, request: &ArchiveRequest) -> OperationResult<()> {
    for tree in &request.trees {
        if let Some(limit) = tree.limit() {
            return Err(OperationError::limit(limit, &request.root));
        }
    }

    let stream = request
        .destination
        .open()
        .await
        .map_err(OperationError::delegate("open destination for", &request.root))?;
    let mut archive = ZipArchiveWriter::new(stream);

    let outcome = match write_entries(ctx, request, &mut archive).await {
        Ok(()) => {
            ctx.finalizing().await;
            archive
                .finish()
                .await
                .map_err(OperationError::delegate("write archive of", &request.root))
        }
        Err(e) => Err(e),
    };

    if let Err(err) = outcome {
        if let Err(e) = archive.abort().await {
            warn!(operation = %ctx.operation.id, "Failed to abort archive: {e}");
        }
        job::remove_destination(request.destination.as_ref()).await;
        return Err(err);
    }
    Ok(())
}

async fn write_entries(
    ctx: &JobContext,
    request: &ArchiveRequest,
    archive: &mut ZipArchiveWriter,
) -> OperationResult<()> {
    let mut tracker = ProgressTracker::new(request.total_files, request.total_size);

    for file in request.trees.iter().flat_map(|tree| &tree.files) {
        ctx.checkpoint()?;

        let mut reader = ctx
            .workspace
            .open_read(&file.path, None)
            .await
            .map_err(OperationError::delegate("read", &file.path))?;
        let name = file
            .path
            .relative_to(&request.root)
            .unwrap_or_else(|| file.name.to_string());
        archive
            .start_entry(&name, file.size)
            .await
            .map_err(OperationError::delegate("archive", &file.path))?;

        let mut done = 0u64;
        loop {
            ctx.checkpoint()?;
            let Some(chunk) = reader
                .read_chunk(ctx.config.chunk_size)
                .await
                .map_err(OperationError::delegate("read", &file.path))?
            else {
                break;
            };
            archive
                .write(&chunk)
                .await
                .map_err(OperationError::delegate("archive", &file.path))?;
            done += chunk.len() as u64;
            ctx.report(tracker.progress(&file.name, done, file.size))
                .await;
        }

        tracker.complete(1, file.size);
    }

    Ok(())
}
