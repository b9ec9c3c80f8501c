//! Download of a single file to a destination.

use tracing::warn;

use crate::backend::{ReadStream, WriteStream};
use crate::error::{OperationError, OperationResult};
use crate::job::{self, JobContext};
use crate::operation::DownloadRequest;
use crate::progress::ProgressTracker;

pub(crate) async fn run(ctx: &JobContext, request: &DownloadRequest) -> OperationResult<()> {
    let entry = &request.entry;
    let mut reader = ctx
        .workspace
        .open_read(&entry.path, request.at)
        .await
        .map_err(OperationError::delegate("read", &entry.path))?;
    let mut writer = request
        .destination
        .open()
        .await
        .map_err(OperationError::delegate("open destination for", &entry.path))?;

    let outcome = match transfer(ctx, request, reader.as_mut(), writer.as_mut()).await {
        Ok(()) => {
            ctx.finalizing().await;
            writer
                .close()
                .await
                .map_err(OperationError::delegate("write", &entry.path))
        }
        Err(e) => Err(e),
    };

    if let Err(err) = outcome {
        if let Err(e) = writer.abort().await {
            warn!(operation = %ctx.operation.id, "Failed to abort download: {e}");
        }
        job::remove_destination(request.destination.as_ref()).await;
        return Err(err);
    }
    Ok(())
}

async fn transfer(
    ctx: &JobContext,
    request: &DownloadRequest,
    reader: &mut dyn ReadStream,
    writer: &mut dyn WriteStream,
) -> OperationResult<()> {
    let entry = &request.entry;
    let mut tracker = ProgressTracker::new(1, entry.size);
    let mut written = 0u64;

    loop {
        ctx.checkpoint()?;
        let Some(chunk) = reader
            .read_chunk(ctx.config.chunk_size)
            .await
            .map_err(OperationError::delegate("read", &entry.path))?
        else {
            break;
        };

        writer
            .write(&chunk)
            .await
            .map_err(OperationError::delegate("write", &entry.path))?;
        written += chunk.len() as u64;
        ctx.report(tracker.progress(&entry.name, written, entry.size))
            .await;
    }

    Ok(())
}
