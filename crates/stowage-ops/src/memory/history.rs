use std::sync::Arc;

use stowage_core::{EntryId, EntryStat, EntryTree, FsPath, PointInTime};

use super::{MemoryWorkspace, Node, Nodes};
use crate::backend::{
    BackendError, BackendResult, BoxFuture, HistorySession, ProgressSender, ProgressUpdate,
};

/// The latest revision recorded at or before `at`.
pub(super) fn revision(snapshots: &[(PointInTime, Nodes)], at: PointInTime) -> BackendResult<&Nodes> {
    snapshots
        .iter()
        .rev()
        .find(|(time, _)| *time <= at)
        .map(|(_, nodes)| nodes)
        .ok_or_else(|| BackendError::other(format!("No revision recorded at or before {at}")))
}

/// History session of a [`MemoryWorkspace`], reading from its snapshots.
pub struct MemoryHistory {
    workspace: MemoryWorkspace,
    view: Option<Arc<Nodes>>,
}

impl MemoryHistory {
    pub(super) fn new(workspace: MemoryWorkspace) -> Self {
        Self {
            workspace,
            view: None,
        }
    }

    fn view(&self) -> BackendResult<&Nodes> {
        self.view
            .as_deref()
            .ok_or_else(|| BackendError::other("History session is not started"))
    }
}

impl HistorySession for MemoryHistory {
    fn start(&mut self, at: PointInTime) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let nodes = {
                let state = self.workspace.state();
                revision(&state.snapshots, at)?.clone()
            };
            self.view = Some(Arc::new(nodes));
            Ok(())
        })
    }

    fn entry_stat<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryStat>> {
        Box::pin(async move {
            self.workspace.check(path)?;
            super::stat(self.view()?, path)
        })
    }

    fn list_tree<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryTree>> {
        Box::pin(async move {
            self.workspace.check(path)?;
            super::list(self.view()?, path, self.workspace.shared.limits)
        })
    }

    fn restore_file<'a>(
        &'a self,
        src: &'a FsPath,
        temp: &'a FsPath,
        progress: ProgressSender,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.workspace.reads_open().await;
            self.workspace.check(src)?;
            let data = super::file_data(self.view()?, src)?;

            let chunk_size = self.workspace.shared.chunk_size;
            let mut done = 0u64;
            for chunk in data.chunks(chunk_size) {
                done += chunk.len() as u64;
                let _ = progress.send(ProgressUpdate::bytes(done));
                tokio::task::yield_now().await;
            }

            let mut state = self.workspace.state();
            state.check(temp)?;
            state.insert_new(
                temp,
                Node::File {
                    id: EntryId::new(),
                    data,
                },
            )
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.view = None;
            Ok(())
        })
    }
}
