use stowage_core::{DuplicatePolicy, FsPath};

use super::MemoryWorkspace;
use crate::backend::{BackendError, BackendResult, BoxFuture, StagingTransaction};

/// Staging transaction of a [`MemoryWorkspace`].
///
/// Commit validates every association before moving anything and runs
/// under the workspace lock, so other tasks never observe it half done.
pub struct MemoryTransaction {
    workspace: MemoryWorkspace,
    staged: Vec<(FsPath, FsPath)>,
}

impl MemoryTransaction {
    pub(super) fn new(workspace: MemoryWorkspace) -> Self {
        Self {
            workspace,
            staged: Vec::new(),
        }
    }

    fn commit_now(&mut self, policy: DuplicatePolicy) -> BackendResult<()> {
        let mut state = self.workspace.state();

        for (temp, target) in &self.staged {
            if temp == target {
                continue;
            }
            if !state.nodes.contains_key(temp) {
                return Err(BackendError::NotFound { path: temp.clone() });
            }
            state.check(target)?;
            state.require_parent(target)?;
        }

        for (temp, target) in &self.staged {
            if temp == target {
                continue;
            }
            if !state.nodes.contains_key(target) {
                state.move_entry(temp, target, false)?;
                continue;
            }
            match policy {
                DuplicatePolicy::IgnoreExisting => state.remove_subtree(temp),
                DuplicatePolicy::AddCounter => {
                    let free = state.free_path(target)?;
                    state.move_entry(temp, &free, false)?;
                }
                DuplicatePolicy::Replace => state.move_entry(temp, target, true)?,
            }
        }
        self.staged.clear();
        Ok(())
    }

    fn clear_now(&mut self) {
        let mut state = self.workspace.state();
        for (temp, _) in self.staged.drain(..) {
            state.remove_subtree(&temp);
        }
    }
}

impl StagingTransaction for MemoryTransaction {
    fn add_file(&mut self, temp: FsPath, target: FsPath) {
        self.staged.push((temp, target));
    }

    fn commit(&mut self, policy: DuplicatePolicy) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move { self.commit_now(policy) })
    }

    fn clear(&mut self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.clear_now();
            Ok(())
        })
    }

    fn len(&self) -> usize {
        self.staged.len()
    }
}
