//! In-memory implementation of every collaborator trait.
//!
//! [`MemoryWorkspace`] keeps a folder hierarchy in a sorted map, so a
//! folder's descendants are always adjacent to it. Snapshots of that map
//! back the point-in-time history. Tests can cap listings, inject failures
//! on paths, and hold all reads to keep jobs in flight.

mod history;
mod transaction;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use stowage_core::{
    EntryId, EntryStat, EntryTree, FileEntry, FolderEntry, FsPath, PointInTime, WorkspaceHandle,
    WorkspaceId, WorkspaceInfo, next_free_name,
};
use tokio::sync::watch;

use crate::backend::{
    BackendError, BackendResult, BoxFuture, Destination, ExternalFile, HistorySession,
    ProgressSender, ProgressUpdate, ReadStream, StagingTransaction, Workspace, WorkspaceProvider,
    WriteStream,
};

pub use history::MemoryHistory;
pub use transaction::MemoryTransaction;

/// Default chunk size of in-memory streams.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum Node {
    File { id: EntryId, data: Arc<Vec<u8>> },
    Folder { id: EntryId },
}

type Nodes = BTreeMap<FsPath, Node>;

/// Ceilings applied by recursive listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingLimits {
    /// Files nested more than this many levels below the listed folder are
    /// left out and flag the tree as recursion-limited.
    pub max_depth: Option<usize>,
    /// Listing stops after this many files and flags the tree.
    pub max_files: Option<usize>,
}

struct State {
    info: WorkspaceInfo,
    nodes: Nodes,
    snapshots: Vec<(PointInTime, Nodes)>,
    failures: HashSet<FsPath>,
}

struct Shared {
    state: Mutex<State>,
    limits: ListingLimits,
    chunk_size: usize,
    reads_open: watch::Sender<bool>,
}

/// A workspace held entirely in memory.
#[derive(Clone)]
pub struct MemoryWorkspace {
    shared: Arc<Shared>,
}

impl MemoryWorkspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_limits(name, ListingLimits::default())
    }

    pub fn with_limits(name: impl Into<String>, limits: ListingLimits) -> Self {
        Self::build(name.into(), limits, DEFAULT_CHUNK_SIZE)
    }

    /// Like [`new`](Self::new), streaming content in chunks of `chunk_size`.
    pub fn with_chunk_size(name: impl Into<String>, chunk_size: usize) -> Self {
        Self::build(name.into(), ListingLimits::default(), chunk_size.max(1))
    }

    fn build(name: String, limits: ListingLimits, chunk_size: usize) -> Self {
        let mut nodes = Nodes::new();
        nodes.insert(FsPath::root(), Node::Folder { id: EntryId::new() });
        let (reads_open, _) = watch::channel(true);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    info: WorkspaceInfo::new(WorkspaceId::new(), name),
                    nodes,
                    snapshots: Vec::new(),
                    failures: HashSet::new(),
                }),
                limits,
                chunk_size,
                reads_open,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a folder and any missing ancestors.
    pub fn add_folder(&self, path: &FsPath) -> BackendResult<FolderEntry> {
        let mut state = self.state();
        state.make_parents(path)?;
        match state.nodes.get(path) {
            Some(Node::Folder { id }) => Ok(FolderEntry::new(*id, path.clone())),
            Some(Node::File { .. }) => Err(BackendError::NotAFolder { path: path.clone() }),
            None => {
                let id = EntryId::new();
                state.nodes.insert(path.clone(), Node::Folder { id });
                Ok(FolderEntry::new(id, path.clone()))
            }
        }
    }

    /// Create or overwrite a file, creating missing ancestors.
    pub fn add_file(&self, path: &FsPath, data: impl Into<Vec<u8>>) -> BackendResult<FileEntry> {
        let data: Vec<u8> = data.into();
        let mut state = self.state();
        state.make_parents(path)?;
        if let Some(Node::Folder { .. }) = state.nodes.get(path) {
            return Err(BackendError::NotAFile { path: path.clone() });
        }
        let id = EntryId::new();
        let size = data.len() as u64;
        state.nodes.insert(
            path.clone(),
            Node::File {
                id,
                data: Arc::new(data),
            },
        );
        Ok(FileEntry::new(id, path.clone(), size))
    }

    /// Current statistics of `path`.
    pub fn entry(&self, path: &FsPath) -> Option<EntryStat> {
        self.state().nodes.get(path).map(|node| node.stat(path))
    }

    /// Current content of the file at `path`.
    pub fn read_file(&self, path: &FsPath) -> Option<Vec<u8>> {
        match self.state().nodes.get(path) {
            Some(Node::File { data, .. }) => Some(data.as_ref().clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &FsPath) -> bool {
        self.state().nodes.contains_key(path)
    }

    /// Every path in the workspace, root excluded, in sorted order.
    pub fn paths(&self) -> Vec<FsPath> {
        self.state()
            .nodes
            .keys()
            .filter(|path| !path.is_root())
            .cloned()
            .collect()
    }

    /// Record the current content as a revision at the current time.
    pub fn snapshot(&self) -> PointInTime {
        let at = Utc::now();
        self.snapshot_at(at);
        at
    }

    /// Record the current content as a revision at `at`.
    pub fn snapshot_at(&self, at: PointInTime) {
        let mut state = self.state();
        let nodes = state.nodes.clone();
        state.snapshots.push((at, nodes));
        state.snapshots.sort_by_key(|(time, _)| *time);
    }

    /// Change the display name.
    pub fn rename_workspace(&self, name: impl Into<String>) {
        self.state().info.name = name.into();
    }

    /// Make every later call touching `path` fail with an I/O error.
    pub fn fail_on(&self, path: &FsPath) {
        self.state().failures.insert(path.clone());
    }

    /// Block every content read until [`release_reads`](Self::release_reads).
    pub fn hold_reads(&self) {
        self.shared.reads_open.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.shared.reads_open.send_replace(true);
    }

    async fn reads_open(&self) {
        wait_open(self.shared.reads_open.subscribe()).await;
    }

    fn check(&self, path: &FsPath) -> BackendResult<()> {
        self.state().check(path)
    }
}

async fn wait_open(mut gate: watch::Receiver<bool>) {
    let _ = gate.wait_for(|open| *open).await;
}

impl Node {
    fn stat(&self, path: &FsPath) -> EntryStat {
        match self {
            Self::File { id, data } => {
                EntryStat::File(FileEntry::new(*id, path.clone(), data.len() as u64))
            }
            Self::Folder { id } => EntryStat::Folder(FolderEntry::new(*id, path.clone())),
        }
    }
}

impl State {
    fn check(&self, path: &FsPath) -> BackendResult<()> {
        if self.failures.contains(path) {
            return Err(BackendError::io(format!("injected failure at {path}")));
        }
        Ok(())
    }

    fn make_parents(&mut self, path: &FsPath) -> BackendResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        for folder in parent.ancestors_inclusive() {
            match self.nodes.get(&folder) {
                Some(Node::Folder { .. }) => {}
                Some(Node::File { .. }) => return Err(BackendError::NotAFolder { path: folder }),
                None => {
                    self.nodes
                        .insert(folder, Node::Folder { id: EntryId::new() });
                }
            }
        }
        Ok(())
    }

    /// The parent of `path` must be an existing folder.
    fn require_parent(&self, path: &FsPath) -> BackendResult<()> {
        let parent = path.parent().ok_or_else(|| BackendError::AlreadyExists {
            path: FsPath::root(),
        })?;
        match self.nodes.get(&parent) {
            Some(Node::Folder { .. }) => Ok(()),
            Some(Node::File { .. }) => Err(BackendError::NotAFolder { path: parent }),
            None => Err(BackendError::NotFound { path: parent }),
        }
    }

    fn file_data(&self, path: &FsPath) -> BackendResult<Arc<Vec<u8>>> {
        file_data(&self.nodes, path)
    }

    /// Insert a new entry at a free path.
    fn insert_new(&mut self, path: &FsPath, node: Node) -> BackendResult<()> {
        self.require_parent(path)?;
        if self.nodes.contains_key(path) {
            return Err(BackendError::AlreadyExists { path: path.clone() });
        }
        self.nodes.insert(path.clone(), node);
        Ok(())
    }

    fn subtree(&self, root: &FsPath) -> Vec<(FsPath, Node)> {
        subtree(&self.nodes, root)
    }

    fn remove_subtree(&mut self, root: &FsPath) {
        for (path, _) in self.subtree(root) {
            self.nodes.remove(&path);
        }
    }

    /// Move `src` and everything below it to `dst`.
    fn move_entry(&mut self, src: &FsPath, dst: &FsPath, overwrite: bool) -> BackendResult<()> {
        if src.is_root() {
            return Err(BackendError::other("the workspace root cannot be moved"));
        }
        if !self.nodes.contains_key(src) {
            return Err(BackendError::NotFound { path: src.clone() });
        }
        if src == dst {
            return Ok(());
        }
        if dst.starts_with(src) {
            return Err(BackendError::other(format!("cannot move {src} into itself")));
        }
        self.require_parent(dst)?;
        if self.nodes.contains_key(dst) {
            if !overwrite {
                return Err(BackendError::AlreadyExists { path: dst.clone() });
            }
            self.remove_subtree(dst);
        }

        for (path, node) in self.subtree(src) {
            self.nodes.remove(&path);
            if let Some(moved) = path.rebase(src, dst) {
                self.nodes.insert(moved, node);
            }
        }
        Ok(())
    }

    /// `path` itself when free, otherwise its first free counter variant.
    fn free_path(&self, path: &FsPath) -> BackendResult<FsPath> {
        if !self.nodes.contains_key(path) {
            return Ok(path.clone());
        }
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(BackendError::AlreadyExists { path: path.clone() });
        };
        let free = next_free_name(name, |candidate| {
            parent
                .join(candidate)
                .map(|p| self.nodes.contains_key(&p))
                .unwrap_or(true)
        });
        parent
            .join(&free)
            .map_err(|e| BackendError::other(e.to_string()))
    }
}

fn file_data(nodes: &Nodes, path: &FsPath) -> BackendResult<Arc<Vec<u8>>> {
    match nodes.get(path) {
        Some(Node::File { data, .. }) => Ok(Arc::clone(data)),
        Some(Node::Folder { .. }) => Err(BackendError::NotAFile { path: path.clone() }),
        None => Err(BackendError::NotFound { path: path.clone() }),
    }
}

fn subtree(nodes: &Nodes, root: &FsPath) -> Vec<(FsPath, Node)> {
    nodes
        .range(root.clone()..)
        .take_while(|(path, _)| path.starts_with(root))
        .map(|(path, node)| (path.clone(), node.clone()))
        .collect()
}

fn stat(nodes: &Nodes, path: &FsPath) -> BackendResult<EntryStat> {
    nodes
        .get(path)
        .map(|node| node.stat(path))
        .ok_or_else(|| BackendError::NotFound { path: path.clone() })
}

/// Recursively list `root`, honoring `limits`.
fn list(nodes: &Nodes, root: &FsPath, limits: ListingLimits) -> BackendResult<EntryTree> {
    match nodes.get(root) {
        None => return Err(BackendError::NotFound { path: root.clone() }),
        Some(Node::File { id, data }) => {
            return Ok(EntryTree::single(FileEntry::new(
                *id,
                root.clone(),
                data.len() as u64,
            )));
        }
        Some(Node::Folder { .. }) => {}
    }

    let mut files = Vec::new();
    let mut max_recursion_reached = false;
    let mut max_files_reached = false;

    let below = nodes
        .range(root.clone()..)
        .skip(1)
        .take_while(|(path, _)| path.starts_with(root));
    for (path, node) in below {
        let Node::File { id, data } = node else {
            continue;
        };
        if limits
            .max_depth
            .is_some_and(|max| path.depth() - root.depth() > max)
        {
            max_recursion_reached = true;
            continue;
        }
        if limits.max_files.is_some_and(|max| files.len() >= max) {
            max_files_reached = true;
            break;
        }
        files.push(FileEntry::new(*id, path.clone(), data.len() as u64));
    }

    let mut tree = EntryTree::new(files);
    tree.max_recursion_reached = max_recursion_reached;
    tree.max_files_reached = max_files_reached;
    Ok(tree)
}

/// Copy of `nodes` below `src`, re-rooted at `dst` with fresh identities.
fn copy_subtree(nodes: &[(FsPath, Node)], src: &FsPath, dst: &FsPath) -> Vec<(FsPath, Node)> {
    nodes
        .iter()
        .filter_map(|(path, node)| {
            let target = path.rebase(src, dst)?;
            let node = match node {
                Node::File { data, .. } => Node::File {
                    id: EntryId::new(),
                    data: Arc::clone(data),
                },
                Node::Folder { .. } => Node::Folder { id: EntryId::new() },
            };
            Some((target, node))
        })
        .collect()
}

impl Workspace for MemoryWorkspace {
    fn info(&self) -> WorkspaceInfo {
        self.state().info.clone()
    }

    fn create_folder<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.check(path)?;
            state.insert_new(path, Node::Folder { id: EntryId::new() })
        })
    }

    fn rename<'a>(
        &'a self,
        src: &'a FsPath,
        dst: &'a FsPath,
        overwrite: bool,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.check(src)?;
            state.move_entry(src, dst, overwrite)
        })
    }

    fn move_with_counter<'a>(
        &'a self,
        src: &'a FsPath,
        dst: &'a FsPath,
    ) -> BoxFuture<'a, BackendResult<FsPath>> {
        Box::pin(async move {
            let mut state = self.state();
            state.check(src)?;
            if src == dst {
                return Ok(dst.clone());
            }
            let target = state.free_path(dst)?;
            state.move_entry(src, &target, false)?;
            Ok(target)
        })
    }

    fn stat<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryStat>> {
        Box::pin(async move {
            let state = self.state();
            state.check(path)?;
            stat(&state.nodes, path)
        })
    }

    fn list_tree<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryTree>> {
        Box::pin(async move {
            let state = self.state();
            state.check(path)?;
            list(&state.nodes, path, self.shared.limits)
        })
    }

    fn open_read<'a>(
        &'a self,
        path: &'a FsPath,
        at: Option<PointInTime>,
    ) -> BoxFuture<'a, BackendResult<Box<dyn ReadStream>>> {
        Box::pin(async move {
            let data = {
                let state = self.state();
                state.check(path)?;
                match at {
                    Some(at) => {
                        let nodes = history::revision(&state.snapshots, at)?;
                        file_data(nodes, path)?
                    }
                    None => state.file_data(path)?,
                }
            };
            Ok(Box::new(MemoryReader::new(data, self.shared.reads_open.subscribe()))
                as Box<dyn ReadStream>)
        })
    }

    fn import_file<'a>(
        &'a self,
        mut reader: Box<dyn ReadStream>,
        temp: &'a FsPath,
        progress: ProgressSender,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.reads_open().await;
            let mut data = Vec::new();
            while let Some(chunk) = reader.read_chunk(self.shared.chunk_size).await? {
                data.extend_from_slice(&chunk);
                let _ = progress.send(ProgressUpdate::bytes(data.len() as u64));
            }
            let mut state = self.state();
            state.check(temp)?;
            state.insert_new(
                temp,
                Node::File {
                    id: EntryId::new(),
                    data: Arc::new(data),
                },
            )
        })
    }

    fn copy_file<'a>(
        &'a self,
        src: &'a FsPath,
        temp: &'a FsPath,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.reads_open().await;
            let mut state = self.state();
            state.check(src)?;
            let data = state.file_data(src)?;
            state.insert_new(
                temp,
                Node::File {
                    id: EntryId::new(),
                    data,
                },
            )
        })
    }

    fn copy_folder<'a>(
        &'a self,
        src: &'a FsPath,
        temp: &'a FsPath,
        progress: ProgressSender,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.reads_open().await;
            let copied = {
                let state = self.state();
                state.check(src)?;
                match state.nodes.get(src) {
                    Some(Node::Folder { .. }) => {}
                    Some(Node::File { .. }) => {
                        return Err(BackendError::NotAFolder { path: src.clone() });
                    }
                    None => return Err(BackendError::NotFound { path: src.clone() }),
                }
                state.require_parent(temp)?;
                copy_subtree(&state.subtree(src), src, temp)
            };

            let mut update = ProgressUpdate::default();
            for (_, node) in &copied {
                if let Node::File { data, .. } = node {
                    update.bytes += data.len() as u64;
                    update.files += 1;
                    let _ = progress.send(update);
                    tokio::task::yield_now().await;
                }
            }

            let mut state = self.state();
            if state.nodes.contains_key(temp) {
                return Err(BackendError::AlreadyExists { path: temp.clone() });
            }
            state.require_parent(temp)?;
            state.nodes.extend(copied);
            Ok(())
        })
    }

    fn transaction(&self) -> Box<dyn StagingTransaction> {
        Box::new(MemoryTransaction::new(self.clone()))
    }

    fn history(&self) -> Box<dyn HistorySession> {
        Box::new(MemoryHistory::new(self.clone()))
    }
}

/// Chunked reader over shared bytes.
struct MemoryReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    gate: watch::Receiver<bool>,
}

impl MemoryReader {
    fn new(data: Arc<Vec<u8>>, gate: watch::Receiver<bool>) -> Self {
        Self { data, pos: 0, gate }
    }
}

impl ReadStream for MemoryReader {
    fn read_chunk(&mut self, max_len: usize) -> BoxFuture<'_, BackendResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            wait_open(self.gate.clone()).await;
            tokio::task::yield_now().await;
            if self.pos >= self.data.len() {
                return Ok(None);
            }
            let end = (self.pos + max_len.max(1)).min(self.data.len());
            let chunk = self.data[self.pos..end].to_vec();
            self.pos = end;
            Ok(Some(chunk))
        })
    }
}

/// Resolves handles to in-memory workspaces.
#[derive(Default)]
pub struct MemoryProvider {
    workspaces: Mutex<HashMap<WorkspaceHandle, MemoryWorkspace>>,
    next_handle: AtomicU64,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn workspaces(&self) -> MutexGuard<'_, HashMap<WorkspaceHandle, MemoryWorkspace>> {
        self.workspaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a workspace under a fresh handle.
    pub fn insert(&self, workspace: MemoryWorkspace) -> WorkspaceHandle {
        let handle = WorkspaceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.workspaces().insert(handle, workspace);
        handle
    }

    /// Unregister a workspace; later lookups of `handle` fail.
    pub fn remove(&self, handle: WorkspaceHandle) -> Option<MemoryWorkspace> {
        self.workspaces().remove(&handle)
    }

    pub fn get(&self, handle: WorkspaceHandle) -> Option<MemoryWorkspace> {
        self.workspaces().get(&handle).cloned()
    }

    fn lookup(&self, handle: WorkspaceHandle) -> BackendResult<MemoryWorkspace> {
        self.get(handle)
            .ok_or(BackendError::WorkspaceUnavailable { handle })
    }
}

impl WorkspaceProvider for MemoryProvider {
    fn info(&self, handle: WorkspaceHandle) -> BoxFuture<'_, BackendResult<WorkspaceInfo>> {
        Box::pin(async move { Ok(Workspace::info(&self.lookup(handle)?)) })
    }

    fn workspace(&self, handle: WorkspaceHandle) -> BoxFuture<'_, BackendResult<Arc<dyn Workspace>>> {
        Box::pin(async move { Ok(Arc::new(self.lookup(handle)?) as Arc<dyn Workspace>) })
    }
}

/// An external file backed by bytes in memory.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    data: Arc<Vec<u8>>,
    fail: bool,
}

impl MemoryFile {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(data.into()),
            fail: false,
        }
    }

    /// A file that cannot be opened.
    pub fn unreadable() -> Self {
        Self {
            data: Arc::new(Vec::new()),
            fail: true,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ExternalFile for MemoryFile {
    fn open(&self) -> BoxFuture<'_, BackendResult<Box<dyn ReadStream>>> {
        Box::pin(async move {
            if self.fail {
                return Err(BackendError::io("file is not readable"));
            }
            // External files are never held by the workspace read gate.
            let (_, gate) = watch::channel(true);
            Ok(Box::new(MemoryReader::new(Arc::clone(&self.data), gate)) as Box<dyn ReadStream>)
        })
    }
}

#[derive(Debug, Default)]
struct DestinationState {
    data: Vec<u8>,
    opened: bool,
    closed: bool,
    aborted: bool,
    removed: bool,
    fail_writes: bool,
}

/// A download destination collecting bytes in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    name: String,
    state: Arc<Mutex<DestinationState>>,
}

impl MemoryDestination {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    /// A destination whose writes fail.
    pub fn failing(name: impl Into<String>) -> Self {
        let destination = Self::new(name);
        destination.state().fail_writes = true;
        destination
    }

    fn state(&self) -> MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.state().data.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn is_aborted(&self) -> bool {
        self.state().aborted
    }

    pub fn is_removed(&self) -> bool {
        self.state().removed
    }
}

impl Destination for MemoryDestination {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> BoxFuture<'_, BackendResult<Box<dyn WriteStream>>> {
        Box::pin(async move {
            let mut state = self.state();
            state.opened = true;
            state.removed = false;
            state.data.clear();
            Ok(Box::new(MemorySink {
                state: Arc::clone(&self.state),
            }) as Box<dyn WriteStream>)
        })
    }

    fn remove(&self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.data.clear();
            state.removed = true;
            Ok(())
        })
    }
}

struct MemorySink {
    state: Arc<Mutex<DestinationState>>,
}

impl MemorySink {
    fn state(&self) -> MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WriteStream for MemorySink {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            if state.fail_writes {
                return Err(BackendError::io("destination rejected the write"));
            }
            if state.closed || state.aborted {
                return Err(BackendError::io("stream already finished"));
            }
            state.data.extend_from_slice(data);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.state().closed = true;
            Ok(())
        })
    }

    fn abort(&mut self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.state().aborted = true;
            Ok(())
        })
    }
}
