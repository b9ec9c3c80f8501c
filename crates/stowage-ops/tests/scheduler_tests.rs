use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use stowage_core::{
    DuplicatePolicy, EntryStat, EntryTree, FsPath, OperationId, SchedulerConfig, WorkspaceHandle,
};
use stowage_ops::memory::{
    ListingLimits, MemoryDestination, MemoryFile, MemoryProvider, MemoryWorkspace,
};
use stowage_ops::{
    BackendResult, BoxFuture, ErrorKind, EventKind, ExternalFile, ImportSource,
    LocalFileDestination, OperationEvent, OperationKind, OperationStatus, ReadStream, Scheduler,
    Workspace,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn p(raw: &str) -> FsPath {
    FsPath::parse(raw).unwrap()
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig::builder()
        .poll_interval_ms(10u64)
        .build()
        .unwrap()
}

/// Collects every event the scheduler publishes.
struct Recorder {
    rx: UnboundedReceiver<OperationEvent>,
    log: Vec<OperationEvent>,
}

impl Recorder {
    async fn until(&mut self, mut done: impl FnMut(&[OperationEvent]) -> bool) {
        let waited = timeout(WAIT, async {
            while !done(&self.log) {
                match self.rx.recv().await {
                    Some(event) => self.log.push(event),
                    None => break,
                }
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for events: {:?}", self.kinds_all());
    }

    async fn until_idle(&mut self) {
        self.until(|log| log.last().is_some_and(|e| e.kind() == EventKind::AllFinished))
            .await;
    }

    async fn until_count(&mut self, kind: EventKind, count: usize) {
        self.until(|log| log.iter().filter(|e| e.kind() == kind).count() >= count)
            .await;
    }

    fn kinds_all(&self) -> Vec<EventKind> {
        self.log.iter().map(|e| e.kind()).collect()
    }

    /// Event kinds of one operation, in publication order.
    fn kinds(&self, id: OperationId) -> Vec<EventKind> {
        self.log
            .iter()
            .filter(|e| e.operation_id() == Some(id))
            .map(|e| e.kind())
            .collect()
    }

    fn terminal(&self, id: OperationId) -> &OperationEvent {
        let terminal: Vec<_> = self
            .log
            .iter()
            .filter(|e| e.operation_id() == Some(id) && e.is_terminal())
            .collect();
        assert_eq!(terminal.len(), 1, "expected exactly one terminal event");
        terminal[0]
    }

    fn failure_kind(&self, id: OperationId) -> ErrorKind {
        match self.terminal(id) {
            OperationEvent::Failed { error, .. } => error.kind,
            other => panic!("expected a failure, got {:?}", other.kind()),
        }
    }

    /// Assert the fixed per-operation order and return the terminal kind.
    fn lifecycle(&self, id: OperationId) -> EventKind {
        let kinds = self.kinds(id);
        assert_eq!(kinds.first(), Some(&EventKind::Added));
        let terminal = *kinds.last().unwrap();
        assert!(matches!(
            terminal,
            EventKind::Finished | EventKind::Cancelled | EventKind::Failed
        ));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| matches!(k, EventKind::Finished | EventKind::Cancelled | EventKind::Failed))
                .count(),
            1
        );
        terminal
    }

    fn assert_progress_monotonic(&self, id: OperationId) -> usize {
        let mut last = 0;
        let mut count = 0;
        for event in &self.log {
            if let OperationEvent::Progress {
                operation,
                progress,
            } = event
            {
                if operation.id != id {
                    continue;
                }
                assert!(progress.global.done >= last, "global progress went backwards");
                assert!(progress.global.percent <= 100);
                assert!(progress.file.percent <= 100);
                assert!(progress.global.current_file < progress.global.file_count.max(1));
                last = progress.global.done;
                count += 1;
            }
        }
        count
    }
}

struct Harness {
    provider: Arc<MemoryProvider>,
    workspace: MemoryWorkspace,
    handle: WorkspaceHandle,
    scheduler: Scheduler,
    events: Recorder,
}

impl Harness {
    fn new(workspace: MemoryWorkspace) -> Self {
        Self::with_config(workspace, test_config())
    }

    fn with_config(workspace: MemoryWorkspace, config: SchedulerConfig) -> Self {
        let provider = Arc::new(MemoryProvider::new());
        let handle = provider.insert(workspace.clone());
        let scheduler = Scheduler::with_config(provider.clone(), config);
        let (_, rx) = scheduler.subscribe_channel();
        Self {
            provider,
            workspace,
            handle,
            scheduler,
            events: Recorder {
                rx,
                log: Vec::new(),
            },
        }
    }

    fn stat(&self, raw: &str) -> EntryStat {
        self.workspace.entry(&p(raw)).unwrap()
    }

    fn file(&self, raw: &str) -> stowage_core::FileEntry {
        match self.stat(raw) {
            EntryStat::File(file) => file,
            EntryStat::Folder(_) => panic!("{raw} is a folder"),
        }
    }

    async fn download_to(&self, raw: &str, destination: &MemoryDestination) -> OperationId {
        self.scheduler
            .download(self.handle, self.file(raw), Arc::new(destination.clone()), None)
            .await
            .unwrap()
    }

    fn has_temp_entries(&self) -> bool {
        let prefix = &self.scheduler.config().temp_prefix;
        self.workspace
            .paths()
            .iter()
            .any(|path| path.name().is_some_and(|name| name.starts_with(prefix.as_str())))
    }
}

#[tokio::test]
async fn test_import_commits_every_file() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    let sources = vec![
        ImportSource::new("a.txt", 5, Arc::new(MemoryFile::new("hello"))),
        ImportSource::new("photos/2024/b.jpg", 3, Arc::new(MemoryFile::new("jpg"))),
    ];

    let id = h
        .scheduler
        .import(h.handle, sources, p("/inbox"), DuplicatePolicy::IgnoreExisting)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    let kinds = h.events.kinds(id);
    assert_eq!(kinds[1], EventKind::Started);
    assert!(kinds.contains(&EventKind::Finalizing));
    assert!(h.events.assert_progress_monotonic(id) >= 2);

    assert_eq!(h.workspace.read_file(&p("/inbox/a.txt")).unwrap(), b"hello");
    assert_eq!(
        h.workspace.read_file(&p("/inbox/photos/2024/b.jpg")).unwrap(),
        b"jpg"
    );
    assert!(!h.has_temp_entries());
    assert!(!h.scheduler.has_operations());
}

#[tokio::test]
async fn test_import_failure_reaches_no_final_name() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    let sources = vec![
        ImportSource::new("a.txt", 5, Arc::new(MemoryFile::new("hello"))),
        ImportSource::new("b.txt", 0, Arc::new(MemoryFile::unreadable())),
    ];

    let id = h
        .scheduler
        .import(h.handle, sources, p("/inbox"), DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Failed);
    assert_eq!(h.events.failure_kind(id), ErrorKind::Delegate);
    assert!(!h.events.kinds(id).contains(&EventKind::Finalizing));
    assert!(!h.workspace.exists(&p("/inbox/a.txt")));
    assert!(!h.has_temp_entries());
}

#[tokio::test]
async fn test_import_rejects_empty_relative_path() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    let sources = vec![ImportSource::new("", 1, Arc::new(MemoryFile::new("x")))];

    let id = h
        .scheduler
        .import(h.handle, sources, p("/inbox"), DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_copy_files_and_folders() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/src/docs/x.txt"), "xx").unwrap();
    ws.add_file(&p("/src/docs/y/z.txt"), "zzz").unwrap();
    ws.add_file(&p("/src/top.txt"), "top").unwrap();
    ws.add_folder(&p("/dst")).unwrap();
    let mut h = Harness::new(ws);

    let sources = vec![h.stat("/src/docs"), h.stat("/src/top.txt")];
    let id = h
        .scheduler
        .copy_entries(h.handle, sources, p("/dst"), DuplicatePolicy::IgnoreExisting)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    h.events.assert_progress_monotonic(id);
    let last = h
        .events
        .log
        .iter()
        .rev()
        .find_map(|e| match e {
            OperationEvent::Progress { progress, .. } => Some(progress.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(last.global.total, 8);
    assert_eq!(last.global.done, 8);
    assert_eq!(last.global.file_count, 3);
    assert_eq!(last.global.percent, 100);

    assert_eq!(h.workspace.read_file(&p("/dst/docs/y/z.txt")).unwrap(), b"zzz");
    assert_eq!(h.workspace.read_file(&p("/dst/top.txt")).unwrap(), b"top");
    assert!(h.workspace.exists(&p("/src/docs/x.txt")));
    assert!(!h.has_temp_entries());
}

#[tokio::test]
async fn test_copy_with_counter_keeps_both() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/src/top.txt"), "new").unwrap();
    ws.add_file(&p("/dst/top.txt"), "old").unwrap();
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .copy_entries(
            h.handle,
            vec![h.stat("/src/top.txt")],
            p("/dst"),
            DuplicatePolicy::AddCounter,
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    assert_eq!(h.workspace.read_file(&p("/dst/top.txt")).unwrap(), b"old");
    assert_eq!(h.workspace.read_file(&p("/dst/top (1).txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_copy_recursion_limit_stages_nothing() {
    let limits = ListingLimits {
        max_depth: Some(1),
        max_files: None,
    };
    let ws = MemoryWorkspace::with_limits("Team", limits);
    ws.add_file(&p("/src/a.txt"), "a").unwrap();
    ws.add_file(&p("/src/deep/er/b.txt"), "b").unwrap();
    ws.add_folder(&p("/dst")).unwrap();
    let mut h = Harness::new(ws);
    let before = h.workspace.paths();

    let id = h
        .scheduler
        .copy_entries(h.handle, vec![h.stat("/src")], p("/dst"), DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Failed);
    assert_eq!(h.events.failure_kind(id), ErrorKind::RecursionLimit);
    assert_eq!(h.events.assert_progress_monotonic(id), 0);
    assert_eq!(h.workspace.paths(), before);
}

#[tokio::test]
async fn test_copy_file_count_limit() {
    let limits = ListingLimits {
        max_depth: None,
        max_files: Some(1),
    };
    let ws = MemoryWorkspace::with_limits("Team", limits);
    ws.add_file(&p("/src/a.txt"), "a").unwrap();
    ws.add_file(&p("/src/b.txt"), "b").unwrap();
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .copy_entries(h.handle, vec![h.stat("/src")], FsPath::root(), DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::FileCountLimit);
}

#[tokio::test]
async fn test_copy_cancel_commits_nothing() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/src/a.txt"), "a").unwrap();
    ws.add_file(&p("/src/b.txt"), "b").unwrap();
    ws.add_folder(&p("/dst")).unwrap();
    let mut h = Harness::new(ws);
    let before = h.workspace.paths();

    h.workspace.hold_reads();
    let id = h
        .scheduler
        .copy_entries(
            h.handle,
            vec![h.stat("/src/a.txt"), h.stat("/src/b.txt")],
            p("/dst"),
            DuplicatePolicy::Replace,
        )
        .await
        .unwrap();
    h.events.until_count(EventKind::Started, 1).await;
    assert!(h.scheduler.cancel(id).await);
    h.workspace.release_reads();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Cancelled);
    assert!(!h.events.kinds(id).contains(&EventKind::Finalizing));
    assert!(!h.workspace.exists(&p("/dst/a.txt")));
    assert!(!h.workspace.exists(&p("/dst/b.txt")));
    assert!(!h.has_temp_entries());
    assert_eq!(h.workspace.paths(), before);
}

#[tokio::test]
async fn test_move_with_counter() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/in/report.pdf"), "new").unwrap();
    ws.add_file(&p("/out/report.pdf"), "old").unwrap();
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .move_entries(
            h.handle,
            vec![h.stat("/in/report.pdf")],
            p("/out"),
            DuplicatePolicy::AddCounter,
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    assert!(!h.workspace.exists(&p("/in/report.pdf")));
    assert_eq!(h.workspace.read_file(&p("/out/report.pdf")).unwrap(), b"old");
    assert_eq!(
        h.workspace.read_file(&p("/out/report (1).pdf")).unwrap(),
        b"new"
    );
    assert_eq!(
        h.events
            .kinds(id)
            .iter()
            .filter(|k| **k == EventKind::Progress)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_move_failure_moves_entries_back() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/in/a.txt"), "a").unwrap();
    ws.add_file(&p("/in/b.txt"), "b").unwrap();
    ws.add_folder(&p("/out")).unwrap();
    ws.fail_on(&p("/in/b.txt"));
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .move_entries(
            h.handle,
            vec![h.stat("/in/a.txt"), h.stat("/in/b.txt")],
            p("/out"),
            DuplicatePolicy::IgnoreExisting,
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::Delegate);
    assert_eq!(h.workspace.read_file(&p("/in/a.txt")).unwrap(), b"a");
    assert!(!h.workspace.exists(&p("/out/a.txt")));
    assert!(h.workspace.exists(&p("/in/b.txt")));
}

#[tokio::test]
async fn test_move_with_counter_failure_moves_back() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/in/a.txt"), "new").unwrap();
    ws.add_file(&p("/in/b.txt"), "b").unwrap();
    ws.add_file(&p("/out/a.txt"), "old").unwrap();
    ws.fail_on(&p("/in/b.txt"));
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .move_entries(
            h.handle,
            vec![h.stat("/in/a.txt"), h.stat("/in/b.txt")],
            p("/out"),
            DuplicatePolicy::AddCounter,
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::Delegate);
    assert_eq!(h.workspace.read_file(&p("/in/a.txt")).unwrap(), b"new");
    assert_eq!(h.workspace.read_file(&p("/out/a.txt")).unwrap(), b"old");
    assert!(!h.workspace.exists(&p("/out/a (1).txt")));
    assert_eq!(
        h.workspace.paths(),
        vec![p("/in"), p("/in/a.txt"), p("/in/b.txt"), p("/out"), p("/out/a.txt")]
    );
}

#[tokio::test]
async fn test_move_ignore_existing_leaves_source() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/in/a.txt"), "new").unwrap();
    ws.add_file(&p("/out/a.txt"), "old").unwrap();
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .move_entries(
            h.handle,
            vec![h.stat("/in/a.txt")],
            p("/out"),
            DuplicatePolicy::IgnoreExisting,
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    assert_eq!(h.workspace.read_file(&p("/in/a.txt")).unwrap(), b"new");
    assert_eq!(h.workspace.read_file(&p("/out/a.txt")).unwrap(), b"old");
}

#[tokio::test]
async fn test_restore_from_history() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/docs/a.txt"), "v1").unwrap();
    ws.add_file(&p("/docs/sub/b.txt"), "b1").unwrap();
    let at = ws.snapshot();
    ws.add_file(&p("/docs/a.txt"), "v2").unwrap();
    ws.rename(&p("/docs/sub/b.txt"), &p("/b-moved.txt"), false)
        .await
        .unwrap();
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .restore(h.handle, vec![h.stat("/docs")], at, DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    assert!(h.events.kinds(id).contains(&EventKind::Finalizing));
    h.events.assert_progress_monotonic(id);
    assert_eq!(h.workspace.read_file(&p("/docs/a.txt")).unwrap(), b"v1");
    assert_eq!(h.workspace.read_file(&p("/docs/sub/b.txt")).unwrap(), b"b1");
    assert_eq!(h.workspace.read_file(&p("/b-moved.txt")).unwrap(), b"b1");
    assert!(!h.has_temp_entries());
}

#[tokio::test]
async fn test_restore_failure_mid_tree_commits_nothing() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/docs/a.txt"), "v1").unwrap();
    ws.add_file(&p("/docs/b.txt"), "b1").unwrap();
    let at = ws.snapshot();
    ws.add_file(&p("/docs/a.txt"), "v2").unwrap();
    ws.add_file(&p("/docs/b.txt"), "b2").unwrap();
    ws.fail_on(&p("/docs/b.txt"));
    let mut h = Harness::new(ws);
    let before = h.workspace.paths();

    let id = h
        .scheduler
        .restore(h.handle, vec![h.stat("/docs")], at, DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::Delegate);
    assert!(!h.events.kinds(id).contains(&EventKind::Finalizing));
    assert_eq!(h.workspace.read_file(&p("/docs/a.txt")).unwrap(), b"v2");
    assert_eq!(h.workspace.read_file(&p("/docs/b.txt")).unwrap(), b"b2");
    assert!(!h.has_temp_entries());
    assert_eq!(h.workspace.paths(), before);
}

#[tokio::test]
async fn test_restore_without_history_fails() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/docs/a.txt"), "v1").unwrap();
    let mut h = Harness::new(ws);

    let id = h
        .scheduler
        .restore(
            h.handle,
            vec![h.stat("/docs/a.txt")],
            chrono::Utc::now(),
            DuplicatePolicy::Replace,
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::Delegate);
    assert_eq!(h.workspace.read_file(&p("/docs/a.txt")).unwrap(), b"v1");
}

#[tokio::test]
async fn test_download_streams_in_chunks() {
    let ws = MemoryWorkspace::new("Team");
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    ws.add_file(&p("/big.bin"), data.clone()).unwrap();
    let config = SchedulerConfig::builder()
        .poll_interval_ms(10u64)
        .chunk_size(64usize)
        .build()
        .unwrap();
    let mut h = Harness::with_config(ws, config);
    let destination = MemoryDestination::new("big.bin");

    let id = h.download_to("/big.bin", &destination).await;
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    assert_eq!(h.events.assert_progress_monotonic(id), 16);
    assert_eq!(destination.contents(), data);
    assert!(destination.is_closed());
    assert!(!destination.is_removed());
}

#[tokio::test]
async fn test_download_past_revision() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/a.txt"), "before").unwrap();
    let at = ws.snapshot();
    ws.add_file(&p("/a.txt"), "after").unwrap();
    let mut h = Harness::new(ws);
    let destination = MemoryDestination::new("a.txt");

    h.scheduler
        .download(
            h.handle,
            h.file("/a.txt"),
            Arc::new(destination.clone()),
            Some(at),
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(destination.contents(), b"before");
}

#[tokio::test]
async fn test_download_failure_removes_destination() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/a.txt"), "content").unwrap();
    let mut h = Harness::new(ws);
    let destination = MemoryDestination::failing("a.txt");

    let id = h.download_to("/a.txt", &destination).await;
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::Delegate);
    assert!(destination.is_aborted());
    assert!(destination.is_removed());
    assert!(!destination.is_closed());
}

#[tokio::test]
async fn test_download_cancel_removes_destination() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/a.txt"), vec![1u8; 4096]).unwrap();
    let config = SchedulerConfig::builder()
        .poll_interval_ms(10u64)
        .chunk_size(1024usize)
        .build()
        .unwrap();
    let mut h = Harness::with_config(ws, config);
    let destination = MemoryDestination::new("a.txt");

    h.workspace.hold_reads();
    let id = h.download_to("/a.txt", &destination).await;
    h.events.until_count(EventKind::Started, 1).await;
    assert_eq!(h.scheduler.status(id), Some(OperationStatus::Running));

    assert!(h.scheduler.cancel(id).await);
    h.workspace.release_reads();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Cancelled);
    assert!(destination.is_aborted());
    assert!(destination.is_removed());
    assert!(destination.contents().is_empty());
}

#[tokio::test]
async fn test_archive_download_to_local_zip() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/project/a.txt"), "alpha").unwrap();
    ws.add_file(&p("/project/sub/b.txt"), "beta").unwrap();
    let mut h = Harness::new(ws);
    let tree = h.workspace.list_tree(&p("/project")).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("project.zip");
    let id = h
        .scheduler
        .download_archive(
            h.handle,
            vec![tree],
            Arc::new(LocalFileDestination::new(&zip_path)),
            p("/project"),
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    assert!(h.events.kinds(id).contains(&EventKind::Finalizing));
    h.events.assert_progress_monotonic(id);

    let file = std::fs::File::open(&zip_path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "sub/b.txt"]);

    let mut content = String::new();
    archive
        .by_name("sub/b.txt")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "beta");
}

#[tokio::test]
async fn test_empty_archive_finishes_with_zero_total() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    let destination = MemoryDestination::new("empty.zip");

    let id = h
        .scheduler
        .download_archive(h.handle, vec![], Arc::new(destination.clone()), FsPath::root())
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Finished);
    assert_eq!(h.events.assert_progress_monotonic(id), 0);
    match &h.events.terminal(id).operation().unwrap().kind {
        OperationKind::DownloadArchive(request) => {
            assert_eq!(request.total_size, 0);
            assert_eq!(request.total_files, 0);
        }
        _ => panic!("wrong operation kind"),
    }
    assert!(destination.is_closed());
    assert!(!destination.contents().is_empty());
}

#[tokio::test]
async fn test_archive_with_saturated_tree_fails() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    let destination = MemoryDestination::new("x.zip");
    let mut tree = EntryTree::default();
    tree.max_files_reached = true;

    let id = h
        .scheduler
        .download_archive(h.handle, vec![tree], Arc::new(destination.clone()), FsPath::root())
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::FileCountLimit);
    assert!(!destination.is_closed());
}

#[tokio::test]
async fn test_archive_cancel_removes_destination() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/project/a.bin"), vec![3u8; 2048]).unwrap();
    ws.add_file(&p("/project/b.bin"), vec![4u8; 2048]).unwrap();
    let config = SchedulerConfig::builder()
        .poll_interval_ms(10u64)
        .chunk_size(512usize)
        .build()
        .unwrap();
    let mut h = Harness::with_config(ws, config);
    let tree = h.workspace.list_tree(&p("/project")).await.unwrap();
    let destination = MemoryDestination::new("project.zip");

    h.workspace.hold_reads();
    let id = h
        .scheduler
        .download_archive(
            h.handle,
            vec![tree],
            Arc::new(destination.clone()),
            p("/project"),
        )
        .await
        .unwrap();
    h.events.until_count(EventKind::Started, 1).await;
    assert!(h.scheduler.cancel(id).await);
    h.workspace.release_reads();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Cancelled);
    assert!(destination.is_aborted());
    assert!(destination.is_removed());
    assert!(!destination.is_closed());
    assert!(destination.contents().is_empty());
}

#[tokio::test]
async fn test_archive_read_failure_removes_destination() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/project/a.txt"), "alpha").unwrap();
    ws.add_file(&p("/project/b.txt"), "beta").unwrap();
    ws.fail_on(&p("/project/b.txt"));
    let mut h = Harness::new(ws);
    let tree = h.workspace.list_tree(&p("/project")).await.unwrap();
    let destination = MemoryDestination::new("project.zip");

    let id = h
        .scheduler
        .download_archive(
            h.handle,
            vec![tree],
            Arc::new(destination.clone()),
            p("/project"),
        )
        .await
        .unwrap();
    h.events.until_idle().await;

    assert_eq!(h.events.failure_kind(id), ErrorKind::Delegate);
    assert!(!h.events.kinds(id).contains(&EventKind::Finalizing));
    assert!(destination.is_aborted());
    assert!(destination.is_removed());
    assert!(!destination.is_closed());
}

#[tokio::test]
async fn test_concurrency_bound_and_fifo() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/a.txt"), "a").unwrap();
    let mut h = Harness::new(ws);

    let running = Arc::new(std::sync::atomic::AtomicIsize::new(0));
    let peak = Arc::new(std::sync::atomic::AtomicIsize::new(0));
    {
        let running = running.clone();
        let peak = peak.clone();
        h.scheduler.subscribe_fn(move |event| {
            use std::sync::atomic::Ordering::SeqCst;
            if event.kind() == EventKind::Started {
                let now = running.fetch_add(1, SeqCst) + 1;
                peak.fetch_max(now, SeqCst);
            } else if event.is_terminal() {
                running.fetch_sub(1, SeqCst);
            }
        });
    }

    h.workspace.hold_reads();
    let mut ids = Vec::new();
    for i in 0..5 {
        let destination = MemoryDestination::new(format!("out-{i}"));
        ids.push(h.download_to("/a.txt", &destination).await);
    }

    h.events.until_count(EventKind::Started, 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.scheduler.running_count(), 3);
    assert_eq!(h.scheduler.pending_count(), 2);
    assert_eq!(h.scheduler.status(ids[4]), Some(OperationStatus::Pending));
    let running: Vec<OperationId> = h.scheduler.running().iter().map(|op| op.id).collect();
    assert_eq!(running, ids[..3]);

    h.workspace.release_reads();
    h.events.until_idle().await;

    let started: Vec<OperationId> = h
        .events
        .log
        .iter()
        .filter(|e| e.kind() == EventKind::Started)
        .filter_map(|e| e.operation_id())
        .collect();
    assert_eq!(started, ids);
    assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 3);
    for id in &ids {
        assert_eq!(h.events.lifecycle(*id), EventKind::Finished);
    }
}

#[tokio::test]
async fn test_cancel_pending_operation() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/a.txt"), "a").unwrap();
    let mut h = Harness::new(ws);

    h.workspace.hold_reads();
    for i in 0..3 {
        h.download_to("/a.txt", &MemoryDestination::new(format!("busy-{i}")))
            .await;
    }
    let destination = MemoryDestination::new("x");
    let x = h.download_to("/a.txt", &destination).await;
    h.events.until_count(EventKind::Started, 3).await;
    assert_eq!(h.scheduler.status(x), Some(OperationStatus::Pending));

    assert!(h.scheduler.cancel(x).await);
    assert!(!h.scheduler.cancel(x).await);
    assert_eq!(h.scheduler.status(x), None);

    h.workspace.release_reads();
    h.events.until_idle().await;

    assert_eq!(h.events.kinds(x), vec![EventKind::Added, EventKind::Cancelled]);
    assert!(destination.contents().is_empty());
    assert!(!destination.is_closed());
}

#[tokio::test]
async fn test_cancel_running_import_commits_nothing() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    let sources = vec![
        ImportSource::new("a.txt", 1, Arc::new(MemoryFile::new("a"))),
        ImportSource::new("b.txt", 1, Arc::new(MemoryFile::new("b"))),
    ];

    h.workspace.hold_reads();
    let id = h
        .scheduler
        .import(h.handle, sources, p("/inbox"), DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_count(EventKind::Started, 1).await;
    assert!(h.scheduler.cancel(id).await);
    assert!(h.scheduler.cancel(id).await);
    h.workspace.release_reads();
    h.events.until_idle().await;

    assert_eq!(h.events.lifecycle(id), EventKind::Cancelled);
    assert!(!h.workspace.exists(&p("/inbox/a.txt")));
    assert!(!h.workspace.exists(&p("/inbox/b.txt")));
    assert!(!h.has_temp_entries());
}

#[tokio::test]
async fn test_cancel_after_settlement_is_noop() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/a.txt"), "a").unwrap();
    let mut h = Harness::new(ws);

    let id = h.download_to("/a.txt", &MemoryDestination::new("a")).await;
    h.events.until_idle().await;
    let seen = h.events.log.len();

    assert!(!h.scheduler.cancel(id).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.events.rx.try_recv().is_err());
    assert_eq!(h.events.log.len(), seen);
}

#[tokio::test]
async fn test_unknown_workspace_is_rejected() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    h.provider.remove(h.handle);

    let accepted = h
        .scheduler
        .copy_entries(h.handle, vec![], FsPath::root(), DuplicatePolicy::Replace)
        .await;

    assert!(accepted.is_none());
    assert!(h.events.rx.try_recv().is_err());
    assert!(!h.scheduler.has_operations());
}

#[tokio::test]
async fn test_descriptor_keeps_workspace_name() {
    let ws = MemoryWorkspace::new("Before");
    ws.add_file(&p("/a.txt"), "a").unwrap();
    let mut h = Harness::new(ws);

    h.workspace.hold_reads();
    let id = h.download_to("/a.txt", &MemoryDestination::new("a")).await;
    h.workspace.rename_workspace("After");
    h.workspace.release_reads();
    h.events.until_idle().await;

    let operation = h.events.terminal(id).operation().unwrap();
    assert_eq!(operation.workspace_name, "Before");
    assert_eq!(Workspace::info(&h.workspace).name, "After");
}

#[derive(Debug)]
struct ExplodingFile;

fn explode() -> BackendResult<Box<dyn ReadStream>> {
    panic!("source exploded")
}

impl ExternalFile for ExplodingFile {
    fn open(&self) -> BoxFuture<'_, BackendResult<Box<dyn ReadStream>>> {
        Box::pin(async { explode() })
    }
}

#[tokio::test]
async fn test_panicking_job_is_reported_unhandled() {
    let mut h = Harness::new(MemoryWorkspace::new("Team"));
    let sources = vec![ImportSource::new("a.txt", 1, Arc::new(ExplodingFile))];

    let id = h
        .scheduler
        .import(h.handle, sources, p("/inbox"), DuplicatePolicy::Replace)
        .await
        .unwrap();
    h.events.until_idle().await;

    match h.events.terminal(id) {
        OperationEvent::Failed { error, .. } => {
            assert_eq!(error.kind, ErrorKind::Unhandled);
            assert!(error.message.contains("source exploded"));
        }
        other => panic!("expected a failure, got {:?}", other.kind()),
    }
    assert!(!h.scheduler.has_operations());
}

#[tokio::test]
async fn test_stop_cancels_drains_and_restarts() {
    let ws = MemoryWorkspace::new("Team");
    ws.add_file(&p("/a.txt"), vec![0u8; 2048]).unwrap();
    let config = SchedulerConfig::builder()
        .poll_interval_ms(10u64)
        .chunk_size(512usize)
        .build()
        .unwrap();
    let mut h = Harness::with_config(ws, config);

    h.workspace.hold_reads();
    let first = h.download_to("/a.txt", &MemoryDestination::new("1")).await;
    let second = h.download_to("/a.txt", &MemoryDestination::new("2")).await;
    h.events.until_count(EventKind::Started, 2).await;

    let workspace = h.workspace.clone();
    tokio::join!(h.scheduler.stop(), async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        workspace.release_reads();
    });
    assert!(!h.scheduler.has_operations());
    h.events.until_idle().await;
    assert_eq!(h.events.lifecycle(first), EventKind::Cancelled);
    assert_eq!(h.events.lifecycle(second), EventKind::Cancelled);

    let third = h.download_to("/a.txt", &MemoryDestination::new("3")).await;
    h.events
        .until(|log| {
            log.iter()
                .any(|e| e.operation_id() == Some(third) && e.is_terminal())
        })
        .await;
    assert_eq!(h.events.lifecycle(third), EventKind::Finished);
}
