use stowage_core::{
    DuplicatePolicy, EntryId, EntryStat, EntryTree, FileEntry, FolderEntry, FsPath,
    SchedulerConfig, TreeLimit, next_free_name, tree_totals,
};

fn path(raw: &str) -> FsPath {
    FsPath::parse(raw).unwrap()
}

#[test]
fn test_file_entry_name_follows_path() {
    let entry = FileEntry::new(EntryId::new(), path("/music/track 01.flac"), 3_000);
    assert_eq!(entry.name, "track 01.flac");
    assert_eq!(entry.size, 3_000);
}

#[test]
fn test_trees_from_mixed_sources() {
    let single = EntryTree::single(FileEntry::new(EntryId::new(), path("/a.txt"), 10));
    let listed = EntryTree::new(vec![
        FileEntry::new(EntryId::new(), path("/dir/b.txt"), 20),
        FileEntry::new(EntryId::new(), path("/dir/sub/c.txt"), 0),
    ]);

    let (files, bytes) = tree_totals([&single, &listed]);
    assert_eq!(files, 3);
    assert_eq!(bytes, 30);
    assert!(single.limit().is_none());
}

#[test]
fn test_saturated_tree_reports_limit() {
    let tree = EntryTree {
        max_recursion_reached: true,
        ..EntryTree::default()
    };
    assert_eq!(tree.limit(), Some(TreeLimit::Recursion));
}

#[test]
fn test_entry_stat_discrimination() {
    let file = EntryStat::File(FileEntry::new(EntryId::new(), path("/f"), 1));
    let folder = EntryStat::Folder(FolderEntry::new(EntryId::new(), path("/d")));
    assert!(file.is_file() && !file.is_folder());
    assert!(folder.is_folder() && !folder.is_file());
    assert_ne!(file.id(), folder.id());
}

#[test]
fn test_counter_names_never_collide() {
    let existing = ["photo.jpg", "photo (1).jpg"];
    let name = next_free_name("photo.jpg", |candidate| existing.contains(&candidate));
    assert_eq!(name, "photo (2).jpg");
    assert!(!existing.contains(&name.as_str()));
}

#[test]
fn test_policy_serde_round_names() {
    let json = serde_json::to_string(&DuplicatePolicy::IgnoreExisting).unwrap();
    assert_eq!(json, "\"ignore_existing\"");
}

#[test]
fn test_config_from_json_file_contents() {
    let raw = r#"{ "max_concurrent": 2, "poll_interval_ms": 50, "chunk_size": 4096 }"#;
    let config: SchedulerConfig = serde_json::from_str(raw).unwrap();
    assert_eq!(config.max_concurrent, 2);
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.temp_prefix, ".stowage-tmp-");
}
