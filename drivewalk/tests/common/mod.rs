#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drive_core::{
    DriveError, FOLDER_MIME_TYPE, File, FileList, ListQuery, SHORTCUT_MIME_TYPE, ShortcutDetails,
    StatusCode,
};
use drivewalk::{
    CrawlConfig, DirCache, Drive, DriveApi, Entry, ExportTable, ListOptions, MemoryDirCache,
    RemoteError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

pub const ROOT_ID: &str = "root-id";

/// In-memory remote answering `files.list` queries built by the lister.
#[derive(Default)]
pub struct MemoryRemote {
    files: Vec<File>,
    /// Queries naming two or more parents come back empty.
    group_bug: bool,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
    gets: AtomicUsize,
}

impl MemoryRemote {
    pub fn new(files: Vec<File>) -> Self {
        Self {
            files,
            ..Self::default()
        }
    }

    pub fn with_group_bug(mut self) -> Self {
        self.group_bug = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), RemoteError> {
        let Some(delay) = self.delay else {
            return Ok(());
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(RemoteError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn matching(&self, q: &str) -> Vec<File> {
        let parents = quoted_before(q, " in parents");
        let names = quoted_after(q, "name=");
        let directories_only = q.contains(&format!("mimeType='{SHORTCUT_MIME_TYPE}'"));
        let files_only = q.contains("mimeType!=");
        let hide_trashed = q.contains("trashed=false");
        if self.group_bug && parents.len() > 1 {
            return Vec::new();
        }
        self.files
            .iter()
            .filter(|file| file.parents.iter().any(|p| parents.contains(p)))
            .filter(|file| {
                names.is_empty() || names.iter().any(|n| n.eq_ignore_ascii_case(&file.name))
            })
            .filter(|file| !directories_only || file.is_folder() || file.mime_type == SHORTCUT_MIME_TYPE)
            .filter(|file| !files_only || !file.is_folder())
            .filter(|file| !hide_trashed || !file.trashed)
            .cloned()
            .collect()
    }
}

impl DriveApi for MemoryRemote {
    async fn list_page(
        &self,
        query: &ListQuery,
        cancel: &CancellationToken,
    ) -> Result<FileList, RemoteError> {
        let q = query.q.clone().unwrap_or_default();
        self.queries.lock().unwrap().push(q.clone());
        self.pause(cancel).await?;

        let all = self.matching(&q);
        let offset: usize = query
            .page_token
            .as_deref()
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);
        let size = query.page_size.unwrap_or(100).max(1) as usize;
        let end = (offset + size).min(all.len());
        Ok(FileList {
            files: all[offset.min(end)..end].to_vec(),
            next_page_token: (end < all.len()).then(|| end.to_string()),
            incomplete_search: false,
        })
    }

    async fn get_file(
        &self,
        id: &str,
        _fields: &str,
        cancel: &CancellationToken,
    ) -> Result<File, RemoteError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.pause(cancel).await?;
        if id == "root" {
            return Ok(File {
                id: ROOT_ID.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                ..File::default()
            });
        }
        self.files
            .iter()
            .find(|file| file.id == id)
            .cloned()
            .ok_or_else(|| {
                RemoteError::Api(DriveError::Api {
                    status: StatusCode::NOT_FOUND,
                    body: r#"{"error":{"errors":[{"reason":"notFound","message":"File not found"}]}}"#
                        .to_string(),
                })
            })
    }

    fn base_path(&self) -> String {
        "https://memory.test/drive/v3/".to_string()
    }
}

/// Values quoted immediately before `suffix`, e.g. ids of `'x' in parents`.
fn quoted_before(q: &str, suffix: &str) -> Vec<String> {
    let parts: Vec<&str> = q.split('\'').collect();
    parts
        .windows(2)
        .enumerate()
        .filter(|(i, pair)| i % 2 == 1 && pair[1].starts_with(suffix))
        .map(|(_, pair)| pair[0].to_string())
        .collect()
}

/// Values quoted immediately after `prefix`, e.g. names of `name='x'`.
fn quoted_after(q: &str, prefix: &str) -> Vec<String> {
    let parts: Vec<&str> = q.split('\'').collect();
    parts
        .windows(2)
        .enumerate()
        .filter(|(i, pair)| i % 2 == 0 && pair[0].ends_with(prefix))
        .map(|(_, pair)| pair[1].to_string())
        .collect()
}

pub fn folder(id: &str, name: &str, parent: &str) -> File {
    File {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: FOLDER_MIME_TYPE.to_string(),
        parents: vec![parent.to_string()],
        modified_time: Some("2024-02-03T04:05:06Z".to_string()),
        ..File::default()
    }
}

pub fn file(id: &str, name: &str, parent: &str) -> File {
    File {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: "text/plain".to_string(),
        parents: vec![parent.to_string()],
        size: Some(id.len() as i64),
        md5_checksum: Some(format!("{id:0>32}")),
        modified_time: Some("2024-02-03T04:05:06Z".to_string()),
        ..File::default()
    }
}

pub fn shortcut(id: &str, name: &str, parent: &str, target: &str, target_mime: &str) -> File {
    File {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: SHORTCUT_MIME_TYPE.to_string(),
        parents: vec![parent.to_string()],
        shortcut_details: Some(ShortcutDetails {
            target_id: target.to_string(),
            target_mime_type: target_mime.to_string(),
            target_resource_key: None,
        }),
        ..File::default()
    }
}

/// A random tree of at most `max_nodes` items below [`ROOT_ID`].
pub fn random_tree(seed: u64, max_nodes: usize) -> Vec<File> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut files = Vec::new();
    let mut dirs = VecDeque::from([ROOT_ID.to_string()]);
    let mut next = 0usize;
    while let Some(dir) = dirs.pop_front() {
        let children = rng.gen_range(1..8);
        for child in 0..children {
            if files.len() >= max_nodes {
                return files;
            }
            next += 1;
            // Keep at least one directory pending until the budget is spent.
            let last_chance = dirs.is_empty() && child + 1 == children;
            if last_chance || rng.gen_bool(0.35) {
                let id = format!("d{next}");
                files.push(folder(&id, &format!("dir{next}"), &dir));
                dirs.push_back(id);
            } else {
                let id = format!("f{next}");
                files.push(file(&id, &format!("file{next}.txt"), &dir));
            }
        }
    }
    files
}

pub fn drive(remote: Arc<MemoryRemote>, config: CrawlConfig) -> Drive<MemoryRemote> {
    drive_with_options(remote, config, ListOptions::default())
}

pub fn drive_with_options(
    remote: Arc<MemoryRemote>,
    config: CrawlConfig,
    options: ListOptions,
) -> Drive<MemoryRemote> {
    let cache: Arc<dyn DirCache> = Arc::new(MemoryDirCache::new(ROOT_ID));
    Drive::new(
        remote,
        cache,
        Arc::new(ExportTable::default()),
        ROOT_ID,
        options,
        config,
    )
}

pub fn config(checkers: usize, grouping: usize, input_buffer: usize) -> CrawlConfig {
    CrawlConfig {
        checkers,
        grouping,
        input_buffer,
    }
}

pub type EntryKey = (String, String);

pub fn key(entry: &Entry) -> EntryKey {
    (entry.remote().to_string(), entry.id().to_string())
}

pub async fn crawl_keys(drive: &Drive<MemoryRemote>) -> Vec<EntryKey> {
    let mut keys = Vec::new();
    drive
        .crawl("", &CancellationToken::new(), |entry| {
            keys.push(key(&entry));
            Ok::<_, std::convert::Infallible>(())
        })
        .await
        .unwrap();
    keys
}

/// One directory at a time, breadth first.
pub async fn sequential_keys(drive: &Drive<MemoryRemote>) -> BTreeSet<EntryKey> {
    let cancel = CancellationToken::new();
    let mut keys = BTreeSet::new();
    let mut pending = VecDeque::from([String::new()]);
    while let Some(dir) = pending.pop_front() {
        for entry in drive.list_dir(&dir, &cancel).await.unwrap() {
            if entry.is_dir() {
                pending.push_back(entry.remote().to_string());
            }
            keys.insert(key(&entry));
        }
    }
    keys
}
