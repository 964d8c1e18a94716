use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use drive_core::File;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{DriveApi, RemoteError};
use crate::config::{CrawlConfig, ListOptions};
use crate::dircache::{DirCache, ResourceKeys};
use crate::entry::{Entry, EntryBuilder};
use crate::error::{BoxError, CrawlError};
use crate::export::{ExportFormats, export_name, is_document};
use crate::grouping::GroupingState;
use crate::ids::actual_id;
use crate::lister::Lister;
use crate::query::ListFilter;
use crate::queue::{JobQueue, ListJob};

const ROOT_ALIAS: &str = "root";

/// Counters from one finished crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    /// Entries handed to the callback.
    pub entries: usize,
    /// Listing queries issued, one per batch.
    pub batches: usize,
    /// Directories put back as singletons after an empty grouped query.
    pub requeued: usize,
    /// How often grouping was switched off.
    pub grouping_disabled: usize,
}

/// Joins a directory path and a child name; the root path is `""`.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Canonical ID behind the `root` alias. Credentials scoped below the
/// drive root get a 404 here and keep using the alias.
pub async fn resolve_root_id<A: DriveApi>(
    api: &A,
    cancel: &CancellationToken,
) -> Result<String, CrawlError> {
    match api.get_file(ROOT_ALIAS, "id", cancel).await {
        Ok(file) => Ok(file.id),
        Err(err) if err.is_not_found() => Ok(ROOT_ALIAS.to_string()),
        Err(RemoteError::Cancelled) => Err(CrawlError::Cancelled),
        Err(err) => Err(CrawlError::RootId(err)),
    }
}

/// Recursive lister running a pool of workers over a shared job queue.
pub struct Crawler<A> {
    lister: Arc<Lister<A>>,
    entries: Arc<EntryBuilder>,
    grouping: Arc<GroupingState>,
    config: CrawlConfig,
}

impl<A: DriveApi> Crawler<A> {
    pub fn new(
        lister: Arc<Lister<A>>,
        entries: Arc<EntryBuilder>,
        grouping: Arc<GroupingState>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            lister,
            entries,
            grouping,
            config,
        }
    }

    pub fn grouping(&self) -> &Arc<GroupingState> {
        &self.grouping
    }

    /// Lists everything below `root_id`, calling `callback` once per entry.
    ///
    /// The callback is never invoked concurrently. Entries from one batch
    /// arrive in discovery order; batches interleave freely. The first
    /// error from a worker or the callback stops the crawl and is returned
    /// once every worker has exited.
    pub async fn crawl<F, E>(
        &self,
        root_id: &str,
        root_path: &str,
        cancel: &CancellationToken,
        mut callback: F,
    ) -> Result<CrawlStats, CrawlError>
    where
        F: FnMut(Entry) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let checkers = self.config.checkers.max(1);
        let ctx = Arc::new(CrawlContext {
            lister: self.lister.clone(),
            entries: self.entries.clone(),
            grouping: self.grouping.clone(),
            queue: JobQueue::new(self.config.input_buffer),
            cancel: cancel.clone(),
            shutdown: cancel.child_token(),
            first_error: Mutex::new(None),
            batches: AtomicUsize::new(0),
            requeued: AtomicUsize::new(0),
            grouping_disabled: AtomicUsize::new(0),
        });
        ctx.queue
            .submit(ListJob::new(actual_id(root_id), root_path));

        let (entry_tx, mut entry_rx) = mpsc::channel::<Vec<Entry>>(checkers * 2);
        let mut workers = JoinSet::new();
        for _ in 0..checkers {
            workers.spawn(run_worker(ctx.clone(), entry_tx.clone()));
        }
        drop(entry_tx);

        let mut delivered = 0usize;
        let aggregate = async {
            while let Some(batch) = entry_rx.recv().await {
                // Keep draining after a failure so no worker blocks on send.
                if ctx.has_failed() {
                    continue;
                }
                for entry in batch {
                    delivered += 1;
                    if let Err(err) = callback(entry) {
                        ctx.fail(CrawlError::Callback(err.into()));
                        break;
                    }
                }
            }
        };
        // A worker that dies leaves its share of the queue untaken, so a
        // panic has to stop the crawl as soon as it is observed.
        let supervise = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    ctx.fail(CrawlError::Worker(err.to_string()));
                }
            }
        };
        tokio::join!(ctx.coordinate(), aggregate, supervise);

        if let Some(err) = ctx.take_error() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        let stats = CrawlStats {
            entries: delivered,
            batches: ctx.batches.load(Ordering::Relaxed),
            requeued: ctx.requeued.load(Ordering::Relaxed),
            grouping_disabled: ctx.grouping_disabled.load(Ordering::Relaxed),
        };
        debug!(?stats, "crawl finished");
        Ok(stats)
    }
}

struct CrawlContext<A> {
    lister: Arc<Lister<A>>,
    entries: Arc<EntryBuilder>,
    grouping: Arc<GroupingState>,
    queue: JobQueue,
    /// Caller's token, passed to every remote call.
    cancel: CancellationToken,
    /// Stops workers from taking new batches.
    shutdown: CancellationToken,
    first_error: Mutex<Option<CrawlError>>,
    batches: AtomicUsize,
    requeued: AtomicUsize,
    grouping_disabled: AtomicUsize,
}

async fn run_worker<A: DriveApi>(ctx: Arc<CrawlContext<A>>, entry_tx: mpsc::Sender<Vec<Entry>>) {
    loop {
        let group_size = ctx.grouping.group_size();
        let Some(batch) = ctx.queue.next_batch(group_size, &ctx.shutdown).await else {
            break;
        };
        let done = Completion {
            queue: &ctx.queue,
            jobs: batch.len(),
        };
        let result = ctx.list_batch(batch, group_size, &entry_tx).await;
        drop(done);
        if let Err(err) = result {
            ctx.fail(err);
            break;
        }
    }
}

/// Marks a batch finished however listing it ends, including when the
/// worker's future is dropped after a panic.
struct Completion<'a> {
    queue: &'a JobQueue,
    jobs: usize,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.queue.complete(self.jobs);
    }
}

impl<A: DriveApi> CrawlContext<A> {
    async fn list_batch(
        &self,
        mut batch: Vec<ListJob>,
        group_size: usize,
        entry_tx: &mpsc::Sender<Vec<Entry>>,
    ) -> Result<(), CrawlError> {
        batch.sort_by(|a, b| a.id.cmp(&b.id));
        let ids: Vec<&str> = batch.iter().map(|job| job.id.as_str()).collect();
        let mut found = Vec::new();

        let outcome = self
            .lister
            .list(&ids, &ListFilter::default(), &self.cancel, |item| {
                if self.shutdown.is_cancelled() {
                    return Ok(ControlFlow::Break(()));
                }
                if let [job] = batch.as_slice() {
                    // One directory: the item is its child whatever its
                    // parents say (virtual roots, shared items without
                    // parents, root aliases). Multiple parents still give
                    // one entry.
                    self.emit(&job.path, &item, &mut found)?;
                } else {
                    for parent in &item.parents {
                        if let Ok(index) = ids.binary_search(&parent.as_str()) {
                            self.emit(&batch[index].path, &item, &mut found)?;
                        }
                    }
                }
                Ok(ControlFlow::Continue(()))
            })
            .await?;
        self.batches.fetch_add(1, Ordering::Relaxed);

        if !found.is_empty() {
            // The receiver only goes away once the crawl is over.
            let _ = entry_tx.send(found).await;
        }
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        if batch.len() > 1 && !outcome.found() {
            let disabled = self.grouping.suspect_batch(ids.iter().copied(), || {
                for job in &batch {
                    self.queue.submit(job.clone());
                }
            });
            if disabled {
                self.grouping_disabled.fetch_add(1, Ordering::Relaxed);
            }
            self.requeued.fetch_add(batch.len(), Ordering::Relaxed);
            debug!(count = batch.len(), "requeued directories from empty grouped listing");
        }
        if group_size == 1 && batch.len() == 1 && !outcome.found() {
            self.grouping.clear_suspect(&batch[0].id);
        }
        Ok(())
    }

    fn emit(&self, dir_path: &str, item: &File, found: &mut Vec<Entry>) -> Result<(), CrawlError> {
        let remote = join_path(dir_path, &item.name);
        let Some(entry) = self.entries.to_entry(&remote, item)? else {
            return Ok(());
        };
        if let Entry::Dir(dir) = &entry {
            self.queue
                .submit(ListJob::new(actual_id(&dir.id), dir.remote.clone()));
        }
        found.push(entry);
        Ok(())
    }

    /// Waits for all known work to finish, feeding overflowed jobs back in
    /// as the queue drains, then closes the queue.
    async fn coordinate(&self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.queue.wait_idle() => {}
            }
            if !self.queue.refill_from_overflow() {
                break;
            }
        }
        self.queue.close();
    }

    fn fail(&self, err: CrawlError) {
        {
            let mut first = self
                .first_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if first.is_none() {
                debug!(error = %err, "stopping crawl");
                *first = Some(err);
            } else {
                debug!(error = %err, "ignoring error after crawl failure");
            }
        }
        self.shutdown.cancel();
        self.queue.close();
    }

    fn has_failed(&self) -> bool {
        self.first_error
            .lock()
            .map(|first| first.is_some())
            .unwrap_or(true)
    }

    fn take_error(&self) -> Option<CrawlError> {
        self.first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Directory-level operations over one remote.
pub struct Drive<A> {
    crawler: Crawler<A>,
    dir_cache: Arc<dyn DirCache>,
}

impl<A: DriveApi> Drive<A> {
    pub fn new(
        api: Arc<A>,
        dir_cache: Arc<dyn DirCache>,
        exports: Arc<dyn ExportFormats>,
        root_folder_id: &str,
        options: ListOptions,
        config: CrawlConfig,
    ) -> Self {
        let resource_keys = Arc::new(ResourceKeys::default());
        let entries = Arc::new(EntryBuilder::new(
            dir_cache.clone(),
            resource_keys.clone(),
            exports.clone(),
            &options,
            api.base_path(),
        ));
        let lister = Arc::new(Lister::new(
            api,
            options,
            root_folder_id,
            resource_keys,
            exports,
        ));
        let grouping = Arc::new(GroupingState::new(config.grouping));
        Self {
            crawler: Crawler::new(lister, entries, grouping, config),
            dir_cache,
        }
    }

    /// Replaces the grouping state, e.g. to share it between drives.
    pub fn with_grouping(mut self, grouping: Arc<GroupingState>) -> Self {
        self.crawler.grouping = grouping;
        self
    }

    pub fn grouping(&self) -> &Arc<GroupingState> {
        self.crawler.grouping()
    }

    pub fn dir_cache(&self) -> &Arc<dyn DirCache> {
        &self.dir_cache
    }

    fn lister(&self) -> &Lister<A> {
        &self.crawler.lister
    }

    /// Canonical ID behind the `root` alias; see [`resolve_root_id`].
    pub async fn root_id(&self, cancel: &CancellationToken) -> Result<String, CrawlError> {
        resolve_root_id(self.lister().api().as_ref(), cancel).await
    }

    /// ID of the directory (or directory shortcut) named `leaf` directly in
    /// `parent_id`.
    pub async fn find_leaf(
        &self,
        parent_id: &str,
        leaf: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CrawlError> {
        let lister = self.lister();
        let exports = self.crawler.entries.exports();
        let skip_gdocs = lister.options().skip_gdocs;
        let filter = ListFilter {
            title: Some(leaf),
            directories_only: true,
            files_only: false,
        };
        let mut found = None;
        lister
            .list(&[actual_id(parent_id)], &filter, cancel, |item| {
                if !skip_gdocs {
                    if export_name(exports, &item).as_deref() == Some(leaf) {
                        found = Some(item.id);
                        return Ok(ControlFlow::Break(()));
                    }
                    if is_document(exports, &item) {
                        return Ok(ControlFlow::Continue(()));
                    }
                }
                if item.name == leaf {
                    found = Some(item.id);
                    return Ok(ControlFlow::Break(()));
                }
                Ok(ControlFlow::Continue(()))
            })
            .await?;
        Ok(found)
    }

    /// Resolves `path` to a directory ID, walking down from the root and
    /// filling the cache for anything not yet known.
    pub async fn find_dir(&self, path: &str, cancel: &CancellationToken) -> Result<String, CrawlError> {
        let path = path.trim_matches('/');
        if let Some(id) = self.dir_cache.find_dir(path) {
            return Ok(id);
        }
        let mut current = self
            .dir_cache
            .find_dir("")
            .unwrap_or_else(|| self.lister().root_folder_id().to_string());
        let mut walked = String::new();
        for leaf in path.split('/').filter(|part| !part.is_empty()) {
            walked = join_path(&walked, leaf);
            if let Some(id) = self.dir_cache.find_dir(&walked) {
                current = id;
                continue;
            }
            let Some(id) = self.find_leaf(&current, leaf, cancel).await? else {
                return Err(CrawlError::DirNotFound(path.to_string()));
            };
            self.dir_cache.put(&walked, &id);
            current = id;
        }
        Ok(current)
    }

    /// Direct children of `dir`.
    pub async fn list_dir(&self, dir: &str, cancel: &CancellationToken) -> Result<Vec<Entry>, CrawlError> {
        let dir = dir.trim_matches('/');
        let dir_id = self.find_dir(dir, cancel).await?;
        let entries = &self.crawler.entries;
        let mut listed = Vec::new();
        self.lister()
            .list(&[actual_id(&dir_id)], &ListFilter::default(), cancel, |item| {
                if let Some(entry) = entries.to_entry(&join_path(dir, &item.name), &item)? {
                    listed.push(entry);
                }
                Ok(ControlFlow::Continue(()))
            })
            .await?;
        Ok(listed)
    }

    /// Recursively lists `dir`; see [`Crawler::crawl`].
    pub async fn crawl<F, E>(
        &self,
        dir: &str,
        cancel: &CancellationToken,
        callback: F,
    ) -> Result<(), CrawlError>
    where
        F: FnMut(Entry) -> Result<(), E>,
        E: Into<BoxError>,
    {
        self.crawl_with_stats(dir, cancel, callback).await.map(|_| ())
    }

    pub async fn crawl_with_stats<F, E>(
        &self,
        dir: &str,
        cancel: &CancellationToken,
        callback: F,
    ) -> Result<CrawlStats, CrawlError>
    where
        F: FnMut(Entry) -> Result<(), E>,
        E: Into<BoxError>,
    {
        let dir = dir.trim_matches('/');
        let dir_id = self.find_dir(dir, cancel).await?;
        let stats = self.crawler.crawl(&dir_id, dir, cancel, callback).await?;
        info!(
            dir,
            entries = stats.entries,
            batches = stats.batches,
            requeued = stats.requeued,
            "recursive listing complete"
        );
        Ok(stats)
    }
}
