mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{
    MemoryRemote, ROOT_ID, config, crawl_keys, drive, drive_with_options, file, folder, random_tree,
    sequential_keys, shortcut,
};
use drive_core::{FOLDER_MIME_TYPE, File, FileList, ListQuery};
use drivewalk::{
    CrawlError, DirCache, Drive, DriveApi, Entry, ExportTable, ListOptions, MemoryDirCache,
    RemoteError,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
#[error("sink is full")]
struct SinkFull;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_crawl_matches_sequential_listing() {
    for seed in [1, 7, 42] {
        let remote = Arc::new(MemoryRemote::new(random_tree(seed, 1000)));
        let expected = sequential_keys(&drive(remote.clone(), config(1, 50, 1000))).await;
        assert!(expected.len() > 20, "seed {seed} gave a tiny tree");

        for checkers in [1, 4, 64] {
            // A tiny input buffer pushes most jobs through the overflow.
            let crawled = crawl_keys(&drive(remote.clone(), config(checkers, 50, 4))).await;
            let unique: BTreeSet<_> = crawled.iter().cloned().collect();
            assert_eq!(unique.len(), crawled.len(), "duplicates with {checkers} checkers");
            assert_eq!(unique, expected, "seed {seed}, {checkers} checkers");
        }
    }
}

#[tokio::test]
async fn empty_grouped_query_disables_grouping_until_suspects_clear() {
    let remote = Arc::new(MemoryRemote::new(vec![
        folder("a", "a", ROOT_ID),
        folder("b", "b", ROOT_ID),
        folder("c", "c", ROOT_ID),
    ]));
    let drive = drive(remote.clone(), config(1, 50, 16));

    let stats = drive
        .crawl_with_stats("", &CancellationToken::new(), |_| {
            Ok::<_, std::convert::Infallible>(())
        })
        .await
        .unwrap();

    assert_eq!(stats.entries, 3);
    assert_eq!(stats.grouping_disabled, 1);
    assert_eq!(stats.requeued, 3);
    // root, the grouped query, then each directory alone
    assert_eq!(stats.batches, 5);
    assert_eq!(remote.list_calls(), 5);
    assert_eq!(drive.grouping().group_size(), 50);
    assert_eq!(drive.grouping().suspect_count(), 0);
}

#[tokio::test]
async fn remote_dropping_grouped_results_still_lists_everything() {
    let remote = Arc::new(
        MemoryRemote::new(vec![
            folder("a", "a", ROOT_ID),
            folder("b", "b", ROOT_ID),
            file("fa", "in-a.txt", "a"),
            file("fb", "in-b.txt", "b"),
        ])
        .with_group_bug(),
    );
    let drive = drive(remote.clone(), config(1, 50, 16));

    let keys: BTreeSet<_> = crawl_keys(&drive).await.into_iter().collect();

    let expected: BTreeSet<_> = [("a", "a"), ("b", "b"), ("a/in-a.txt", "fa"), ("b/in-b.txt", "fb")]
        .into_iter()
        .map(|(remote, id)| (remote.to_string(), id.to_string()))
        .collect();
    assert_eq!(keys, expected);
    // Both directories turned out non-empty, so grouping stays off.
    assert_eq!(drive.grouping().group_size(), 1);
    assert_eq!(drive.grouping().suspect_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_dropping_grouped_results_on_random_tree() {
    let files = random_tree(5, 600);
    let reference = Arc::new(MemoryRemote::new(files.clone()));
    let expected = sequential_keys(&drive(reference, config(1, 50, 1000))).await;

    let buggy = Arc::new(MemoryRemote::new(files).with_group_bug());
    let keys: BTreeSet<_> = crawl_keys(&drive(buggy, config(8, 50, 32)))
        .await
        .into_iter()
        .collect();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn shortcuts_are_followed_and_dangling_ones_reported() {
    let files = vec![
        shortcut("s1", "link", ROOT_ID, "target", FOLDER_MIME_TYPE),
        shortcut("s2", "broken", ROOT_ID, "gone", "text/plain"),
        folder("target", "elsewhere", "other-root"),
        file("inner", "inner.txt", "target"),
    ];
    let remote = Arc::new(MemoryRemote::new(files.clone()));
    let mut entries = Vec::new();
    drive(remote, config(2, 50, 16))
        .crawl("", &CancellationToken::new(), |entry| {
            entries.push(entry);
            Ok::<_, std::convert::Infallible>(())
        })
        .await
        .unwrap();
    entries.sort_by(|a, b| a.remote().cmp(b.remote()));

    assert_eq!(entries.len(), 3);
    let Entry::Dangling(broken) = &entries[0] else {
        panic!("expected dangling shortcut, got {:?}", entries[0]);
    };
    assert_eq!(broken.base.remote, "broken");
    assert_eq!(broken.base.id, "s2");
    let Entry::Dir(link) = &entries[1] else {
        panic!("expected dir, got {:?}", entries[1]);
    };
    assert_eq!(link.remote, "link");
    assert_eq!(link.id, "target\ts1");
    assert_eq!(entries[2].remote(), "link/inner.txt");
    assert_eq!(entries[2].id(), "inner");

    let options = ListOptions {
        skip_dangling_shortcuts: true,
        ..ListOptions::default()
    };
    let remote = Arc::new(MemoryRemote::new(files));
    let keys = crawl_keys(&drive_with_options(remote, config(2, 50, 16), options)).await;
    assert!(keys.iter().all(|(remote, _)| remote != "broken"));
    assert_eq!(keys.len(), 2);
}

#[tokio::test]
async fn multi_parent_items_appear_once_per_parent_in_a_batch() {
    let mut shared = file("shared", "shared.txt", "a");
    shared.parents.push("b".into());
    let mut half = file("half", "half.txt", "a");
    half.parents.push("not-listed".into());
    let mut top = file("top", "top.txt", ROOT_ID);
    top.parents.push("a".into());
    let remote = Arc::new(MemoryRemote::new(vec![
        folder("a", "a", ROOT_ID),
        folder("b", "b", ROOT_ID),
        shared,
        half,
        top,
    ]));

    // One checker takes the root alone, then `a` and `b` as one batch.
    let mut keys = crawl_keys(&drive(remote, config(1, 50, 16))).await;
    keys.sort();

    let remotes: Vec<&str> = keys.iter().map(|(remote, _)| remote.as_str()).collect();
    assert_eq!(
        remotes,
        vec![
            "a",
            "a/half.txt",
            "a/shared.txt",
            "a/top.txt",
            "b",
            "b/shared.txt",
            "top.txt",
        ]
    );
}

#[tokio::test]
async fn crawling_twice_gives_the_same_entries() {
    let remote = Arc::new(MemoryRemote::new(random_tree(11, 300)));
    let drive = drive(remote, config(4, 50, 8));
    let first: BTreeSet<_> = crawl_keys(&drive).await.into_iter().collect();
    let second: BTreeSet<_> = crawl_keys(&drive).await.into_iter().collect();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callback_error_stops_the_crawl_and_is_returned() {
    let remote = Arc::new(MemoryRemote::new(random_tree(3, 1000)));
    let drive = drive(remote.clone(), config(8, 50, 16));
    let mut calls = 0;

    let err = drive
        .crawl("", &CancellationToken::new(), |_| {
            calls += 1;
            if calls == 3 { Err(SinkFull) } else { Ok(()) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls, 3);
    let CrawlError::Callback(source) = &err else {
        panic!("expected callback error, got {err:?}");
    };
    assert!(source.downcast_ref::<SinkFull>().is_some());

    let after = remote.list_calls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.list_calls(), after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_returns_promptly() {
    let remote = Arc::new(
        MemoryRemote::new(random_tree(9, 1000)).with_delay(Duration::from_millis(40)),
    );
    let drive = drive(remote.clone(), config(4, 2, 16));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        drive.crawl("", &cancel, |_| Ok::<_, std::convert::Infallible>(())),
    )
    .await
    .expect("crawl did not stop after cancellation");

    assert!(matches!(result, Err(CrawlError::Cancelled)), "{result:?}");
    let after = remote.list_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.list_calls(), after);
}

#[tokio::test]
async fn crawl_of_a_subdirectory_uses_its_path() {
    let remote = Arc::new(MemoryRemote::new(vec![
        folder("a", "a", ROOT_ID),
        folder("ab", "b", "a"),
        file("x", "x.txt", "ab"),
        file("y", "y.txt", ROOT_ID),
    ]));
    let keys = {
        let drive = drive(remote.clone(), config(2, 50, 16));
        let mut keys = Vec::new();
        drive
            .crawl("/a/", &CancellationToken::new(), |entry| {
                keys.push(entry.remote().to_string());
                Ok::<_, std::convert::Infallible>(())
            })
            .await
            .unwrap();
        keys.sort();
        keys
    };
    assert_eq!(keys, vec!["a/b", "a/b/x.txt"]);
}

#[tokio::test]
async fn missing_directory_is_reported() {
    let remote = Arc::new(MemoryRemote::new(vec![folder("a", "a", ROOT_ID)]));
    let drive = drive(remote, config(2, 50, 16));
    let err = drive
        .crawl("a/nope", &CancellationToken::new(), |_| {
            Ok::<_, std::convert::Infallible>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::DirNotFound(path) if path == "a/nope"));
}

/// Panics on the `panic_on`-th listing call.
struct PanickingRemote {
    inner: MemoryRemote,
    calls: AtomicUsize,
    panic_on: usize,
}

impl DriveApi for PanickingRemote {
    async fn list_page(
        &self,
        query: &ListQuery,
        cancel: &CancellationToken,
    ) -> Result<FileList, RemoteError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.panic_on {
            panic!("remote blew up");
        }
        self.inner.list_page(query, cancel).await
    }

    async fn get_file(
        &self,
        id: &str,
        fields: &str,
        cancel: &CancellationToken,
    ) -> Result<File, RemoteError> {
        self.inner.get_file(id, fields, cancel).await
    }
}

#[tokio::test]
async fn worker_panic_fails_the_crawl_instead_of_hanging() {
    let remote = Arc::new(PanickingRemote {
        inner: MemoryRemote::new(vec![
            folder("a", "a", ROOT_ID),
            folder("b", "b", ROOT_ID),
            file("fa", "in-a.txt", "a"),
        ]),
        calls: AtomicUsize::new(0),
        panic_on: 2,
    });
    let cache: Arc<dyn DirCache> = Arc::new(MemoryDirCache::new(ROOT_ID));
    // A single worker listing one directory per query: once it dies, `b`
    // is left queued with nobody to take it.
    let drive = Drive::new(
        remote.clone(),
        cache,
        Arc::new(ExportTable::default()),
        ROOT_ID,
        ListOptions::default(),
        config(1, 1, 16),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        drive.crawl("", &CancellationToken::new(), |_| {
            Ok::<_, std::convert::Infallible>(())
        }),
    )
    .await
    .expect("crawl hung after a worker panic");

    assert!(matches!(result, Err(CrawlError::Worker(_))), "{result:?}");
    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
}
