pub mod api;
pub mod config;
pub mod crawl;
pub mod dircache;
pub mod entry;
pub mod error;
pub mod export;
pub mod grouping;
pub mod ids;
pub mod lister;
pub mod pacer;
pub mod query;
pub mod queue;
pub mod shortcut;

pub use api::{DriveApi, PacedClient, RemoteError};
pub use config::{CrawlConfig, ListOptions, WalkConfig};
pub use crawl::{CrawlStats, Crawler, Drive, join_path, resolve_root_id};
pub use dircache::{DirCache, MemoryDirCache};
pub use entry::Entry;
pub use error::{BoxError, CrawlError};
pub use export::{ExportFormats, ExportTable};
pub use grouping::GroupingState;
pub use pacer::{Pacer, PacerConfig, RetryClassifier, Verdict};
