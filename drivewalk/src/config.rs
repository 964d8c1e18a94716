use std::time::Duration;

use anyhow::Context;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::pacer::{Backoff, DriveRetryClassifier, PacerConfig};

const ENV_PREFIX: &str = "DRIVEWALK_";
const DEFAULT_CHECKERS: u64 = 8;
const DEFAULT_LIST_CHUNK: u64 = 1000;
const MAX_LIST_CHUNK: u64 = 1000;
const DEFAULT_GROUPING: u64 = 50;
const DEFAULT_INPUT_BUFFER: u64 = 1000;
const DEFAULT_EXPORT_FORMATS: &str = "docx,xlsx,pptx,svg";
const DEFAULT_PACER_MIN_SLEEP_MS: u64 = 100;
const DEFAULT_PACER_RETRIES: u64 = 10;

/// What a single listing call returns and how items are filtered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    /// Page size sent with every `files.list` call.
    pub list_chunk: u32,
    pub trashed_only: bool,
    pub shared_with_me: bool,
    pub starred_only: bool,
    pub skip_shortcuts: bool,
    pub skip_dangling_shortcuts: bool,
    pub skip_gdocs: bool,
    pub use_created_date: bool,
    pub size_as_quota: bool,
    /// Export extensions with a leading dot, in preference order.
    pub export_extensions: Vec<String>,
    pub mod_time_from: Option<OffsetDateTime>,
    pub mod_time_to: Option<OffsetDateTime>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            list_chunk: DEFAULT_LIST_CHUNK as u32,
            trashed_only: false,
            shared_with_me: false,
            starred_only: false,
            skip_shortcuts: false,
            skip_dangling_shortcuts: false,
            skip_gdocs: false,
            use_created_date: false,
            size_as_quota: false,
            export_extensions: Vec::new(),
            mod_time_from: None,
            mod_time_to: None,
        }
    }
}

/// Sizing of the crawl worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlConfig {
    pub checkers: usize,
    /// Directories merged into one query while the remote behaves.
    pub grouping: usize,
    /// Capacity of the bounded job queue.
    pub input_buffer: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            checkers: DEFAULT_CHECKERS as usize,
            grouping: DEFAULT_GROUPING as usize,
            input_buffer: DEFAULT_INPUT_BUFFER as usize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkConfig {
    pub token: String,
    pub api_base_url: Option<String>,
    /// Looked up from the `root` alias when unset.
    pub root_folder_id: Option<String>,
    pub crawl: CrawlConfig,
    pub list: ListOptions,
    pub pacer_min_sleep: Duration,
    pub pacer_retries: u32,
    pub stop_on_upload_limit: bool,
    pub stop_on_download_limit: bool,
}

impl WalkConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `lookup` receives the
    /// full `DRIVEWALK_*` name.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let token = env
            .string("TOKEN")
            .context("DRIVEWALK_TOKEN is not set")?;
        let list = ListOptions {
            list_chunk: env.u64("LIST_CHUNK", DEFAULT_LIST_CHUNK).min(MAX_LIST_CHUNK) as u32,
            trashed_only: env.bool("TRASHED_ONLY", false),
            shared_with_me: env.bool("SHARED_WITH_ME", false),
            starred_only: env.bool("STARRED_ONLY", false),
            skip_shortcuts: env.bool("SKIP_SHORTCUTS", false),
            skip_dangling_shortcuts: env.bool("SKIP_DANGLING_SHORTCUTS", false),
            skip_gdocs: env.bool("SKIP_GDOCS", false),
            use_created_date: env.bool("USE_CREATED_DATE", false),
            size_as_quota: env.bool("SIZE_AS_QUOTA", false),
            export_extensions: parse_extensions(
                &env.string("EXPORT_FORMATS")
                    .unwrap_or_else(|| DEFAULT_EXPORT_FORMATS.to_string()),
            ),
            mod_time_from: env.time("MOD_TIME_FROM")?,
            mod_time_to: env.time("MOD_TIME_TO")?,
        };
        Ok(Self {
            token,
            api_base_url: env.string("API_BASE_URL"),
            root_folder_id: env.string("ROOT_FOLDER_ID"),
            crawl: CrawlConfig {
                checkers: env.u64("CHECKERS", DEFAULT_CHECKERS) as usize,
                grouping: env.u64("GROUPING", DEFAULT_GROUPING) as usize,
                input_buffer: env.u64("INPUT_BUFFER", DEFAULT_INPUT_BUFFER) as usize,
            },
            list,
            pacer_min_sleep: Duration::from_millis(
                env.u64("PACER_MIN_SLEEP_MS", DEFAULT_PACER_MIN_SLEEP_MS),
            ),
            pacer_retries: env.u64("PACER_RETRIES", DEFAULT_PACER_RETRIES).min(u64::from(u32::MAX))
                as u32,
            stop_on_upload_limit: env.bool("STOP_ON_UPLOAD_LIMIT", false),
            stop_on_download_limit: env.bool("STOP_ON_DOWNLOAD_LIMIT", false),
        })
    }

    pub fn pacer_config(&self) -> PacerConfig {
        PacerConfig {
            min_sleep: self.pacer_min_sleep,
            max_attempts: self.pacer_retries,
            backoff: Backoff::new(self.pacer_min_sleep, Duration::from_secs(16), true),
            ..PacerConfig::default()
        }
    }

    pub fn retry_classifier(&self) -> DriveRetryClassifier {
        DriveRetryClassifier {
            stop_on_upload_limit: self.stop_on_upload_limit,
            stop_on_download_limit: self.stop_on_download_limit,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        self.string(name)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(default)
    }

    fn bool(&self, name: &str, default: bool) -> bool {
        self.string(name)
            .map(|value| {
                matches!(
                    value.to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(default)
    }

    fn time(&self, name: &str) -> anyhow::Result<Option<OffsetDateTime>> {
        self.string(name)
            .map(|value| {
                OffsetDateTime::parse(&value, &Rfc3339)
                    .with_context(|| format!("{ENV_PREFIX}{name} is not an RFC 3339 time: {value}"))
            })
            .transpose()
    }
}

/// `"docx, .xlsx"` → `[".docx", ".xlsx"]`.
pub fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .collect()
}
