use std::ops::ControlFlow;
use std::sync::Arc;

use drive_core::{DANGLING_SHORTCUT_MIME_TYPE, FOLDER_MIME_TYPE, File, ListQuery};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::api::DriveApi;
use crate::config::ListOptions;
use crate::dircache::ResourceKeys;
use crate::error::CrawlError;
use crate::export::{ExportFormats, export_name};
use crate::query::{ListFilter, build_query};
use crate::shortcut::resolve_shortcut;

/// Fields fetched for every listed or resolved item.
pub const PARTIAL_FIELDS: &str = "id,name,size,md5Checksum,trashed,explicitlyTrashed,\
modifiedTime,createdTime,mimeType,parents,webViewLink,shortcutDetails,exportLinks,resourceKey";

const APP_DATA_FOLDER: &str = "appDataFolder";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOutcome {
    /// Items handed to the visitor.
    pub items: usize,
    /// The visitor asked to stop before the listing was exhausted.
    pub stopped: bool,
    /// The remote flagged at least one page as incomplete.
    pub incomplete: bool,
}

impl ListOutcome {
    pub fn found(&self) -> bool {
        self.items > 0
    }
}

/// Lists the direct children of one or more directories in a single
/// paged query.
pub struct Lister<A> {
    api: Arc<A>,
    options: ListOptions,
    root_folder_id: String,
    resource_keys: Arc<ResourceKeys>,
    exports: Arc<dyn ExportFormats>,
    file_fields: String,
}

impl<A: DriveApi> Lister<A> {
    pub fn new(
        api: Arc<A>,
        options: ListOptions,
        root_folder_id: impl Into<String>,
        resource_keys: Arc<ResourceKeys>,
        exports: Arc<dyn ExportFormats>,
    ) -> Self {
        let mut file_fields = PARTIAL_FIELDS.to_string();
        if options.size_as_quota {
            file_fields.push_str(",quotaBytesUsed");
        }
        Self {
            api,
            options,
            root_folder_id: root_folder_id.into(),
            resource_keys,
            exports,
            file_fields,
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn options(&self) -> &ListOptions {
        &self.options
    }

    pub fn root_folder_id(&self) -> &str {
        &self.root_folder_id
    }

    pub fn file_fields(&self) -> &str {
        &self.file_fields
    }

    /// Pages through every child of `dir_ids` matching `filter`, resolving
    /// shortcuts on the way. `visit` may end the listing early with
    /// [`ControlFlow::Break`].
    pub async fn list<F>(
        &self,
        dir_ids: &[&str],
        filter: &ListFilter<'_>,
        cancel: &CancellationToken,
        mut visit: F,
    ) -> Result<ListOutcome, CrawlError>
    where
        F: FnMut(File) -> Result<ControlFlow<()>, CrawlError>,
    {
        let built = build_query(&self.options, &self.root_folder_id, dir_ids, filter);
        trace!(q = %built.q, "list query");
        let mut query = ListQuery {
            q: Some(built.q).filter(|q| !q.is_empty()),
            page_size: Some(self.options.list_chunk.max(1)),
            page_token: None,
            fields: Some(format!(
                "files({}),nextPageToken,incompleteSearch",
                self.file_fields
            )),
            spaces: (self.root_folder_id == APP_DATA_FOLDER).then(|| APP_DATA_FOLDER.to_string()),
            resource_keys: self.resource_keys_header(dir_ids),
        };

        let mut outcome = ListOutcome::default();
        loop {
            let page = self
                .api
                .list_page(&query, cancel)
                .await
                .map_err(CrawlError::list)?;
            if page.incomplete_search {
                error!(dirs = dir_ids.len(), "search result INCOMPLETE");
                outcome.incomplete = true;
            }
            for item in page.files {
                let Some(item) = self.prepare(item, filter, cancel).await? else {
                    continue;
                };
                if !self.title_matches(&item, filter.title, &built.stems) {
                    continue;
                }
                outcome.items += 1;
                if visit(item)?.is_break() {
                    outcome.stopped = true;
                    return Ok(outcome);
                }
            }
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => query.page_token = Some(token),
                None => return Ok(outcome),
            }
        }
    }

    /// Shortcut filtering and resolution; `None` drops the item.
    async fn prepare(
        &self,
        item: File,
        filter: &ListFilter<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<File>, CrawlError> {
        let Some(details) = item.shortcut_details.as_ref().filter(|_| item.is_shortcut()) else {
            return Ok(Some(item));
        };
        if self.options.skip_shortcuts {
            return Ok(None);
        }
        let target_is_folder = details.target_mime_type == FOLDER_MIME_TYPE;
        if (filter.directories_only && !target_is_folder) || (filter.files_only && target_is_folder)
        {
            return Ok(None);
        }
        let resolved = resolve_shortcut(self.api.as_ref(), &self.file_fields, item, cancel).await?;
        if self.options.skip_dangling_shortcuts && resolved.mime_type == DANGLING_SHORTCUT_MIME_TYPE {
            return Ok(None);
        }
        Ok(Some(resolved))
    }

    /// The remote compares names case-insensitively; keep only exact
    /// matches, or documents whose export name is the title.
    fn title_matches(&self, item: &File, title: Option<&str>, stems: &[String]) -> bool {
        let Some(title) = title.filter(|t| !t.is_empty()) else {
            return true;
        };
        if item.name == title {
            return true;
        }
        if !stems.iter().any(|stem| *stem == item.name) {
            return false;
        }
        export_name(self.exports.as_ref(), item).as_deref() == Some(title)
    }

    fn resource_keys_header(&self, dir_ids: &[&str]) -> Option<String> {
        let pairs: Vec<String> = dir_ids
            .iter()
            .filter(|id| !id.is_empty())
            .filter_map(|id| self.resource_keys.get(id).map(|key| format!("{id}/{key}")))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join(","))
    }
}
