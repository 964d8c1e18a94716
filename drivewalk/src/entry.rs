use std::sync::Arc;

use drive_core::{DANGLING_SHORTCUT_MIME_TYPE, File, SHORTCUT_MIME_TYPE};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::config::ListOptions;
use crate::dircache::{DirCache, ResourceKeys};
use crate::error::CrawlError;
use crate::export::{ExportFormat, ExportFormats, render_link, xdg_icon};
use crate::ids::actual_id;

/// One listed item as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Dir(DirEntry),
    /// A file with stored content.
    Object(FileObject),
    /// A shortcut whose target is gone. It has no content to download.
    Dangling(DanglingShortcut),
    /// A native document, exported on download.
    Document(DocumentObject),
    /// A native document represented by a generated link file.
    Link(LinkObject),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirEntry {
    pub remote: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub modified: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectBase {
    pub remote: String,
    pub id: String,
    /// `None` when the size is only known after export.
    pub size: Option<i64>,
    pub mime_type: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub modified: Option<OffsetDateTime>,
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileObject {
    #[serde(flatten)]
    pub base: ObjectBase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DanglingShortcut {
    #[serde(flatten)]
    pub base: ObjectBase,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentObject {
    #[serde(flatten)]
    pub base: ObjectBase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_url: Option<String>,
    pub document_mime_type: String,
    #[serde(skip)]
    pub ext_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkObject {
    #[serde(flatten)]
    pub base: ObjectBase,
    #[serde(skip)]
    pub content: String,
    #[serde(skip)]
    pub ext_len: usize,
}

impl Entry {
    pub fn remote(&self) -> &str {
        match self {
            Entry::Dir(dir) => &dir.remote,
            Entry::Object(obj) => &obj.base.remote,
            Entry::Dangling(shortcut) => &shortcut.base.remote,
            Entry::Document(doc) => &doc.base.remote,
            Entry::Link(link) => &link.base.remote,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entry::Dir(dir) => &dir.id,
            Entry::Object(obj) => &obj.base.id,
            Entry::Dangling(shortcut) => &shortcut.base.id,
            Entry::Document(doc) => &doc.base.id,
            Entry::Link(link) => &link.base.id,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir(_))
    }

    pub fn size(&self) -> Option<i64> {
        match self {
            Entry::Dir(_) => None,
            Entry::Object(obj) => obj.base.size,
            Entry::Dangling(shortcut) => shortcut.base.size,
            Entry::Document(doc) => doc.base.size,
            Entry::Link(link) => link.base.size,
        }
    }

    pub fn modified(&self) -> Option<OffsetDateTime> {
        match self {
            Entry::Dir(dir) => dir.modified,
            Entry::Object(obj) => obj.base.modified,
            Entry::Dangling(shortcut) => shortcut.base.modified,
            Entry::Document(doc) => doc.base.modified,
            Entry::Link(link) => link.base.modified,
        }
    }
}

impl DocumentObject {
    /// The export extension appended to the remote name.
    pub fn extension(&self) -> &str {
        &self.base.remote[self.base.remote.len() - self.ext_len..]
    }
}

impl LinkObject {
    pub fn extension(&self) -> &str {
        &self.base.remote[self.base.remote.len() - self.ext_len..]
    }
}

/// Converts listed items into entries, recording folders in the
/// directory cache as a side effect.
pub struct EntryBuilder {
    dir_cache: Arc<dyn DirCache>,
    resource_keys: Arc<ResourceKeys>,
    exports: Arc<dyn ExportFormats>,
    skip_gdocs: bool,
    use_created_date: bool,
    size_as_quota: bool,
    download_base: String,
}

impl EntryBuilder {
    pub fn new(
        dir_cache: Arc<dyn DirCache>,
        resource_keys: Arc<ResourceKeys>,
        exports: Arc<dyn ExportFormats>,
        options: &ListOptions,
        download_base: impl Into<String>,
    ) -> Self {
        Self {
            dir_cache,
            resource_keys,
            exports,
            skip_gdocs: options.skip_gdocs,
            use_created_date: options.use_created_date,
            size_as_quota: options.size_as_quota,
            download_base: download_base.into(),
        }
    }

    pub fn exports(&self) -> &dyn ExportFormats {
        self.exports.as_ref()
    }

    /// `Ok(None)` for items that have no local representation.
    pub fn to_entry(&self, remote: &str, item: &File) -> Result<Option<Entry>, CrawlError> {
        if item.is_folder() {
            self.dir_cache.put(remote, &item.id);
            if let Some(key) = item.resource_key.as_deref() {
                self.resource_keys.record(actual_id(&item.id), key);
            }
            return Ok(Some(Entry::Dir(DirEntry {
                remote: remote.to_string(),
                id: item.id.clone(),
                parent_id: item.parents.first().cloned(),
                modified: parse_time(item.modified_time.as_deref()),
            })));
        }

        if item.mime_type == DANGLING_SHORTCUT_MIME_TYPE {
            return Ok(Some(Entry::Dangling(DanglingShortcut {
                base: self.base(remote.to_string(), item),
            })));
        }
        if item.md5().is_some() {
            return Ok(Some(self.regular_object(remote, item)));
        }
        if item.mime_type == SHORTCUT_MIME_TYPE {
            debug!(remote, "ignoring unresolved shortcut");
            return Ok(None);
        }
        if self.skip_gdocs {
            debug!(remote, mime_type = %item.mime_type, "skipping document");
            return Ok(None);
        }
        if !self.exports.is_document(&item.mime_type) {
            debug!(remote, mime_type = %item.mime_type, "ignoring unknown document type");
            return Ok(None);
        }
        let Some(format) = self.exports.find_export(&item.mime_type) else {
            debug!(remote, mime_type = %item.mime_type, "no export format found");
            return Ok(None);
        };
        if format.is_link() {
            self.link_object(remote, item, &format).map(Some)
        } else {
            Ok(Some(self.document_object(remote, item, &format)))
        }
    }

    fn base(&self, remote: String, item: &File) -> ObjectBase {
        let modified = if self.use_created_date {
            item.created_time.as_deref()
        } else {
            item.modified_time.as_deref()
        };
        let size = if self.size_as_quota {
            item.quota_bytes_used
        } else {
            item.size
        };
        ObjectBase {
            remote,
            id: item.id.clone(),
            size,
            mime_type: item.mime_type.clone(),
            modified: parse_time(modified),
            parents: item.parents.clone(),
            resource_key: item.resource_key.clone(),
        }
    }

    fn regular_object(&self, remote: &str, item: &File) -> Entry {
        Entry::Object(FileObject {
            base: self.base(remote.to_string(), item),
            md5: item.md5().map(str::to_ascii_lowercase),
            download_url: format!(
                "{}files/{}?alt=media",
                self.download_base,
                actual_id(&item.id)
            ),
        })
    }

    fn document_object(&self, remote: &str, item: &File, format: &ExportFormat) -> Entry {
        let media_type = format
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        let mut base = self.base(format!("{remote}{}", format.extension), item);
        base.size = None;
        base.mime_type = format.mime_type.clone();
        Entry::Document(DocumentObject {
            base,
            export_url: item.export_links.get(media_type).cloned(),
            document_mime_type: item.mime_type.clone(),
            ext_len: format.extension.len(),
        })
    }

    fn link_object(
        &self,
        remote: &str,
        item: &File,
        format: &ExportFormat,
    ) -> Result<Entry, CrawlError> {
        let content = render_link(
            &format.mime_type,
            item.web_view_link.as_deref().unwrap_or_default(),
            &item.name,
            xdg_icon(&item.mime_type),
        )?;
        let mut base = self.base(format!("{remote}{}", format.extension), item);
        base.size = Some(content.len() as i64);
        base.mime_type = format.mime_type.clone();
        Ok(Entry::Link(LinkObject {
            base,
            content,
            ext_len: format.extension.len(),
        }))
    }
}

fn parse_time(value: Option<&str>) -> Option<OffsetDateTime> {
    value.and_then(|text| OffsetDateTime::parse(text, &Rfc3339).ok())
}
