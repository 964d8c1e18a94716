//! Export formats for native documents, and the link files that stand in
//! for documents when a link type is chosen.

use std::collections::{BTreeMap, HashMap};

use drive_core::{About, File};

use crate::error::CrawlError;

const LINK_MIME_PREFIX: &str = "application/x-link-";
const DEFAULT_XDG_ICON: &str = "text-html";

const EXTENSION_MIME_TYPES: &[(&str, &str)] = &[
    (".epub", "application/epub+zip"),
    (".json", "application/json"),
    (".doc", "application/msword"),
    (".pdf", "application/pdf"),
    (".rtf", "application/rtf"),
    (".xls", "application/vnd.ms-excel"),
    (".odp", "application/vnd.oasis.opendocument.presentation"),
    (".ods", "application/vnd.oasis.opendocument.spreadsheet"),
    (".odt", "application/vnd.oasis.opendocument.text"),
    (
        ".pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    (
        ".xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        ".docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (".wmf", "application/x-msmetafile"),
    (".zip", "application/zip"),
    (".bmp", "image/bmp"),
    (".jpg", "image/jpeg"),
    (".pjpeg", "image/pjpeg"),
    (".png", "image/png"),
    (".svg", "image/svg+xml"),
    (".csv", "text/csv"),
    (".html", "text/html"),
    (".txt", "text/plain"),
    (".tsv", "text/tab-separated-values"),
    (".desktop", "application/x-link-desktop"),
    (".link.html", "application/x-link-html"),
    (".url", "application/x-link-url"),
    (".webloc", "application/x-link-webloc"),
];

/// Export MIME types accepted in place of the extension's own type.
const CUSTOM_TRANSFORMS: &[(&str, &str)] =
    &[("application/vnd.google-apps.script+json", "application/json")];

const XDG_LINK_ICONS: &[(&str, &str)] = &[
    ("application/vnd.google-apps.document", "x-office-document"),
    ("application/vnd.google-apps.drawing", "x-office-drawing"),
    (
        "application/vnd.google-apps.presentation",
        "x-office-presentation",
    ),
    (
        "application/vnd.google-apps.spreadsheet",
        "x-office-spreadsheet",
    ),
];

pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    EXTENSION_MIME_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
}

pub fn is_link_mime_type(mime_type: &str) -> bool {
    mime_type.starts_with(LINK_MIME_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFormat {
    /// With a leading dot.
    pub extension: String,
    pub mime_type: String,
}

impl ExportFormat {
    pub fn is_link(&self) -> bool {
        is_link_mime_type(&self.mime_type)
    }
}

/// Document conversions the remote offers.
pub trait ExportFormats: Send + Sync {
    /// Whether items of this MIME type are native documents.
    fn is_document(&self, mime_type: &str) -> bool;

    /// First preferred format this document type can be exported as.
    fn find_export(&self, mime_type: &str) -> Option<ExportFormat>;
}

/// Export formats from `about.exportFormats` matched against an ordered
/// list of preferred extensions.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    formats: HashMap<String, Vec<String>>,
    preferred: Vec<ExportFormat>,
}

impl ExportTable {
    /// Extensions without a known MIME type are ignored.
    pub fn new(formats: BTreeMap<String, Vec<String>>, extensions: &[String]) -> Self {
        let mut preferred: Vec<ExportFormat> = Vec::new();
        for extension in extensions {
            let Some(mime_type) = mime_type_for_extension(extension) else {
                continue;
            };
            if preferred.iter().any(|f| &f.extension == extension) {
                continue;
            }
            preferred.push(ExportFormat {
                extension: extension.clone(),
                mime_type: mime_type.to_string(),
            });
        }
        Self {
            formats: formats.into_iter().collect(),
            preferred,
        }
    }

    pub fn from_about(about: &About, extensions: &[String]) -> Self {
        Self::new(about.export_formats.clone(), extensions)
    }

    fn first_link(&self) -> Option<ExportFormat> {
        self.preferred.iter().find(|f| f.is_link()).cloned()
    }
}

impl ExportFormats for ExportTable {
    fn is_document(&self, mime_type: &str) -> bool {
        self.formats.contains_key(mime_type)
    }

    fn find_export(&self, mime_type: &str) -> Option<ExportFormat> {
        let offered = self.formats.get(mime_type)?;
        for format in &self.preferred {
            if format.is_link() {
                return Some(format.clone());
            }
            for export in offered {
                let transformed = CUSTOM_TRANSFORMS
                    .iter()
                    .find(|(from, _)| from == export)
                    .map(|(_, to)| *to);
                if *export == format.mime_type || transformed == Some(format.mime_type.as_str()) {
                    return Some(ExportFormat {
                        extension: format.extension.clone(),
                        mime_type: export.clone(),
                    });
                }
            }
        }
        self.first_link()
    }
}

/// Whether `item` is a native document rather than stored content.
pub fn is_document(exports: &dyn ExportFormats, item: &File) -> bool {
    item.md5().is_none() && !item.is_folder() && exports.is_document(&item.mime_type)
}

/// Name an exportable document is listed under: its title plus the export
/// extension.
pub fn export_name(exports: &dyn ExportFormats, item: &File) -> Option<String> {
    if item.md5().is_some() || item.is_folder() {
        return None;
    }
    exports
        .find_export(&item.mime_type)
        .map(|format| format!("{}{}", item.name, format.extension))
}

pub fn xdg_icon(document_mime_type: &str) -> &'static str {
    XDG_LINK_ICONS
        .iter()
        .find(|(mime, _)| *mime == document_mime_type)
        .map(|(_, icon)| *icon)
        .unwrap_or(DEFAULT_XDG_ICON)
}

/// Renders the link file for `link_mime_type` pointing at `url`.
pub fn render_link(
    link_mime_type: &str,
    url: &str,
    title: &str,
    icon: &str,
) -> Result<String, CrawlError> {
    let content = match link_mime_type {
        "application/x-link-url" => format!("[InternetShortcut]\r\nURL={url}\r\n"),
        "application/x-link-webloc" => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
             <plist version=\"1.0\">\n  <dict>\n    <key>URL</key>\n    <string>{url}</string>\n  </dict>\n</plist>\n"
        ),
        "application/x-link-desktop" => format!(
            "[Desktop Entry]\nEncoding=UTF-8\nName={title}\nURL={url}\nIcon={icon}\nType=Link\n"
        ),
        "application/x-link-html" => format!(
            "<html>\n<head>\n  <meta http-equiv=\"refresh\" content=\"0; url={url}\" />\n  \
             <title>{title}</title>\n</head>\n<body>\n  Loading <a href=\"{url}\">{title}</a>\n</body>\n</html>\n"
        ),
        other => return Err(CrawlError::UnsupportedLink(other.to_string())),
    };
    Ok(content)
}
