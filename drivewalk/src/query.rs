//! Search query construction for `files.list`.
//!
//! Clauses are joined with ` and ` in a fixed order: trashed state,
//! parents, title, type restrictions, modification time range.

use drive_core::{FOLDER_MIME_TYPE, SHORTCUT_MIME_TYPE};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::config::ListOptions;

/// Per-call restrictions on what a listing returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter<'a> {
    /// Only items with exactly this name.
    pub title: Option<&'a str>,
    pub directories_only: bool,
    pub files_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltQuery {
    pub q: String,
    /// Title stems searched because the title ends in an export extension.
    pub stems: Vec<String>,
}

pub fn build_query(
    options: &ListOptions,
    root_folder_id: &str,
    dir_ids: &[&str],
    filter: &ListFilter<'_>,
) -> BuiltQuery {
    let mut clauses = vec![trashed_clause(options.trashed_only)];

    if let Some(parents) = parents_clause(options, root_folder_id, dir_ids) {
        clauses.push(parents);
    }

    let mut stems = Vec::new();
    if let Some(title) = filter.title.filter(|t| !t.is_empty()) {
        let search_title = escape_title(title);
        let mut title_clause = format!("(name='{search_title}'");
        if !filter.directories_only && !options.skip_gdocs {
            for ext in &options.export_extensions {
                if let Some(stem) = search_title.strip_suffix(ext.as_str()) {
                    stems.push(title[..title.len() - ext.len()].to_string());
                    title_clause.push_str(&format!(" or name='{stem}'"));
                }
            }
        }
        title_clause.push(')');
        clauses.push(title_clause);
    }

    if filter.directories_only {
        clauses.push(format!(
            "(mimeType='{FOLDER_MIME_TYPE}' or mimeType='{SHORTCUT_MIME_TYPE}')"
        ));
    }
    if filter.files_only {
        clauses.push(format!("mimeType!='{FOLDER_MIME_TYPE}'"));
    }

    if let Some(from) = options.mod_time_from {
        clauses.push(mod_time_clause(">=", from));
    }
    if let Some(to) = options.mod_time_to {
        clauses.push(mod_time_clause("<=", to));
    }

    BuiltQuery {
        q: clauses.join(" and "),
        stems,
    }
}

/// Folders stay visible in trashed-only mode so traversal can reach
/// trashed files inside live folders.
fn trashed_clause(trashed_only: bool) -> String {
    let clause = format!("trashed={trashed_only}");
    if trashed_only {
        format!("(mimeType='{FOLDER_MIME_TYPE}' or {clause})")
    } else {
        clause
    }
}

fn parents_clause(options: &ListOptions, root_folder_id: &str, dir_ids: &[&str]) -> Option<String> {
    let virtual_root = options.shared_with_me || options.starred_only;
    let parts: Vec<String> = dir_ids
        .iter()
        .filter(|id| !id.is_empty())
        .map(|id| {
            if virtual_root && *id == root_folder_id {
                let mut flags = Vec::new();
                if options.shared_with_me {
                    flags.push("sharedWithMe=true");
                }
                if options.starred_only {
                    flags.push("starred=true");
                }
                flags.join(" and ")
            } else {
                format!("'{id}' in parents")
            }
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(format!("({})", parts.join(" or ")))
    }
}

pub fn escape_title(title: &str) -> String {
    title.replace('\\', "\\\\").replace('\'', "\\'")
}

fn mod_time_clause(op: &str, at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let stamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_default();
    format!("(modifiedTime {op} '{stamp}' or mimeType = '{FOLDER_MIME_TYPE}')")
}
