mod client;
mod types;

pub use client::{ApiErrorClass, ApiErrorDetail, DriveClient, DriveError, ListQuery};
pub use reqwest::StatusCode;
pub use types::{
    About, DANGLING_SHORTCUT_MIME_TYPE, FOLDER_MIME_TYPE, File, FileList, SHORTCUT_MIME_TYPE,
    ShortcutDetails, StorageQuota,
};
