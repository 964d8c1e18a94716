use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const SHORTCUT_MIME_TYPE: &str = "application/vnd.google-apps.shortcut";
/// Never sent by the API; marks a shortcut whose target could not be fetched.
pub const DANGLING_SHORTCUT_MIME_TYPE: &str = "application/vnd.google-apps.shortcut.dangling";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_int64",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<i64>,
    #[serde(
        default,
        deserialize_with = "de_opt_int64",
        skip_serializing_if = "Option::is_none"
    )]
    pub quota_bytes_used: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut_details: Option<ShortcutDetails>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub export_links: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
}

impl File {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_shortcut(&self) -> bool {
        self.mime_type == SHORTCUT_MIME_TYPE && self.shortcut_details.is_some()
    }

    /// MD5 checksum, treating the empty string the API sometimes sends as absent.
    pub fn md5(&self) -> Option<&str> {
        self.md5_checksum.as_deref().filter(|sum| !sum.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub target_mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub incomplete_search: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    #[serde(default)]
    pub storage_quota: Option<StorageQuota>,
    /// Document MIME type → MIME types it can be exported as.
    #[serde(default)]
    pub export_formats: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    #[serde(default, deserialize_with = "de_opt_int64")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_int64")]
    pub usage: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_int64")]
    pub usage_in_drive_trash: Option<i64>,
}

/// The API encodes int64 fields as JSON strings; accept plain numbers too.
fn de_opt_int64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64Repr {
        Number(i64),
        Text(String),
    }

    match Option::<Int64Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Int64Repr::Number(value)) => Ok(Some(value)),
        Some(Int64Repr::Text(text)) => text
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
