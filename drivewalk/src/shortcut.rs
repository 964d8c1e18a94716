use drive_core::{DANGLING_SHORTCUT_MIME_TYPE, File, SHORTCUT_MIME_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::DriveApi;
use crate::error::CrawlError;
use crate::ids::join_id;

/// Replaces a listed shortcut with its target.
///
/// The result carries the target's metadata under the shortcut's name,
/// parents and trashed flag, with ID `join_id(target, shortcut)`. A target
/// that no longer exists turns the shortcut into a dangling one that keeps
/// its own ID. Exactly one fetch is made; shortcuts to shortcuts are not
/// followed.
pub async fn resolve_shortcut<A: DriveApi>(
    api: &A,
    fields: &str,
    item: File,
    cancel: &CancellationToken,
) -> Result<File, CrawlError> {
    if item.mime_type != SHORTCUT_MIME_TYPE {
        return Ok(item);
    }
    let Some(target_id) = item
        .shortcut_details
        .as_ref()
        .map(|details| details.target_id.clone())
    else {
        error!(id = %item.id, name = %item.name, "shortcut is missing its details");
        return Ok(item);
    };
    match api.get_file(&target_id, fields, cancel).await {
        Ok(mut target) => {
            target.id = join_id(&target.id, &item.id);
            target.name = item.name;
            target.parents = item.parents;
            target.trashed = item.trashed;
            Ok(target)
        }
        Err(err) if err.is_not_found() => {
            info!(name = %item.name, "dangling shortcut detected");
            Ok(File {
                mime_type: DANGLING_SHORTCUT_MIME_TYPE.to_string(),
                ..item
            })
        }
        Err(err) => Err(CrawlError::shortcut(err)),
    }
}
