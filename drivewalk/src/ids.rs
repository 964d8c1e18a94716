//! Composite IDs.
//!
//! A shortcut resolved during listing is identified by the ID of its target
//! plus the ID of the shortcut itself, packed into one token:
//! `actual + SEPARATOR + shortcut`. Directory IDs held in the directory
//! cache are such tokens, so they must be unpacked with [`actual_id`]
//! before being used in a query.

/// Never appears in a remote ID.
pub const SHORTCUT_SEPARATOR: char = '\t';

/// Packs an actual ID with the shortcut it was reached through.
///
/// An empty `shortcut` yields the plain `actual` ID.
pub fn join_id(actual: &str, shortcut: &str) -> String {
    if shortcut.is_empty() {
        return actual.to_string();
    }
    let mut id = String::with_capacity(actual.len() + 1 + shortcut.len());
    id.push_str(actual);
    id.push(SHORTCUT_SEPARATOR);
    id.push_str(shortcut);
    id
}

/// Splits a composite ID into `(actual, shortcut)`; `shortcut` is empty when
/// the ID was not reached through a shortcut.
pub fn split_id(composite: &str) -> (&str, &str) {
    composite
        .split_once(SHORTCUT_SEPARATOR)
        .unwrap_or((composite, ""))
}

pub fn is_shortcut_id(composite: &str) -> bool {
    composite.contains(SHORTCUT_SEPARATOR)
}

pub fn actual_id(composite: &str) -> &str {
    split_id(composite).0
}

/// The shortcut part if present, otherwise the actual ID.
pub fn shortcut_id(composite: &str) -> &str {
    match split_id(composite) {
        (actual, "") => actual,
        (_, shortcut) => shortcut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_id_splits_back() {
        let id = join_id("target", "alias");
        assert_eq!(id, "target\talias");
        assert_eq!(split_id(&id), ("target", "alias"));
        assert!(is_shortcut_id(&id));
        assert_eq!(actual_id(&id), "target");
        assert_eq!(shortcut_id(&id), "alias");
    }

    #[test]
    fn plain_id_has_no_shortcut() {
        assert_eq!(split_id("plain"), ("plain", ""));
        assert!(!is_shortcut_id("plain"));
        assert_eq!(actual_id("plain"), "plain");
        assert_eq!(shortcut_id("plain"), "plain");
    }

    #[test]
    fn empty_shortcut_joins_to_plain_id() {
        let id = join_id("plain", "");
        assert_eq!(id, "plain");
        assert!(!is_shortcut_id(&id));
    }
}
