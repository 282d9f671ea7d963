//! Path normalization for workspace/cwd containment checks.
//!
//! Paths arrive from different processes (hooks, editors, shells) that disagree
//! on separators, trailing slashes and drive-letter case, so comparisons always
//! go through [`normalize_path_for_matching`] first:
//! - `\` becomes `/` and repeated separators collapse
//! - trailing separators are stripped (root "/" is preserved)
//! - the whole path is lowercased
//!
//! No filesystem access happens here; the paths may belong to directories that
//! no longer exist.

/// Normalizes a path for case-insensitive, separator-agnostic comparison.
pub fn normalize_path_for_matching(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut previous_was_separator = false;
    for ch in path.trim().chars() {
        let is_separator = ch == '/' || ch == '\\';
        if is_separator {
            if !previous_was_separator {
                normalized.push('/');
            }
        } else {
            normalized.extend(ch.to_lowercase());
        }
        previous_was_separator = is_separator;
    }
    strip_trailing_slashes(&normalized)
}

/// True when `child` equals `parent` or lies beneath it. Matching is on whole
/// path components: `/repo/a` does not contain `/repo/ab`.
pub fn path_is_parent_or_self(parent: &str, child: &str) -> bool {
    let parent = normalize_path_for_matching(parent);
    let child = normalize_path_for_matching(child);
    path_is_parent_or_self_normalized(&parent, &child)
}

/// Containment in either direction. A session's cwd may be a subdirectory of
/// the workspace root, or the workspace root may itself be nested inside the
/// directory the session reported.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let a = normalize_path_for_matching(a);
    let b = normalize_path_for_matching(b);
    path_is_parent_or_self_normalized(&a, &b) || path_is_parent_or_self_normalized(&b, &a)
}

pub(crate) fn path_is_parent_or_self_normalized(parent: &str, child: &str) -> bool {
    if parent.is_empty() || child.is_empty() {
        return false;
    }
    if parent == child {
        return true;
    }
    if parent == "/" {
        return child.starts_with('/');
    }

    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Last path component, used as a fallback display name.
pub fn last_component(path: &str) -> Option<&str> {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
}

/// Strips trailing slashes from a path, preserving root "/".
fn strip_trailing_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
