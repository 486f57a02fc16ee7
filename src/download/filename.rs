//! Filename sanitization and on-disk paths for downloads.

use std::path::{Component, Path, PathBuf};

use super::constants::PARTIAL_SUFFIX;

/// Sanitizes a filename for safe filesystem use.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Final path of an item inside `destination_dir`.
pub(crate) fn final_path(destination_dir: &Path, name: &str) -> PathBuf {
    destination_dir.join(sanitize_filename(name))
}

/// In-flight path the body is streamed to before the rename.
pub(crate) fn partial_path(destination_dir: &Path, name: &str) -> PathBuf {
    destination_dir.join(format!("{}{PARTIAL_SUFFIX}", sanitize_filename(name)))
}
