// SPDX-License-Identifier: Apache-2.0

use camino::Utf8Path;

/// Returns `path` relative to `root` for display, or `path` itself if it is outside `root`.
pub(crate) fn rel_path<'a>(root: &Utf8Path, path: &'a Utf8Path) -> &'a Utf8Path {
    path.strip_prefix(root).unwrap_or(path)
}

/// Splits a semicolon-separated command-line list, dropping empty entries.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
