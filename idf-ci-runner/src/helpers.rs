// SPDX-License-Identifier: Apache-2.0

//! General support code for idf-ci-runner.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "app" if `count` is 1, otherwise "apps".
    pub fn apps_str(count: usize) -> &'static str {
        if count == 1 { "app" } else { "apps" }
    }

    /// Returns "test case" if `count` is 1, otherwise "test cases".
    pub fn test_cases_str(count: usize) -> &'static str {
        if count == 1 { "test case" } else { "test cases" }
    }

    /// Returns "project" if `count` is 1, otherwise "projects".
    pub fn projects_str(count: usize) -> &'static str {
        if count == 1 { "project" } else { "projects" }
    }

    /// Returns "group" if `count` is 1, otherwise "groups".
    pub fn groups_str(count: usize) -> &'static str {
        if count == 1 { "group" } else { "groups" }
    }
}

/// Makes `path` absolute relative to `base` and removes `.` and `..` components lexically.
///
/// Symlinks are not resolved, so the result is stable for paths that don't exist yet.
pub(crate) fn normalize_path(base: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    let joined = if path.is_absolute() {
        path.to_owned()
    } else {
        base.join(path)
    };

    let mut out = Utf8PathBuf::new();
    for component in joined.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Converts a path to a string with forward slashes, for matching against regexes and globs.
pub(crate) fn forward_slash(path: &Utf8Path) -> String {
    if cfg!(windows) {
        path.as_str().replace('\\', "/")
    } else {
        path.as_str().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[cfg(unix)]
    #[test_case("/ws", "a/b", "/ws/a/b"; "relative")]
    #[test_case("/ws", "/abs/./x", "/abs/x"; "absolute with curdir")]
    #[test_case("/ws/sub", "../a/../b", "/ws/b"; "parent dirs")]
    fn test_normalize_path(base: &str, path: &str, expected: &str) {
        assert_eq!(
            normalize_path(Utf8Path::new(base), Utf8Path::new(path)),
            Utf8PathBuf::from(expected)
        );
    }
}
