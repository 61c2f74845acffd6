// SPDX-License-Identifier: Apache-2.0

//! Persisted app lists.
//!
//! An upstream CI stage writes the test-related and non-test-related apps to two files, one
//! JSON-serialized [`App`] per line. Later stages read them back instead of recomputing the
//! selection.

use crate::{
    app::App,
    errors::{AppListReadError, AppListWriteError},
    select::Selection,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeSet, io::Write};
use tracing::{debug, warn};

/// Writes `apps` to `path`, replacing it atomically.
pub fn write_app_list(path: &Utf8Path, apps: &[App]) -> Result<(), AppListWriteError> {
    let mut contents = String::new();
    for app in apps {
        let line = serde_json::to_string(app).map_err(|error| AppListWriteError::Serialize {
            path: path.to_owned(),
            error,
        })?;
        contents.push_str(&line);
        contents.push('\n');
    }

    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|error| AppListWriteError::Write {
            path: path.to_owned(),
            error: atomicwrites::Error::Internal(error),
        })?;
    }

    atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite)
        .write(|file| file.write_all(contents.as_bytes()))
        .map_err(|error| AppListWriteError::Write {
            path: path.to_owned(),
            error,
        })
}

/// Reads an app list written by [`write_app_list`]. Blank lines are ignored.
pub fn read_app_list(path: &Utf8Path) -> Result<Vec<App>, AppListReadError> {
    let contents = std::fs::read_to_string(path).map_err(|error| AppListReadError::Read {
        path: path.to_owned(),
        error,
    })?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|error| AppListReadError::Parse {
                path: path.to_owned(),
                line_number: index + 1,
                error,
            })
        })
        .collect()
}

/// The pair of persisted app list files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppListPair {
    test_related: Utf8PathBuf,
    non_test_related: Utf8PathBuf,
}

impl AppListPair {
    /// Creates a new pair.
    pub fn new(test_related: impl Into<Utf8PathBuf>, non_test_related: impl Into<Utf8PathBuf>) -> Self {
        Self {
            test_related: test_related.into(),
            non_test_related: non_test_related.into(),
        }
    }

    /// Returns the test-related list path.
    pub fn test_related(&self) -> &Utf8Path {
        &self.test_related
    }

    /// Returns the non-test-related list path.
    pub fn non_test_related(&self) -> &Utf8Path {
        &self.non_test_related
    }

    /// Loads both lists.
    ///
    /// Returns `None` if either file is missing. A pair with only one file present is logged as
    /// a warning, since it usually means an upstream stage failed halfway.
    pub fn load(&self) -> Result<Option<Selection>, AppListReadError> {
        match (self.test_related.is_file(), self.non_test_related.is_file()) {
            (true, true) => {
                debug!(
                    "loading app lists from {} and {}",
                    self.test_related, self.non_test_related
                );
                Ok(Some(Selection {
                    test_related: read_app_list(&self.test_related)?,
                    non_test_related: read_app_list(&self.non_test_related)?,
                }))
            }
            (false, false) => Ok(None),
            (true, false) | (false, true) => {
                let (present, absent) = if self.test_related.is_file() {
                    (&self.test_related, &self.non_test_related)
                } else {
                    (&self.non_test_related, &self.test_related)
                };
                warn!(
                    "app list {present} exists but {absent} does not, ignoring both and \
                     recomputing the selection"
                );
                Ok(None)
            }
        }
    }

    /// Writes both lists.
    pub fn write(&self, selection: &Selection) -> Result<(), AppListWriteError> {
        write_app_list(&self.test_related, &selection.test_related)?;
        write_app_list(&self.non_test_related, &selection.non_test_related)
    }

    /// Returns the absolute build directories of every persisted app, or `None` if the lists
    /// are not both present.
    pub fn built_dirs(&self) -> Result<Option<BTreeSet<Utf8PathBuf>>, AppListReadError> {
        Ok(self.load()?.map(|selection| {
            selection
                .test_related
                .iter()
                .chain(&selection.non_test_related)
                .map(App::build_path)
                .collect()
        }))
    }
}
