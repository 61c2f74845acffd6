// SPDX-License-Identifier: Apache-2.0

//! Mapping modified files to component names.

use crate::{errors::ComponentRegexError, helpers::forward_slash};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Turns modified file paths into the set of affected component names.
///
/// Each regex must have one capture group that extracts the component name. Regexes are tried in
/// order and the first match wins.
#[derive(Clone, Debug)]
pub struct ComponentMapper {
    regexes: Vec<Regex>,
    ignored_extensions: Vec<String>,
    ignored_paths: Vec<String>,
}

impl ComponentMapper {
    /// Creates a new mapper. Invalid regexes are logged and skipped.
    pub fn new(
        regexes: impl IntoIterator<Item = impl AsRef<str>>,
        ignored_extensions: impl IntoIterator<Item = impl Into<String>>,
        ignored_paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let regexes = regexes
            .into_iter()
            .filter_map(|regex| {
                let regex = regex.as_ref();
                match Regex::new(regex) {
                    Ok(compiled) => Some(compiled),
                    Err(error) => {
                        let error = ComponentRegexError {
                            regex: regex.to_owned(),
                            error,
                        };
                        warn!("skipping component mapping: {error}: {}", error.error);
                        None
                    }
                }
            })
            .collect();

        Self {
            regexes,
            ignored_extensions: ignored_extensions.into_iter().map(Into::into).collect(),
            ignored_paths: ignored_paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the component for one absolute file path, if any.
    pub fn component_for(&self, file: &Utf8Path) -> Option<String> {
        let path = forward_slash(file);
        if self
            .ignored_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
        {
            return None;
        }
        if self
            .ignored_paths
            .iter()
            .any(|ignored| path.contains(ignored.as_str()))
        {
            return None;
        }

        self.regexes.iter().find_map(|regex| {
            regex
                .captures(&path)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_owned())
        })
    }

    /// Maps every file to its component and returns the distinct component names.
    pub fn components_for<'a>(
        &self,
        files: impl IntoIterator<Item = &'a Utf8PathBuf>,
    ) -> BTreeSet<String> {
        let components: BTreeSet<_> = files
            .into_iter()
            .filter_map(|file| self.component_for(file))
            .collect();
        debug!("modified components: {components:?}");
        components
    }
}
