// SPDX-License-Identifier: Apache-2.0

use crate::{
    components::ComponentMapper,
    errors::{ConfigParseError, ConfigParseErrorKind},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{
    Config, ConfigBuilder, ConfigError, File, FileFormat, FileSourceFile, builder::DefaultState,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Overall configuration for idf-ci.
///
/// An embedded default config is the base layer. `.idf_ci.toml` in the workspace root is layered
/// on top if it exists, followed by each extra config file in order.
#[derive(Clone, Debug)]
pub struct IdfCiConfig {
    workspace_root: Utf8PathBuf,
    inner: IdfCiConfigDeserialize,
}

impl IdfCiConfig {
    /// The location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".idf_ci.toml";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the config for `workspace_root`, layering `extra_files` on top of `.idf_ci.toml`.
    ///
    /// Files in `extra_files` that come later are higher priority. Unlike `.idf_ci.toml`, they
    /// must exist.
    pub fn from_sources<'a>(
        workspace_root: impl Into<Utf8PathBuf>,
        extra_files: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let mut composite_builder = Self::make_default_config();
        let mut last_file = workspace_root.join(Self::CONFIG_PATH);

        let repo_source = File::new(last_file.as_str(), FileFormat::Toml).required(false);
        Self::check_individual_config(&workspace_root, &last_file, repo_source.clone())?;
        composite_builder = composite_builder.add_source(repo_source);

        for file in extra_files {
            let source = File::new(file.as_str(), FileFormat::Toml);
            Self::check_individual_config(&workspace_root, file, source.clone())?;
            composite_builder = composite_builder.add_source(source);
            last_file = file.to_owned();
        }

        // Unknown keys were already reported per file.
        let (inner, _unknown) = Self::build_and_deserialize_config(&composite_builder)
            .map_err(|kind| ConfigParseError::new(&last_file, kind))?;

        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the default config.
    #[cfg(test)]
    pub(crate) fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");
        let mut unknown = BTreeSet::new();
        let inner = serde_ignored::deserialize(config, |path: serde_ignored::Path| {
            unknown.insert(path.to_string());
        })
        .expect("default config is always valid");

        // The default config is shipped with the binary, so it must not have unknown keys.
        assert!(
            unknown.is_empty(),
            "found unknown keys in default config: {unknown:?}"
        );
        Self {
            workspace_root: workspace_root.into(),
            inner,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the component mapper built from the base and extended settings.
    pub fn component_mapper(&self) -> ComponentMapper {
        let inner = &self.inner;
        ComponentMapper::new(
            inner
                .component_mapping_regexes
                .iter()
                .chain(&inner.extend_component_mapping_regexes),
            inner
                .component_ignored_file_extensions
                .iter()
                .chain(&inner.extend_component_ignored_file_extensions)
                .cloned(),
            inner.component_ignored_paths.iter().cloned(),
        )
    }

    /// Returns the glob set matching test script file names. Invalid globs are logged and
    /// skipped.
    pub fn pytest_script_globs(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.inner.pytest_script_patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(error) => warn!("skipping invalid pytest script pattern `{pattern}`: {error}"),
            }
        }
        builder.build().unwrap_or_else(|error| {
            warn!("ignoring pytest script patterns: {error}");
            GlobSet::empty()
        })
    }

    /// Returns the manifest file name.
    pub fn manifest_filename(&self) -> &str {
        &self.inner.manifest_filename
    }

    /// Returns the targets built by default.
    pub fn default_build_targets(&self) -> &[String] {
        &self.inner.default_build_targets
    }

    /// Returns the default build targets followed by the preview targets.
    pub fn all_targets(&self) -> Vec<String> {
        let mut targets = self.inner.default_build_targets.clone();
        for target in &self.inner.preview_targets {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
        targets
    }

    /// Returns the host target.
    pub fn host_target(&self) -> &str {
        &self.inner.host_target
    }

    /// Returns the emulator markers.
    pub fn emulator_markers(&self) -> &[String] {
        &self.inner.emulator_markers
    }

    /// Returns the skip markers.
    pub fn skip_markers(&self) -> &[String] {
        &self.inner.skip_markers
    }

    /// Returns the environment markers and their descriptions, in declaration order.
    pub fn env_markers(&self) -> &IndexMap<String, String> {
        &self.inner.env_markers
    }

    /// Returns true if `marker` is an environment marker.
    pub fn is_env_marker(&self, marker: &str) -> bool {
        self.inner.env_markers.contains_key(marker)
    }

    /// Returns the absolute path of the persisted test-related app list.
    pub fn test_related_apps_path(&self) -> Utf8PathBuf {
        self.workspace_root
            .join(&self.inner.collected_test_related_apps_filepath)
    }

    /// Returns the absolute path of the persisted non-test-related app list.
    pub fn non_test_related_apps_path(&self) -> Utf8PathBuf {
        self.workspace_root
            .join(&self.inner.collected_non_test_related_apps_filepath)
    }

    /// Returns true if non-test-related apps are preserved after a build.
    pub fn preserve_non_test_related_apps(&self) -> bool {
        self.inner.preserve_non_test_related_apps
    }

    /// Returns the directories excluded from the app search.
    pub fn exclude_dirs(&self) -> &[String] {
        &self.inner.exclude_dirs
    }

    /// Returns the build directory template.
    pub fn build_dir_template(&self) -> &str {
        &self.inner.build_dir_template
    }

    /// Returns the build engine command.
    pub fn build_command(&self) -> &[String] {
        &self.inner.build.command
    }

    /// Returns the number of apps one CI build job handles.
    pub fn apps_per_job(&self) -> usize {
        self.inner.build.apps_per_job
    }

    /// Returns the test collector command.
    pub fn collector_command(&self) -> &[String] {
        &self.inner.collector.command
    }

    // ---
    // Helper methods
    // ---

    fn check_individual_config(
        workspace_root: &Utf8Path,
        config_file: &Utf8Path,
        source: File<FileSourceFile, FileFormat>,
    ) -> Result<(), ConfigParseError> {
        // Build default + this file alone so errors and unknown keys point at the right file.
        let this_builder = Self::make_default_config().add_source(source);
        let (_, unknown) = Self::build_and_deserialize_config(&this_builder)
            .map_err(|kind| ConfigParseError::new(config_file, kind))?;

        if !unknown.is_empty() {
            let unknown_str = if unknown.len() == 1 {
                // Print this on the same line.
                format!("key: {}", unknown.iter().next().map_or("", String::as_str))
            } else {
                let mut s = String::from("keys:\n");
                for ignored_key in &unknown {
                    s.push_str("\n  - ");
                    s.push_str(ignored_key);
                }
                s
            };
            warn!(
                "in config file {}, ignoring unknown configuration {unknown_str}",
                config_file
                    .strip_prefix(workspace_root)
                    .unwrap_or(config_file),
            );
        }
        Ok(())
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(IdfCiConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: IdfCiConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already records the key.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct IdfCiConfigDeserialize {
    component_mapping_regexes: Vec<String>,
    extend_component_mapping_regexes: Vec<String>,
    component_ignored_file_extensions: Vec<String>,
    extend_component_ignored_file_extensions: Vec<String>,
    component_ignored_paths: Vec<String>,
    pytest_script_patterns: Vec<String>,
    manifest_filename: String,
    default_build_targets: Vec<String>,
    preview_targets: Vec<String>,
    host_target: String,
    emulator_markers: Vec<String>,
    skip_markers: Vec<String>,
    preserve_non_test_related_apps: bool,
    collected_test_related_apps_filepath: Utf8PathBuf,
    collected_non_test_related_apps_filepath: Utf8PathBuf,
    exclude_dirs: Vec<String>,
    build_dir_template: String,
    env_markers: IndexMap<String, String>,
    build: BuildConfig,
    collector: CollectorConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BuildConfig {
    command: Vec<String>,
    apps_per_job: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CollectorConfig {
    command: Vec<String>,
}
