// SPDX-License-Identifier: Apache-2.0

//! Enumerating apps across the path × target × config matrix.

use crate::{
    app::{App, DEFAULT_CONFIG_NAME, render_build_dir},
    errors::{FindAppsError, PathNotFoundError},
    helpers::{normalize_path, plural},
    manifest::ManifestRules,
    target::TargetFilter,
};
use camino::{Utf8Path, Utf8PathBuf};
use idf_ci_metadata::BuildStatus;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const SDKCONFIG_CI_PREFIX: &str = "sdkconfig.ci";
const IDF_TARGET_OPTION: &str = "CONFIG_IDF_TARGET=";

/// Modified files and components used to skip apps that a change does not affect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModifiedSet {
    /// Absolute paths of modified files.
    pub files: BTreeSet<Utf8PathBuf>,

    /// Names of modified components.
    pub components: BTreeSet<String>,
}

/// Finds apps under a set of search paths.
#[derive(Clone, Debug)]
pub struct AppFinder {
    workspace_root: Utf8PathBuf,
    default_build_targets: Vec<String>,
    manifest_filename: String,
    exclude_dirs: Vec<Utf8PathBuf>,
    build_dir_template: String,
    include_disabled: bool,
}

impl AppFinder {
    /// Creates a finder rooted at `workspace_root`.
    pub fn new(
        workspace_root: impl Into<Utf8PathBuf>,
        default_build_targets: Vec<String>,
        manifest_filename: impl Into<String>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            default_build_targets,
            manifest_filename: manifest_filename.into(),
            exclude_dirs: Vec::new(),
            build_dir_template: crate::app::DEFAULT_BUILD_DIR_TEMPLATE.to_owned(),
            include_disabled: false,
        }
    }

    /// Skips these directories, given relative to the workspace root or as absolute paths.
    pub fn set_exclude_dirs(&mut self, dirs: impl IntoIterator<Item = impl AsRef<str>>) -> &mut Self {
        self.exclude_dirs = dirs
            .into_iter()
            .map(|dir| normalize_path(&self.workspace_root, Utf8Path::new(dir.as_ref())))
            .collect();
        self
    }

    /// Sets the build directory template.
    pub fn set_build_dir_template(&mut self, template: impl Into<String>) -> &mut Self {
        self.build_dir_template = template.into();
        self
    }

    /// If true, apps disabled by manifest rules are returned with [`BuildStatus::Disabled`].
    /// Otherwise they are left out.
    pub fn set_include_disabled(&mut self, include_disabled: bool) -> &mut Self {
        self.include_disabled = include_disabled;
        self
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns every app under `paths`, sorted by key.
    ///
    /// With `modified` set, apps not affected by the change are [`BuildStatus::Skipped`].
    pub fn find(
        &self,
        paths: &[Utf8PathBuf],
        targets: &TargetFilter,
        modified: Option<&ModifiedSet>,
    ) -> Result<Vec<App>, FindAppsError> {
        let mut app_dirs = BTreeSet::new();
        let mut manifest_files = BTreeSet::new();

        for path in paths {
            let path = normalize_path(&self.workspace_root, path);
            if !path.exists() {
                return Err(PathNotFoundError { path }.into());
            }
            let dir = if path.is_dir() {
                path
            } else {
                match path.parent() {
                    Some(parent) => parent.to_owned(),
                    None => continue,
                }
            };
            self.ancestor_manifests(&dir, &mut manifest_files);
            self.walk(&dir, &mut app_dirs, &mut manifest_files)?;
        }

        let rules = ManifestRules::load(manifest_files.iter().map(|p| p.as_path()))?;
        let build_targets = targets.build_targets(&self.default_build_targets);

        let mut apps = BTreeMap::new();
        for app_dir in &app_dirs {
            for (config, restricted_target) in read_configs(app_dir)? {
                for target in &build_targets {
                    if restricted_target
                        .as_deref()
                        .is_some_and(|restricted| restricted != target)
                    {
                        continue;
                    }
                    if let Some(app) = self.make_app(
                        &rules,
                        app_dir,
                        target,
                        &config,
                        restricted_target.is_some(),
                        modified,
                    ) {
                        apps.insert(app.key(), app);
                    }
                }
            }
        }

        debug!(
            "found {} {} in {} directories",
            apps.len(),
            plural::apps_str(apps.len()),
            app_dirs.len()
        );
        Ok(apps.into_values().collect())
    }

    fn make_app(
        &self,
        rules: &ManifestRules,
        app_dir: &Utf8Path,
        target: &str,
        config: &str,
        config_restricts_target: bool,
        modified: Option<&ModifiedSet>,
    ) -> Option<App> {
        let restricted_defaults;
        let defaults: &[String] = if config_restricts_target {
            restricted_defaults = [target.to_owned()];
            &restricted_defaults
        } else {
            &self.default_build_targets
        };

        let decision = rules.decide(app_dir, target, config, defaults);
        if !decision.build_enabled && !self.include_disabled {
            return None;
        }

        let mut app = App::new(app_dir, target, config);
        app.build_dir = render_build_dir(&self.build_dir_template, target, config);
        app.test_enabled = decision.test_enabled;
        app.test_comment = decision.test_comment;
        app.has_temp_rule = decision.has_temp_rule;
        app.matched_rules = decision.matched_rules;

        if !decision.build_enabled {
            app.build_status = BuildStatus::Disabled;
            app.build_comment = decision.build_comment;
        } else if let Some(modified) = modified
            && let Some(comment) = skip_reason(rules, app_dir, modified)
        {
            app.build_status = BuildStatus::Skipped;
            app.build_comment = comment;
        }
        Some(app)
    }

    fn ancestor_manifests(&self, dir: &Utf8Path, manifests: &mut BTreeSet<Utf8PathBuf>) {
        for ancestor in dir.ancestors().skip(1) {
            if !ancestor.starts_with(&self.workspace_root) {
                break;
            }
            let candidate = ancestor.join(&self.manifest_filename);
            if candidate.is_file() {
                manifests.insert(candidate);
            }
        }
    }

    fn walk(
        &self,
        dir: &Utf8Path,
        app_dirs: &mut BTreeSet<Utf8PathBuf>,
        manifests: &mut BTreeSet<Utf8PathBuf>,
    ) -> Result<(), FindAppsError> {
        let read_dir_err = |error| FindAppsError::ReadDir {
            path: dir.to_owned(),
            error,
        };

        let mut subdirs = Vec::new();
        for entry in dir.read_dir_utf8().map_err(read_dir_err)? {
            let entry = entry.map_err(read_dir_err)?;
            let file_type = entry.file_type().map_err(read_dir_err)?;
            let name = entry.file_name();
            if file_type.is_dir() {
                if !name.starts_with('.') && !name.starts_with("build") {
                    subdirs.push(entry.into_path());
                }
            } else if name == self.manifest_filename {
                manifests.insert(entry.into_path());
            }
        }

        if is_app_dir(dir)? {
            app_dirs.insert(dir.to_owned());
            return Ok(());
        }

        subdirs.sort();
        for subdir in subdirs {
            if self.exclude_dirs.iter().any(|excluded| subdir.starts_with(excluded)) {
                debug!("skipping excluded directory {subdir}");
                continue;
            }
            self.walk(&subdir, app_dirs, manifests)?;
        }
        Ok(())
    }
}

/// Returns why the app is skipped for this change, or `None` if it should be built.
fn skip_reason(rules: &ManifestRules, app_dir: &Utf8Path, modified: &ModifiedSet) -> Option<String> {
    if modified.files.iter().any(|file| file.starts_with(app_dir)) {
        return None;
    }

    let rule = rules.rule_for(app_dir);
    let depends_components = rule.map_or(&[][..], |rule| rule.depends_components());
    if depends_components.is_empty() {
        if !modified.components.is_empty() {
            return None;
        }
    } else if depends_components
        .iter()
        .any(|component| modified.components.contains(component))
    {
        return None;
    }

    if let Some(rule) = rule
        && modified
            .files
            .iter()
            .any(|file| rule.matches_filepattern(file))
    {
        return None;
    }

    Some("no modified files or components affect this app".to_owned())
}

fn is_app_dir(dir: &Utf8Path) -> Result<bool, FindAppsError> {
    let cmake = dir.join("CMakeLists.txt");
    if !cmake.is_file() {
        return Ok(false);
    }
    let contents = std::fs::read_to_string(&cmake)
        .map_err(|error| FindAppsError::ReadFile { path: cmake, error })?;
    Ok(contents.contains("project("))
}

/// Returns `(config name, restricted target)` for each `sdkconfig.ci*` file in the app.
fn read_configs(app_dir: &Utf8Path) -> Result<Vec<(String, Option<String>)>, FindAppsError> {
    let read_dir_err = |error| FindAppsError::ReadDir {
        path: app_dir.to_owned(),
        error,
    };

    let mut configs = BTreeMap::new();
    for entry in app_dir.read_dir_utf8().map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        let name = entry.file_name();
        let config = if name == SDKCONFIG_CI_PREFIX {
            DEFAULT_CONFIG_NAME
        } else if let Some(config) = name
            .strip_prefix(SDKCONFIG_CI_PREFIX)
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|config| !config.is_empty())
        {
            config
        } else {
            continue;
        };
        let contents = std::fs::read_to_string(entry.path()).map_err(|error| {
            FindAppsError::ReadFile {
                path: entry.path().to_owned(),
                error,
            }
        })?;
        configs.insert(config.to_owned(), restricted_target(&contents));
    }

    if configs.is_empty() {
        configs.insert(DEFAULT_CONFIG_NAME.to_owned(), None);
    }
    Ok(configs.into_iter().collect())
}

fn restricted_target(sdkconfig: &str) -> Option<String> {
    sdkconfig.lines().find_map(|line| {
        line.trim()
            .strip_prefix(IDF_TARGET_OPTION)
            .map(|value| value.trim().trim_matches('"').to_owned())
            .filter(|value| !value.is_empty())
    })
}
