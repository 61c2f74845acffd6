// SPDX-License-Identifier: Apache-2.0

//! Buildable apps and their identity.

use camino::Utf8PathBuf;
use idf_ci_metadata::BuildStatus;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// The config name used when an app declares no `sdkconfig.ci.*` files.
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// The default build directory template. `@t` expands to the target, `@w` to the config name.
pub const DEFAULT_BUILD_DIR_TEMPLATE: &str = "build_@t_@w";

/// Renders a build directory template for a target and config.
pub fn render_build_dir(template: &str, target: &str, config: &str) -> String {
    template.replace("@t", target).replace("@w", config)
}

/// The join key shared by apps and test case device slots.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct AppKey {
    /// The absolute app directory.
    pub path: Utf8PathBuf,

    /// The chip target.
    pub target: String,

    /// The config name.
    pub config: String,
}

impl AppKey {
    /// Creates a new key.
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        target: impl Into<String>,
        config: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
            config: config.into(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.path, self.target, self.config)
    }
}

/// One buildable firmware unit.
///
/// Serialized one per line in the persisted app lists.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct App {
    /// The absolute app directory.
    pub path: Utf8PathBuf,

    /// The chip target.
    pub target: String,

    /// The config name.
    pub config: String,

    /// The build status.
    pub build_status: BuildStatus,

    /// Why the app is disabled or skipped.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_comment: String,

    /// Why tests are disabled for this app.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_comment: String,

    /// Whether build artifacts should be kept after CI.
    #[serde(default)]
    pub preserve: bool,

    /// The build directory, relative to the app directory.
    pub build_dir: String,

    /// True if a matching manifest clause is marked temporary.
    #[serde(default)]
    pub has_temp_rule: bool,

    /// Matching manifest clause texts, keyed by clause kind.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matched_rules: BTreeMap<String, Vec<String>>,

    /// False if manifest rules disable tests for this target and config.
    #[serde(default = "default_true")]
    pub test_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl App {
    /// Creates a new app that should be built, with the default build directory.
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        target: impl Into<String>,
        config: impl Into<String>,
    ) -> Self {
        let target = target.into();
        let config = config.into();
        let build_dir = render_build_dir(DEFAULT_BUILD_DIR_TEMPLATE, &target, &config);
        Self {
            path: path.into(),
            target,
            config,
            build_status: BuildStatus::ShouldBeBuilt,
            build_comment: String::new(),
            test_comment: String::new(),
            preserve: false,
            build_dir,
            has_temp_rule: false,
            matched_rules: BTreeMap::new(),
            test_enabled: true,
        }
    }

    /// Returns the join key of this app.
    pub fn key(&self) -> AppKey {
        AppKey::new(&self.path, &self.target, &self.config)
    }

    /// Returns the absolute build directory.
    pub fn build_path(&self) -> Utf8PathBuf {
        self.path.join(&self.build_dir)
    }

    /// Marks a skipped app as needing a build because one of its test scripts changed.
    ///
    /// Returns true if the status changed. Disabled apps and apps that were already built are
    /// left alone.
    pub fn promote_to_build(&mut self) -> bool {
        match self.build_status {
            BuildStatus::Skipped => {
                self.build_status = BuildStatus::ShouldBeBuilt;
                self.build_comment.clear();
                true
            }
            BuildStatus::ShouldBeBuilt
            | BuildStatus::Disabled
            | BuildStatus::Success
            | BuildStatus::Failed => false,
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}): {}",
            self.path, self.target, self.config, self.build_status
        )?;
        if !self.build_comment.is_empty() {
            write!(f, " ({})", self.build_comment)?;
        }
        Ok(())
    }
}
