// SPDX-License-Identifier: Apache-2.0

//! Build-test rule manifests.
//!
//! A manifest is a TOML file with one table per folder, keyed by the folder path relative to the
//! manifest:
//!
//! ```toml
//! ["examples/wifi/scan"]
//! enable = [{ if = 'IDF_TARGET in ["esp32", "esp32c3"]' }]
//! disable_test = [{ if = 'IDF_TARGET == "esp32c3"', temporary = true, reason = "lack of runners" }]
//! depends_components = ["esp_wifi"]
//! depends_filepatterns = ["examples/wifi/common/**/*"]
//! ```
//!
//! The most specific folder rule covering an app applies to it.

use crate::{
    errors::{ManifestLoadError, ManifestLoadErrorKind},
    helpers::{forward_slash, normalize_path},
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSet, GlobSetBuilder};
use idf_ci_filtering::{ManifestCondition, Value};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Clause kinds, used as keys in [`RuleDecision::matched_rules`].
pub const ENABLE: &str = "enable";
/// See [`ENABLE`].
pub const DISABLE: &str = "disable";
/// See [`ENABLE`].
pub const DISABLE_TEST: &str = "disable_test";

#[derive(Debug, Deserialize)]
struct DeserializedClause {
    #[serde(rename = "if")]
    condition: String,
    #[serde(default)]
    temporary: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeserializedFolderRule {
    #[serde(default)]
    enable: Vec<DeserializedClause>,
    #[serde(default)]
    disable: Vec<DeserializedClause>,
    #[serde(default)]
    disable_test: Vec<DeserializedClause>,
    #[serde(default)]
    depends_components: Vec<String>,
    #[serde(default)]
    depends_filepatterns: Vec<String>,
}

/// One `if` clause of a folder rule.
#[derive(Clone, Debug)]
pub struct Clause {
    condition: ManifestCondition,
    temporary: bool,
    reason: String,
}

impl Clause {
    fn matches(&self, target: &str, config: &str) -> bool {
        let lookup = |name: &str| match name {
            "IDF_TARGET" => Some(Value::from(target)),
            "CONFIG_NAME" => Some(Value::from(config)),
            _ => None,
        };
        match self.condition.evaluate(lookup) {
            Ok(matched) => matched,
            Err(error) => {
                warn!(
                    "manifest condition `{}` could not be evaluated, treating it as not matched: {error}",
                    self.condition
                );
                false
            }
        }
    }

    fn comment(&self, fallback: &str) -> String {
        if self.reason.is_empty() {
            format!("{fallback} `{}`", self.condition)
        } else {
            self.reason.clone()
        }
    }
}

/// The rule for one folder.
#[derive(Clone, Debug)]
pub struct FolderRule {
    folder: Utf8PathBuf,
    base: Utf8PathBuf,
    enable: Vec<Clause>,
    disable: Vec<Clause>,
    disable_test: Vec<Clause>,
    depends_components: Vec<String>,
    depends_filepatterns: Vec<String>,
    filepatterns: GlobSet,
}

impl FolderRule {
    /// Returns the absolute folder this rule covers.
    pub fn folder(&self) -> &Utf8Path {
        &self.folder
    }

    /// Returns the declared component dependencies.
    pub fn depends_components(&self) -> &[String] {
        &self.depends_components
    }

    /// Returns the declared file pattern dependencies, relative to the manifest directory.
    pub fn depends_filepatterns(&self) -> &[String] {
        &self.depends_filepatterns
    }

    /// Returns true if `file` matches one of the `depends_filepatterns` globs.
    pub fn matches_filepattern(&self, file: &Utf8Path) -> bool {
        if self.depends_filepatterns.is_empty() {
            return false;
        }
        match file.strip_prefix(&self.base) {
            Ok(rel) => self.filepatterns.is_match(forward_slash(rel)),
            Err(_) => false,
        }
    }

    /// Decides whether `target` is built and tested for `config`.
    ///
    /// `defaults` is the target set used when the rule has no `enable` clauses.
    pub fn decide(&self, target: &str, config: &str, defaults: &[String]) -> RuleDecision {
        let mut decision = RuleDecision::enabled();

        if self.enable.is_empty() {
            if !defaults.iter().any(|t| t == target) {
                decision.disable_build(format!(
                    "target {target} is not in the default build targets"
                ));
            }
        } else if decision.record(ENABLE, &self.enable, target, config).is_none() {
            decision.disable_build("not enabled by any manifest rule".to_owned());
        }

        if let Some(clause) = decision.record(DISABLE, &self.disable, target, config)
            && decision.build_enabled
        {
            decision.disable_build(clause.comment("disabled by rule"));
        }

        if let Some(clause) = decision.record(DISABLE_TEST, &self.disable_test, target, config)
            && decision.test_enabled
        {
            decision.test_enabled = false;
            decision.test_comment = clause.comment("test disabled by rule");
        }

        decision
    }
}

/// The outcome of applying a folder rule to one target and config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleDecision {
    /// True if the app should be built.
    pub build_enabled: bool,

    /// Why the app is not built.
    pub build_comment: String,

    /// True if the app's tests are enabled. Always false if the build is disabled.
    pub test_enabled: bool,

    /// Why tests are disabled, if a `disable_test` clause matched.
    pub test_comment: String,

    /// Matching clause texts keyed by kind.
    pub matched_rules: BTreeMap<String, Vec<String>>,

    /// True if a matching clause is temporary.
    pub has_temp_rule: bool,
}

impl RuleDecision {
    fn enabled() -> Self {
        Self {
            build_enabled: true,
            build_comment: String::new(),
            test_enabled: true,
            test_comment: String::new(),
            matched_rules: BTreeMap::new(),
            has_temp_rule: false,
        }
    }

    /// Records every clause of `kind` matching `target` and `config`, returning the first one.
    fn record<'c>(
        &mut self,
        kind: &str,
        clauses: &'c [Clause],
        target: &str,
        config: &str,
    ) -> Option<&'c Clause> {
        let mut first = None;
        for clause in clauses.iter().filter(|c| c.matches(target, config)) {
            self.matched_rules
                .entry(kind.to_owned())
                .or_default()
                .push(clause.condition.as_str().to_owned());
            self.has_temp_rule |= clause.temporary;
            first.get_or_insert(clause);
        }
        first
    }

    fn disable_build(&mut self, comment: String) {
        self.build_enabled = false;
        self.build_comment = comment;
        self.test_enabled = false;
    }

    /// Applies the default rule: built and tested if `target` is a default target.
    pub fn for_defaults(target: &str, defaults: &[String]) -> Self {
        let mut decision = Self::enabled();
        if !defaults.iter().any(|t| t == target) {
            decision.disable_build(format!(
                "target {target} is not in the default build targets"
            ));
        }
        decision
    }
}

/// The folder rules from every loaded manifest.
#[derive(Clone, Debug, Default)]
pub struct ManifestRules {
    rules: Vec<FolderRule>,
}

impl ManifestRules {
    /// Creates an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads each manifest file in order. Later manifests win ties for the same folder.
    pub fn load<'a>(
        files: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> Result<Self, ManifestLoadError> {
        let mut rules = Self::new();
        for file in files {
            let contents = std::fs::read_to_string(file).map_err(|error| ManifestLoadError {
                path: file.to_owned(),
                kind: ManifestLoadErrorKind::Read(error),
            })?;
            rules.add_manifest(file, &contents)?;
        }
        Ok(rules)
    }

    /// Parses one manifest and adds its folder rules.
    pub fn add_manifest(
        &mut self,
        manifest_path: &Utf8Path,
        contents: &str,
    ) -> Result<(), ManifestLoadError> {
        let err = |kind| ManifestLoadError {
            path: manifest_path.to_owned(),
            kind,
        };
        let base = manifest_path
            .parent()
            .map_or_else(Utf8PathBuf::new, Utf8Path::to_owned);

        let toml_de = toml::de::Deserializer::parse(contents)
            .map_err(|error| err(ManifestLoadErrorKind::TomlParse(Box::new(error))))?;
        let mut unknown = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            unknown.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(toml_de, &mut cb);
        let folders: IndexMap<String, DeserializedFolderRule> =
            serde_path_to_error::deserialize(ignored_de)
                .map_err(|error| err(ManifestLoadErrorKind::Deserialize(Box::new(error))))?;

        if !unknown.is_empty() {
            warn!(
                "ignoring unknown keys in manifest {manifest_path}: {}",
                unknown.into_iter().collect::<Vec<_>>().join(", ")
            );
        }

        for (folder, raw) in folders {
            let filepatterns =
                build_globset(&raw.depends_filepatterns).map_err(|(pattern, error)| {
                    err(ManifestLoadErrorKind::InvalidGlob {
                        folder: folder.clone(),
                        pattern,
                        error,
                    })
                })?;
            self.rules.push(FolderRule {
                folder: normalize_path(&base, Utf8Path::new(&folder)),
                base: base.clone(),
                enable: parse_clauses(manifest_path, &folder, raw.enable),
                disable: parse_clauses(manifest_path, &folder, raw.disable),
                disable_test: parse_clauses(manifest_path, &folder, raw.disable_test),
                depends_components: raw.depends_components,
                depends_filepatterns: raw.depends_filepatterns,
                filepatterns,
            });
        }
        Ok(())
    }

    /// Returns true if no folder rules were loaded.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the most specific rule covering `app_dir`, if any.
    pub fn rule_for(&self, app_dir: &Utf8Path) -> Option<&FolderRule> {
        // max_by_key returns the last maximum, so later manifests win ties.
        self.rules
            .iter()
            .filter(|rule| app_dir.starts_with(&rule.folder))
            .max_by_key(|rule| rule.folder.components().count())
    }

    /// Decides whether `target` is built and tested for the app at `app_dir` with `config`.
    pub fn decide(
        &self,
        app_dir: &Utf8Path,
        target: &str,
        config: &str,
        defaults: &[String],
    ) -> RuleDecision {
        match self.rule_for(app_dir) {
            Some(rule) => rule.decide(target, config, defaults),
            None => RuleDecision::for_defaults(target, defaults),
        }
    }
}

fn parse_clauses(
    manifest_path: &Utf8Path,
    folder: &str,
    raw: Vec<DeserializedClause>,
) -> Vec<Clause> {
    raw.into_iter()
        .filter_map(|clause| match ManifestCondition::parse(clause.condition) {
            Ok(condition) => Some(Clause {
                condition,
                temporary: clause.temporary,
                reason: clause.reason,
            }),
            Err(errors) => {
                warn!(
                    "skipping invalid condition `{}` for `{folder}` in {manifest_path}: {errors}",
                    errors.input
                );
                None
            }
        })
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, (String, globset::Error)> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|error| (pattern.clone(), error))?;
        builder.add(glob);
    }
    builder.build().map_err(|error| (patterns.join(", "), error))
}
