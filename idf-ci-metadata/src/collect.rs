// SPDX-License-Identifier: Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// The build status of an app.
///
/// Apps start out as [`ShouldBeBuilt`](Self::ShouldBeBuilt), [`Disabled`](Self::Disabled) or
/// [`Skipped`](Self::Skipped). Only apps that should be built ever move on to
/// [`Success`](Self::Success) or [`Failed`](Self::Failed).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
pub enum BuildStatus {
    /// The app is selected for building.
    #[serde(rename = "should be built")]
    ShouldBeBuilt,

    /// The app is disabled by a manifest rule.
    #[serde(rename = "disabled")]
    Disabled,

    /// The app is not affected by the current change set.
    #[serde(rename = "skipped")]
    Skipped,

    /// The app was built successfully.
    #[serde(rename = "build success")]
    Success,

    /// The app failed to build.
    #[serde(rename = "build failed")]
    Failed,
}

impl BuildStatus {
    /// Returns the string form used in serialized output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShouldBeBuilt => "should be built",
            Self::Disabled => "disabled",
            Self::Skipped => "skipped",
            Self::Success => "build success",
            Self::Failed => "build failed",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A summary status for an app combining its build status with the state of its test cases.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AppStatus {
    /// Should be built, with no attached test cases.
    ShouldBeBuilt,
    /// Should be built and all test cases are enabled.
    ShouldBeBuiltAndTestsEnabled,
    /// Should be built and all test cases are skipped.
    ShouldBeBuiltAndTestsSkipped,
    /// Should be built, some test cases are enabled and some are skipped.
    ShouldBeBuiltAndTestsMixed,
    /// Disabled, with no attached test cases.
    Disabled,
    /// Disabled and all test cases are enabled.
    DisabledAndTestsEnabled,
    /// Disabled and all test cases are skipped.
    DisabledAndTestsSkipped,
    /// Disabled, some test cases are enabled and some are skipped.
    DisabledAndTestsMixed,
}

impl AppStatus {
    /// Derives the status from the three relevant flags.
    pub fn new(is_disabled: bool, has_enabled_tests: bool, has_skipped_tests: bool) -> Self {
        match (is_disabled, has_enabled_tests, has_skipped_tests) {
            (false, false, false) => Self::ShouldBeBuilt,
            (false, true, false) => Self::ShouldBeBuiltAndTestsEnabled,
            (false, false, true) => Self::ShouldBeBuiltAndTestsSkipped,
            (false, true, true) => Self::ShouldBeBuiltAndTestsMixed,
            (true, false, false) => Self::Disabled,
            (true, true, false) => Self::DisabledAndTestsEnabled,
            (true, false, true) => Self::DisabledAndTestsSkipped,
            (true, true, true) => Self::DisabledAndTestsMixed,
        }
    }

    /// The short code for this status, e.g. `BTS`.
    pub fn code(self) -> &'static str {
        match self {
            Self::ShouldBeBuilt => "B",
            Self::ShouldBeBuiltAndTestsEnabled => "BT",
            Self::ShouldBeBuiltAndTestsSkipped => "BS",
            Self::ShouldBeBuiltAndTestsMixed => "BTS",
            Self::Disabled => "D",
            Self::DisabledAndTestsEnabled => "DT",
            Self::DisabledAndTestsSkipped => "DS",
            Self::DisabledAndTestsMixed => "DTS",
        }
    }

    /// A human-readable description of this status.
    pub fn description(self) -> &'static str {
        match self {
            Self::ShouldBeBuilt => "Should be built",
            Self::ShouldBeBuiltAndTestsEnabled => "Should be built and all test cases are enabled",
            Self::ShouldBeBuiltAndTestsSkipped => "Should be built and all test cases are skipped",
            Self::ShouldBeBuiltAndTestsMixed => {
                "Should be built, some test cases are enabled and some are skipped"
            }
            Self::Disabled => "Disabled",
            Self::DisabledAndTestsEnabled => "Disabled and all test cases are enabled",
            Self::DisabledAndTestsSkipped => "Disabled and all test cases are skipped",
            Self::DisabledAndTestsMixed => {
                "Disabled, some test cases are enabled and some are skipped"
            }
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A test case attached to an app (or to a missing app).
///
/// Enabled cases serialize to just their name and case ID.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct CaseReport {
    /// The test function name.
    pub name: String,

    /// The case ID, see `TestCase::case_id` in idf-ci-runner.
    pub caseid: String,

    /// True if the case is disabled for this app, by manifest or by marker.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,

    /// True if a manifest `disable_test` (or a disabled build) excludes this target.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled_by_manifest: bool,

    /// True if a skip marker on the test excludes this target.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled_by_marker: bool,

    /// The reason attached to the skip marker, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub skip_reason: String,

    /// The reason attached to the matching manifest `disable_test` clause, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_comment: String,
}

impl CaseReport {
    /// Returns true if the case is disabled only by the manifest.
    pub fn is_disabled_by_manifest_only(&self) -> bool {
        self.disabled_by_manifest && !self.disabled_by_marker
    }

    /// Returns true if the case is disabled only by a marker.
    pub fn is_disabled_by_marker_only(&self) -> bool {
        self.disabled_by_marker && !self.disabled_by_manifest
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// An app found under a project path, with the test cases that reference it.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct AppReport {
    /// The target the app is built for.
    pub target: String,

    /// The build config name.
    pub config: String,

    /// The build status.
    pub build_status: BuildStatus,

    /// Why the app is disabled or skipped, verbatim from the matching rule.
    #[serde(default)]
    pub build_comment: String,

    /// Why tests are disabled for this app, verbatim from the matching rule.
    #[serde(default)]
    pub test_comment: String,

    /// Test cases attached to this app.
    #[serde(default)]
    pub test_cases: Vec<CaseReport>,

    /// True if any matching manifest clause is marked temporary.
    #[serde(default)]
    pub has_temp_rule: bool,

    /// Matching manifest clauses, keyed by clause kind (`enable`, `disable`, `disable_test`).
    #[serde(default)]
    pub matched_rules: BTreeMap<String, Vec<String>>,
}

impl AppReport {
    /// Returns the combined status code for this app.
    pub fn status(&self) -> AppStatus {
        let disabled = self.test_cases.iter().filter(|c| c.disabled).count();
        let enabled = self.test_cases.len() - disabled;
        AppStatus::new(
            self.build_status == BuildStatus::Disabled,
            enabled > 0,
            disabled > 0,
        )
    }

    /// Test cases disabled by the manifest but not by any marker.
    pub fn disabled_by_manifest_only(&self) -> impl Iterator<Item = &CaseReport> + '_ {
        self.test_cases
            .iter()
            .filter(|c| c.is_disabled_by_manifest_only())
    }

    /// Test cases disabled by a marker but not by the manifest.
    pub fn disabled_by_marker_only(&self) -> impl Iterator<Item = &CaseReport> + '_ {
        self.test_cases
            .iter()
            .filter(|c| c.is_disabled_by_marker_only())
    }

    /// Returns true if the manifest and the test markers disagree about this app.
    ///
    /// This usually points at a `disable_test` rule without a matching skip marker, or the
    /// other way around.
    pub fn has_inconsistency(&self) -> bool {
        self.disabled_by_manifest_only().next().is_some()
            || self.disabled_by_marker_only().next().is_some()
    }
}

/// An app referenced by test cases that was not found by the app matrix.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct MissingAppReport {
    /// The target the test cases require.
    pub target: String,

    /// The config the test cases require.
    pub config: String,

    /// The test cases requiring this app.
    #[serde(default)]
    pub test_cases: Vec<CaseReport>,
}

/// Apps and missing apps for one project path.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ProjectReport {
    /// Apps found under this path.
    #[serde(default)]
    pub apps: Vec<AppReport>,

    /// Apps referenced by test cases but not found.
    #[serde(default)]
    pub missing_apps: Vec<MissingAppReport>,
}

/// Statistics over the collected apps and test cases.
///
/// `total_test_cases` counts the union of used, disabled and missing-app case IDs per project,
/// summed over projects. The other three counters may overlap.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct CollectSummary {
    /// Number of project paths.
    pub total_projects: usize,
    /// Number of apps.
    pub total_apps: usize,
    /// Number of distinct test cases.
    pub total_test_cases: usize,
    /// Number of test cases attached to at least one app and enabled there.
    pub total_test_cases_used: usize,
    /// Number of test cases disabled for at least one app.
    pub total_test_cases_disabled: usize,
    /// Number of test cases requiring at least one missing app.
    pub total_test_cases_missing_app: usize,
}

/// The full correlation report, keyed by project path.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct CollectReport {
    /// Summary counters.
    pub summary: CollectSummary,

    /// Per-project details, keyed by absolute project path.
    pub projects: BTreeMap<Utf8PathBuf, ProjectReport>,
}

impl CollectReport {
    /// Serializes this report to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn case(disabled_by_manifest: bool, disabled_by_marker: bool) -> CaseReport {
        CaseReport {
            name: "test_foo".to_owned(),
            caseid: "esp32.default.test_foo".to_owned(),
            disabled: disabled_by_manifest || disabled_by_marker,
            disabled_by_manifest,
            disabled_by_marker,
            skip_reason: String::new(),
            test_comment: String::new(),
        }
    }

    fn app(build_status: BuildStatus, test_cases: Vec<CaseReport>) -> AppReport {
        AppReport {
            target: "esp32".to_owned(),
            config: "default".to_owned(),
            build_status,
            build_comment: String::new(),
            test_comment: String::new(),
            test_cases,
            has_temp_rule: false,
            matched_rules: BTreeMap::new(),
        }
    }

    #[test_case(BuildStatus::ShouldBeBuilt, vec![], "B"; "no tests")]
    #[test_case(BuildStatus::ShouldBeBuilt, vec![case(false, false)], "BT"; "enabled tests")]
    #[test_case(BuildStatus::ShouldBeBuilt, vec![case(true, true)], "BS"; "skipped tests")]
    #[test_case(
        BuildStatus::ShouldBeBuilt,
        vec![case(false, false), case(false, true)],
        "BTS";
        "mixed tests"
    )]
    #[test_case(BuildStatus::Disabled, vec![], "D"; "disabled no tests")]
    #[test_case(BuildStatus::Disabled, vec![case(true, false)], "DS"; "disabled skipped")]
    fn app_status_code(build_status: BuildStatus, cases: Vec<CaseReport>, expected: &str) {
        assert_eq!(app(build_status, cases).status().code(), expected);
    }

    #[test]
    fn inconsistency_detection() {
        let consistent = app(BuildStatus::ShouldBeBuilt, vec![case(true, true)]);
        assert!(!consistent.has_inconsistency());

        let manifest_only = app(BuildStatus::ShouldBeBuilt, vec![case(true, false)]);
        assert!(manifest_only.has_inconsistency());
        assert_eq!(manifest_only.disabled_by_manifest_only().count(), 1);
        assert_eq!(manifest_only.disabled_by_marker_only().count(), 0);
    }

    #[test]
    fn enabled_case_serializes_compactly() {
        let json = serde_json::to_string(&case(false, false)).unwrap();
        assert_eq!(
            json,
            r#"{"name":"test_foo","caseid":"esp32.default.test_foo"}"#
        );

        let disabled = serde_json::to_value(case(false, true)).unwrap();
        assert_eq!(disabled["disabled"], true);
        assert_eq!(disabled["disabled_by_marker"], true);
        assert!(disabled.get("disabled_by_manifest").is_none());
    }

    #[test]
    fn build_status_round_trips_through_json() {
        let json = serde_json::to_string(&BuildStatus::ShouldBeBuilt).unwrap();
        assert_eq!(json, r#""should be built""#);
        assert_eq!(
            serde_json::from_str::<BuildStatus>(r#""build failed""#).unwrap(),
            BuildStatus::Failed
        );
    }
}
