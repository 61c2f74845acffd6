// SPDX-License-Identifier: Apache-2.0

//! Joining apps and test cases on the (path, target, config) key.

use crate::{
    app::{App, AppKey},
    pytest::TestCase,
};
use camino::Utf8PathBuf;
use idf_ci_metadata::{AppReport, CaseReport, CollectReport, MissingAppReport, ProjectReport};
use std::collections::{BTreeMap, BTreeSet};
use swrite::{SWrite, swrite, swriteln};
use tracing::debug;

/// Test cases indexed by the app keys their device slots reference.
///
/// A multi-device test appears under each distinct key it references, once per key.
#[derive(Clone, Debug, Default)]
pub struct CaseIndex<'a> {
    map: BTreeMap<AppKey, Vec<&'a TestCase>>,
}

impl<'a> CaseIndex<'a> {
    /// Builds the index.
    pub fn new(cases: impl IntoIterator<Item = &'a TestCase>) -> Self {
        let mut map: BTreeMap<AppKey, Vec<&'a TestCase>> = BTreeMap::new();
        for case in cases {
            for app in case.apps() {
                let entry = map.entry(app.key()).or_default();
                if !entry.contains(&case) {
                    entry.push(case);
                }
            }
        }
        Self { map }
    }

    /// Returns the cases referencing `key`.
    pub fn get(&self, key: &AppKey) -> &[&'a TestCase] {
        self.map.get(key).map_or(&[][..], Vec::as_slice)
    }

    /// Returns true if any case references `key`.
    pub fn contains(&self, key: &AppKey) -> bool {
        self.map.contains_key(key)
    }

    /// Iterates over every referenced key and its cases.
    pub fn iter(&self) -> impl Iterator<Item = (&AppKey, &[&'a TestCase])> + '_ {
        self.map.iter().map(|(key, cases)| (key, cases.as_slice()))
    }
}

/// Correlates apps with test cases.
///
/// Every app becomes an [`AppReport`] under its directory. Cases that reference a key with no
/// app become [`MissingAppReport`]s. Both views are recorded per device, so one multi-device case
/// can be used for one device and missing for another.
pub fn correlate(apps: &[App], cases: &[TestCase]) -> CollectReport {
    let index = CaseIndex::new(cases);

    let mut apps_by_path: BTreeMap<&Utf8PathBuf, Vec<&App>> = BTreeMap::new();
    for app in apps {
        apps_by_path.entry(&app.path).or_default().push(app);
    }
    let app_keys: BTreeSet<AppKey> = apps.iter().map(App::key).collect();

    let mut missing_by_path: BTreeMap<&Utf8PathBuf, Vec<(&AppKey, &[&TestCase])>> =
        BTreeMap::new();
    for (key, key_cases) in index.iter() {
        if !app_keys.contains(key) {
            missing_by_path
                .entry(&key.path)
                .or_default()
                .push((key, key_cases));
        }
    }

    let paths: BTreeSet<&Utf8PathBuf> = apps_by_path
        .keys()
        .chain(missing_by_path.keys())
        .copied()
        .collect();

    let mut report = CollectReport::default();
    for path in paths {
        let mut used = BTreeSet::new();
        let mut disabled = BTreeSet::new();
        let mut missing = BTreeSet::new();
        let mut project = ProjectReport::default();

        let mut path_apps = apps_by_path.remove(path).unwrap_or_default();
        path_apps.sort_by_key(|app| app.key());
        for app in path_apps {
            let test_cases = index
                .get(&app.key())
                .iter()
                .map(|case| {
                    let info = case_report(case, app);
                    if info.disabled {
                        disabled.insert(info.caseid.clone());
                    } else {
                        used.insert(info.caseid.clone());
                    }
                    info
                })
                .collect();
            project.apps.push(AppReport {
                target: app.target.clone(),
                config: app.config.clone(),
                build_status: app.build_status,
                build_comment: app.build_comment.clone(),
                test_comment: app.test_comment.clone(),
                test_cases,
                has_temp_rule: app.has_temp_rule,
                matched_rules: app.matched_rules.clone(),
            });
        }

        // Index iteration order is key order, so missing apps are already sorted.
        for (key, key_cases) in missing_by_path.remove(path).unwrap_or_default() {
            let test_cases = key_cases
                .iter()
                .map(|case| {
                    missing.insert(case.case_id());
                    missing_case_report(case, &key.target)
                })
                .collect();
            project.missing_apps.push(MissingAppReport {
                target: key.target.clone(),
                config: key.config.clone(),
                test_cases,
            });
        }

        let summary = &mut report.summary;
        summary.total_test_cases_used += used.len();
        summary.total_test_cases_disabled += disabled.len();
        summary.total_test_cases_missing_app += missing.len();
        summary.total_test_cases += used
            .iter()
            .chain(&disabled)
            .chain(&missing)
            .collect::<BTreeSet<_>>()
            .len();

        report.projects.insert(path.clone(), project);
    }

    report.summary.total_projects = report.projects.len();
    report.summary.total_apps = apps.len();
    debug!("correlation summary: {:?}", report.summary);
    report
}

fn case_report(case: &TestCase, app: &App) -> CaseReport {
    let disabled_by_manifest = !app.test_enabled;
    let skip_reason = case.skip_reason_for(&app.target);
    let disabled_by_marker = skip_reason.is_some();
    CaseReport {
        name: case.name().to_owned(),
        caseid: case.case_id(),
        disabled: disabled_by_manifest || disabled_by_marker,
        disabled_by_manifest,
        disabled_by_marker,
        skip_reason: skip_reason.unwrap_or_default().to_owned(),
        test_comment: app.test_comment.clone(),
    }
}

fn missing_case_report(case: &TestCase, target: &str) -> CaseReport {
    let skip_reason = case.skip_reason_for(target);
    CaseReport {
        name: case.name().to_owned(),
        caseid: case.case_id(),
        disabled: skip_reason.is_some(),
        disabled_by_manifest: false,
        disabled_by_marker: skip_reason.is_some(),
        skip_reason: skip_reason.unwrap_or_default().to_owned(),
        test_comment: String::new(),
    }
}

/// Renders the missing-config error for a report, or `None` if no test case requires a missing
/// config.
pub fn render_missing_configs(report: &CollectReport) -> Option<String> {
    let mut out = String::from(
        "Error: Test cases requiring missing sdkconfig files.\n\n\
         Please make sure the following sdkconfig files exist or update config name in test case \
         parameters.\n\
         For more information, refer to documentation: \
         https://docs.espressif.com/projects/idf-build-apps/en/latest/explanations/config_rules.html\n\n",
    );
    let mut has_errors = false;

    for (project_path, project) in &report.projects {
        let mut by_config: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for app in &project.missing_apps {
            for case in &app.test_cases {
                by_config
                    .entry(app.config.as_str())
                    .or_default()
                    .insert(case.name.as_str());
            }
        }
        if by_config.is_empty() {
            continue;
        }

        has_errors = true;
        swriteln!(out, "{project_path}");
        for (config, names) in by_config {
            let msg = format!("Sdkconfig file \"{config}\" is missing");
            match names.first() {
                Some(name) if names.len() == 1 => {
                    swriteln!(out, "\t{msg} for test case \"{name}\"");
                }
                _ => {
                    swriteln!(out, "\t{msg} for test cases:");
                    for name in names {
                        swriteln!(out, "\t\t- {name}");
                    }
                }
            }
        }
        swrite!(out, "\n");
    }

    has_errors.then(|| out.trim_end().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pytest::{RawMarker, RawTestItem, RawTestParams, TestCaseBuilder};
    use idf_ci_metadata::{BuildStatus, CollectSummary};
    use pretty_assertions::assert_eq;

    fn case(name: &str, target: &str, config: Option<&str>, skip: &[&str]) -> TestCase {
        let count = target.split('|').count();
        let markers = if skip.is_empty() {
            Vec::new()
        } else {
            vec![RawMarker {
                name: "temp_skip_ci".to_owned(),
                targets: skip.iter().map(|t| (*t).to_owned()).collect(),
                reason: "no runner".to_owned(),
            }]
        };
        TestCaseBuilder::new("/ws", crate::target::TargetFilter::All)
            .build(RawTestItem {
                nodeid: format!("p/pytest_p.py::{name}"),
                path: "p/pytest_p.py".into(),
                name: name.to_owned(),
                params: RawTestParams {
                    count: Some(count),
                    target: Some(target.to_owned()),
                    config: config.map(str::to_owned),
                    app_path: None,
                },
                markers,
            })
            .expect("valid case")
    }

    #[test]
    fn test_missing_app_detection() {
        let cases = [case("test_a", "esp32", None, &[])];
        let report = correlate(&[], &cases);

        let project = &report.projects[&Utf8PathBuf::from("/ws/p")];
        assert!(project.apps.is_empty());
        assert_eq!(project.missing_apps.len(), 1);
        assert_eq!(project.missing_apps[0].target, "esp32");
        assert_eq!(project.missing_apps[0].config, "default");
        assert_eq!(project.missing_apps[0].test_cases[0].caseid, "esp32.default.test_a");
        assert_eq!(
            report.summary,
            CollectSummary {
                total_projects: 1,
                total_apps: 0,
                total_test_cases: 1,
                total_test_cases_used: 0,
                total_test_cases_disabled: 0,
                total_test_cases_missing_app: 1,
            }
        );
    }

    #[test]
    fn test_disabled_but_attached() {
        let mut app = App::new("/ws/p", "esp32", "default");
        app.build_status = BuildStatus::Disabled;
        app.build_comment = "disabled by rule".to_owned();
        app.test_enabled = false;
        let cases = [case("test_a", "esp32", None, &[])];

        let report = correlate(&[app], &cases);
        let project = &report.projects[&Utf8PathBuf::from("/ws/p")];
        assert_eq!(project.apps[0].build_status, BuildStatus::Disabled);
        let info = &project.apps[0].test_cases[0];
        assert!(info.disabled);
        assert!(info.disabled_by_manifest);
        assert!(!info.disabled_by_marker);
        assert_eq!(report.summary.total_test_cases_disabled, 1);
        assert_eq!(report.summary.total_test_cases_used, 0);
    }

    #[test]
    fn test_multi_dut_used_and_missing() {
        let apps = [App::new("/ws/p", "esp32", "default")];
        let cases = [case("test_multi", "esp32|esp32s2", None, &["esp32s2"])];

        let report = correlate(&apps, &cases);
        let project = &report.projects[&Utf8PathBuf::from("/ws/p")];
        assert_eq!(project.apps[0].test_cases.len(), 1);
        assert!(!project.apps[0].test_cases[0].disabled);

        assert_eq!(project.missing_apps.len(), 1);
        let missing = &project.missing_apps[0];
        assert_eq!(missing.target, "esp32s2");
        assert!(missing.test_cases[0].disabled_by_marker);
        assert_eq!(missing.test_cases[0].skip_reason, "no runner");

        // Used for one device and missing for the other, but counted once.
        assert_eq!(report.summary.total_test_cases, 1);
        assert_eq!(report.summary.total_test_cases_used, 1);
        assert_eq!(report.summary.total_test_cases_missing_app, 1);
    }

    #[test]
    fn test_same_key_twice_is_indexed_once() {
        let cases = [case("test_pair", "esp32|esp32", None, &[])];
        let index = CaseIndex::new(&cases);
        let key = AppKey::new("/ws/p", "esp32", "default");
        assert_eq!(index.get(&key).len(), 1);
        assert!(!index.contains(&AppKey::new("/ws/p", "esp32s2", "default")));
    }

    #[test]
    fn test_marker_disabled_and_idempotent() {
        let apps = [
            App::new("/ws/p", "esp32", "default"),
            App::new("/ws/p", "esp32c3", "default"),
            App::new("/ws/q", "esp32", "default"),
        ];
        let cases = [
            case("test_a", "esp32", None, &[]),
            case("test_a", "esp32c3", None, &["esp32c3"]),
        ];
        let report = correlate(&apps, &cases);
        let again = correlate(&apps, &cases);
        assert_eq!(report, again);
        assert_eq!(report.to_json().unwrap(), again.to_json().unwrap());

        let project = &report.projects[&Utf8PathBuf::from("/ws/p")];
        let c3 = &project.apps[1].test_cases[0];
        assert!(c3.disabled_by_marker);
        assert!(!c3.disabled_by_manifest);
        assert_eq!(report.summary.total_projects, 2);
        assert_eq!(report.summary.total_apps, 3);
        assert_eq!(report.summary.total_test_cases, 2);
        assert!(report.projects[&Utf8PathBuf::from("/ws/q")].apps[0].test_cases.is_empty());
    }

    #[test]
    fn test_render_missing_configs() {
        let cases = [
            case("test_a", "esp32", Some("psram"), &[]),
            case("test_b", "esp32", Some("psram"), &[]),
            case("test_c", "esp32", Some("flash"), &[]),
        ];
        let apps = [App::new("/ws/p", "esp32", "default")];
        let out = render_missing_configs(&correlate(&apps, &cases)).expect("has errors");
        assert!(out.starts_with("Error: Test cases requiring missing sdkconfig files."));
        assert!(out.ends_with(
            "/ws/p\n\
             \tSdkconfig file \"flash\" is missing for test case \"test_c\"\n\
             \tSdkconfig file \"psram\" is missing for test cases:\n\
             \t\t- test_a\n\
             \t\t- test_b"
        ), "out: {out}");

        let cases = [case("test_a", "esp32", None, &[])];
        assert_eq!(render_missing_configs(&correlate(&apps, &cases)), None);
    }
}
