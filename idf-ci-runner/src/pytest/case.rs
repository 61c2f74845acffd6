// SPDX-License-Identifier: Apache-2.0

use crate::{
    app::{AppKey, DEFAULT_BUILD_DIR_TEMPLATE, DEFAULT_CONFIG_NAME, render_build_dir},
    helpers::normalize_path,
    target::{HOST_TARGET, TargetFilter},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
};
use tracing::{debug, warn};

/// The marker added to tests that run on the host or under an emulator.
pub const HOST_TEST_MARKER: &str = "host_test";

/// A raw test item as printed by the test collector, one JSON object per line.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawTestItem {
    /// The fully-qualified test item identifier.
    pub nodeid: String,

    /// The test script, absolute or relative to the workspace root.
    pub path: Utf8PathBuf,

    /// The test function name, without parametrization.
    pub name: String,

    /// Device parametrization.
    #[serde(default)]
    pub params: RawTestParams,

    /// Markers attached to the test.
    #[serde(default)]
    pub markers: Vec<RawMarker>,
}

/// Device parametrization of a raw test item.
///
/// For multi-device tests each value may be `|`-separated, one entry per device. A value without
/// `|` applies to every device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawTestParams {
    /// Number of devices. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,

    /// App directories, relative to the test script's directory. Defaults to that directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_path: Option<String>,

    /// Targets. Defaults to the command-line targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Config names. Defaults to `default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

/// A marker on a raw test item.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawMarker {
    /// The marker name.
    pub name: String,

    /// For skip markers, the targets the skip applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    /// For skip markers, the reason.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// One device slot of a [`TestCase`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PytestApp {
    path: Utf8PathBuf,
    target: String,
    config: String,
    build_dir: String,
}

impl PytestApp {
    /// Creates a new device slot with the default build directory template.
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        target: impl Into<String>,
        config: impl Into<String>,
    ) -> Self {
        Self::with_template(path, target, config, DEFAULT_BUILD_DIR_TEMPLATE)
    }

    fn with_template(
        path: impl Into<Utf8PathBuf>,
        target: impl Into<String>,
        config: impl Into<String>,
        template: &str,
    ) -> Self {
        let target = target.into();
        let config = config.into();
        let build_dir = render_build_dir(template, &target, &config);
        Self {
            path: path.into(),
            target,
            config,
            build_dir,
        }
    }

    /// Returns the absolute app directory.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the config name.
    pub fn config(&self) -> &str {
        &self.config
    }

    /// Returns the absolute build directory, matching [`App::build_path`](crate::app::App::build_path).
    pub fn build_dir(&self) -> Utf8PathBuf {
        self.path.join(&self.build_dir)
    }

    /// Returns the join key for this slot.
    pub fn key(&self) -> AppKey {
        AppKey::new(&self.path, &self.target, &self.config)
    }
}

/// One collected test, possibly spanning several devices.
#[derive(Clone, Debug)]
pub struct TestCase {
    apps: Vec<PytestApp>,
    name: String,
    path: Utf8PathBuf,
    nodeid: String,
    markers: BTreeSet<String>,
    skipped_targets: BTreeMap<String, String>,
}

// Identity is (path, name, apps, markers), matching how collected items are deduplicated.
impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.name == other.name
            && self.apps == other.apps
            && self.markers == other.markers
    }
}

impl Eq for TestCase {}

impl Hash for TestCase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.name.hash(state);
        self.apps.hash(state);
        self.markers.hash(state);
    }
}

/// The outcome of checking a test case's binaries against the built apps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuiltCheck {
    /// Every device's binary was built.
    AllBuilt,

    /// No device's binary was built. The test case should be skipped.
    NoneBuilt(String),

    /// Some binaries are missing, which usually points at inconsistent manifest rules.
    PartiallyBuilt(String),
}

impl TestCase {
    /// Returns the device slots, in device order.
    pub fn apps(&self) -> &[PytestApp] {
        &self.apps
    }

    /// Returns the test function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the absolute test script path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the fully-qualified test item identifier.
    pub fn nodeid(&self) -> &str {
        &self.nodeid
    }

    /// Returns the marker names, including auto-added ones.
    pub fn markers(&self) -> &BTreeSet<String> {
        &self.markers
    }

    /// Returns the targets, in device order.
    pub fn targets(&self) -> impl Iterator<Item = &str> + '_ {
        self.apps.iter().map(|app| app.target.as_str())
    }

    /// Returns the configs, in device order.
    pub fn configs(&self) -> impl Iterator<Item = &str> + '_ {
        self.apps.iter().map(|app| app.config.as_str())
    }

    /// Returns true if the test uses one device.
    pub fn is_single_dut(&self) -> bool {
        self.apps.len() == 1
    }

    /// Returns true if the test runs on the host or under an emulator.
    ///
    /// [`TestCaseBuilder`] tags such tests with [`HOST_TEST_MARKER`].
    pub fn is_host_test(&self) -> bool {
        self.markers.contains(HOST_TEST_MARKER)
    }

    /// Returns the comma-joined target list, keeping order and duplicates.
    pub fn target_selector(&self) -> String {
        self.targets().collect::<Vec<_>>().join(",")
    }

    /// Returns the case ID used in reports.
    ///
    /// Single-device tests use `target.config.name`. Multi-device tests use the tuple form
    /// `('esp32', 'esp32s2').('default', 'default').name`.
    pub fn case_id(&self) -> String {
        if self.is_single_dut() {
            let app = &self.apps[0];
            format!("{}.{}.{}", app.target, app.config, self.name)
        } else {
            format!(
                "{}.{}.{}",
                tuple_repr(self.targets()),
                tuple_repr(self.configs()),
                self.name
            )
        }
    }

    /// Returns the skip reason if a skip marker excludes `target`.
    ///
    /// A skip marker may name a single target or a full target selector such as `esp32,esp32s2`.
    pub fn skip_reason_for(&self, target: &str) -> Option<&str> {
        self.skipped_targets
            .get(target)
            .or_else(|| self.skipped_targets.get(&self.target_selector()))
            .map(String::as_str)
    }

    /// Returns the markers that belong to the environment marker vocabulary, sorted.
    pub fn env_markers<'a>(
        &'a self,
        is_env_marker: impl Fn(&str) -> bool + 'a,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.markers
            .iter()
            .map(String::as_str)
            .filter(move |marker| is_env_marker(marker))
    }

    /// Returns the strings a keyword expression is matched against.
    pub fn keywords(&self) -> Vec<&str> {
        let mut keywords = vec![self.name.as_str()];
        if let Some((_, function)) = self.nodeid.rsplit_once("::") {
            keywords.push(function);
        }
        if let Some(file_name) = self.path.file_name() {
            keywords.push(file_name);
        }
        keywords.extend(self.markers.iter().map(String::as_str));
        keywords
    }

    /// Checks whether every device's build directory is in `built_dirs`.
    pub fn check_built(&self, built_dirs: &BTreeSet<Utf8PathBuf>) -> BuiltCheck {
        let missing: Vec<_> = self
            .apps
            .iter()
            .map(PytestApp::build_dir)
            .filter(|dir| !built_dirs.contains(dir))
            .collect();

        if missing.is_empty() {
            BuiltCheck::AllBuilt
        } else if missing.len() == self.apps.len() {
            let mut msg = format!(
                "Skip test case {} because all following binaries are not listed in the app lists:",
                self.name
            );
            for dir in &missing {
                msg.push_str("\n - ");
                msg.push_str(dir.as_str());
            }
            BuiltCheck::NoneBuilt(msg)
        } else {
            let mut msg = format!(
                "Found some binaries of test case {} are not listed in the app lists.",
                self.name
            );
            for dir in &missing {
                msg.push_str("\n - ");
                msg.push_str(dir.as_str());
            }
            msg.push_str("\nMight be an issue of .build-test-rules.toml files");
            BuiltCheck::PartiallyBuilt(msg)
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.case_id())
    }
}

fn tuple_repr<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let items: Vec<_> = items.map(|item| format!("'{item}'")).collect();
    format!("({})", items.join(", "))
}

/// Builds [`TestCase`]s from raw collector output.
#[derive(Clone, Debug)]
pub struct TestCaseBuilder {
    workspace_root: Utf8PathBuf,
    targets: TargetFilter,
    host_target: String,
    emulator_markers: Vec<String>,
    skip_markers: Vec<String>,
    build_dir_template: String,
}

impl TestCaseBuilder {
    /// Creates a new builder. `targets` supplies device targets for tests that don't declare any.
    pub fn new(workspace_root: impl Into<Utf8PathBuf>, targets: TargetFilter) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            targets,
            host_target: HOST_TARGET.to_owned(),
            emulator_markers: vec!["qemu".to_owned()],
            skip_markers: vec![
                "temp_skip_ci".to_owned(),
                "temp_skip".to_owned(),
                "skip_if_soc".to_owned(),
            ],
            build_dir_template: DEFAULT_BUILD_DIR_TEMPLATE.to_owned(),
        }
    }

    /// Sets the target that runs on the host.
    pub fn set_host_target(&mut self, target: impl Into<String>) -> &mut Self {
        self.host_target = target.into();
        self
    }

    /// Returns the target that runs on the host.
    pub fn host_target(&self) -> &str {
        &self.host_target
    }

    /// Sets the markers that indicate an emulated test.
    pub fn set_emulator_markers(&mut self, markers: Vec<String>) -> &mut Self {
        self.emulator_markers = markers;
        self
    }

    /// Sets the markers that carry per-target skips.
    pub fn set_skip_markers(&mut self, markers: Vec<String>) -> &mut Self {
        self.skip_markers = markers;
        self
    }

    /// Sets the build directory template.
    pub fn set_build_dir_template(&mut self, template: impl Into<String>) -> &mut Self {
        self.build_dir_template = template.into();
        self
    }

    /// Builds a test case, or returns `None` (with a warning) if the item's device count does
    /// not match its parametrization.
    pub fn build(&self, raw: RawTestItem) -> Option<TestCase> {
        let count = raw.params.count.unwrap_or(1);
        if count == 0 {
            warn!("test case \"{}\" declares zero devices, skipping it", raw.name);
            return None;
        }

        let path = normalize_path(&self.workspace_root, &raw.path);
        let script_dir = path
            .parent()
            .map_or_else(|| self.workspace_root.clone(), Utf8Path::to_owned);

        let split = |key: &str, value: Option<&str>| match split_multi_dut(count, value) {
            Ok(values) => Some(values),
            Err(len) => {
                warn!(
                    "test case \"{}\" declares {count} devices but {len} values for \"{key}\", \
                     skipping it",
                    raw.name
                );
                None
            }
        };

        let app_paths = split("app_path", raw.params.app_path.as_deref())?;
        let configs = split("config", raw.params.config.as_deref())?;
        let targets = match split("target", raw.params.target.as_deref())? {
            Some(targets) => targets,
            None => match self.targets.cli_targets() {
                Some(cli_targets) if cli_targets.len() == count => {
                    debug!(
                        "no \"target\" param for test case \"{}\", using command-line targets \"{}\"",
                        raw.name, self.targets
                    );
                    cli_targets.to_vec()
                }
                _ => {
                    warn!(
                        "no \"target\" param for test case \"{}\": device count is {count}, \
                         while command-line target is \"{}\", skipping it",
                        raw.name, self.targets
                    );
                    return None;
                }
            },
        };

        let apps = (0..count)
            .map(|i| {
                let app_path = app_paths
                    .as_ref()
                    .map_or_else(|| script_dir.clone(), |paths| {
                        normalize_path(&script_dir, Utf8Path::new(&paths[i]))
                    });
                let config = configs
                    .as_ref()
                    .map_or(DEFAULT_CONFIG_NAME, |configs| configs[i].as_str());
                PytestApp::with_template(app_path, &targets[i], config, &self.build_dir_template)
            })
            .collect::<Vec<_>>();

        let mut markers = BTreeSet::new();
        let mut skipped_targets = BTreeMap::new();
        for marker in raw.markers {
            if self.skip_markers.contains(&marker.name) {
                for target in &marker.targets {
                    skipped_targets.insert(target.clone(), marker.reason.clone());
                }
            }
            markers.insert(marker.name);
        }

        let is_emulated = self.emulator_markers.iter().any(|m| markers.contains(m));
        if is_emulated || apps.iter().any(|app| app.target == self.host_target) {
            markers.insert(HOST_TEST_MARKER.to_owned());
        }

        Some(TestCase {
            apps,
            name: raw.name,
            path,
            nodeid: raw.nodeid,
            markers,
            skipped_targets,
        })
    }
}

/// Splits a multi-device parameter. Returns `Err(len)` if a `|`-separated value does not have
/// exactly `count` entries.
fn split_multi_dut(count: usize, value: Option<&str>) -> Result<Option<Vec<String>>, usize> {
    let Some(value) = value else {
        return Ok(None);
    };
    if count > 1 && value.contains('|') {
        let values: Vec<_> = value.split('|').map(|v| v.trim().to_owned()).collect();
        if values.len() == count {
            Ok(Some(values))
        } else {
            Err(values.len())
        }
    } else {
        Ok(Some(vec![value.to_owned(); count]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;

    fn raw(name: &str, params: RawTestParams, markers: &[&str]) -> RawTestItem {
        RawTestItem {
            nodeid: format!("examples/foo/pytest_foo.py::{name}"),
            path: "examples/foo/pytest_foo.py".into(),
            name: name.to_owned(),
            params,
            markers: markers
                .iter()
                .map(|m| RawMarker {
                    name: (*m).to_owned(),
                    targets: Vec::new(),
                    reason: String::new(),
                })
                .collect(),
        }
    }

    fn builder(targets: &str) -> TestCaseBuilder {
        TestCaseBuilder::new("/ws", targets.parse().unwrap())
    }

    #[test]
    fn test_single_dut() {
        let params = RawTestParams {
            target: Some("esp32".to_owned()),
            config: Some("psram".to_owned()),
            ..Default::default()
        };
        let case = builder("all")
            .build(raw("test_hello", params, &["generic"]))
            .expect("case built");
        assert_eq!(case.case_id(), "esp32.psram.test_hello");
        assert_eq!(case.path(), "/ws/examples/foo/pytest_foo.py");
        assert_eq!(case.apps()[0].path(), "/ws/examples/foo");
        assert_eq!(
            case.apps()[0].build_dir(),
            Utf8PathBuf::from("/ws/examples/foo/build_esp32_psram")
        );
        assert!(case.is_single_dut());
        assert!(!case.is_host_test());
        assert_eq!(case.markers(), &btreeset! {"generic".to_owned()});
    }

    #[test]
    fn test_multi_dut_case_id() {
        let params = RawTestParams {
            count: Some(2),
            app_path: Some("../a|../b".to_owned()),
            target: Some("esp32|esp32s2".to_owned()),
            ..Default::default()
        };
        let case = builder("all")
            .build(raw("test_x", params, &[]))
            .expect("case built");
        assert_eq!(
            case.case_id(),
            "('esp32', 'esp32s2').('default', 'default').test_x"
        );
        assert_eq!(case.target_selector(), "esp32,esp32s2");
        assert_eq!(case.apps()[0].path(), "/ws/examples/a");
        assert_eq!(case.apps()[1].path(), "/ws/examples/b");
    }

    #[test]
    fn test_multi_dut_same_target() {
        let params = RawTestParams {
            count: Some(2),
            target: Some("esp32".to_owned()),
            ..Default::default()
        };
        let case = builder("all").build(raw("test_x", params, &[])).unwrap();
        assert_eq!(
            case.case_id(),
            "('esp32', 'esp32').('default', 'default').test_x"
        );
        assert_eq!(case.target_selector(), "esp32,esp32");
    }

    #[test_case("esp32,esp32s2", 2, Some("esp32,esp32s2"); "cli targets fill in")]
    #[test_case("esp32", 2, None; "cli target count mismatch")]
    #[test_case("all", 1, None; "all cannot fill in")]
    #[test_case("esp32c3", 1, Some("esp32c3"); "single cli target")]
    fn test_missing_target(cli: &str, count: usize, expected: Option<&str>) {
        let params = RawTestParams {
            count: Some(count),
            ..Default::default()
        };
        let case = builder(cli).build(raw("test_x", params, &[]));
        assert_eq!(
            case.map(|c| c.target_selector()).as_deref(),
            expected
        );
    }

    #[test]
    fn test_split_count_mismatch_drops_case() {
        let params = RawTestParams {
            count: Some(3),
            target: Some("esp32|esp32s2".to_owned()),
            ..Default::default()
        };
        assert_eq!(builder("all").build(raw("test_x", params, &[])), None);
    }

    #[test_case(&["qemu"], "esp32", true; "emulator marker")]
    #[test_case(&[], "linux", true; "host target")]
    #[test_case(&["generic"], "esp32", false; "hardware")]
    fn test_host_test_auto_tag(markers: &[&str], target: &str, expected: bool) {
        let params = RawTestParams {
            target: Some(target.to_owned()),
            ..Default::default()
        };
        let case = builder("all").build(raw("test_x", params, markers)).unwrap();
        assert_eq!(case.is_host_test(), expected);
        assert_eq!(case.markers().contains(HOST_TEST_MARKER), expected);
    }

    #[test]
    fn test_custom_host_target() {
        let mut builder = builder("all");
        builder.set_host_target("posix");
        let build = |target: &str| {
            let params = RawTestParams {
                target: Some(target.to_owned()),
                ..Default::default()
            };
            builder.build(raw("test_x", params, &[])).unwrap()
        };
        assert!(build("posix").is_host_test());
        assert!(!build("linux").is_host_test());
    }

    #[test]
    fn test_skip_markers() {
        let params = RawTestParams {
            count: Some(2),
            target: Some("esp32|esp32c3".to_owned()),
            ..Default::default()
        };
        let mut item = raw("test_x", params, &["generic"]);
        item.markers.push(RawMarker {
            name: "temp_skip_ci".to_owned(),
            targets: vec!["esp32c3".to_owned()],
            reason: "lack of runners".to_owned(),
        });
        let case = builder("all").build(item).unwrap();
        assert_eq!(case.skip_reason_for("esp32c3"), Some("lack of runners"));
        assert_eq!(case.skip_reason_for("esp32"), None);
    }

    #[test]
    fn test_check_built() {
        let params = RawTestParams {
            count: Some(2),
            target: Some("esp32|esp32s2".to_owned()),
            ..Default::default()
        };
        let case = builder("all").build(raw("test_x", params, &[])).unwrap();
        let esp32 = Utf8PathBuf::from("/ws/examples/foo/build_esp32_default");
        let esp32s2 = Utf8PathBuf::from("/ws/examples/foo/build_esp32s2_default");

        assert_eq!(
            case.check_built(&btreeset! {esp32.clone(), esp32s2.clone()}),
            BuiltCheck::AllBuilt
        );
        match case.check_built(&btreeset! {esp32}) {
            BuiltCheck::PartiallyBuilt(msg) => {
                assert!(msg.contains("build_esp32s2_default"), "msg: {msg}");
                assert!(msg.contains(".build-test-rules"), "msg: {msg}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        match case.check_built(&BTreeSet::new()) {
            BuiltCheck::NoneBuilt(msg) => {
                assert!(msg.starts_with(
                    "Skip test case test_x because all following binaries are not listed"
                ));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_identity_ignores_nodeid() {
        let params = RawTestParams {
            target: Some("esp32".to_owned()),
            ..Default::default()
        };
        let a = builder("all").build(raw("test_x", params.clone(), &[])).unwrap();
        let mut item = raw("test_x", params, &[]);
        item.nodeid.push_str("[other-id]");
        let b = builder("all").build(item).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.keywords()[0], "test_x");
    }

    proptest! {
        #[test]
        fn proptest_case_id_distinct(
            targets_a in prop::collection::vec("[a-z0-9]{1,8}", 1..4),
            targets_b in prop::collection::vec("[a-z0-9]{1,8}", 1..4),
            name_a in "test_[a-z0-9_]{1,8}",
            name_b in "test_[a-z0-9_]{1,8}",
        ) {
            let make = |targets: &[String], name: &str| {
                let params = RawTestParams {
                    count: Some(targets.len()),
                    target: Some(targets.join("|")),
                    ..Default::default()
                };
                builder("all").build(raw(name, params, &[])).unwrap()
            };
            let a = make(&targets_a, &name_a);
            let b = make(&targets_b, &name_b);
            prop_assert_eq!(
                a.case_id() == b.case_id(),
                targets_a == targets_b && name_a == name_b
            );
        }
    }
}
