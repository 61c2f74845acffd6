// SPDX-License-Identifier: Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use idf_ci_runner::{
    config::IdfCiConfig,
    errors::DiscoveryError,
    pytest::{RawTestItem, RawTestParams, TestCollector, parse_raw_items},
};
use indoc::indoc;
use std::cell::RefCell;

pub(crate) const IDF_CI_TOML: &str = indoc! {r#"
    default-build-targets = ["esp32", "esp32s3"]
    preview-targets = ["esp32c5"]
    collected-test-related-apps-filepath = "out/test_related_apps.txt"
    collected-non-test-related-apps-filepath = "out/non_test_related_apps.txt"
"#};

pub(crate) const BUILD_TEST_RULES: &str = indoc! {r#"
    ["examples/hello"]
    depends_components = ["comp_a"]

    ["examples/world"]
    depends_components = ["comp_b"]
    disable = [{ if = 'IDF_TARGET == "esp32c5"', reason = "not supported yet" }]

    ["examples/lonely"]
    depends_components = ["comp_b"]
"#};

/// A workspace with three apps and two test scripts:
///
/// * `examples/hello`, tested on esp32 by `tests/hello/pytest_hello.py`
/// * `examples/world`, tested on esp32 by `tests/world/pytest_world.py`
/// * `examples/lonely`, with no tests
pub(crate) struct Workspace {
    dir: Utf8TempDir,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let ws = Self { dir };
        ws.write(".idf_ci.toml", IDF_CI_TOML);
        ws.write(".build-test-rules.toml", BUILD_TEST_RULES);
        for app in ["hello", "world", "lonely"] {
            ws.write(
                &format!("examples/{app}/CMakeLists.txt"),
                &format!("cmake_minimum_required(VERSION 3.16)\nproject({app})\n"),
            );
            ws.write(&format!("examples/{app}/main/main.c"), "void app_main(void) {}\n");
        }
        ws.write("components/comp_a/a.c", "");
        ws.write("components/comp_b/b.c", "");
        ws.write("tests/hello/pytest_hello.py", "def test_hello(dut): pass\n");
        ws.write("tests/world/pytest_world.py", "def test_world(dut): pass\n");
        ws
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn write(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("created parent dir");
        }
        std::fs::write(&path, contents).expect("wrote file");
    }

    pub(crate) fn config(&self) -> IdfCiConfig {
        IdfCiConfig::from_sources(self.root(), []).expect("valid config")
    }

    pub(crate) fn search_paths(&self) -> Vec<Utf8PathBuf> {
        vec!["examples".into(), "tests".into()]
    }

    pub(crate) fn collector(&self) -> MemoryCollector {
        MemoryCollector::new(vec![
            self.item("tests/hello/pytest_hello.py", "test_hello", "../../examples/hello", "esp32", None),
            self.item("tests/world/pytest_world.py", "test_world", "../../examples/world", "esp32", None),
        ])
    }

    pub(crate) fn item(
        &self,
        script: &str,
        name: &str,
        app_path: &str,
        target: &str,
        config: Option<&str>,
    ) -> RawTestItem {
        RawTestItem {
            nodeid: format!("{script}::{name}"),
            path: self.root().join(script),
            name: name.to_owned(),
            params: RawTestParams {
                count: None,
                app_path: Some(app_path.to_owned()),
                target: Some(target.to_owned()),
                config: config.map(str::to_owned),
            },
            markers: Vec::new(),
        }
    }
}

/// Returns the items whose script is under one of the requested paths, recording each call.
pub(crate) struct MemoryCollector {
    items: Vec<RawTestItem>,
    fail: bool,
    calls: RefCell<Vec<Vec<Utf8PathBuf>>>,
}

impl MemoryCollector {
    pub(crate) fn new(items: Vec<RawTestItem>) -> Self {
        Self {
            items,
            fail: false,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn calls(&self) -> Vec<Vec<Utf8PathBuf>> {
        self.calls.borrow().clone()
    }
}

impl TestCollector for MemoryCollector {
    fn collect(&self, paths: &[Utf8PathBuf]) -> Result<Vec<RawTestItem>, DiscoveryError> {
        self.calls.borrow_mut().push(paths.to_vec());
        if self.fail {
            return parse_raw_items("ERROR: collection failed\n");
        }
        Ok(self
            .items
            .iter()
            .filter(|item| paths.iter().any(|path| item.path.starts_with(path)))
            .cloned()
            .collect())
    }
}
