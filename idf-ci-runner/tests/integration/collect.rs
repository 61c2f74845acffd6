// SPDX-License-Identifier: Apache-2.0

use crate::fixtures::{MemoryCollector, Workspace};
use color_eyre::Result;
use idf_ci_metadata::{AppStatus, BuildStatus};
use idf_ci_runner::{
    correlate::render_missing_configs,
    pytest::{CaseFilters, RawMarker},
    select::Selector,
    target::TargetFilter,
};
use pretty_assertions::assert_eq;

fn collector(ws: &Workspace) -> MemoryCollector {
    let mut skipped = ws.item(
        "tests/world/pytest_world.py",
        "test_world_flaky",
        "../../examples/world",
        "esp32",
        None,
    );
    skipped.markers.push(RawMarker {
        name: "temp_skip_ci".to_owned(),
        targets: vec!["esp32".to_owned()],
        reason: "runner offline".to_owned(),
    });
    MemoryCollector::new(vec![
        ws.item("tests/hello/pytest_hello.py", "test_hello", "../../examples/hello", "esp32", None),
        ws.item(
            "tests/hello/pytest_hello.py",
            "test_psram",
            "../../examples/hello",
            "esp32",
            Some("psram"),
        ),
        ws.item("tests/world/pytest_world.py", "test_world", "../../examples/world", "esp32", None),
        skipped,
    ])
}

#[test]
fn test_collect_report() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = collector(&ws);
    let selector = Selector::new(&config, &collector);

    let report = selector.collect_report(&ws.search_paths())?;

    // 3 apps for the two default targets and the preview target, disabled ones included.
    assert_eq!(report.summary.total_apps, 9);
    assert_eq!(report.summary.total_projects, 3);
    assert_eq!(report.summary.total_test_cases_missing_app, 1);
    assert_eq!(report.summary.total_test_cases_disabled, 1);

    let hello = &report.projects[&ws.root().join("examples/hello")];
    assert_eq!(hello.missing_apps.len(), 1);
    assert_eq!(hello.missing_apps[0].config, "psram");
    assert_eq!(hello.missing_apps[0].test_cases[0].name, "test_psram");

    let world = &report.projects[&ws.root().join("examples/world")];
    let world_esp32 = world
        .apps
        .iter()
        .find(|app| app.target == "esp32")
        .expect("world/esp32 is reported");
    assert_eq!(world_esp32.build_status, BuildStatus::ShouldBeBuilt);
    assert_eq!(world_esp32.test_cases.len(), 2);
    assert_eq!(world_esp32.status(), AppStatus::new(false, true, true));

    let world_c5 = world
        .apps
        .iter()
        .find(|app| app.target == "esp32c5")
        .expect("disabled apps are reported");
    assert_eq!(world_c5.build_status, BuildStatus::Disabled);

    let lonely = &report.projects[&ws.root().join("examples/lonely")];
    assert!(lonely.apps.iter().all(|app| app.test_cases.is_empty()));

    let rendered = render_missing_configs(&report).expect("missing configs are reported");
    assert!(
        rendered.contains("Sdkconfig file \"psram\" is missing for test case \"test_psram\""),
        "unexpected output:\n{rendered}"
    );
    assert!(rendered.contains(ws.root().join("examples/hello").as_str()));
    Ok(())
}

#[test]
fn test_no_missing_configs() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let report = selector.collect_report(&ws.search_paths())?;
    assert_eq!(render_missing_configs(&report), None);
    Ok(())
}

#[test]
fn test_collect_cases_for_target() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = collector(&ws);
    let selector = Selector::new(&config, &collector);

    let filters = CaseFilters {
        targets: "esp32".parse::<TargetFilter>()?,
        sdkconfig: Some("psram".to_owned()),
        ..Default::default()
    };
    let cases = selector.collect_cases(&ws.search_paths(), &filters)?;
    let names: Vec<_> = cases.iter().map(|case| case.name()).collect();
    assert_eq!(names, ["test_psram"]);
    Ok(())
}

#[test]
fn test_collect_report_includes_host_tests() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let mut qemu = ws.item(
        "tests/hello/pytest_hello.py",
        "test_hello_qemu",
        "../../examples/hello",
        "esp32",
        None,
    );
    qemu.markers.push(RawMarker {
        name: "qemu".to_owned(),
        targets: Vec::new(),
        reason: String::new(),
    });
    let linux = ws.item(
        "tests/hello/pytest_hello.py",
        "test_hello_linux",
        "../../examples/hello",
        "linux",
        Some("nope"),
    );
    let collector = MemoryCollector::new(vec![qemu, linux]);
    let selector = Selector::new(&config, &collector);

    let report = selector.collect_report(&ws.search_paths())?;
    assert_eq!(report.summary.total_test_cases, 2);
    assert_eq!(report.summary.total_test_cases_missing_app, 1);

    let hello = &report.projects[&ws.root().join("examples/hello")];
    let hello_esp32 = hello
        .apps
        .iter()
        .find(|app| app.target == "esp32")
        .expect("hello/esp32 is reported");
    let names: Vec<_> = hello_esp32
        .test_cases
        .iter()
        .map(|case| case.name.as_str())
        .collect();
    assert_eq!(names, ["test_hello_qemu"]);

    assert_eq!(hello.missing_apps.len(), 1);
    assert_eq!(hello.missing_apps[0].target, "linux");
    assert_eq!(hello.missing_apps[0].config, "nope");

    let rendered = render_missing_configs(&report).expect("missing configs are reported");
    assert!(
        rendered.contains("Sdkconfig file \"nope\" is missing for test case \"test_hello_linux\""),
        "unexpected output:\n{rendered}"
    );
    Ok(())
}
