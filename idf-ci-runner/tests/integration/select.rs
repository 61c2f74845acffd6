// SPDX-License-Identifier: Apache-2.0

use crate::fixtures::{MemoryCollector, Workspace};
use camino::Utf8PathBuf;
use color_eyre::Result;
use idf_ci_filtering::FilterExpr;
use idf_ci_metadata::BuildStatus;
use idf_ci_runner::{
    app::App,
    app_list::AppListPair,
    errors::DiscoveryError,
    select::{Selection, SelectionOptions, Selector},
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn keys(apps: &[App]) -> Vec<String> {
    apps.iter()
        .map(|app| {
            let rel = app.path.file_name().unwrap_or_default();
            format!("{rel}/{}/{}", app.target, app.config)
        })
        .collect()
}

#[test]
fn test_select_all_partitions_every_app() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let mut options = SelectionOptions::new(ws.search_paths());
    options.select_all = true;
    // Ignored in select-all mode.
    options.modified_files = Some(vec!["components/comp_a/a.c".into()]);
    let selection = selector.select(&options)?;

    assert_eq!(
        keys(&selection.test_related),
        ["hello/esp32/default", "world/esp32/default"],
    );
    assert_eq!(
        keys(&selection.non_test_related),
        [
            "hello/esp32s3/default",
            "lonely/esp32/default",
            "lonely/esp32s3/default",
            "world/esp32s3/default",
        ],
    );

    let test_related: BTreeSet<_> = selection.test_related.iter().map(App::key).collect();
    assert!(
        selection
            .non_test_related
            .iter()
            .all(|app| !test_related.contains(&app.key())),
        "lists are disjoint"
    );
    assert!(selection.test_related.iter().all(|app| app.preserve));
    assert!(
        selection
            .test_related
            .iter()
            .chain(&selection.non_test_related)
            .all(|app| app.build_status == BuildStatus::ShouldBeBuilt)
    );
    Ok(())
}

#[test]
fn test_modified_component_selects_dependents() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let mut options = SelectionOptions::new(ws.search_paths());
    options.modified_files = Some(vec!["components/comp_a/a.c".into()]);
    let selection = selector.select(&options)?;

    assert_eq!(keys(&selection.test_related), ["hello/esp32/default"]);
    assert_eq!(keys(&selection.non_test_related), ["hello/esp32s3/default"]);
    Ok(())
}

#[test]
fn test_modified_component_by_name() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let mut options = SelectionOptions::new(ws.search_paths());
    options.modified_components = Some(vec!["comp_b".to_owned()]);
    let selection = selector.select(&options)?;

    assert_eq!(keys(&selection.test_related), ["world/esp32/default"]);
    assert_eq!(
        keys(&selection.non_test_related),
        [
            "lonely/esp32/default",
            "lonely/esp32s3/default",
            "world/esp32s3/default",
        ],
    );
    Ok(())
}

#[test]
fn test_modified_script_forces_its_apps() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let mut options = SelectionOptions::new(ws.search_paths());
    options.modified_files = Some(vec!["tests/world/pytest_world.py".into()]);
    let selection = selector.select(&options)?;

    assert_eq!(keys(&selection.test_related), ["world/esp32/default"]);
    assert_eq!(
        selection.test_related[0].build_status,
        BuildStatus::ShouldBeBuilt
    );
    assert!(selection.non_test_related.is_empty());

    // The second collection is scoped to the modified script's directory.
    let calls = collector.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], vec![ws.root().join("tests/world")]);
    Ok(())
}

#[test]
fn test_unrelated_change_selects_nothing() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let mut options = SelectionOptions::new(ws.search_paths());
    options.modified_files = Some(vec!["docs/index.md".into()]);
    let selection = selector.select(&options)?;
    assert!(selection.is_empty(), "unexpected selection: {selection:?}");
    Ok(())
}

#[test]
fn test_quick_filter_ignores_modified_files() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let mut options = SelectionOptions::new(ws.search_paths());
    options.filter_expr = Some(FilterExpr::parse("test_world")?);
    options.modified_files = Some(vec!["unrelated/file.c".into()]);
    let selection = selector.select(&options)?;

    assert_eq!(keys(&selection.test_related), ["world/esp32/default"]);
    assert!(selection.non_test_related.is_empty());
    Ok(())
}

#[test]
fn test_persisted_pair_is_reused() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);
    let pair = AppListPair::new(
        config.test_related_apps_path(),
        config.non_test_related_apps_path(),
    );

    let mut persisted_app = App::new(ws.root().join("examples/lonely"), "esp32", "default");
    persisted_app.preserve = true;
    let persisted = Selection {
        test_related: vec![persisted_app],
        non_test_related: Vec::new(),
    };
    pair.write(&persisted)?;

    let options = SelectionOptions::new(ws.search_paths()).with_app_lists(pair);
    assert_eq!(selector.select(&options)?, persisted);
    assert!(collector.calls().is_empty(), "collector was not run");
    Ok(())
}

#[test]
fn test_partial_pair_is_recomputed() -> Result<()> {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    ws.write("out/test_related_apps.txt", "");
    let pair = AppListPair::new(
        config.test_related_apps_path(),
        config.non_test_related_apps_path(),
    );

    let mut options = SelectionOptions::new(ws.search_paths()).with_app_lists(pair);
    options.select_all = true;
    let selection = selector.select(&options)?;
    assert_eq!(selection.len(), 6);
    assert_eq!(collector.calls().len(), 1);
    Ok(())
}

#[test]
fn test_missing_search_path() {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = ws.collector();
    let selector = Selector::new(&config, &collector);

    let options = SelectionOptions::new(vec![Utf8PathBuf::from("does-not-exist")]);
    let error = selector.select(&options).unwrap_err();
    let chain: Vec<String> = std::iter::successors(
        Some(&error as &(dyn std::error::Error + 'static)),
        |error| error.source(),
    )
    .map(ToString::to_string)
    .collect();
    assert!(
        chain.iter().any(|message| message.contains("does-not-exist")),
        "unexpected error chain: {chain:?}"
    );
}

#[test]
fn test_discovery_error_propagates() {
    let ws = Workspace::new();
    let config = ws.config();
    let collector = MemoryCollector::failing();
    let selector = Selector::new(&config, &collector);

    let mut options = SelectionOptions::new(ws.search_paths());
    options.select_all = true;
    let error = selector.select(&options).unwrap_err();
    match error.discovery_error() {
        Some(DiscoveryError::InvalidOutput { line_number, .. }) => assert_eq!(*line_number, 1),
        other => panic!("expected invalid collector output, got {other:?}"),
    }
}
