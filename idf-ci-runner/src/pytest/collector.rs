// SPDX-License-Identifier: Apache-2.0

use super::case::{HOST_TEST_MARKER, RawTestItem, TestCase, TestCaseBuilder};
use crate::{
    errors::{CollectCasesError, DiscoveryError, PathNotFoundError},
    helpers::{normalize_path, plural},
    target::TargetFilter,
};
use camino::{Utf8Path, Utf8PathBuf};
use idf_ci_filtering::FilterExpr;
use itertools::Itertools;
use tracing::debug;

/// Pytest's exit code when no tests were collected.
const NO_TESTS_COLLECTED: i32 = 5;

/// Enumerates raw test items under a set of paths.
///
/// Collecting zero items is a success. Errors are reserved for the collector itself failing.
pub trait TestCollector {
    /// Collects raw test items under `paths`.
    fn collect(&self, paths: &[Utf8PathBuf]) -> Result<Vec<RawTestItem>, DiscoveryError>;
}

impl<T: TestCollector + ?Sized> TestCollector for &T {
    fn collect(&self, paths: &[Utf8PathBuf]) -> Result<Vec<RawTestItem>, DiscoveryError> {
        (**self).collect(paths)
    }
}

/// Runs an external command that prints one JSON [`RawTestItem`] per line.
///
/// The search paths are appended to the command's arguments.
#[derive(Clone, Debug)]
pub struct CommandCollector {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
}

impl CommandCollector {
    /// Creates a collector from a command line split into words.
    ///
    /// Returns `None` if `command` is empty.
    pub fn new(command: &[String], cwd: impl Into<Utf8PathBuf>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.into(),
        })
    }
}

impl TestCollector for CommandCollector {
    fn collect(&self, paths: &[Utf8PathBuf]) -> Result<Vec<RawTestItem>, DiscoveryError> {
        let args = self
            .args
            .iter()
            .map(String::as_str)
            .chain(paths.iter().map(|path| path.as_str()))
            .collect::<Vec<_>>();
        debug!("running test collector: {} {}", self.program, args.join(" "));

        let output = duct::cmd(self.program.as_str(), args.iter().copied())
            .dir(self.cwd.as_std_path())
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|error| DiscoveryError::Spawn {
                command: format!("{} {}", self.program, args.join(" ")),
                error,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match output.status.code() {
            Some(0) | Some(NO_TESTS_COLLECTED) => parse_raw_items(&stdout),
            _ => Err(DiscoveryError::Failed {
                paths: paths.iter().join(", "),
                status: output.status,
                stdout: stdout.into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }
}

/// Parses collector output: one JSON object per line, blank lines ignored.
pub fn parse_raw_items(output: &str) -> Result<Vec<RawTestItem>, DiscoveryError> {
    output
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|error| DiscoveryError::InvalidOutput {
                line_number: index + 1,
                line: line.to_owned(),
                error,
            })
        })
        .collect()
}

/// Filters applied to collected test cases.
#[derive(Clone, Debug, Default)]
pub struct CaseFilters {
    /// The command-line target filter. For anything but `all`, only cases whose target selector
    /// equals it are kept.
    pub targets: TargetFilter,

    /// The marker expression. `None` selects the default, see [`CaseFilters::marker_expr`].
    pub marker_expr: Option<FilterExpr>,

    /// The keyword expression, matched case-insensitively against test names, files and markers.
    pub keyword_expr: Option<FilterExpr>,

    /// Keep only cases with a device using this config.
    pub sdkconfig: Option<String>,
}

impl CaseFilters {
    /// Returns the marker expression in effect.
    ///
    /// Without an explicit expression, host tests are selected only when the target filter names
    /// `host_target`, and excluded otherwise.
    pub fn marker_expr(&self, host_target: &str) -> FilterExpr {
        match &self.marker_expr {
            Some(expr) => expr.clone(),
            None => {
                let default = if self.targets.names(host_target) {
                    HOST_TEST_MARKER.to_owned()
                } else {
                    format!("not {HOST_TEST_MARKER}")
                };
                FilterExpr::parse(default).unwrap_or_else(|_| FilterExpr::match_all())
            }
        }
    }

    fn keep(&self, case: &TestCase, marker_expr: &FilterExpr, selector: Option<&str>) -> bool {
        if !marker_expr.matches(|marker| case.markers().contains(marker)) {
            return false;
        }

        if let Some(keyword_expr) = &self.keyword_expr {
            let keywords: Vec<String> = case.keywords().iter().map(|k| k.to_lowercase()).collect();
            let matched = keyword_expr.matches(|word| {
                let word = word.to_lowercase();
                keywords.iter().any(|keyword| keyword.contains(&word))
            });
            if !matched {
                return false;
            }
        }

        if let Some(selector) = selector
            && case.target_selector() != selector
        {
            return false;
        }

        if let Some(sdkconfig) = &self.sdkconfig
            && !case.configs().any(|config| config == sdkconfig)
        {
            return false;
        }

        true
    }
}

/// Collects test cases under `paths`, applies `filters`, and returns them deduplicated and
/// sorted by case ID.
pub fn collect_cases(
    collector: &dyn TestCollector,
    builder: &TestCaseBuilder,
    workspace_root: &Utf8Path,
    paths: &[Utf8PathBuf],
    filters: &CaseFilters,
) -> Result<Vec<TestCase>, CollectCasesError> {
    let paths = paths
        .iter()
        .map(|path| {
            let path = normalize_path(workspace_root, path);
            if path.exists() {
                Ok(path)
            } else {
                Err(PathNotFoundError { path })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let raw_items = collector.collect(&paths)?;
    let raw_count = raw_items.len();

    let marker_expr = filters.marker_expr(builder.host_target());
    let selector = filters.targets.selector();
    let cases: Vec<_> = raw_items
        .into_iter()
        .filter_map(|raw| builder.build(raw))
        .filter(|case| filters.keep(case, &marker_expr, selector.as_deref()))
        .unique()
        .sorted_by_cached_key(TestCase::case_id)
        .collect();

    debug!(
        "collected {} {} ({raw_count} raw items, marker expression `{marker_expr}`)",
        cases.len(),
        plural::test_cases_str(cases.len()),
    );
    Ok(cases)
}
