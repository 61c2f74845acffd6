// SPDX-License-Identifier: Apache-2.0

//! Incremental selection of apps to build.
//!
//! Selection runs in one of three modes, checked in order:
//!
//! 1. **Select all**: every app is selected and modified files are ignored.
//! 2. **Quick filter**: only apps used by test cases matching the filter expression are selected.
//!    Modified files are ignored.
//! 3. **Incremental**: modified files are mapped to components, and apps that the change doesn't
//!    affect are skipped. Apps used by a test case in a modified test script are always built.
//!
//! The result splits the selected apps into those used by at least one test case and the rest.

use crate::{
    app::App,
    app_list::AppListPair,
    config::{BuildOnly, EnvVars, IdfCiConfig, Tristate},
    correlate::{CaseIndex, correlate},
    errors::SelectError,
    find_apps::{AppFinder, ModifiedSet},
    helpers::{normalize_path, plural},
    pytest::{CaseFilters, TestCase, TestCaseBuilder, TestCollector, collect_cases},
    target::TargetFilter,
};
use camino::Utf8PathBuf;
use idf_ci_filtering::FilterExpr;
use idf_ci_metadata::{BuildStatus, CollectReport};
use itertools::Itertools;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Command-line inputs to selection, before environment variables are applied.
#[derive(Clone, Debug, Default)]
pub struct SelectionArgs {
    /// `--target`.
    pub targets: Tristate<TargetFilter>,

    /// `--modified-files`.
    pub modified_files: Tristate<Vec<Utf8PathBuf>>,

    /// `--modified-components`.
    pub modified_components: Tristate<Vec<String>>,

    /// `--marker-expr`.
    pub marker_expr: Option<FilterExpr>,

    /// `--filter-expr`.
    pub filter_expr: Tristate<FilterExpr>,

    /// `--select-all`.
    pub select_all: bool,

    /// `--sdkconfig`.
    pub sdkconfig: Option<String>,
}

/// Fully resolved selection inputs.
///
/// Constructed once per invocation and passed by reference into every entry point.
#[derive(Clone, Debug, Default)]
pub struct SelectionOptions {
    /// Search paths, absolute or relative to the workspace root.
    pub paths: Vec<Utf8PathBuf>,

    /// The target filter.
    pub targets: TargetFilter,

    /// Modified files. `None` disables modified-file narrowing.
    pub modified_files: Option<Vec<Utf8PathBuf>>,

    /// Modified components, in addition to the ones mapped from modified files.
    pub modified_components: Option<Vec<String>>,

    /// The marker expression. `None` selects the target-dependent default.
    pub marker_expr: Option<FilterExpr>,

    /// The quick-filter expression over test names.
    pub filter_expr: Option<FilterExpr>,

    /// Select everything, ignoring modified files and the filter expression.
    pub select_all: bool,

    /// Keep only test cases with a device using this config.
    pub sdkconfig: Option<String>,

    /// Persisted app lists to reuse instead of recomputing the selection.
    pub app_lists: Option<AppListPair>,
}

impl SelectionOptions {
    /// Creates options for `paths` with nothing else set.
    pub fn new(paths: Vec<Utf8PathBuf>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }

    /// Resolves command-line arguments against the environment. Command-line values take
    /// precedence.
    pub fn resolve(paths: Vec<Utf8PathBuf>, args: SelectionArgs, env: &EnvVars) -> Self {
        Self {
            paths,
            targets: Tristate::resolve([args.targets, env.select_by_targets.clone()])
                .unwrap_or_default(),
            modified_files: Tristate::resolve([args.modified_files, env.changed_files.clone()]),
            modified_components: Tristate::resolve([args.modified_components]),
            marker_expr: args.marker_expr,
            filter_expr: Tristate::resolve([
                args.filter_expr,
                Tristate::from_option(env.select_by_filter_expr.clone()),
            ]),
            select_all: args.select_all || env.select_all_pytest_cases,
            sdkconfig: args.sdkconfig,
            app_lists: None,
        }
    }

    /// Reuses the persisted app lists if both exist.
    pub fn with_app_lists(mut self, app_lists: AppListPair) -> Self {
        self.app_lists = Some(app_lists);
        self
    }
}

/// The outcome of selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Apps used by at least one test case.
    pub test_related: Vec<App>,

    /// Apps not used by any test case.
    pub non_test_related: Vec<App>,
}

impl Selection {
    /// Returns the total number of apps.
    pub fn len(&self) -> usize {
        self.test_related.len() + self.non_test_related.len()
    }

    /// Returns true if no apps were selected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the apps a build should handle.
    pub fn apps_to_build(&self, build_only: BuildOnly) -> Vec<App> {
        match build_only {
            BuildOnly::All => self
                .test_related
                .iter()
                .chain(&self.non_test_related)
                .cloned()
                .collect(),
            BuildOnly::TestRelated => self.test_related.clone(),
            BuildOnly::NonTestRelated => self.non_test_related.clone(),
        }
    }
}

/// Selects apps and correlates them with test cases.
pub struct Selector<'a> {
    config: &'a IdfCiConfig,
    collector: &'a dyn TestCollector,
}

impl<'a> Selector<'a> {
    /// Creates a new selector.
    pub fn new(config: &'a IdfCiConfig, collector: &'a dyn TestCollector) -> Self {
        Self { config, collector }
    }

    /// Runs selection.
    pub fn select(&self, options: &SelectionOptions) -> Result<Selection, SelectError> {
        if let Some(app_lists) = &options.app_lists
            && let Some(selection) = app_lists.load()?
        {
            info!(
                "reusing persisted selection of {} {} ({} test-related) from {}",
                selection.len(),
                plural::apps_str(selection.len()),
                selection.test_related.len(),
                app_lists.test_related(),
            );
            return Ok(selection);
        }

        let finder = self.app_finder(false);
        let builder = self.case_builder(options.targets.clone());
        let mut filters = CaseFilters {
            targets: options.targets.clone(),
            marker_expr: options.marker_expr.clone(),
            keyword_expr: None,
            sdkconfig: options.sdkconfig.clone(),
        };

        if options.select_all {
            debug!("selecting all apps");
            let apps = finder.find(&options.paths, &options.targets, None)?;
            let cases = self.collect(&builder, &options.paths, &filters)?;
            return Ok(self.partition(apps, &cases));
        }

        if let Some(filter_expr) = &options.filter_expr {
            debug!("selecting apps used by test cases matching `{filter_expr}`");
            filters.keyword_expr = Some(filter_expr.clone());
            let apps = finder.find(&options.paths, &options.targets, None)?;
            let cases = self.collect(&builder, &options.paths, &filters)?;
            // Quick-filter mode builds only what the filter names.
            let selection = self.partition(apps, &cases);
            return Ok(Selection {
                test_related: selection.test_related,
                non_test_related: Vec::new(),
            });
        }

        let modified = self.modified_set(options);
        let mut apps = finder.find(&options.paths, &options.targets, modified.as_ref())?;
        let mut cases = self.collect(&builder, &options.paths, &filters)?;

        if let Some(modified) = &modified {
            let script_dirs = self.modified_script_dirs(modified);
            if !script_dirs.is_empty() {
                let modified_cases = self.collect(&builder, &script_dirs, &filters)?;
                let index = CaseIndex::new(&modified_cases);
                let mut promoted = 0;
                for app in &mut apps {
                    if index.contains(&app.key()) && app.promote_to_build() {
                        promoted += 1;
                    }
                }
                debug!(
                    "{promoted} {} promoted by {} modified test {}",
                    plural::apps_str(promoted),
                    script_dirs.len(),
                    if script_dirs.len() == 1 { "directory" } else { "directories" },
                );
                cases.extend(modified_cases);
            }
        }

        Ok(self.partition(apps, &cases))
    }

    /// Correlates every app under `paths`, including disabled ones, with every test case.
    ///
    /// Apps are enumerated for the default and preview targets. Host and emulated tests are
    /// included.
    pub fn collect_report(&self, paths: &[Utf8PathBuf]) -> Result<CollectReport, SelectError> {
        let finder = self.app_finder(true);
        let apps = finder.find(paths, &TargetFilter::List(self.config.all_targets()), None)?;

        let builder = self.case_builder(TargetFilter::All);
        let filters = CaseFilters {
            marker_expr: Some(FilterExpr::match_all()),
            ..Default::default()
        };
        let cases = self.collect(&builder, paths, &filters)?;
        Ok(correlate(&apps, &cases))
    }

    /// Collects test cases for a test run.
    pub fn collect_cases(
        &self,
        paths: &[Utf8PathBuf],
        filters: &CaseFilters,
    ) -> Result<Vec<TestCase>, SelectError> {
        let builder = self.case_builder(filters.targets.clone());
        self.collect(&builder, paths, filters)
    }

    // ---
    // Helper methods
    // ---

    fn app_finder(&self, include_disabled: bool) -> AppFinder {
        let mut finder = AppFinder::new(
            self.config.workspace_root(),
            self.config.default_build_targets().to_vec(),
            self.config.manifest_filename(),
        );
        finder
            .set_exclude_dirs(self.config.exclude_dirs())
            .set_build_dir_template(self.config.build_dir_template())
            .set_include_disabled(include_disabled);
        finder
    }

    fn case_builder(&self, targets: TargetFilter) -> TestCaseBuilder {
        let mut builder = TestCaseBuilder::new(self.config.workspace_root(), targets);
        builder
            .set_host_target(self.config.host_target())
            .set_emulator_markers(self.config.emulator_markers().to_vec())
            .set_skip_markers(self.config.skip_markers().to_vec())
            .set_build_dir_template(self.config.build_dir_template());
        builder
    }

    fn collect(
        &self,
        builder: &TestCaseBuilder,
        paths: &[Utf8PathBuf],
        filters: &CaseFilters,
    ) -> Result<Vec<TestCase>, SelectError> {
        Ok(collect_cases(
            self.collector,
            builder,
            self.config.workspace_root(),
            paths,
            filters,
        )?)
    }

    fn modified_set(&self, options: &SelectionOptions) -> Option<ModifiedSet> {
        if options.modified_files.is_none() && options.modified_components.is_none() {
            return None;
        }

        let root = self.config.workspace_root();
        let files: BTreeSet<_> = options
            .modified_files
            .iter()
            .flatten()
            .map(|file| normalize_path(root, file))
            .collect();
        let mut components = self.config.component_mapper().components_for(&files);
        components.extend(options.modified_components.iter().flatten().cloned());

        debug!(
            "{} modified files map to components: {}",
            files.len(),
            components.iter().join(", "),
        );
        Some(ModifiedSet { files, components })
    }

    fn modified_script_dirs(&self, modified: &ModifiedSet) -> Vec<Utf8PathBuf> {
        let globs = self.config.pytest_script_globs();
        let dirs: BTreeSet<_> = modified
            .files
            .iter()
            .filter(|file| file.file_name().is_some_and(|name| globs.is_match(name)))
            .filter(|file| file.is_file())
            .filter_map(|file| file.parent().map(|dir| dir.to_owned()))
            .collect();
        dirs.into_iter().collect()
    }

    fn partition(&self, apps: Vec<App>, cases: &[TestCase]) -> Selection {
        let index = CaseIndex::new(cases);
        let preserve_non_test_related = self.config.preserve_non_test_related_apps();

        let mut selection = Selection::default();
        for mut app in apps {
            match app.build_status {
                BuildStatus::Skipped | BuildStatus::Disabled => continue,
                BuildStatus::ShouldBeBuilt | BuildStatus::Success | BuildStatus::Failed => {}
            }
            if index.contains(&app.key()) {
                app.preserve = true;
                selection.test_related.push(app);
            } else {
                app.preserve = preserve_non_test_related;
                selection.non_test_related.push(app);
            }
        }

        info!(
            "selected {} {}: {} test-related, {} non-test-related",
            selection.len(),
            plural::apps_str(selection.len()),
            selection.test_related.len(),
            selection.non_test_related.len(),
        );
        selection
    }
}
