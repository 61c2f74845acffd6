// SPDX-License-Identifier: Apache-2.0

use crate::{
    ExpectedError, Result,
    errors::workspace_root_from,
    helpers::{rel_path, split_list},
    output::{NO_HEADING, OutputContext, OutputOpts, OutputWriter},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use idf_ci_filtering::FilterExpr;
use idf_ci_metadata::{BuildStatus, CollectReport, IdfCiExitCode};
use idf_ci_runner::{
    app::App,
    app_list::AppListPair,
    build::{BuildEngine, BuildRequest, CommandBuildEngine},
    config::{BuildOnly, EnvVars, IdfCiConfig, Tristate},
    correlate::render_missing_configs,
    group::group_for_ci,
    helpers::plural,
    partition::{ShardSpec, parallel_count},
    pytest::{BuiltCheck, CaseFilters, CommandCollector},
    select::{Selection, SelectionArgs, SelectionOptions, Selector},
    target::TargetFilter,
};
use owo_colors::{OwoColorize, Style, style};
use std::io::Write;
use swrite::{SWrite, swrite, swriteln};
use tracing::{debug, error, info, warn};

/// Decides which ESP-IDF apps a CI pipeline builds and which test jobs it runs.
#[derive(Debug, Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct IdfCiApp {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    command: Command,
}

impl IdfCiApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.common.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let base = BaseApp::new(self.common, output)?;
        match self.command {
            Command::Build(BuildCommand::Run(opts)) => base.exec_build_run(opts, output_writer),
            Command::Build(BuildCommand::Collect(opts)) => {
                base.exec_build_collect(opts, output_writer)
            }
            Command::Test(TestCommand::Plan(opts)) => base.exec_test_plan(opts, output_writer),
            Command::Check(CheckCommand::MissingConfigs(opts)) => {
                base.exec_check_missing_configs(opts)
            }
        }
    }
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Workspace root [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file layered over `.idf_ci.toml` (may be repeated; later files win)
    #[arg(long = "config-file", global = true, value_name = "PATH")]
    config_files: Vec<Utf8PathBuf>,

    #[clap(flatten)]
    output: OutputOpts,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Select and build apps
    #[command(subcommand)]
    Build(BuildCommand),

    /// Plan test jobs
    #[command(subcommand)]
    Test(TestCommand),

    /// Check apps and test cases for problems
    #[command(subcommand)]
    Check(CheckCommand),
}

#[derive(Debug, Subcommand)]
enum BuildCommand {
    /// Select apps affected by a change and build them
    Run(BuildRunOpts),

    /// Report every app with the test cases that use it
    Collect(BuildCollectOpts),
}

#[derive(Debug, Subcommand)]
enum TestCommand {
    /// Group test cases into CI jobs
    Plan(TestPlanOpts),
}

#[derive(Debug, Subcommand)]
enum CheckCommand {
    /// Fail if a test case requires an sdkconfig file that doesn't exist
    MissingConfigs(MissingConfigsOpts),
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Selection options")]
struct SelectionOpts {
    /// Paths to search for apps and test scripts
    #[arg(required = true, value_name = "PATHS")]
    paths: Vec<Utf8PathBuf>,

    /// Targets to build for: `all`, or a comma-separated list
    #[arg(long, short, value_name = "TARGETS")]
    target: Option<String>,

    /// Modified files, semicolon-separated; an empty value turns off modified-file narrowing
    #[arg(long, value_name = "FILES")]
    modified_files: Option<String>,

    /// Modified components, semicolon-separated
    #[arg(long, value_name = "COMPONENTS")]
    modified_components: Option<String>,

    /// Only use test cases matching this marker expression
    #[arg(long, short = 'm', value_name = "EXPR")]
    marker_expr: Option<String>,

    /// Only select apps used by test cases whose names match this expression
    #[arg(long, short = 'k', value_name = "EXPR")]
    filter_expr: Option<String>,

    /// Select every app, ignoring modified files and the filter expression
    #[arg(long)]
    select_all: bool,

    /// Only use test cases with a device using this sdkconfig
    #[arg(long, value_name = "CONFIG")]
    sdkconfig: Option<String>,
}

impl SelectionOpts {
    fn to_args(&self) -> Result<SelectionArgs> {
        let filter_expr = match Tristate::from_env_value(self.filter_expr.as_deref()) {
            Tristate::Value(expr) => Tristate::Value(parse_expr("--filter-expr", expr)?),
            Tristate::Null => Tristate::Null,
            Tristate::Unset => Tristate::Unset,
        };

        Ok(SelectionArgs {
            targets: Tristate::from_env_value(self.target.as_deref())
                .map(|value| parse_targets(&value)),
            modified_files: Tristate::from_env_value(self.modified_files.as_deref()).map(|value| {
                split_list(&value)
                    .into_iter()
                    .map(Utf8PathBuf::from)
                    .collect()
            }),
            modified_components: Tristate::from_env_value(self.modified_components.as_deref())
                .map(|value| split_list(&value)),
            marker_expr: parse_optional_expr("--marker-expr", self.marker_expr.as_deref())?,
            filter_expr,
            select_all: self.select_all,
            sdkconfig: self.sdkconfig.clone(),
        })
    }

    fn into_options(self, env: &EnvVars) -> Result<SelectionOptions> {
        let args = self.to_args()?;
        Ok(SelectionOptions::resolve(self.paths, args, env))
    }
}

#[derive(Debug, Args)]
struct BuildRunOpts {
    #[clap(flatten)]
    selection: SelectionOpts,

    /// Only build apps used by at least one test case
    #[arg(long, conflicts_with = "only_non_test_related")]
    only_test_related: bool,

    /// Only build apps not used by any test case
    #[arg(long)]
    only_non_test_related: bool,

    /// Total number of parallel build jobs
    #[arg(long, default_value_t = 1, env = "CI_NODE_TOTAL", value_name = "N")]
    parallel_count: usize,

    /// 1-based index of this build job
    #[arg(long, default_value_t = 1, env = "CI_NODE_INDEX", value_name = "I")]
    parallel_index: usize,

    /// Select apps and print what this job would build, without building
    #[arg(long)]
    dry_run: bool,

    /// File the selected apps are handed to the build engine in, relative to the workspace root
    #[arg(long, value_name = "PATH", default_value = "app_info_list.txt")]
    app_list_file: Utf8PathBuf,
}

impl BuildRunOpts {
    fn build_only(&self, env: &EnvVars) -> BuildOnly {
        if self.only_test_related {
            BuildOnly::TestRelated
        } else if self.only_non_test_related {
            BuildOnly::NonTestRelated
        } else {
            env.build_only
        }
    }
}

#[derive(Debug, Args)]
struct BuildCollectOpts {
    /// Paths to search for apps and test scripts
    #[arg(required = true, value_name = "PATHS")]
    paths: Vec<Utf8PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormatOpt,
}

#[derive(Debug, Args)]
struct TestPlanOpts {
    /// Paths to search for test scripts
    #[arg(required = true, value_name = "PATHS")]
    paths: Vec<Utf8PathBuf>,

    /// Target selector: `all`, a target, or a comma-separated list for multi-device tests
    #[arg(long, short, default_value = "all")]
    target: String,

    /// Only use test cases matching this marker expression
    #[arg(long, short = 'm', value_name = "EXPR")]
    marker_expr: Option<String>,

    /// Only use test cases whose names match this expression
    #[arg(long, short = 'k', value_name = "EXPR")]
    filter_expr: Option<String>,

    /// Only use test cases with a device using this sdkconfig
    #[arg(long, value_name = "CONFIG")]
    sdkconfig: Option<String>,

    /// Don't drop test cases whose apps are missing from the persisted app lists
    #[arg(long)]
    no_built_check: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormatOpt,
}

#[derive(Debug, Args)]
struct MissingConfigsOpts {
    /// Paths to search for apps and test scripts
    #[arg(required = true, value_name = "PATHS")]
    paths: Vec<Utf8PathBuf>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormatOpt {
    /// A human-readable output format.
    #[default]
    Human,
    /// JSON, prettified.
    Json,
}

struct BaseApp {
    output: OutputContext,
    env: EnvVars,
    config: IdfCiConfig,
}

impl BaseApp {
    fn new(common: CommonOpts, output: OutputContext) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
        let cwd = workspace_root_from(cwd)?;
        let workspace_root = match common.workspace_root {
            Some(root) if root.is_absolute() => root,
            Some(root) => cwd.join(root),
            None => cwd,
        };

        let config = IdfCiConfig::from_sources(
            &workspace_root,
            common.config_files.iter().map(Utf8PathBuf::as_path),
        )?;
        let env = EnvVars::from_env()?;
        debug!("workspace root: {workspace_root}, in CI: {}", env.in_ci);

        Ok(Self {
            output,
            env,
            config,
        })
    }

    fn root(&self) -> &Utf8Path {
        self.config.workspace_root()
    }

    fn collector(&self) -> Result<CommandCollector> {
        CommandCollector::new(self.config.collector_command(), self.root()).ok_or(
            ExpectedError::CommandNotConfigured {
                key: "collector.command",
            },
        )
    }

    fn app_lists(&self) -> AppListPair {
        AppListPair::new(
            self.config.test_related_apps_path(),
            self.config.non_test_related_apps_path(),
        )
    }

    /// Resolves selection options. Persisted app lists are reused only in CI, where an earlier
    /// stage wrote them.
    fn selection_options(&self, opts: SelectionOpts) -> Result<SelectionOptions> {
        let options = opts.into_options(&self.env)?;
        if self.env.in_ci {
            Ok(options.with_app_lists(self.app_lists()))
        } else {
            Ok(options)
        }
    }

    fn exec_build_run(&self, opts: BuildRunOpts, output_writer: &mut OutputWriter) -> Result<i32> {
        let shard = ShardSpec::new(opts.parallel_index, opts.parallel_count)?;
        let build_only = opts.build_only(&self.env);
        let collector = self.collector()?;
        let selector = Selector::new(&self.config, &collector);

        let options = self.selection_options(opts.selection)?;
        let selection = selector.select(&options)?;

        if self.env.in_ci && !opts.dry_run {
            let app_lists = self.app_lists();
            app_lists.write(&selection)?;
            debug!(
                "wrote app lists to `{}` and `{}`",
                app_lists.test_related(),
                app_lists.non_test_related(),
            );
        }

        let apps = selection.apps_to_build(build_only);
        if opts.dry_run {
            let plan = self.render_build_plan(&selection, &apps, build_only, shard);
            write_stdout(output_writer, &plan)?;
            return Ok(IdfCiExitCode::OK);
        }

        if apps.is_empty() {
            info!("no apps to build");
            return Ok(IdfCiExitCode::OK);
        }

        let engine = CommandBuildEngine::new(
            self.config.build_command(),
            self.root(),
            self.root().join(&opts.app_list_file),
        )
        .ok_or(ExpectedError::CommandNotConfigured {
            key: "build.command",
        })?;
        let outcome = engine.build(&BuildRequest { apps: &apps, shard })?;
        if outcome.is_success() {
            Ok(IdfCiExitCode::OK)
        } else {
            Err(ExpectedError::BuildFailed {
                exit_code: outcome.exit_code,
            })
        }
    }

    fn exec_build_collect(
        &self,
        opts: BuildCollectOpts,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let collector = self.collector()?;
        let report = Selector::new(&self.config, &collector).collect_report(&opts.paths)?;

        let text = match opts.format {
            OutputFormatOpt::Human => render_collect_report(
                &report,
                self.root(),
                self.output.verbose,
                self.output.colorize_stdout(),
            ),
            OutputFormatOpt::Json => {
                let mut json = report
                    .to_json()
                    .map_err(|err| ExpectedError::SerializeError { err })?;
                json.push('\n');
                json
            }
        };
        write_stdout(output_writer, &text)?;
        Ok(IdfCiExitCode::OK)
    }

    fn exec_test_plan(&self, opts: TestPlanOpts, output_writer: &mut OutputWriter) -> Result<i32> {
        let filters = CaseFilters {
            targets: parse_targets(&opts.target),
            marker_expr: parse_optional_expr("--marker-expr", opts.marker_expr.as_deref())?,
            keyword_expr: parse_optional_expr("--filter-expr", opts.filter_expr.as_deref())?,
            sdkconfig: opts.sdkconfig,
        };
        let collector = self.collector()?;
        let mut cases = Selector::new(&self.config, &collector).collect_cases(&opts.paths, &filters)?;

        if opts.no_built_check {
            debug!("not checking test cases against the app lists");
        } else if let Some(built_dirs) = self.app_lists().built_dirs()? {
            cases.retain(|case| match case.check_built(&built_dirs) {
                BuiltCheck::AllBuilt => true,
                BuiltCheck::PartiallyBuilt(message) => {
                    warn!("{message}");
                    true
                }
                BuiltCheck::NoneBuilt(message) => {
                    info!("{message}");
                    false
                }
            });
        } else {
            debug!("no app lists found, keeping every collected test case");
        }

        let groups = group_for_ci(&cases, |marker| self.config.is_env_marker(marker));
        let text = match opts.format {
            OutputFormatOpt::Human => groups.render_preview(self.output.colorize_stdout()),
            OutputFormatOpt::Json => {
                let mut json = serde_json::to_string_pretty(&groups.to_matrix())
                    .map_err(|err| ExpectedError::SerializeError { err })?;
                json.push('\n');
                json
            }
        };
        write_stdout(output_writer, &text)?;
        Ok(IdfCiExitCode::OK)
    }

    fn exec_check_missing_configs(&self, opts: MissingConfigsOpts) -> Result<i32> {
        let collector = self.collector()?;
        let report = Selector::new(&self.config, &collector).collect_report(&opts.paths)?;

        match render_missing_configs(&report) {
            Some(message) => {
                error!(target: NO_HEADING, "{message}");
                Ok(IdfCiExitCode::CHECK_FAILED)
            }
            None => {
                info!(
                    "all {} {} have their sdkconfig files",
                    report.summary.total_test_cases,
                    plural::test_cases_str(report.summary.total_test_cases),
                );
                Ok(IdfCiExitCode::OK)
            }
        }
    }

    fn render_build_plan(
        &self,
        selection: &Selection,
        apps: &[App],
        build_only: BuildOnly,
        shard: ShardSpec,
    ) -> String {
        let mut styles = PlanStyles::default();
        if self.output.colorize_stdout() {
            styles.colorize();
        }

        let mut out = String::new();
        swriteln!(
            out,
            "{} {} selected: {} test-related, {} non-test-related",
            selection.len().style(styles.count),
            plural::apps_str(selection.len()),
            selection.test_related.len().style(styles.count),
            selection.non_test_related.len().style(styles.count),
        );
        match build_only {
            BuildOnly::All => {}
            BuildOnly::TestRelated => swriteln!(out, "building test-related apps only"),
            BuildOnly::NonTestRelated => swriteln!(out, "building non-test-related apps only"),
        }

        let apps_per_job = self.config.apps_per_job();
        swriteln!(
            out,
            "{} {} to build, {} parallel {} at {} per job",
            apps.len().style(styles.count),
            plural::apps_str(apps.len()),
            parallel_count(apps.len(), apps_per_job).style(styles.count),
            if parallel_count(apps.len(), apps_per_job) == 1 {
                "job"
            } else {
                "jobs"
            },
            apps_per_job,
        );

        let chunk = shard.chunk(apps);
        swriteln!(
            out,
            "shard {} builds {} {}:",
            shard.style(styles.shard),
            chunk.len().style(styles.count),
            plural::apps_str(chunk.len()),
        );
        for app in chunk {
            swrite!(
                out,
                "    {} ({}, {})",
                rel_path(self.root(), &app.path).style(styles.path),
                app.target,
                app.config,
            );
            if !app.preserve {
                swrite!(out, " {}", "[not preserved]".style(styles.note));
            }
            out.push('\n');
        }
        out
    }
}

fn render_collect_report(
    report: &CollectReport,
    root: &Utf8Path,
    verbose: bool,
    colorize: bool,
) -> String {
    let mut styles = PlanStyles::default();
    if colorize {
        styles.colorize();
    }

    let mut out = String::new();
    for (path, project) in &report.projects {
        swriteln!(out, "{}", rel_path(root, path).style(styles.path));

        for app in &project.apps {
            let code = format!("{:<3}", app.status().code());
            let code_style = if app.build_status == BuildStatus::Disabled {
                styles.note
            } else {
                styles.count
            };
            swrite!(out, "    {} {} {}", code.style(code_style), app.target, app.config);
            let count = app.test_cases.len();
            if count > 0 {
                swrite!(out, " ({count} {})", plural::test_cases_str(count));
            }
            if verbose && !app.build_comment.is_empty() {
                swrite!(out, ": {}", app.build_comment);
            }
            out.push('\n');

            for case in app.disabled_by_manifest_only() {
                swriteln!(
                    out,
                    "        {}: {} is disabled by the manifest but not by a marker",
                    "inconsistent".style(styles.warning),
                    case.caseid,
                );
            }
            for case in app.disabled_by_marker_only() {
                swriteln!(
                    out,
                    "        {}: {} is disabled by a marker but not by the manifest",
                    "inconsistent".style(styles.warning),
                    case.caseid,
                );
            }
        }

        for missing in &project.missing_apps {
            let count = missing.test_cases.len();
            swriteln!(
                out,
                "    {} {} {} (app missing, required by {count} {})",
                format!("{:<3}", "!").style(styles.warning),
                missing.target,
                missing.config,
                plural::test_cases_str(count),
            );
        }
    }

    let summary = &report.summary;
    swriteln!(
        out,
        "{} {}, {} {}, {} {}: {} used, {} disabled, {} with a missing app",
        summary.total_projects.style(styles.count),
        plural::projects_str(summary.total_projects),
        summary.total_apps.style(styles.count),
        plural::apps_str(summary.total_apps),
        summary.total_test_cases.style(styles.count),
        plural::test_cases_str(summary.total_test_cases),
        summary.total_test_cases_used,
        summary.total_test_cases_disabled,
        summary.total_test_cases_missing_app,
    );
    out
}

fn parse_targets(value: &str) -> TargetFilter {
    let Ok(targets) = value.parse::<TargetFilter>();
    targets
}

fn parse_expr(arg_name: &'static str, expr: String) -> Result<FilterExpr> {
    FilterExpr::parse(expr).map_err(|err| ExpectedError::expression_parse_error(arg_name, err))
}

fn parse_optional_expr(arg_name: &'static str, expr: Option<&str>) -> Result<Option<FilterExpr>> {
    expr.map(|expr| parse_expr(arg_name, expr.to_owned()))
        .transpose()
}

fn write_stdout(output_writer: &mut OutputWriter, text: &str) -> Result<()> {
    let mut writer = output_writer.stdout_writer();
    writer
        .write_all(text.as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|err| ExpectedError::WriteError { err })
}

#[derive(Clone, Debug, Default)]
struct PlanStyles {
    count: Style,
    path: Style,
    shard: Style,
    note: Style,
    warning: Style,
}

impl PlanStyles {
    fn colorize(&mut self) {
        self.count = style().bold();
        self.path = style().cyan();
        self.shard = style().bold();
        self.note = style().dimmed();
        self.warning = style().yellow().bold();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_argument_parsing() {
        let valid: &[&[&str]] = &[
            &["idf-ci", "build", "run", "examples"],
            &["idf-ci", "build", "run", "examples", "--target", "esp32,esp32s3"],
            &["idf-ci", "build", "run", "examples", "--modified-files", ""],
            &["idf-ci", "build", "run", "examples", "-k", "test_hello", "--dry-run"],
            &[
                "idf-ci",
                "build",
                "run",
                "examples",
                "--parallel-count",
                "3",
                "--parallel-index",
                "2",
            ],
            &["idf-ci", "build", "run", "examples", "--only-test-related"],
            &["idf-ci", "build", "collect", "examples", "--format", "json"],
            &["idf-ci", "test", "plan", "tests", "-t", "esp32,esp32", "-m", "generic"],
            &["idf-ci", "check", "missing-configs", "examples", "tests"],
            &["idf-ci", "--config-file", "ci.toml", "check", "missing-configs", "."],
        ];
        for args in valid {
            if let Err(error) = IdfCiApp::try_parse_from(*args) {
                panic!("{args:?} should have parsed, but failed: {error}");
            }
        }

        let invalid: &[&[&str]] = &[
            &["idf-ci", "build", "run"],
            &[
                "idf-ci",
                "build",
                "run",
                "examples",
                "--only-test-related",
                "--only-non-test-related",
            ],
            &["idf-ci", "build", "collect", "examples", "--format", "yaml"],
            &["idf-ci", "check", "missing-configs"],
        ];
        for args in invalid {
            assert!(
                IdfCiApp::try_parse_from(*args).is_err(),
                "{args:?} should not have parsed"
            );
        }
    }

    #[test]
    fn test_selection_args() {
        let opts = SelectionOpts {
            paths: vec!["examples".into()],
            target: Some("esp32".to_owned()),
            modified_files: Some(String::new()),
            modified_components: Some("esp_wifi;lwip".to_owned()),
            marker_expr: None,
            filter_expr: Some("test_a or test_b".to_owned()),
            select_all: false,
            sdkconfig: None,
        };
        let args = opts.to_args().unwrap();
        assert_eq!(args.targets, Tristate::Value(parse_targets("esp32")));
        assert_eq!(args.modified_files, Tristate::Null);
        assert_eq!(
            args.modified_components,
            Tristate::Value(vec!["esp_wifi".to_owned(), "lwip".to_owned()])
        );
        assert!(matches!(args.filter_expr, Tristate::Value(_)));

        let bad = SelectionOpts {
            marker_expr: Some("generic and".to_owned()),
            ..opts
        };
        let error = bad.to_args().unwrap_err();
        assert_eq!(error.process_exit_code(), IdfCiExitCode::INVALID_EXPRESSION);
    }

    #[test]
    fn test_build_only_overrides_env() {
        let app = IdfCiApp::try_parse_from(["idf-ci", "build", "run", "x", "--only-test-related"])
            .unwrap();
        let Command::Build(BuildCommand::Run(opts)) = app.command else {
            panic!("expected build run");
        };
        let env = EnvVars {
            build_only: BuildOnly::NonTestRelated,
            ..Default::default()
        };
        assert_eq!(opts.build_only(&env), BuildOnly::TestRelated);
    }

    #[test]
    fn test_app_lists_reused_only_in_ci() {
        let dir = Utf8TempDir::new().unwrap();
        let config = IdfCiConfig::from_sources(dir.path(), []).unwrap();
        let base = |in_ci: bool| BaseApp {
            output: OutputContext {
                verbose: false,
                color: crate::output::Color::Never,
            },
            env: EnvVars {
                in_ci,
                ..Default::default()
            },
            config: config.clone(),
        };
        let opts = || SelectionOpts {
            paths: vec!["examples".into()],
            ..Default::default()
        };

        let options = base(false).selection_options(opts()).unwrap();
        assert_eq!(options.app_lists, None);

        let options = base(true).selection_options(opts()).unwrap();
        let app_lists = options.app_lists.expect("app lists are reused in CI");
        assert_eq!(
            app_lists.test_related(),
            config.test_related_apps_path().as_path()
        );
    }

    // The collector is a shell script that prints fixed raw items, ignoring the paths appended
    // to its command line.
    #[cfg(unix)]
    fn workspace_with_collector(items: &str) -> Utf8TempDir {
        let dir = Utf8TempDir::new().unwrap();
        let root = dir.path();
        let write = |rel: &str, contents: &str| {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        };
        write(
            ".idf_ci.toml",
            indoc! {r#"
                default-build-targets = ["esp32"]
                preview-targets = []

                [collector]
                command = ["sh", "-c", "cat items.jsonl", "sh"]
            "#},
        );
        write("items.jsonl", items);
        write("examples/hello/CMakeLists.txt", "project(hello)\n");
        write("examples/hello/pytest_hello.py", "");
        dir
    }

    #[cfg(unix)]
    fn exec(root: &Utf8Path, args: &[&str], writer: &mut OutputWriter) -> Result<i32> {
        let mut full_args = vec!["idf-ci", "--workspace-root", root.as_str(), "--color", "never"];
        full_args.extend_from_slice(args);
        let app = IdfCiApp::try_parse_from(full_args).unwrap();
        let output = app.init_output();
        app.exec(output, writer)
    }

    #[cfg(unix)]
    #[test]
    fn test_check_missing_configs() {
        let dir = workspace_with_collector(indoc! {r#"
            {"nodeid": "examples/hello/pytest_hello.py::test_hello", "path": "examples/hello/pytest_hello.py", "name": "test_hello", "params": {"target": "esp32"}}
            {"nodeid": "examples/hello/pytest_hello.py::test_psram", "path": "examples/hello/pytest_hello.py", "name": "test_psram", "params": {"target": "esp32", "config": "psram"}}
        "#});

        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let code = exec(dir.path(), &["check", "missing-configs", "examples"], &mut writer).unwrap();
        assert_eq!(code, IdfCiExitCode::CHECK_FAILED);
    }

    #[cfg(unix)]
    #[test]
    fn test_dry_run_and_plan() {
        let dir = workspace_with_collector(indoc! {r#"
            {"nodeid": "examples/hello/pytest_hello.py::test_hello", "path": "examples/hello/pytest_hello.py", "name": "test_hello", "params": {"target": "esp32"}, "markers": [{"name": "generic"}]}
        "#});

        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let code = exec(
            dir.path(),
            &["build", "run", "examples", "--select-all", "--dry-run"],
            &mut writer,
        )
        .unwrap();
        assert_eq!(code, IdfCiExitCode::OK);
        let OutputWriter::Test { stdout } = writer else {
            unreachable!()
        };
        let stdout = String::from_utf8(stdout).unwrap();
        assert_eq!(
            stdout,
            indoc! {"
                1 app selected: 1 test-related, 0 non-test-related
                1 app to build, 1 parallel job at 60 per job
                shard 1/1 builds 1 app:
                    examples/hello (esp32, default)
            "},
        );

        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let code = exec(
            dir.path(),
            &["test", "plan", "examples", "--target", "esp32", "--format", "json"],
            &mut writer,
        )
        .unwrap();
        assert_eq!(code, IdfCiExitCode::OK);
        let OutputWriter::Test { stdout } = writer else {
            unreachable!()
        };
        let matrix: Vec<idf_ci_metadata::TestMatrixEntry> =
            serde_json::from_slice(&stdout).unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].targets, "esp32");
        assert_eq!(matrix[0].env_markers, "generic");
    }

    #[cfg(unix)]
    #[test]
    fn test_discovery_failure_exit_code() {
        let dir = workspace_with_collector("not json\n");
        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let error = exec(dir.path(), &["build", "collect", "examples"], &mut writer).unwrap_err();
        assert_eq!(error.process_exit_code(), IdfCiExitCode::DISCOVERY_FAILED);
    }
}
