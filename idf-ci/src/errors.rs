// SPDX-License-Identifier: Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use camino::Utf8PathBuf;
use idf_ci_filtering::errors::ExpressionParseErrors;
use idf_ci_metadata::IdfCiExitCode;
use idf_ci_runner::errors::{
    AppListReadError, AppListWriteError, BuildEngineError, CollectCasesError, ConfigParseError,
    ConfigParseErrorKind, EnvVarsError, FindAppsError, InvalidShardError, SelectError,
};
use owo_colors::OwoColorize;
use std::{error::Error, path::PathBuf};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders. Errors are meant to be printed with display_to_stderr,
// which colorizes them and adds context.

/// An error that idf-ci reports to the user and maps to an exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("workspace root is not valid UTF-8")]
    WorkspaceRootInvalidUtf8 { path: PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("environment error")]
    EnvVarsError {
        #[from]
        err: EnvVarsError,
    },
    #[error("failed to parse expression")]
    ExpressionParseError {
        arg_name: &'static str,
        #[source]
        err: ExpressionParseErrors,
    },
    #[error("invalid shard")]
    ShardSpecError {
        #[from]
        err: InvalidShardError,
    },
    #[error("command not configured")]
    CommandNotConfigured { key: &'static str },
    #[error("selection failed")]
    SelectError {
        #[from]
        err: SelectError,
    },
    #[error("app list read error")]
    AppListReadError {
        #[from]
        err: AppListReadError,
    },
    #[error("app list write error")]
    AppListWriteError {
        #[from]
        err: AppListWriteError,
    },
    #[error("build engine error")]
    BuildEngineError {
        #[from]
        err: BuildEngineError,
    },
    #[error("build failed")]
    BuildFailed { exit_code: Option<i32> },
    #[error("error serializing output")]
    SerializeError {
        #[source]
        err: serde_json::Error,
    },
    #[error("error writing output")]
    WriteError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn expression_parse_error(arg_name: &'static str, err: ExpressionParseErrors) -> Self {
        Self::ExpressionParseError { arg_name, err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::WorkspaceRootInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ShardSpecError { .. }
            | Self::CommandNotConfigured { .. } => IdfCiExitCode::SETUP_ERROR,
            Self::EnvVarsError { err } => match err {
                EnvVarsError::InvalidFilterExpr { .. } => IdfCiExitCode::INVALID_EXPRESSION,
                _ => IdfCiExitCode::SETUP_ERROR,
            },
            Self::ExpressionParseError { .. } => IdfCiExitCode::INVALID_EXPRESSION,
            Self::SelectError { err } => match err {
                SelectError::CollectCases(CollectCasesError::Discovery(_)) => {
                    IdfCiExitCode::DISCOVERY_FAILED
                }
                SelectError::AppList(_) => IdfCiExitCode::APP_LIST_ERROR,
                _ => IdfCiExitCode::FIND_APPS_FAILED,
            },
            Self::AppListReadError { .. } | Self::AppListWriteError { .. } => {
                IdfCiExitCode::APP_LIST_ERROR
            }
            Self::BuildEngineError { err } => match err {
                BuildEngineError::WriteAppList(_) => IdfCiExitCode::APP_LIST_ERROR,
                _ => IdfCiExitCode::BUILD_FAILED,
            },
            Self::BuildFailed { .. } => IdfCiExitCode::BUILD_FAILED,
            Self::SerializeError { .. } | Self::WriteError { .. } => {
                IdfCiExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::WorkspaceRootInvalidUtf8 { path } => {
                error!(
                    "workspace root `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                match err.kind() {
                    ConfigParseErrorKind::DeserializeError(error) => {
                        error!(
                            "failed to parse idf-ci config at `{}`: invalid value for key `{}`",
                            err.config_file().style(styles.bold),
                            error.path().style(styles.bold),
                        );
                        Some(error.inner() as &dyn Error)
                    }
                    _ => {
                        error!("{err}");
                        err.source()
                    }
                }
            }
            Self::EnvVarsError { err } => {
                if let EnvVarsError::InvalidFilterExpr { name, error } = err {
                    display_expression_errors(error);
                    error!(
                        "failed to parse filter expression in environment variable `{}`",
                        name.style(styles.bold)
                    );
                    None
                } else {
                    error!("{err}");
                    err.source()
                }
            }
            Self::ExpressionParseError { arg_name, err } => {
                display_expression_errors(err);
                error!(
                    "failed to parse expression passed to `{}`",
                    arg_name.style(styles.bold)
                );
                None
            }
            Self::ShardSpecError { err } => {
                error!("invalid shard: {err}");
                None
            }
            Self::CommandNotConfigured { key } => {
                error!(
                    "`{}` is empty in the idf-ci config, so there is nothing to run",
                    key.style(styles.bold)
                );
                None
            }
            Self::SelectError { err } => {
                let source = display_select_error(err, styles);
                if let Some(discovery) = err.discovery_error()
                    && let Some((stdout, stderr)) = discovery.captured_output()
                {
                    display_captured("stdout", stdout, styles);
                    display_captured("stderr", stderr, styles);
                }
                source
            }
            Self::AppListReadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::AppListWriteError { err } => {
                error!("{err}");
                err.source()
            }
            Self::BuildEngineError { err } => {
                error!("{err}");
                err.source()
            }
            Self::BuildFailed { exit_code } => {
                match exit_code {
                    Some(code) => error!(
                        "build engine exited with code {}",
                        code.style(styles.bold)
                    ),
                    None => error!("build engine was terminated by a signal"),
                }
                None
            }
            Self::SerializeError { err } => {
                error!("failed to serialize output");
                Some(err as &dyn Error)
            }
            Self::WriteError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

fn display_select_error<'a>(
    err: &'a SelectError,
    styles: &StderrStyles,
) -> Option<&'a (dyn Error + 'static)> {
    match err {
        SelectError::FindApps(FindAppsError::PathNotFound(not_found))
        | SelectError::CollectCases(CollectCasesError::PathNotFound(not_found)) => {
            error!(
                "search path `{}` does not exist",
                not_found.path.style(styles.bold)
            );
            None
        }
        SelectError::CollectCases(CollectCasesError::Discovery(discovery)) => {
            error!("{discovery}");
            discovery.source()
        }
        other => {
            error!("{other}");
            other.source()
        }
    }
}

fn display_expression_errors(err: &ExpressionParseErrors) {
    for single_error in &err.errors {
        let report = miette::Report::new(single_error.clone()).with_source_code(err.input.clone());
        error!(target: NO_HEADING, "{:?}", report);
    }
}

fn display_captured(name: &str, captured: &str, styles: &StderrStyles) {
    let captured = captured.trim_end();
    if captured.is_empty() {
        return;
    }
    error!(
        target: NO_HEADING,
        "\n{}\n{captured}",
        format!("--- collector {name} ---").style(styles.warning_text),
    );
}

pub(crate) fn workspace_root_from(path: PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).map_err(|path| ExpectedError::WorkspaceRootInvalidUtf8 { path })
}
