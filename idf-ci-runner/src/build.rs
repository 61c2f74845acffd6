// SPDX-License-Identifier: Apache-2.0

//! Handing selected apps to the external build engine.

use crate::{app::App, app_list::write_app_list, errors::BuildEngineError, partition::ShardSpec};
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use std::process::ExitStatus;
use tracing::{debug, info};

/// A request to build apps.
#[derive(Clone, Copy, Debug)]
pub struct BuildRequest<'a> {
    /// The full app list. The engine picks this shard's share itself.
    pub apps: &'a [App],

    /// The shard this job builds.
    pub shard: ShardSpec,
}

/// The outcome of a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildOutcome {
    /// The engine's exit code, or `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
}

impl BuildOutcome {
    /// Returns true if every app built successfully.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl From<ExitStatus> for BuildOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            exit_code: status.code(),
        }
    }
}

/// Builds apps.
pub trait BuildEngine {
    /// Builds this shard of `request.apps`, blocking until done.
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildOutcome, BuildEngineError>;
}

impl<T: BuildEngine + ?Sized> BuildEngine for &T {
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildOutcome, BuildEngineError> {
        (**self).build(request)
    }
}

/// Runs an external build command.
///
/// The apps are written to an app list file, and the command is called with
/// `--app-list <file> --parallel-count <n> --parallel-index <i>` appended. Its output is not
/// captured.
#[derive(Clone, Debug)]
pub struct CommandBuildEngine {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
    app_list_path: Utf8PathBuf,
}

impl CommandBuildEngine {
    /// Creates an engine from a command line split into words.
    ///
    /// Returns `None` if `command` is empty.
    pub fn new(
        command: &[String],
        cwd: impl Into<Utf8PathBuf>,
        app_list_path: impl Into<Utf8PathBuf>,
    ) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.into(),
            app_list_path: app_list_path.into(),
        })
    }

    /// Returns the app list file handed to the engine.
    pub fn app_list_path(&self) -> &Utf8Path {
        &self.app_list_path
    }

    fn args(&self, shard: ShardSpec) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "--app-list".to_owned(),
            self.app_list_path.to_string(),
            "--parallel-count".to_owned(),
            shard.count().to_string(),
            "--parallel-index".to_owned(),
            shard.index().to_string(),
        ]);
        args
    }
}

impl BuildEngine for CommandBuildEngine {
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildOutcome, BuildEngineError> {
        write_app_list(&self.app_list_path, request.apps)?;

        let args = self.args(request.shard);
        let command = format!("{} {}", self.program, args.iter().join(" "));
        info!(
            "building shard {} of {} apps with `{command}`",
            request.shard,
            request.apps.len()
        );

        let status = duct::cmd(self.program.as_str(), &args)
            .dir(self.cwd.as_std_path())
            .unchecked()
            .run()
            .map_err(|error| BuildEngineError::Spawn { command, error })?
            .status;
        debug!("build engine exited with {status}");
        Ok(status.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_list::read_app_list;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args() {
        let engine = CommandBuildEngine::new(
            &["idf-build-apps".to_owned(), "build".to_owned()],
            "/ws",
            "/ws/app_list.txt",
        )
        .unwrap();
        assert_eq!(
            engine.args(ShardSpec::new(2, 3).unwrap()),
            [
                "build",
                "--app-list",
                "/ws/app_list.txt",
                "--parallel-count",
                "3",
                "--parallel-index",
                "2",
            ],
        );
        assert!(CommandBuildEngine::new(&[], "/ws", "/ws/app_list.txt").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_build_engine() {
        let dir = Utf8TempDir::new().unwrap();
        let list = dir.path().join("app_list.txt");
        let apps = vec![
            App::new("/ws/a", "esp32", "default"),
            App::new("/ws/b", "esp32s3", "psram"),
        ];

        // Succeeds only if the index argument is the last one and equals 1.
        let command = [
            "sh".to_owned(),
            "-c".to_owned(),
            r#"eval last=\${$#}; test "$last" = 1"#.to_owned(),
            "sh".to_owned(),
        ];
        let engine = CommandBuildEngine::new(&command, dir.path(), &list).unwrap();
        let outcome = engine
            .build(&BuildRequest {
                apps: &apps,
                shard: ShardSpec::single(),
            })
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(read_app_list(&list).unwrap(), apps);

        let failing = CommandBuildEngine::new(&["false".to_owned()], dir.path(), &list).unwrap();
        let outcome = failing
            .build(&BuildRequest {
                apps: &apps,
                shard: ShardSpec::single(),
            })
            .unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.exit_code, Some(1));
    }
}
