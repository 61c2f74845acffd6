// SPDX-License-Identifier: Apache-2.0

//! Errors produced by idf-ci.

use camino::Utf8PathBuf;
use config::ConfigError;
use idf_ci_filtering::errors::ExpressionParseErrors;
use std::process::ExitStatus;
use thiserror::Error;

/// An error that occurred while parsing the idf-ci config.
#[derive(Debug, Error)]
#[error("failed to parse idf-ci config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the layered config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// A search path passed in does not exist.
#[derive(Clone, Debug, Error)]
#[error("path `{path}` does not exist")]
pub struct PathNotFoundError {
    /// The path that was not found.
    pub path: Utf8PathBuf,
}

/// An error that occurred while loading a build-test rule manifest.
#[derive(Debug, Error)]
#[error("failed to load manifest `{path}`")]
#[non_exhaustive]
pub struct ManifestLoadError {
    /// The path to the manifest.
    pub path: Utf8PathBuf,

    /// The underlying error.
    #[source]
    pub kind: ManifestLoadErrorKind,
}

/// The kind of error that occurred while loading a manifest.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestLoadErrorKind {
    /// The manifest could not be read.
    #[error("error reading file")]
    Read(#[source] std::io::Error),

    /// The manifest is not valid TOML.
    #[error(transparent)]
    TomlParse(Box<toml::de::Error>),

    /// The manifest has an unexpected shape.
    #[error(transparent)]
    Deserialize(Box<serde_path_to_error::Error<toml::de::Error>>),

    /// A `depends_filepatterns` entry is not a valid glob.
    #[error("invalid glob `{pattern}` in folder rule `{folder}`")]
    InvalidGlob {
        /// The folder rule the glob belongs to.
        folder: String,

        /// The pattern.
        pattern: String,

        /// The underlying error.
        #[source]
        error: globset::Error,
    },
}

/// An error that occurred while enumerating apps.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FindAppsError {
    /// A search path does not exist.
    #[error(transparent)]
    PathNotFound(#[from] PathNotFoundError),

    /// A directory could not be read.
    #[error("error reading directory `{path}`")]
    ReadDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A file inside an app could not be read.
    #[error("error reading `{path}`")]
    ReadFile {
        /// The file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A non-UTF-8 path was encountered.
    #[error("path is not valid UTF-8")]
    NonUtf8Path(#[from] camino::FromPathBufError),

    /// A manifest could not be loaded.
    #[error(transparent)]
    Manifest(#[from] ManifestLoadError),
}

/// The external test discovery step failed.
///
/// This is distinct from discovery succeeding with zero collected tests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The collector process could not be started.
    #[error("failed to spawn test collector `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The collector process exited unsuccessfully.
    #[error("test collection failed at {paths} ({status})")]
    Failed {
        /// The paths that were being collected.
        paths: String,

        /// The exit status.
        status: ExitStatus,

        /// Captured standard output.
        stdout: String,

        /// Captured standard error.
        stderr: String,
    },

    /// The collector printed a line that isn't a valid test item.
    #[error("test collector produced invalid output on line {line_number}: `{line}`")]
    InvalidOutput {
        /// The 1-based line number.
        line_number: usize,

        /// The line.
        line: String,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

impl DiscoveryError {
    /// Returns the captured standard output and standard error, if any.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::Failed { stdout, stderr, .. } => Some((stdout, stderr)),
            Self::Spawn { .. } | Self::InvalidOutput { .. } => None,
        }
    }
}

/// An error that occurred while collecting test cases.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollectCasesError {
    /// A search path does not exist.
    #[error(transparent)]
    PathNotFound(#[from] PathNotFoundError),

    /// Test discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// An error that occurred while selecting apps.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SelectError {
    /// App enumeration failed.
    #[error("error finding apps")]
    FindApps(#[from] FindAppsError),

    /// Test case collection failed.
    #[error("error collecting test cases")]
    CollectCases(#[from] CollectCasesError),

    /// A persisted app list could not be read.
    #[error(transparent)]
    AppList(#[from] AppListReadError),
}

impl SelectError {
    /// Returns the discovery error in the chain, if any.
    pub fn discovery_error(&self) -> Option<&DiscoveryError> {
        match self {
            Self::CollectCases(CollectCasesError::Discovery(error)) => Some(error),
            _ => None,
        }
    }
}

/// An error that occurred while reading a persisted app list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppListReadError {
    /// The file could not be read.
    #[error("error reading app list `{path}`")]
    Read {
        /// The file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A line could not be parsed.
    #[error("error parsing line {line_number} of app list `{path}`")]
    Parse {
        /// The file.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line_number: usize,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred while writing a persisted app list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppListWriteError {
    /// An app could not be serialized.
    #[error("error serializing app list `{path}`")]
    Serialize {
        /// The file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The file could not be written.
    #[error("error writing app list `{path}`")]
    Write {
        /// The file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error that occurred while reading idf-ci environment variables.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvVarsError {
    /// Both build-only switches were set.
    #[error(
        "cannot set both `IDF_CI_BUILD_ONLY_TEST_RELATED_APPS` and \
         `IDF_CI_BUILD_ONLY_NON_TEST_RELATED_APPS`"
    )]
    ConflictingBuildOnly,

    /// A boolean variable had an unrecognized value.
    #[error("environment variable `{name}` has invalid boolean value `{value}`")]
    InvalidBool {
        /// The variable name.
        name: &'static str,

        /// The value.
        value: String,
    },

    /// A filter expression variable could not be parsed.
    #[error("environment variable `{name}` is not a valid filter expression")]
    InvalidFilterExpr {
        /// The variable name.
        name: &'static str,

        /// The underlying error.
        #[source]
        error: ExpressionParseErrors,
    },
}

/// A [`ShardSpec`](crate::partition::ShardSpec) index outside `1..=count`.
#[derive(Clone, Debug, Error)]
#[error("parallel index {index} must be between 1 and parallel count {count}, inclusive")]
pub struct InvalidShardError {
    /// The requested 1-based index.
    pub index: usize,

    /// The requested shard count.
    pub count: usize,
}

/// An error that occurred while invoking the external build engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildEngineError {
    /// The app list handed to the build engine could not be written.
    #[error(transparent)]
    WriteAppList(#[from] AppListWriteError),

    /// The build engine could not be started.
    #[error("failed to spawn build engine `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// A component mapping regex is invalid.
#[derive(Debug, Error)]
#[error("invalid component mapping regex `{regex}`")]
pub struct ComponentRegexError {
    /// The regex source.
    pub regex: String,

    /// The underlying error.
    #[source]
    pub error: regex::Error,
}
