// SPDX-License-Identifier: Apache-2.0

use super::Tristate;
use crate::{errors::EnvVarsError, target::TargetFilter};
use camino::Utf8PathBuf;
use idf_ci_filtering::FilterExpr;
use std::collections::BTreeMap;
use tracing::info;

/// Which side of the selection a CI build handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BuildOnly {
    /// Build both test-related and non-test-related apps.
    #[default]
    All,

    /// Build only test-related apps.
    TestRelated,

    /// Build only non-test-related apps.
    NonTestRelated,
}

/// Environment variables that steer selection in CI.
///
/// Read once from an explicit map, so tests never touch the process environment.
#[derive(Clone, Debug, Default)]
pub struct EnvVars {
    /// `CHANGED_FILES_SEMICOLON_SEPARATED`. An empty value is [`Tristate::Null`]: no
    /// modified-file narrowing, even if the command line would otherwise fall back to another
    /// source.
    pub changed_files: Tristate<Vec<Utf8PathBuf>>,

    /// `IDF_CI_SELECT_BY_FILTER_EXPR`.
    pub select_by_filter_expr: Option<FilterExpr>,

    /// `IDF_CI_SELECT_ALL_PYTEST_CASES`.
    pub select_all_pytest_cases: bool,

    /// `IDF_CI_SELECT_BY_TARGETS`, a comma-separated target list.
    pub select_by_targets: Tristate<TargetFilter>,

    /// `IDF_CI_BUILD_ONLY_TEST_RELATED_APPS` and `IDF_CI_BUILD_ONLY_NON_TEST_RELATED_APPS`.
    pub build_only: BuildOnly,

    /// True if running in CI, detected via `CI`, `CI_JOB_ID` or `GITHUB_ACTIONS`.
    pub in_ci: bool,
}

impl EnvVars {
    /// Reads the current process environment.
    pub fn from_env() -> Result<Self, EnvVarsError> {
        Self::from_map(&std::env::vars().collect())
    }

    /// Reads the variables from `vars`.
    pub fn from_map(vars: &BTreeMap<String, String>) -> Result<Self, EnvVarsError> {
        let get = |name: &str| vars.get(name).map(String::as_str);

        let changed_files = Tristate::from_env_value(get("CHANGED_FILES_SEMICOLON_SEPARATED"))
            .map(|value| {
                value
                    .split(';')
                    .map(str::trim)
                    .filter(|file| !file.is_empty())
                    .map(Utf8PathBuf::from)
                    .collect::<Vec<_>>()
            });

        let select_by_filter_expr = match get("IDF_CI_SELECT_BY_FILTER_EXPR")
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
        {
            Some(expr) => {
                info!("selecting test cases with filter expression `{expr}`");
                Some(FilterExpr::parse(expr.to_owned()).map_err(|error| {
                    EnvVarsError::InvalidFilterExpr {
                        name: "IDF_CI_SELECT_BY_FILTER_EXPR",
                        error,
                    }
                })?)
            }
            None => None,
        };

        let select_all_pytest_cases = parse_bool(vars, "IDF_CI_SELECT_ALL_PYTEST_CASES")?;
        if select_all_pytest_cases {
            info!("selecting all test cases since `IDF_CI_SELECT_ALL_PYTEST_CASES` is set");
        }

        let select_by_targets =
            Tristate::from_env_value(get("IDF_CI_SELECT_BY_TARGETS")).map(|value| {
                let Ok(filter) = value.parse::<TargetFilter>();
                info!("only building and testing targets: {filter}");
                filter
            });

        let build_only = match (
            parse_bool(vars, "IDF_CI_BUILD_ONLY_TEST_RELATED_APPS")?,
            parse_bool(vars, "IDF_CI_BUILD_ONLY_NON_TEST_RELATED_APPS")?,
        ) {
            (true, true) => return Err(EnvVarsError::ConflictingBuildOnly),
            (true, false) => BuildOnly::TestRelated,
            (false, true) => BuildOnly::NonTestRelated,
            (false, false) => BuildOnly::All,
        };

        let in_ci = parse_bool(vars, "CI")? || ["CI_JOB_ID", "GITHUB_ACTIONS"]
            .iter()
            .any(|name| get(name).is_some_and(|value| !value.is_empty()));

        Ok(Self {
            changed_files,
            select_by_filter_expr,
            select_all_pytest_cases,
            select_by_targets,
            build_only,
            in_ci,
        })
    }
}

fn parse_bool(vars: &BTreeMap<String, String>, name: &'static str) -> Result<bool, EnvVarsError> {
    let Some(value) = vars.get(name) else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        _ => Err(EnvVarsError::InvalidBool {
            name,
            value: value.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_empty_environment() {
        let env = EnvVars::from_map(&BTreeMap::new()).unwrap();
        assert_eq!(env.changed_files, Tristate::Unset);
        assert!(env.select_by_filter_expr.is_none());
        assert!(!env.select_all_pytest_cases);
        assert_eq!(env.select_by_targets, Tristate::Unset);
        assert_eq!(env.build_only, BuildOnly::All);
        assert!(!env.in_ci);
    }

    #[test]
    fn test_changed_files() {
        let env = EnvVars::from_map(&btreemap! {
            "CHANGED_FILES_SEMICOLON_SEPARATED".to_owned() =>
                "components/a/a.c; examples/b/main.c;".to_owned(),
        })
        .unwrap();
        assert_eq!(
            env.changed_files,
            Tristate::Value(vec![
                Utf8PathBuf::from("components/a/a.c"),
                Utf8PathBuf::from("examples/b/main.c"),
            ]),
        );

        let env = EnvVars::from_map(&vars(&[("CHANGED_FILES_SEMICOLON_SEPARATED", "")])).unwrap();
        assert_eq!(env.changed_files, Tristate::Null);
    }

    #[test]
    fn test_selection_vars() {
        let env = EnvVars::from_map(&vars(&[
            ("IDF_CI_SELECT_BY_FILTER_EXPR", "test_hello or test_world"),
            ("IDF_CI_SELECT_ALL_PYTEST_CASES", "1"),
            ("IDF_CI_SELECT_BY_TARGETS", "esp32,esp32s3"),
            ("IDF_CI_BUILD_ONLY_NON_TEST_RELATED_APPS", "true"),
            ("CI_JOB_ID", "1234"),
        ]))
        .unwrap();
        assert_eq!(
            env.select_by_filter_expr.map(|expr| expr.as_str().to_owned()),
            Some("test_hello or test_world".to_owned()),
        );
        assert!(env.select_all_pytest_cases);
        assert_eq!(
            env.select_by_targets,
            Tristate::Value("esp32,esp32s3".parse::<TargetFilter>().unwrap()),
        );
        assert_eq!(env.build_only, BuildOnly::NonTestRelated);
        assert!(env.in_ci);
    }

    #[test]
    fn test_errors() {
        let error = EnvVars::from_map(&vars(&[
            ("IDF_CI_BUILD_ONLY_TEST_RELATED_APPS", "1"),
            ("IDF_CI_BUILD_ONLY_NON_TEST_RELATED_APPS", "1"),
        ]))
        .unwrap_err();
        assert!(matches!(error, EnvVarsError::ConflictingBuildOnly));

        let error = EnvVars::from_map(&vars(&[("CI", "maybe")])).unwrap_err();
        assert!(matches!(error, EnvVarsError::InvalidBool { name: "CI", .. }));

        let error =
            EnvVars::from_map(&vars(&[("IDF_CI_SELECT_BY_FILTER_EXPR", "a and (b")])).unwrap_err();
        assert!(matches!(error, EnvVarsError::InvalidFilterExpr { .. }));
    }
}
