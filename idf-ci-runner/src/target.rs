// SPDX-License-Identifier: Apache-2.0

//! Chip targets and target filters.

use itertools::Itertools;
use std::{convert::Infallible, fmt, str::FromStr};

/// Targets built by default when `all` is requested.
pub const SUPPORTED_TARGETS: &[&str] = &[
    "esp32", "esp32s2", "esp32c3", "esp32s3", "esp32c2", "esp32c6", "esp32h2", "esp32p4",
];

/// Targets that are only built when explicitly enabled by a manifest rule.
pub const PREVIEW_TARGETS: &[&str] = &["esp32c5", "esp32c61", "esp32h21", "esp32h4"];

/// The software-emulated host target.
pub const HOST_TARGET: &str = "linux";

/// The target filter passed on the command line.
///
/// `all` (or an empty string) selects every default build target. Anything else is a
/// comma-separated list. The list keeps its order and duplicates, since `esp32,esp32` names a
/// two-device test rather than a single target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TargetFilter {
    /// Every default build target.
    #[default]
    All,

    /// An explicit comma-separated list.
    List(Vec<String>),
}

impl TargetFilter {
    /// Returns true if this is the `all` filter.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Returns the distinct targets apps should be built for, in order.
    pub fn build_targets(&self, defaults: &[String]) -> Vec<String> {
        match self {
            Self::All => defaults.iter().unique().cloned().collect(),
            Self::List(targets) => targets.iter().unique().cloned().collect(),
        }
    }

    /// Returns the explicit target list, or `None` for `all`.
    pub fn cli_targets(&self) -> Option<&[String]> {
        match self {
            Self::All => None,
            Self::List(targets) => Some(targets),
        }
    }

    /// Returns the comma-joined target selector, or `None` for `all`.
    pub fn selector(&self) -> Option<String> {
        self.cli_targets().map(|targets| targets.join(","))
    }

    /// Returns true if the filter names `target` explicitly.
    pub fn names(&self, target: &str) -> bool {
        self.cli_targets()
            .is_some_and(|targets| targets.iter().any(|t| t == target))
    }
}

impl FromStr for TargetFilter {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "all" {
            return Ok(Self::All);
        }
        let targets: Vec<_> = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        if targets.is_empty() {
            Ok(Self::All)
        } else {
            Ok(Self::List(targets))
        }
    }
}

impl fmt::Display for TargetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::List(targets) => write!(f, "{}", targets.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn defaults() -> Vec<String> {
        vec!["esp32".to_owned(), "esp32s2".to_owned()]
    }

    #[test_case("all", &["esp32", "esp32s2"]; "all")]
    #[test_case("", &["esp32", "esp32s2"]; "empty")]
    #[test_case("esp32c3", &["esp32c3"]; "single")]
    #[test_case("esp32,esp32", &["esp32"]; "duplicates collapse")]
    #[test_case(" linux , esp32 ", &["linux", "esp32"]; "whitespace")]
    fn test_build_targets(input: &str, expected: &[&str]) {
        let filter: TargetFilter = input.parse().unwrap();
        assert_eq!(filter.build_targets(&defaults()), expected);
    }

    #[test]
    fn test_selector_keeps_duplicates() {
        let filter: TargetFilter = "esp32,esp32".parse().unwrap();
        assert_eq!(filter.selector().as_deref(), Some("esp32,esp32"));
        assert_eq!(filter.to_string(), "esp32,esp32");
        assert!(filter.names("esp32"));
        assert!(!filter.names(HOST_TARGET));

        let all: TargetFilter = "all".parse().unwrap();
        assert_eq!(all.selector(), None);
        assert!(!all.names("esp32"));
    }
}
