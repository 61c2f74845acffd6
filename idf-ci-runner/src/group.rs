// SPDX-License-Identifier: Apache-2.0

//! Grouping test cases into CI jobs.

use crate::{
    helpers::plural,
    pytest::{HOST_TEST_MARKER, TestCase},
};
use idf_ci_metadata::TestMatrixEntry;
use indexmap::IndexMap;
use itertools::Itertools;
use owo_colors::{OwoColorize, Style};
use std::{collections::BTreeMap, fmt};
use swrite::{SWrite, swrite, swriteln};

/// The key test cases are grouped by. Cases with equal keys can run on the same runner.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    /// Comma-joined targets, in device order with duplicates kept.
    pub target_selector: String,

    /// Environment markers, sorted and joined with ` and `.
    pub env_selector: String,

    /// Tags a runner must have.
    pub runner_tags: Vec<String>,
}

impl GroupKey {
    /// Computes the key for `case`.
    pub fn for_case(case: &TestCase, is_env_marker: impl Fn(&str) -> bool) -> Self {
        // `markers()` is a sorted set, so this is sorted too.
        let env_markers: Vec<&str> = case.env_markers(&is_env_marker).collect();

        let mut runner_tags = Vec::new();
        if case.is_host_test() {
            runner_tags.push(HOST_TEST_MARKER.to_owned());
        }
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for target in case.targets() {
            *counts.entry(target).or_default() += 1;
        }
        for (target, count) in counts {
            if count == 1 {
                runner_tags.push(target.to_owned());
            } else {
                runner_tags.push(format!("{target}_{count}"));
            }
        }
        runner_tags.extend(env_markers.iter().map(|marker| (*marker).to_owned()));

        Self {
            target_selector: case.target_selector(),
            env_selector: env_markers.join(" and "),
            runner_tags,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target_selector)?;
        if !self.env_selector.is_empty() {
            write!(f, " - {}", self.env_selector)?;
        }
        Ok(())
    }
}

/// Test cases grouped by [`GroupKey`].
#[derive(Clone, Debug, Default)]
pub struct CiGroups<'a> {
    groups: BTreeMap<GroupKey, Vec<&'a TestCase>>,
}

impl<'a> CiGroups<'a> {
    /// Groups `cases`. Within a group, cases keep their input order.
    pub fn new(
        cases: impl IntoIterator<Item = &'a TestCase>,
        is_env_marker: impl Fn(&str) -> bool,
    ) -> Self {
        let mut groups: BTreeMap<GroupKey, Vec<&'a TestCase>> = BTreeMap::new();
        for case in cases {
            groups
                .entry(GroupKey::for_case(case, &is_env_marker))
                .or_default()
                .push(case);
        }
        Self { groups }
    }

    /// Returns the number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if there are no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterates over the groups in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &[&'a TestCase])> + '_ {
        self.groups.iter().map(|(key, cases)| (key, cases.as_slice()))
    }

    /// Renders a human-readable preview: a header per group followed by its case IDs.
    pub fn render_preview(&self, colorize: bool) -> String {
        let mut styles = Styles::default();
        if colorize {
            styles.colorize();
        }

        let mut out = String::new();
        for (key, cases) in &self.groups {
            swrite!(out, "{}", key.target_selector.style(styles.targets));
            if !key.env_selector.is_empty() {
                swrite!(out, " - {}", key.env_selector.style(styles.env));
            }
            swriteln!(
                out,
                " ({} {}, runner tags: {})",
                cases.len().style(styles.count),
                plural::test_cases_str(cases.len()),
                key.runner_tags.iter().join(", "),
            );
            for case in cases {
                swriteln!(out, "    {}", case.case_id());
            }
        }
        swriteln!(
            out,
            "{} {}",
            self.groups.len().style(styles.count),
            plural::groups_str(self.groups.len()),
        );
        out
    }

    /// Returns the CI job matrix, one entry per group.
    pub fn to_matrix(&self) -> Vec<TestMatrixEntry> {
        self.groups
            .iter()
            .map(|(key, cases)| TestMatrixEntry {
                targets: key.target_selector.clone(),
                env_markers: key.env_selector.clone(),
                runner_tags: key.runner_tags.clone(),
                nodes: cases.iter().map(|case| case.nodeid()).join(" "),
            })
            .collect()
    }
}

/// Groups test cases for CI.
pub fn group_for_ci<'a>(
    cases: &'a [TestCase],
    is_env_marker: impl Fn(&str) -> bool,
) -> CiGroups<'a> {
    CiGroups::new(cases, is_env_marker)
}

#[derive(Clone, Debug, Default)]
struct Styles {
    targets: Style,
    env: Style,
    count: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.targets = Style::new().bold();
        self.env = Style::new().yellow();
        self.count = Style::new().bold();
    }
}
