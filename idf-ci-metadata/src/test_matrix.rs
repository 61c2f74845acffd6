// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// One CI job in the test matrix.
///
/// Every test case in a job shares the same target selector, environment markers and runner
/// tags, so the job can run on a single runner.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct TestMatrixEntry {
    /// Comma-separated target selector, e.g. `esp32` or `esp32,esp32s3`.
    pub targets: String,

    /// Environment markers joined with ` and `, sorted.
    pub env_markers: String,

    /// Runner tags required to run this job.
    pub runner_tags: Vec<String>,

    /// Space-separated pytest node IDs in this job.
    pub nodes: String,
}

impl TestMatrixEntry {
    /// Iterates over the node IDs in this job.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.split_whitespace()
    }

    /// Parses a matrix from its JSON form.
    pub fn parse_list(json: impl AsRef<str>) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }
}
