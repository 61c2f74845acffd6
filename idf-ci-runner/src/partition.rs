// SPDX-License-Identifier: Apache-2.0

//! Splitting the app list across parallel CI build jobs.
//!
//! The build engine does its own partitioning; the shard is passed through to it unchanged. The
//! contiguous chunking here is used for dry-run previews and mirrors what the engine does.

use crate::errors::InvalidShardError;
use std::fmt;

/// A 1-based shard index out of a total shard count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardSpec {
    index: usize,
    count: usize,
}

impl ShardSpec {
    /// Creates a shard, checking that `1 <= index <= count`.
    pub fn new(index: usize, count: usize) -> Result<Self, InvalidShardError> {
        if !(1..=count).contains(&index) {
            return Err(InvalidShardError { index, count });
        }
        Ok(Self { index, count })
    }

    /// The single shard that covers everything.
    pub fn single() -> Self {
        Self { index: 1, count: 1 }
    }

    /// Returns the 1-based index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the total number of shards.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns this shard's contiguous chunk of `items`.
    ///
    /// Every shard but the last gets `ceil(len / count)` items. Trailing shards may be empty.
    pub fn chunk<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let per_shard = items.len().div_ceil(self.count);
        let start = (per_shard * (self.index - 1)).min(items.len());
        let end = (per_shard * self.index).min(items.len());
        &items[start..end]
    }
}

impl Default for ShardSpec {
    fn default() -> Self {
        Self::single()
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

/// Returns the number of CI build jobs for `total_apps` apps at `apps_per_job` each.
///
/// There is always at least one job, and one extra when `total_apps` is an exact multiple.
pub fn parallel_count(total_apps: usize, apps_per_job: usize) -> usize {
    total_apps / apps_per_job.max(1) + 1
}
