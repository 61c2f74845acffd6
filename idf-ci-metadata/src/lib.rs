// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Structured access to the machine-readable output produced by `idf-ci`.
//!
//! The correlation report written by `idf-ci build collect --format json` deserializes into
//! [`CollectReport`], and the CI job matrix written by `idf-ci test plan --format json`
//! deserializes into a list of [`TestMatrixEntry`] records.

mod collect;
mod exit_codes;
mod test_matrix;

pub use collect::*;
pub use exit_codes::*;
pub use test_matrix::*;
