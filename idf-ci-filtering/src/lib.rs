// SPDX-License-Identifier: Apache-2.0

//! Expression languages used by idf-ci.
//!
//! * [`FilterExpr`] is the pytest-style boolean syntax (`not`, `and`, `or`, parentheses) used
//!   for marker (`-m`) and keyword (`-k`) filters.
//! * [`ManifestCondition`] is the `if` clause syntax used in build-test rule manifests, e.g.
//!   `IDF_TARGET not in ["esp32", "esp32s2"] and CONFIG_NAME == "psram"`.
//!
//! Parse errors are reported as [`miette`] diagnostics pointing at the offending input.

mod condition;
pub mod errors;
mod expression;
mod parsing;

pub use condition::{CompareOp, ConditionNode, ManifestCondition, Operand, Value};
pub use expression::{FilterExpr, MarkerNode};
