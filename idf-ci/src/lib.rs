// SPDX-License-Identifier: Apache-2.0

//! The `idf-ci` command-line tool.
//!
//! `idf-ci` decides which ESP-IDF apps a CI pipeline builds and groups the pytest cases that use
//! them into CI jobs. The logic lives in `idf-ci-runner`; this crate parses arguments, sets up
//! logging, and maps errors to exit codes.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod helpers;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};
