// SPDX-License-Identifier: Apache-2.0

//! Configuration support for idf-ci.
//!
//! Settings come from three places. [`IdfCiConfig`] is the layered TOML config. [`EnvVars`] holds
//! the CI environment variables, read once. Command-line arguments are the third. Values that may
//! come from more than one place are modeled as [`Tristate`]s and resolved in priority order into
//! an immutable [`SelectionOptions`](crate::select::SelectionOptions).

mod env;
mod settings;
mod tristate;

pub use env::*;
pub use settings::*;
pub use tristate::*;
