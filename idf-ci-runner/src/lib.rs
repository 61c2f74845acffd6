// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Core functionality for `idf-ci`: finding ESP-IDF apps, correlating them with pytest cases,
//! and deciding what a CI pipeline builds and tests.
//!
//! The basic flow is:
//!
//! 1. [`find_apps::AppFinder`] enumerates apps over the path × target × config matrix, applying
//!    manifest rules and, given modified files, skipping apps the change does not affect.
//! 2. [`pytest::collect_cases`] asks a [`pytest::TestCollector`] for raw test items and turns
//!    them into [`pytest::TestCase`]s.
//! 3. [`correlate::correlate`] joins the two on `(path, target, config)`.
//! 4. [`select::Selector`] runs the incremental selection policy and splits the apps into
//!    test-related and non-test-related.
//! 5. [`group::CiGroups`] groups test cases into CI jobs.

pub mod app;
pub mod app_list;
pub mod build;
pub mod components;
pub mod config;
pub mod correlate;
pub mod errors;
pub mod find_apps;
pub mod group;
pub mod helpers;
pub mod manifest;
pub mod partition;
pub mod pytest;
pub mod select;
pub mod target;
