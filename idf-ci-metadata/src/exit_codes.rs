// SPDX-License-Identifier: Apache-2.0

/// Documented exit codes for `idf-ci` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum IdfCiExitCode {}

impl IdfCiExitCode {
    /// No errors occurred and idf-ci exited normally.
    pub const OK: i32 = 0;

    /// A check command found problems (for example, test cases requiring missing configs).
    pub const CHECK_FAILED: i32 = 1;

    /// The external build engine reported a failure.
    pub const BUILD_FAILED: i32 = 101;

    /// The test discovery collaborator failed (distinct from collecting zero tests).
    pub const DISCOVERY_FAILED: i32 = 104;

    /// Finding apps failed, e.g. because a search path does not exist.
    pub const FIND_APPS_FAILED: i32 = 105;

    /// Reading or writing a persisted app list failed.
    pub const APP_LIST_ERROR: i32 = 106;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up an idf-ci invocation: bad config, bad environment
    /// variables, or conflicting arguments.
    pub const SETUP_ERROR: i32 = 96;

    /// A marker or keyword expression failed to parse.
    pub const INVALID_EXPRESSION: i32 = 94;
}
