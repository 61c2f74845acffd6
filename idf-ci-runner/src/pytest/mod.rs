// SPDX-License-Identifier: Apache-2.0

//! The test case model and the discovery adapter.
//!
//! Test discovery is delegated to an external [`TestCollector`] that yields [`RawTestItem`]s.
//! Each raw item is turned into a [`TestCase`] with one [`PytestApp`] per device, then filtered
//! by marker, keyword, target selector and config.

mod case;
mod collector;

pub use case::*;
pub use collector::*;
