// SPDX-License-Identifier: Apache-2.0

mod collect;
mod fixtures;
mod select;
