// SPDX-License-Identifier: MIT

//! The static index substrate behind the selva archive.
//!
//! Three layers, leaves first:
//!
//! - [emsort]: an external-memory sorter that spills fixed-width
//!   records to a scratch file and k-way merges them into a sink.
//! - [fastmap]: a bucketed, page-structured map from fixed-length keys
//!   to fixed-length values, built from sorted input and read with
//!   zero allocation.
//! - [multimap]: a map from a key to a *list* of values on top of
//!   fastmap, with a small-list inliner so the common single-entry
//!   case never leaves the value slot.

pub mod emsort;
pub mod error;
pub mod fastmap;
pub mod multimap;

pub use emsort::ExternalSorter;
pub use emsort::SortedSink;
pub use error::IndexError;
pub use fastmap::PrefixMap;
pub use fastmap::PrefixMapWriter;
pub use multimap::MultiMap;
pub use multimap::MultiMapWriter;
