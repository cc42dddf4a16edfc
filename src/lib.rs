#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod bucket;
mod evacuate;

/// Errors returned by fallible constructors and inserts.
pub mod error;

/// A HashMap implementation on top of the chained-bucket table.
///
/// This module provides a `HashMap` that wraps the `HashTable` and provides
/// a standard key-value map interface with configurable hashers, randomized
/// iteration and a [`Cursor`] that survives mutation of the map.
pub mod hash_map;

/// The raw table: caller-supplied hashes, 8-slot buckets with overflow
/// chains and incremental growth.
pub mod hash_table;

/// Iterators over maps and tables, including while they grow.
pub mod iter;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used by [`HashMap::new`]: foldhash, with a
        /// random seed per map.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used by [`HashMap::new`]: the standard
        /// library's randomly keyed SipHash.
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// Placeholder for a missing default hasher. Enable the `foldhash` or
        /// `std` feature, or construct maps with
        /// [`HashMap::with_hasher`].
        #[derive(Clone, Copy, Debug)]
        pub enum DefaultHashBuilder {}
    }
}

pub use error::TryReserveError;
pub use hash_map::HashMap;
pub use hash_table::HashTable;
pub use iter::Cursor;
