//! # ScopeSync Testkit
//!
//! Test utilities for ScopeSync.
//!
//! This crate provides:
//! - Ready-made sync setups, including a parent/child pair with a foreign key
//! - A [`SyncHub`] joining one server store to many client stores
//! - Transport wrappers for retry and cancellation scenarios
//! - Property-based test generators using proptest
//! - Concurrent session stress runs
//!
//! ## Usage
//!
//! ```rust
//! use scopesync_testkit::prelude::*;
//!
//! let hub = SyncHub::new(item_setup());
//! let client = hub.client();
//! client.store.insert_local("item", item(1, "bolt", 4)).unwrap();
//! client.sync(&hub).unwrap();
//! assert_eq!(hub.store.live_row_count("item"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
