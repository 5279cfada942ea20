//! Store adapters
//!
//! Thin async wrappers over the SQLite document tables. Writes go through
//! `retry_on_lock`; referrer rewrites are compare-and-swap on the stored
//! JSON text.

pub mod imports;
pub mod migrations;
pub mod scores;
pub mod sessions;
