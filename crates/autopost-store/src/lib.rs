//! # Autopost Store
//!
//! SQLite-backed persistence for tasks — survives restarts, single-writer
//! discipline via a mutex around the connection. Every mutating operation is
//! one SQL statement, so counter and flag transitions are atomic with respect
//! to concurrent workers.

mod store;

pub use store::TaskStore;
