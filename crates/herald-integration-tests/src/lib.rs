//! Integration test crate for Herald.
//!
//! This crate has no library code. It only contains integration tests
//! that exercise end-to-end delivery flows across the workspace crates:
//! ingestion, routing, reconnect synchronization and paging over a real
//! SQLite store and the in-memory presence directory.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p herald-integration-tests
//! ```
