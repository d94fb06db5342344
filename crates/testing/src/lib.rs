//! Runs the quill interpreter end to end without a database.
//!
//! [`MemoryStore`] keeps the catalog and table data in memory and evaluates the SQL the
//! interpreter generates straight from its syntax tree. [`Harness`] wraps a store and
//! an interpreter and gives every call its own transaction.

pub mod harness;
mod sql;
pub mod store;

pub use harness::{Harness, OWNER, Outcome};
pub use store::{Image, MemoryStore, MemoryTx};

/// Sends `log` output to the test writer. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
