//! SQLite backend for the Cohort versioned EAV datastore.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! pool without blocking the async runtime. Mutations flow through a
//! transactional [`Session`] whose pending set is driven through the core
//! dispatch pipeline before commit.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{ReportRow, Session, SqliteStore};

#[cfg(test)]
mod tests;
