//! Core types and algorithms for the Cohort versioned EAV datastore.
//!
//! This crate is deliberately free of database dependencies. It defines the
//! versioned schema/attribute/entity model, the semantic checksum, the
//! pre-commit dispatch pipeline, and the column-planning and report-building
//! algorithms. Storage backends (e.g. `cohort-store-sqlite`) implement
//! [`source::SchemaSource`] and run the pipeline inside their own
//! transactions.

pub mod audit;
pub mod checksum;
pub mod entity;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod schema;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
