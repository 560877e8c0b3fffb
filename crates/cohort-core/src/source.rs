//! The `SchemaSource` trait — lineage queries over published schemas.
//!
//! Implemented by storage backends (e.g. `cohort-store-sqlite`). The planner
//! and report builder depend on this abstraction, not on any concrete
//! backend.

use crate::schema::{AttributeVersion, Schema};

/// Read access to a schema's version history.
pub trait SchemaSource {
  type Error: std::error::Error + From<crate::Error>;

  /// All *published* versions of the named schema, oldest to newest by
  /// publish date.
  ///
  /// Fails with [`crate::Error::SchemaNotFound`] when no schema row with the
  /// name exists at all; returns an empty vec (not an error) when versions
  /// exist but none is published.
  fn schema_lineage(&self, name: &str) -> Result<Vec<Schema>, Self::Error>;

  /// Every attribute of every published version of the named schema
  /// (sub-schema attributes are not included; callers recurse explicitly).
  ///
  /// Ordering contract: attribute lineages appear in the position their name
  /// holds in its most recent hosting version, and within one lineage the
  /// versions run oldest to newest. A flattened report therefore keeps the
  /// current form layout while pooling historical values per column.
  fn published_attributes(
    &self,
    schema_name: &str,
  ) -> Result<Vec<AttributeVersion>, Self::Error>;
}
