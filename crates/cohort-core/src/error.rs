//! Error types for `cohort-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::entity::EntityState;

#[derive(Debug, Error)]
pub enum Error {
  /// No schema row with this name exists at all.
  #[error("schema not found: {0:?}")]
  SchemaNotFound(String),

  /// The schema exists but has no published version yet.
  #[error("schema {0:?} has no published version")]
  UnpublishedSchema(String),

  /// The type registry has no entry for this attribute type.
  #[error("no registry entry for attribute type {0:?}")]
  UnknownAttributeType(String),

  /// An illegal entity state transition was attempted during a flush.
  #[error(
    "illegal state transition for entity {entity}: {current} -> {attempted} ({reason})"
  )]
  EntityState {
    entity:    Uuid,
    current:   EntityState,
    attempted: EntityState,
    reason:    String,
  },

  /// Nested sub-schema traversal exceeded the recursion cap.
  #[error("column plan exceeded maximum sub-schema depth of {0}")]
  PlanDepthExceeded(usize),

  /// A sub-schema appears on its own embedding path.
  #[error("schema {0:?} embeds itself")]
  SchemaCycle(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
