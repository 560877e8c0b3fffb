//! Error type for `cohort-store-sqlite`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] cohort_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// The schema row is published; its definition can no longer change.
  #[error("schema {0:?} is published and frozen")]
  SchemaFrozen(String),

  /// `publish_schema` on a schema that already has a publish date.
  #[error("schema {0:?} is already published")]
  AlreadyPublished(String),

  /// A referenced schema row does not exist.
  #[error("schema row not found: {0}")]
  SchemaMissing(Uuid),

  #[error("attribute not found: {0}")]
  AttributeNotFound(Uuid),

  #[error("entity not found: {0}")]
  EntityNotFound(Uuid),

  /// A value's variant does not match its attribute's declared type.
  #[error("attribute {attribute:?} stores {expected} values, got {got}")]
  TypeMismatch {
    attribute: String,
    expected:  String,
    got:       String,
  },

  /// Multiple values supplied for a non-collection attribute.
  #[error("attribute {0:?} is not a collection")]
  NotCollection(String),

  /// A choice value outside the attribute's vocabulary.
  #[error("attribute {attribute:?} has no choice {value:?}")]
  UnknownChoice { attribute: String, value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
