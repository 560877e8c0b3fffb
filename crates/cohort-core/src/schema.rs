//! Schema and attribute definitions — the versioned half of the EAV model.
//!
//! A schema is a named form definition. Editing a published schema is
//! forbidden; a revision is a brand-new `Schema` row sharing the same `name`
//! with a later `publish_date`. The ordered set of rows sharing a name is the
//! schema's *lineage*, and the attribute versions sharing a name across that
//! lineage form the attribute's lineage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{Metadata, Tracked};

// ─── Schema ──────────────────────────────────────────────────────────────────

/// One version of a named form definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
  pub id:    Uuid,
  /// Stable identifier across versions; the lineage key.
  pub name:  String,
  /// Human-readable form label.
  pub title: String,
  /// `None` while in draft. Set exactly once at publication; a published
  /// schema row is frozen.
  pub publish_date: Option<NaiveDate>,
  /// True if this schema only ever appears embedded as a sub-object of
  /// another schema.
  pub is_inline: bool,
  /// For inline sub-schemas, the object-typed attribute in the parent
  /// version that embeds this one.
  pub parent_attribute_id: Option<Uuid>,
  pub metadata: Metadata,
}

impl Schema {
  /// A fresh draft version.
  pub fn draft(name: impl Into<String>, title: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4(),
      name: name.into(),
      title: title.into(),
      publish_date: None,
      is_inline: false,
      parent_attribute_id: None,
      metadata: Metadata::unset(),
    }
  }

  pub fn is_published(&self) -> bool { self.publish_date.is_some() }
}

impl Tracked for Schema {
  fn metadata(&self) -> &Metadata { &self.metadata }

  fn metadata_mut(&mut self) -> &mut Metadata { &mut self.metadata }
}

// ─── Attribute type ──────────────────────────────────────────────────────────

/// The closed set of attribute value types. The string token doubles as the
/// discriminant stored in the `type` column and as the key fed to the
/// checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
  Text,
  Integer,
  Decimal,
  Boolean,
  Date,
  DateTime,
  Choice,
  Object,
}

impl AttributeType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Text => "text",
      Self::Integer => "integer",
      Self::Decimal => "decimal",
      Self::Boolean => "boolean",
      Self::Date => "date",
      Self::DateTime => "datetime",
      Self::Choice => "choice",
      Self::Object => "object",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "text" => Some(Self::Text),
      "integer" => Some(Self::Integer),
      "decimal" => Some(Self::Decimal),
      "boolean" => Some(Self::Boolean),
      "date" => Some(Self::Date),
      "datetime" => Some(Self::DateTime),
      "choice" => Some(Self::Choice),
      "object" => Some(Self::Object),
      _ => None,
    }
  }
}

impl std::fmt::Display for AttributeType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Choice ──────────────────────────────────────────────────────────────────

/// A fixed value/label pair owned by a choice-typed attribute. Used both for
/// input validation and for flag-column expansion in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
  /// The stored value.
  pub value: String,
  /// The display label.
  pub title: String,
  /// Position within the attribute's choice list.
  pub order: i32,
}

impl Choice {
  pub fn new(order: i32, value: impl Into<String>, title: impl Into<String>) -> Self {
    Self { value: value.into(), title: title.into(), order }
  }
}

// ─── Attribute ───────────────────────────────────────────────────────────────

/// One version of a field definition, belonging to exactly one schema
/// version. `name` is unique within the version and stable across the
/// lineage; `checksum` is derived by the flush pipeline and never recomputed
/// once the owning schema publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
  pub id:        Uuid,
  pub schema_id: Uuid,
  pub name:      String,
  pub title:     String,
  pub ty:        AttributeType,
  /// Position within the owning schema version.
  pub order: i32,
  /// Multiple value rows permitted per entity.
  pub is_collection: bool,
  /// Semantic fingerprint; assigned by the flush pipeline (see
  /// [`crate::checksum`]).
  pub checksum: Option<String>,
  /// Ordered choice list; meaningful only for [`AttributeType::Choice`].
  pub choices: Vec<Choice>,
  /// The embedded sub-schema version; meaningful only for
  /// [`AttributeType::Object`].
  pub object_schema_id: Option<Uuid>,
  pub metadata: Metadata,
}

impl Attribute {
  pub fn new(
    schema_id: Uuid,
    name: impl Into<String>,
    title: impl Into<String>,
    ty: AttributeType,
    order: i32,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      schema_id,
      name: name.into(),
      title: title.into(),
      ty,
      order,
      is_collection: false,
      checksum: None,
      choices: Vec::new(),
      object_schema_id: None,
      metadata: Metadata::unset(),
    }
  }
}

impl Tracked for Attribute {
  fn metadata(&self) -> &Metadata { &self.metadata }

  fn metadata_mut(&mut self) -> &mut Metadata { &mut self.metadata }
}

// ─── Lineage views ───────────────────────────────────────────────────────────

/// The owning-schema fields a lineage consumer needs, denormalised onto each
/// attribute version so the planner and report builder never re-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSummary {
  pub id:           Uuid,
  pub name:         String,
  pub publish_date: Option<NaiveDate>,
  pub is_inline:    bool,
  pub parent_attribute_id: Option<Uuid>,
}

/// An attribute version joined with its owning schema summary, as returned by
/// lineage queries ([`crate::source::SchemaSource::published_attributes`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeVersion {
  pub attribute: Attribute,
  pub schema:    SchemaSummary,
  /// Name of the embedded sub-schema, resolved for object-typed attributes.
  pub object_schema: Option<String>,
}
