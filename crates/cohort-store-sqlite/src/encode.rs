//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, calendar dates as ISO
//! `YYYY-MM-DD`, UUIDs as hyphenated lowercase strings, and enum
//! discriminants as their stable string tokens.

use chrono::{DateTime, NaiveDate, Utc};
use cohort_core::{
  entity::{Entity, EntityState},
  metadata::Metadata,
  schema::{Attribute, AttributeType, Choice, Schema},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── Timestamps and dates ────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Typed values ────────────────────────────────────────────────────────────

/// Encode a domain value for its value table's `value` column.
pub fn encode_value(value: &cohort_core::entity::Value) -> rusqlite::types::Value {
  use cohort_core::entity::Value as V;
  use rusqlite::types::Value as Sql;
  match value {
    V::Text(s) | V::Choice(s) => Sql::Text(s.clone()),
    V::Integer(i) => Sql::Integer(*i),
    V::Decimal(f) => Sql::Real(*f),
    V::Boolean(b) => Sql::Integer(i64::from(*b)),
    V::Date(d) => Sql::Text(encode_date(*d)),
    V::DateTime(dt) => Sql::Text(encode_dt(*dt)),
    V::Object(id) => Sql::Text(encode_uuid(*id)),
  }
}

// ─── Discriminants ───────────────────────────────────────────────────────────

pub fn decode_attribute_type(s: &str) -> Result<AttributeType> {
  AttributeType::parse(s)
    .ok_or_else(|| Error::Core(cohort_core::Error::UnknownAttributeType(s.to_owned())))
}

pub fn decode_state(s: &str) -> Result<EntityState> {
  EntityState::parse(s)
    .ok_or_else(|| Error::DateParse(format!("unknown entity state: {s:?}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// The four lifecycle stamp columns, in their fixed order.
pub struct RawMetadata {
  pub create_date: String,
  pub create_user: String,
  pub modify_date: String,
  pub modify_user: String,
}

impl RawMetadata {
  pub fn into_metadata(self) -> Result<Metadata> {
    Ok(Metadata {
      create_date: decode_dt(&self.create_date)?,
      create_user: self.create_user,
      modify_date: decode_dt(&self.modify_date)?,
      modify_user: self.modify_user,
    })
  }
}

/// Raw strings read directly from a `schema` row.
pub struct RawSchema {
  pub id:                  String,
  pub name:                String,
  pub title:               String,
  pub publish_date:        Option<String>,
  pub is_inline:           bool,
  pub parent_attribute_id: Option<String>,
  pub metadata:            RawMetadata,
}

impl RawSchema {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      name: row.get(1)?,
      title: row.get(2)?,
      publish_date: row.get(3)?,
      is_inline: row.get(4)?,
      parent_attribute_id: row.get(5)?,
      metadata: RawMetadata {
        create_date: row.get(6)?,
        create_user: row.get(7)?,
        modify_date: row.get(8)?,
        modify_user: row.get(9)?,
      },
    })
  }

  pub fn into_schema(self) -> Result<Schema> {
    Ok(Schema {
      id: decode_uuid(&self.id)?,
      name: self.name,
      title: self.title,
      publish_date: self.publish_date.as_deref().map(decode_date).transpose()?,
      is_inline: self.is_inline,
      parent_attribute_id: self
        .parent_attribute_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      metadata: self.metadata.into_metadata()?,
    })
  }
}

/// Raw strings read directly from an `attribute` row. Choices are loaded by a
/// follow-up query and attached by the caller.
pub struct RawAttribute {
  pub id:               String,
  pub schema_id:        String,
  pub name:             String,
  pub title:            String,
  pub ty:               String,
  pub order:            i32,
  pub is_collection:    bool,
  pub checksum:         Option<String>,
  pub object_schema_id: Option<String>,
  pub metadata:         RawMetadata,
}

impl RawAttribute {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      schema_id: row.get(1)?,
      name: row.get(2)?,
      title: row.get(3)?,
      ty: row.get(4)?,
      order: row.get(5)?,
      is_collection: row.get(6)?,
      checksum: row.get(7)?,
      object_schema_id: row.get(8)?,
      metadata: RawMetadata {
        create_date: row.get(9)?,
        create_user: row.get(10)?,
        modify_date: row.get(11)?,
        modify_user: row.get(12)?,
      },
    })
  }

  pub fn into_attribute(self, choices: Vec<Choice>) -> Result<Attribute> {
    Ok(Attribute {
      id: decode_uuid(&self.id)?,
      schema_id: decode_uuid(&self.schema_id)?,
      name: self.name,
      title: self.title,
      ty: decode_attribute_type(&self.ty)?,
      order: self.order,
      is_collection: self.is_collection,
      checksum: self.checksum,
      choices,
      object_schema_id: self
        .object_schema_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      metadata: self.metadata.into_metadata()?,
    })
  }
}

/// Raw strings read directly from an `entity` row.
pub struct RawEntity {
  pub id:           String,
  pub schema_id:    String,
  pub name:         String,
  pub collect_date: String,
  pub state:        String,
  pub is_null:      bool,
  pub metadata:     RawMetadata,
}

impl RawEntity {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      schema_id: row.get(1)?,
      name: row.get(2)?,
      collect_date: row.get(3)?,
      state: row.get(4)?,
      is_null: row.get(5)?,
      metadata: RawMetadata {
        create_date: row.get(6)?,
        create_user: row.get(7)?,
        modify_date: row.get(8)?,
        modify_user: row.get(9)?,
      },
    })
  }

  pub fn into_entity(self) -> Result<Entity> {
    Ok(Entity {
      id: decode_uuid(&self.id)?,
      schema_id: decode_uuid(&self.schema_id)?,
      name: self.name,
      collect_date: decode_date(&self.collect_date)?,
      state: decode_state(&self.state)?,
      is_null: self.is_null,
      metadata: self.metadata.into_metadata()?,
    })
  }
}
