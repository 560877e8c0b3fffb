//! In-memory lineage fixtures shared by the planner and report-builder
//! tests.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::{
  Error,
  checksum::attribute_checksum,
  schema::{Attribute, AttributeVersion, Schema, SchemaSummary},
  source::SchemaSource,
};

/// A `SchemaSource` backed by vectors. Attributes are stored pre-ordered,
/// the way the storage layer's lineage query would return them.
pub(crate) struct MemorySource {
  pub schemas:    HashMap<String, Vec<Schema>>,
  pub attributes: HashMap<String, Vec<AttributeVersion>>,
}

impl MemorySource {
  pub fn new() -> Self {
    Self { schemas: HashMap::new(), attributes: HashMap::new() }
  }

  /// Add a published version of `name`.
  pub fn publish(&mut self, name: &str, year: i32, is_inline: bool) -> Schema {
    let mut schema = Schema::draft(name, name);
    schema.publish_date = NaiveDate::from_ymd_opt(year, 1, 1);
    schema.is_inline = is_inline;
    self.schemas.entry(name.to_owned()).or_default().push(schema.clone());
    schema
  }

  /// Attach an attribute version to a schema version, stamping its checksum
  /// the way a flush would.
  pub fn attach(
    &mut self,
    schema: &Schema,
    mut attribute: Attribute,
    object_schema: Option<&str>,
  ) -> AttributeVersion {
    attribute.checksum = Some(attribute_checksum(&attribute));
    let version = AttributeVersion {
      attribute,
      schema: SchemaSummary {
        id: schema.id,
        name: schema.name.clone(),
        publish_date: schema.publish_date,
        is_inline: schema.is_inline,
        parent_attribute_id: schema.parent_attribute_id,
      },
      object_schema: object_schema.map(str::to_owned),
    };
    self
      .attributes
      .entry(schema.name.clone())
      .or_default()
      .push(version.clone());
    version
  }
}

impl SchemaSource for MemorySource {
  type Error = Error;

  fn schema_lineage(&self, name: &str) -> Result<Vec<Schema>, Error> {
    match self.schemas.get(name) {
      Some(versions) => Ok(versions.clone()),
      None => Err(Error::SchemaNotFound(name.to_owned())),
    }
  }

  fn published_attributes(
    &self,
    schema_name: &str,
  ) -> Result<Vec<AttributeVersion>, Error> {
    Ok(self.attributes.get(schema_name).cloned().unwrap_or_default())
  }
}
