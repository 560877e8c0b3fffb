//! Column planning — flattening a schema's version history into an ordered
//! set of report columns.
//!
//! A column plan maps a column *path* to the attribute versions whose values
//! feed that column. How aggressively history is merged is the *granularity*:
//! grouping by name pools every version of a field into one column; grouping
//! by checksum only pools semantically identical versions; grouping by id
//! keeps every version separate.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
  Error,
  schema::{Attribute, AttributeType, AttributeVersion, Choice},
  source::SchemaSource,
};

/// Sub-schema nesting beyond this depth fails the plan instead of recursing
/// further.
pub const MAX_SUBSCHEMA_DEPTH: usize = 8;

// ─── Granularity ─────────────────────────────────────────────────────────────

/// How attribute versions are merged into columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
  /// Group solely by attribute name; semantic drift across versions is
  /// ignored.
  ByName,
  /// Group by (name, checksum): a column only merges versions with an
  /// identical semantic definition.
  ByChecksum,
  /// Group by (name, id): every attribute version is its own column.
  ById,
}

impl Granularity {
  /// The path segments contributed by the grouping key.
  fn key_segments(self, attribute: &Attribute) -> Vec<String> {
    match self {
      Self::ByName => vec![attribute.name.clone()],
      Self::ByChecksum => {
        // Lineage queries return stamped attributes; recomputing covers
        // fixtures built outside a flush.
        let checksum = attribute
          .checksum
          .clone()
          .unwrap_or_else(|| crate::checksum::attribute_checksum(attribute));
        vec![attribute.name.clone(), checksum]
      }
      Self::ById => {
        vec![attribute.name.clone(), attribute.id.simple().to_string()]
      }
    }
  }
}

// ─── Plan types ──────────────────────────────────────────────────────────────

/// One report column: a path, the attribute versions feeding it, and — for
/// expanded choice columns — the specific choice the column flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanColumn {
  pub path:       Vec<String>,
  pub attributes: Vec<AttributeVersion>,
  pub choice:     Option<Choice>,
}

impl PlanColumn {
  /// The flattened column label: path segments joined by underscores.
  pub fn name(&self) -> String { self.path.join("_") }

  /// The governing value type — the most recent contributing version's.
  pub fn value_type(&self) -> Option<AttributeType> {
    self.attributes.last().map(|v| v.attribute.ty)
  }

  /// True if any contributing version permits multiple values per entity.
  pub fn is_collection(&self) -> bool {
    self.attributes.iter().any(|v| v.attribute.is_collection)
  }

  /// True if any contributing version lives in an inline sub-schema.
  pub fn is_object(&self) -> bool {
    self.attributes.iter().any(|v| v.schema.is_inline)
  }

  /// The union vocabulary across every contributing version, in encounter
  /// order.
  pub fn vocabulary(&self) -> Vec<&Choice> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for version in &self.attributes {
      for choice in &version.attribute.choices {
        if seen.insert(choice.value.as_str()) {
          out.push(choice);
        }
      }
    }
    out
  }
}

/// An ordered column plan for one schema lineage. Iteration order is
/// first-seen insertion order, which follows the lineage ordering of the
/// underlying attribute query.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
  schema_name: String,
  columns:     Vec<PlanColumn>,
  index:       HashMap<Vec<String>, usize>,
}

impl ColumnPlan {
  fn new(schema_name: &str) -> Self {
    Self {
      schema_name: schema_name.to_owned(),
      columns:     Vec::new(),
      index:       HashMap::new(),
    }
  }

  pub fn schema_name(&self) -> &str { &self.schema_name }

  pub fn len(&self) -> usize { self.columns.len() }

  pub fn is_empty(&self) -> bool { self.columns.is_empty() }

  pub fn columns(&self) -> impl Iterator<Item = &PlanColumn> {
    self.columns.iter()
  }

  pub fn get(&self, path: &[String]) -> Option<&PlanColumn> {
    self.index.get(path).map(|&i| &self.columns[i])
  }

  fn append(
    &mut self,
    path: Vec<String>,
    version: AttributeVersion,
    choice: Option<Choice>,
  ) {
    match self.index.get(&path) {
      Some(&i) => self.columns[i].attributes.push(version),
      None => {
        self.index.insert(path.clone(), self.columns.len());
        self.columns.push(PlanColumn { path, attributes: vec![version], choice });
      }
    }
  }
}

// ─── Plan construction ───────────────────────────────────────────────────────

/// Build a column plan over the named schema's full published lineage.
///
/// Object-typed attributes recurse into the embedded sub-schema's lineage,
/// prefixing sub-paths with the parent attribute's name. Recursion is bounded:
/// a schema appearing on its own embedding path fails with
/// [`Error::SchemaCycle`], and nesting past [`MAX_SUBSCHEMA_DEPTH`] fails with
/// [`Error::PlanDepthExceeded`].
///
/// Fails with [`Error::UnpublishedSchema`] when the schema has no published
/// version.
pub fn build_plan<S: SchemaSource>(
  source: &S,
  schema_name: &str,
  granularity: Granularity,
  expand_choices: bool,
) -> Result<ColumnPlan, S::Error> {
  let lineage = source.schema_lineage(schema_name)?;
  if lineage.is_empty() {
    return Err(Error::UnpublishedSchema(schema_name.to_owned()).into());
  }

  let mut plan = ColumnPlan::new(schema_name);
  let mut stack = vec![schema_name.to_owned()];
  inspect(source, schema_name, &[], granularity, expand_choices, &mut plan, &mut stack)?;
  Ok(plan)
}

/// `schemaToReport` convenience: plan grouped by attribute id.
pub fn plan_by_id<S: SchemaSource>(
  source: &S,
  schema_name: &str,
  expand_choices: bool,
) -> Result<ColumnPlan, S::Error> {
  build_plan(source, schema_name, Granularity::ById, expand_choices)
}

/// Convenience: plan grouped by attribute name.
pub fn plan_by_name<S: SchemaSource>(
  source: &S,
  schema_name: &str,
  expand_choices: bool,
) -> Result<ColumnPlan, S::Error> {
  build_plan(source, schema_name, Granularity::ByName, expand_choices)
}

/// Convenience: plan grouped by attribute checksum.
pub fn plan_by_checksum<S: SchemaSource>(
  source: &S,
  schema_name: &str,
  expand_choices: bool,
) -> Result<ColumnPlan, S::Error> {
  build_plan(source, schema_name, Granularity::ByChecksum, expand_choices)
}

fn inspect<S: SchemaSource>(
  source: &S,
  current: &str,
  prefix: &[String],
  granularity: Granularity,
  expand_choices: bool,
  plan: &mut ColumnPlan,
  stack: &mut Vec<String>,
) -> Result<(), S::Error> {
  if stack.len() > MAX_SUBSCHEMA_DEPTH {
    return Err(Error::PlanDepthExceeded(MAX_SUBSCHEMA_DEPTH).into());
  }

  // Recurse once per object attribute name, not once per version: every
  // version pools into the same sub-schema lineage anyway.
  let mut recursed: HashSet<(String, String)> = HashSet::new();

  for version in source.published_attributes(current)? {
    if version.attribute.ty == AttributeType::Object {
      let Some(sub_name) = version.object_schema.clone() else {
        continue;
      };
      if stack.contains(&sub_name) {
        return Err(Error::SchemaCycle(sub_name).into());
      }
      if !recursed.insert((version.attribute.name.clone(), sub_name.clone())) {
        continue;
      }

      let mut sub_prefix = prefix.to_vec();
      sub_prefix.push(version.attribute.name.clone());
      stack.push(sub_name.clone());
      inspect(source, &sub_name, &sub_prefix, granularity, expand_choices, plan, stack)?;
      stack.pop();
    } else {
      let group = granularity.key_segments(&version.attribute);

      if expand_choices && !version.attribute.choices.is_empty() {
        for choice in version.attribute.choices.clone() {
          let mut path = prefix.to_vec();
          path.extend(group.iter().cloned());
          path.push(choice.value.clone());
          plan.append(path, version.clone(), Some(choice));
        }
      } else {
        let mut path = prefix.to_vec();
        path.extend(group);
        plan.append(path, version, None);
      }
    }
  }

  Ok(())
}
