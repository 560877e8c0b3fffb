//! Report building — rendering a column plan as a single queryable relation.
//!
//! The builder emits plain SQL text against the physical EAV layout (an
//! `entity` table plus one value table per scalar type), so the result can be
//! executed or composed by any backend that shares that layout. Backend
//! differences (array aggregation, common-table-expression support, date
//! casting) are captured once in a [`SqlDialect`] and resolved to typed
//! strategies, not scattered conditionals.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  plan::{ColumnPlan, PlanColumn},
  schema::AttributeType,
};

// ─── Dialect ─────────────────────────────────────────────────────────────────

/// Capability flags for the backend the report will run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlDialect {
  pub name: &'static str,
  pub supports_cte:  bool,
  pub native_arrays: bool,
  /// Whether `CAST(... AS DATE/TIMESTAMP)` behaves; SQLite needs its
  /// `date()`/`datetime()` functions instead.
  pub temporal_casts: bool,
}

impl SqlDialect {
  pub fn sqlite() -> Self {
    Self {
      name: "sqlite",
      supports_cte: false,
      native_arrays: false,
      temporal_casts: false,
    }
  }

  pub fn postgres() -> Self {
    Self {
      name: "postgresql",
      supports_cte: true,
      native_arrays: true,
      temporal_casts: true,
    }
  }

  /// How collection columns aggregate. Both strategies are correct; the
  /// fallback is a deliberate choice, not a failure.
  pub fn aggregate_strategy(&self) -> AggregateStrategy {
    if self.native_arrays {
      AggregateStrategy::NativeArray
    } else {
      AggregateStrategy::DelimitedString
    }
  }

  /// How the finished report is rendered for composition.
  pub fn relation_style(&self) -> RelationStyle {
    if self.supports_cte {
      RelationStyle::CommonTableExpression
    } else {
      RelationStyle::Subquery
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStrategy {
  NativeArray,
  DelimitedString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationStyle {
  CommonTableExpression,
  Subquery,
}

// ─── Type registry ───────────────────────────────────────────────────────────

/// One registry entry: the physical value table and the SQL cast target for
/// an attribute type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
  pub table: String,
  pub cast:  String,
}

impl TypeEntry {
  pub fn new(table: impl Into<String>, cast: impl Into<String>) -> Self {
    Self { table: table.into(), cast: cast.into() }
  }
}

/// The closed type→table / type→cast mapping. Built once at startup and
/// passed by reference; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRegistry {
  entries: HashMap<AttributeType, TypeEntry>,
}

impl TypeRegistry {
  pub fn new(
    entries: impl IntoIterator<Item = (AttributeType, TypeEntry)>,
  ) -> Self {
    Self { entries: entries.into_iter().collect() }
  }

  /// The standard layout: one `value_*` table per type.
  pub fn standard() -> Self {
    use AttributeType::*;
    Self::new([
      (Text, TypeEntry::new("value_text", "TEXT")),
      (Integer, TypeEntry::new("value_integer", "INTEGER")),
      (Decimal, TypeEntry::new("value_decimal", "NUMERIC")),
      (Boolean, TypeEntry::new("value_boolean", "BOOLEAN")),
      (Date, TypeEntry::new("value_date", "DATE")),
      (DateTime, TypeEntry::new("value_datetime", "TIMESTAMP")),
      (Choice, TypeEntry::new("value_choice", "TEXT")),
      (Object, TypeEntry::new("value_object", "TEXT")),
    ])
  }

  pub fn entry(&self, ty: AttributeType) -> Result<&TypeEntry> {
    self
      .entries
      .get(&ty)
      .ok_or_else(|| Error::UnknownAttributeType(ty.as_str().to_owned()))
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// How one report column was realised, for consumers that post-process rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
  Scalar,
  Collection,
  /// A boolean flag for one specific choice value.
  ChoiceFlag,
  Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportColumn {
  pub name: String,
  pub kind: ColumnKind,
  pub ty:   AttributeType,
}

/// A finished report: one relational projection keyed by `entity_id`, with
/// one column per plan entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
  schema_name: String,
  columns:     Vec<ReportColumn>,
  select_sql:  String,
  style:       RelationStyle,
}

impl Report {
  pub fn schema_name(&self) -> &str { &self.schema_name }

  pub fn columns(&self) -> &[ReportColumn] { &self.columns }

  /// The bare `SELECT`, executable as-is.
  pub fn sql(&self) -> &str { &self.select_sql }

  /// The `WITH` clause body (`"name" AS (SELECT ...)`), present when the
  /// dialect supports common table expressions.
  pub fn with_clause(&self) -> Option<String> {
    match self.style {
      RelationStyle::CommonTableExpression => Some(format!(
        "{} AS ({})",
        quote_ident(&self.schema_name),
        self.select_sql
      )),
      RelationStyle::Subquery => None,
    }
  }

  /// The fragment to place in a caller's `FROM` clause: the CTE name, or the
  /// full projection as a named subquery.
  pub fn relation(&self) -> String {
    match self.style {
      RelationStyle::CommonTableExpression => quote_ident(&self.schema_name),
      RelationStyle::Subquery => {
        format!("({}) AS {}", self.select_sql, quote_ident(&self.schema_name))
      }
    }
  }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Render `plan` as a relational projection over all entities belonging to
/// any published version of the plan's schema.
///
/// Fails with [`Error::UnknownAttributeType`] before any query could run if a
/// column's type has no registry entry.
pub fn build_report(
  dialect: &SqlDialect,
  registry: &TypeRegistry,
  plan: &ColumnPlan,
) -> Result<Report> {
  let mut selects = vec!["e.id AS entity_id".to_owned()];
  let mut joins: Vec<String> = Vec::new();
  let mut columns: Vec<ReportColumn> = Vec::new();
  // Association aliases already joined, one per parent object attribute.
  let mut joined: HashMap<String, String> = HashMap::new();

  for (idx, column) in plan.columns().enumerate() {
    let Some(ty) = column.value_type() else { continue };
    let label = quote_ident(&column.name());

    let kind = if column.choice.is_some() {
      add_choice_flag(registry, column, idx, &label, &mut selects)?
    } else if column.is_collection() {
      add_collection(dialect, registry, column, ty, idx, &label, &mut selects)?
    } else if column.is_object() {
      add_object(
        dialect, registry, column, ty, idx, &label, &mut selects, &mut joins,
        &mut joined,
      )?
    } else {
      add_scalar(dialect, registry, column, ty, idx, &label, &mut selects, &mut joins)?
    };

    columns.push(ReportColumn { name: column.name(), kind, ty });
  }

  let select_sql = format!(
    "SELECT {}\nFROM entity e\nJOIN schema s ON s.id = e.schema_id\n{}WHERE s.name = {} AND s.publish_date IS NOT NULL",
    selects.join(",\n       "),
    joins.iter().map(|j| format!("{j}\n")).collect::<String>(),
    quote_str(plan.schema_name()),
  );

  Ok(Report {
    schema_name: plan.schema_name().to_owned(),
    columns,
    select_sql,
    style: dialect.relation_style(),
  })
}

/// Scalar columns join their value table once and project the cast value.
fn add_scalar(
  dialect: &SqlDialect,
  registry: &TypeRegistry,
  column: &PlanColumn,
  ty: AttributeType,
  idx: usize,
  label: &str,
  selects: &mut Vec<String>,
  joins: &mut Vec<String>,
) -> Result<ColumnKind> {
  let entry = registry.entry(ty)?;
  let alias = format!("v{idx}");
  joins.push(format!(
    "LEFT OUTER JOIN {} AS {alias} ON {alias}.entity_id = e.id AND {alias}.attribute_id IN ({})",
    entry.table,
    ids_list(column),
  ));
  selects.push(format!(
    "{} AS {label}",
    value_expr(dialect, entry, ty, &alias)
  ));
  Ok(ColumnKind::Scalar)
}

/// Collection columns aggregate a correlated subquery, natively as an array
/// where the backend allows, otherwise as a delimited string.
fn add_collection(
  dialect: &SqlDialect,
  registry: &TypeRegistry,
  column: &PlanColumn,
  ty: AttributeType,
  idx: usize,
  label: &str,
  selects: &mut Vec<String>,
) -> Result<ColumnKind> {
  let entry = registry.entry(ty)?;
  let alias = format!("v{idx}");
  let value = value_expr(dialect, entry, ty, &alias);
  let correlated = format!(
    "FROM {} AS {alias} WHERE {alias}.entity_id = e.id AND {alias}.attribute_id IN ({})",
    entry.table,
    ids_list(column),
  );

  let part = match dialect.aggregate_strategy() {
    AggregateStrategy::NativeArray => {
      format!("ARRAY(SELECT {value} {correlated})")
    }
    AggregateStrategy::DelimitedString => {
      format!("(SELECT group_concat({value}) {correlated})")
    }
  };
  selects.push(format!("{part} AS {label}"));
  Ok(ColumnKind::Collection)
}

/// Flag columns test for the presence of one specific choice value.
fn add_choice_flag(
  registry: &TypeRegistry,
  column: &PlanColumn,
  idx: usize,
  label: &str,
  selects: &mut Vec<String>,
) -> Result<ColumnKind> {
  let entry = registry.entry(AttributeType::Choice)?;
  let alias = format!("v{idx}");
  // `choice` is always present on flag columns; guarded by the caller.
  let literal = column
    .choice
    .as_ref()
    .map(|c| quote_str(&c.value))
    .unwrap_or_else(|| quote_str(""));

  selects.push(format!(
    "EXISTS (SELECT 1 FROM {} AS {alias} WHERE {alias}.entity_id = e.id AND {alias}.attribute_id IN ({}) AND {alias}.value = {literal}) AS {label}",
    entry.table,
    ids_list(column),
  ));
  Ok(ColumnKind::ChoiceFlag)
}

/// Object columns join the association table once per parent attribute, then
/// hang each sub-attribute's value table off that association alias.
fn add_object(
  dialect: &SqlDialect,
  registry: &TypeRegistry,
  column: &PlanColumn,
  ty: AttributeType,
  idx: usize,
  label: &str,
  selects: &mut Vec<String>,
  joins: &mut Vec<String>,
  joined: &mut HashMap<String, String>,
) -> Result<ColumnKind> {
  let entry = registry.entry(ty)?;
  let assoc_table = registry.entry(AttributeType::Object)?.table.clone();

  let parent = column.path[0].clone();
  let assoc_alias = match joined.get(&parent) {
    Some(alias) => alias.clone(),
    None => {
      let alias = format!("assoc_{parent}");
      let parent_ids = {
        let mut seen = std::collections::HashSet::new();
        let ids: Vec<Uuid> = column
          .attributes
          .iter()
          .filter_map(|v| v.schema.parent_attribute_id)
          .filter(|id| seen.insert(*id))
          .collect();
        ids
          .iter()
          .map(|id| quote_str(&id.to_string()))
          .collect::<Vec<_>>()
          .join(", ")
      };
      joins.push(format!(
        "LEFT OUTER JOIN {assoc_table} AS {alias} ON {alias}.entity_id = e.id AND {alias}.attribute_id IN ({parent_ids})",
      ));
      joined.insert(parent, alias.clone());
      alias
    }
  };

  let alias = format!("v{idx}");
  joins.push(format!(
    "LEFT OUTER JOIN {} AS {alias} ON {alias}.entity_id = {assoc_alias}.value AND {alias}.attribute_id IN ({})",
    entry.table,
    ids_list(column),
  ));
  selects.push(format!(
    "{} AS {label}",
    value_expr(dialect, entry, ty, &alias)
  ));
  Ok(ColumnKind::Object)
}

// ─── Fragments ───────────────────────────────────────────────────────────────

/// The projected value for one aliased value-table row, cast to the column's
/// semantic type. SQLite's date handling is only reliable through its
/// `date()`/`datetime()` functions, so temporal columns use those when the
/// dialect says plain casts misbehave.
fn value_expr(
  dialect: &SqlDialect,
  entry: &TypeEntry,
  ty: AttributeType,
  alias: &str,
) -> String {
  if !dialect.temporal_casts && ty == AttributeType::Date {
    format!("date({alias}.value)")
  } else if !dialect.temporal_casts && ty == AttributeType::DateTime {
    format!("datetime({alias}.value)")
  } else {
    format!("CAST({alias}.value AS {})", entry.cast)
  }
}

fn ids_list(column: &PlanColumn) -> String {
  column
    .attributes
    .iter()
    .map(|v| quote_str(&v.attribute.id.to_string()))
    .collect::<Vec<_>>()
    .join(", ")
}

fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_str(value: &str) -> String {
  format!("'{}'", value.replace('\'', "''"))
}
