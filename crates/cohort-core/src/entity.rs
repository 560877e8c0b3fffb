//! Entity records and the entry-state machine.
//!
//! An entity is one concrete record conforming to exactly one schema version.
//! Its `state` moves forward only; `is_null` marks a record deliberately
//! entered as not-applicable, which is legal only once the entity is
//! complete.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  metadata::{Metadata, Tracked},
};

// ─── State ───────────────────────────────────────────────────────────────────

/// Entry progress for an entity. Transitions are forward-only; skipping ahead
/// is allowed, moving backward is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityState {
  PendingEntry,
  InProgress,
  Complete,
}

impl EntityState {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::PendingEntry => "pending-entry",
      Self::InProgress => "in-progress",
      Self::Complete => "complete",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending-entry" => Some(Self::PendingEntry),
      "in-progress" => Some(Self::InProgress),
      "complete" => Some(Self::Complete),
      _ => None,
    }
  }

  fn rank(self) -> u8 {
    match self {
      Self::PendingEntry => 0,
      Self::InProgress => 1,
      Self::Complete => 2,
    }
  }
}

impl std::fmt::Display for EntityState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Completion predicate ────────────────────────────────────────────────────

/// Caller-supplied rule for "which fields must be filled before completion".
/// Invoked when an entity enters [`EntityState::Complete`] with
/// `is_null == false`; an `Err` reason fails the flush as an
/// [`Error::EntityState`].
pub type CompletionCheck =
  dyn Fn(&Entity) -> std::result::Result<(), String> + Send + Sync;

// ─── Entity ──────────────────────────────────────────────────────────────────

/// One concrete EAV record. The schema version is fixed at creation and never
/// reassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub id:        Uuid,
  pub schema_id: Uuid,
  /// Caller-assigned record identifier (e.g. a visit or sample code).
  pub name: String,
  /// The date the recorded data was collected.
  pub collect_date: NaiveDate,
  pub state:   EntityState,
  /// Deliberately recorded as not-applicable — distinct from merely missing
  /// values. Legal only together with [`EntityState::Complete`].
  pub is_null: bool,
  pub metadata: Metadata,
}

impl Entity {
  pub fn new(schema_id: Uuid, name: impl Into<String>, collect_date: NaiveDate) -> Self {
    Self {
      id: Uuid::new_v4(),
      schema_id,
      name: name.into(),
      collect_date,
      state: EntityState::PendingEntry,
      is_null: false,
      metadata: Metadata::unset(),
    }
  }

  /// Enforce the state machine for a pending entity. `current` is the
  /// pre-flush state; a brand-new entity is treated as transitioning from
  /// [`EntityState::PendingEntry`].
  ///
  /// Invoked by the flush pipeline, never by callers directly.
  pub fn enforce_state(
    &self,
    current: EntityState,
    completion: Option<&CompletionCheck>,
  ) -> Result<()> {
    let attempted = self.state;

    if attempted.rank() < current.rank() {
      return Err(self.state_error(current, "state machine only moves forward"));
    }

    if self.is_null && attempted != EntityState::Complete {
      return Err(self.state_error(current, "is_null requires the complete state"));
    }

    // An intentionally-null entity carries no values; the completion rule
    // only applies to substantive completions.
    if attempted == EntityState::Complete && !self.is_null {
      if let Some(check) = completion {
        if let Err(reason) = check(self) {
          return Err(self.state_error(current, &reason));
        }
      }
    }

    Ok(())
  }

  fn state_error(&self, current: EntityState, reason: &str) -> Error {
    Error::EntityState {
      entity:    self.id,
      current,
      attempted: self.state,
      reason:    reason.to_owned(),
    }
  }
}

impl Tracked for Entity {
  fn metadata(&self) -> &Metadata { &self.metadata }

  fn metadata_mut(&mut self) -> &mut Metadata { &mut self.metadata }
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// A typed value to be stored against an (entity, attribute) pair. The
/// variant must match the attribute's declared type; the store rejects
/// mismatches before anything is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
  Text(String),
  Integer(i64),
  Decimal(f64),
  Boolean(bool),
  Date(NaiveDate),
  DateTime(chrono::DateTime<chrono::Utc>),
  /// The `value` of one of the attribute's choices.
  Choice(String),
  /// The id of a child entity of the embedded sub-schema.
  Object(Uuid),
}

impl Value {
  /// The attribute type this value is storable under.
  pub fn attribute_type(&self) -> crate::schema::AttributeType {
    use crate::schema::AttributeType;
    match self {
      Self::Text(_) => AttributeType::Text,
      Self::Integer(_) => AttributeType::Integer,
      Self::Decimal(_) => AttributeType::Decimal,
      Self::Boolean(_) => AttributeType::Boolean,
      Self::Date(_) => AttributeType::Date,
      Self::DateTime(_) => AttributeType::DateTime,
      Self::Choice(_) => AttributeType::Choice,
      Self::Object(_) => AttributeType::Object,
    }
  }
}
