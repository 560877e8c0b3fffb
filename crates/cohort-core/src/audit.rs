//! Audit revisions.
//!
//! A revision is an immutable snapshot of an audited row, written only by the
//! flush pipeline — once per change, twice per delete when the row also
//! carries metadata (so the trail records who deleted it, not just who last
//! edited it). Revisions are append-only and never read back by the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{entity::Entity, schema::Attribute};

/// The row image captured by a revision. One variant per audited type; the
/// store keeps a parallel audit table for each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RevisionSnapshot {
  Entity(Entity),
  Attribute(Attribute),
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
  pub snapshot:   RevisionSnapshot,
  /// True for the terminal revision(s) written when the row is deleted.
  pub deleted:    bool,
  pub changed_by: String,
  pub changed_at: DateTime<Utc>,
}
