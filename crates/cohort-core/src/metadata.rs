//! Lifecycle metadata stamps.
//!
//! Every row that tracks who touched it embeds a [`Metadata`] block. The
//! stamps are never written by callers; the flush pipeline assigns them from
//! the transaction context (see [`crate::pipeline`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation and modification stamps carried by schemas, attributes and
/// entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
  pub create_date: DateTime<Utc>,
  pub create_user: String,
  pub modify_date: DateTime<Utc>,
  pub modify_user: String,
}

impl Metadata {
  /// A placeholder block; overwritten by the pipeline before any row is
  /// persisted.
  pub fn unset() -> Self {
    Self {
      create_date: DateTime::<Utc>::MIN_UTC,
      create_user: String::new(),
      modify_date: DateTime::<Utc>::MIN_UTC,
      modify_user: String::new(),
    }
  }

  /// Stamp this block. `created` also assigns the create stamps; the modify
  /// stamps are always assigned.
  pub fn stamp(&mut self, user: &str, now: DateTime<Utc>, created: bool) {
    if created {
      self.create_date = now;
      self.create_user = user.to_owned();
    }
    self.modify_date = now;
    self.modify_user = user.to_owned();
  }
}

/// Capability: the object carries a [`Metadata`] block.
pub trait Tracked {
  fn metadata(&self) -> &Metadata;
  fn metadata_mut(&mut self) -> &mut Metadata;
}
