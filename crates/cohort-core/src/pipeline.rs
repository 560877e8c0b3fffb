//! The pre-commit dispatch pipeline.
//!
//! A flush presents every pending object exactly once, classified as new,
//! dirty or deleted. [`dispatch`] applies the side effects each object's
//! capabilities call for, in a fixed order:
//!
//! 1. attributes (new/dirty) get their semantic checksum stamped;
//! 2. entities (new/dirty) have their state machine enforced;
//! 3. metadata-tracked objects (new/dirty) get create/modify stamps;
//! 4. audited dirty objects yield a revision of their pre-flush image;
//! 5. audited deleted objects yield a terminal revision — and, when the
//!    object is also metadata-tracked, a second one after re-stamping so the
//!    trail records who performed the delete.
//!
//! Later steps observe the effects of earlier ones on the same object. The
//! pipeline never opens a transaction of its own: the caller runs it inside
//! the pending transaction and aborts the whole flush on any error.

use chrono::{DateTime, Utc};

use crate::{
  Result,
  audit::{Revision, RevisionSnapshot},
  checksum::attribute_checksum,
  entity::{CompletionCheck, Entity, EntityState},
  metadata::Tracked,
  schema::{Attribute, Schema},
};

// ─── Pending objects ─────────────────────────────────────────────────────────

/// How an object participates in the current flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
  New,
  Dirty,
  Deleted,
}

/// A change classification, carrying the pre-flush image where one exists.
/// An object appears in exactly one classification per flush; the session
/// guarantees this by coalescing repeated operations on the same id.
#[derive(Debug, Clone)]
pub enum Change {
  New,
  Dirty { before: Pending },
  Deleted,
}

impl Change {
  pub fn state(&self) -> ChangeState {
    match self {
      Self::New => ChangeState::New,
      Self::Dirty { .. } => ChangeState::Dirty,
      Self::Deleted => ChangeState::Deleted,
    }
  }
}

/// A pending object, tagged by kind. The variant determines which pipeline
/// steps apply: schemas are metadata-tracked; attributes are additionally
/// checksummed and audited; entities are state-enforced, tracked and audited.
#[derive(Debug, Clone, PartialEq)]
pub enum Pending {
  Schema(Schema),
  Attribute(Attribute),
  Entity(Entity),
}

impl Pending {
  pub fn id(&self) -> uuid::Uuid {
    match self {
      Self::Schema(s) => s.id,
      Self::Attribute(a) => a.id,
      Self::Entity(e) => e.id,
    }
  }

  fn as_tracked_mut(&mut self) -> Option<&mut dyn Tracked> {
    match self {
      Self::Schema(s) => Some(s),
      Self::Attribute(a) => Some(a),
      Self::Entity(e) => Some(e),
    }
  }

  fn audit_snapshot(&self) -> Option<RevisionSnapshot> {
    match self {
      Self::Schema(_) => None,
      Self::Attribute(a) => Some(RevisionSnapshot::Attribute(a.clone())),
      Self::Entity(e) => Some(RevisionSnapshot::Entity(e.clone())),
    }
  }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// The acting identity and clock for one flush, threaded in explicitly by the
/// enclosing transaction.
pub struct FlushContext<'a> {
  pub user: &'a str,
  pub now:  DateTime<Utc>,
  /// Optional completion rule for entities entering the complete state.
  pub completion: Option<&'a CompletionCheck>,
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// Run the pipeline for one pending object. Mutates the object in place
/// (checksum and metadata stamps) and returns the audit revisions to append.
pub fn dispatch(
  object: &mut Pending,
  change: &Change,
  ctx: &FlushContext<'_>,
) -> Result<Vec<Revision>> {
  let mut revisions = Vec::new();
  let live = matches!(change, Change::New | Change::Dirty { .. });

  // 1. derived checksums
  if live {
    if let Pending::Attribute(attribute) = &mut *object {
      attribute.checksum = Some(attribute_checksum(attribute));
    }
  }

  // 2. entity state enforcement
  if live {
    if let Pending::Entity(entity) = &*object {
      let current = match change {
        Change::Dirty { before: Pending::Entity(prev) } => prev.state,
        _ => EntityState::PendingEntry,
      };
      entity.enforce_state(current, ctx.completion)?;
    }
  }

  // 3. metadata stamping
  if live {
    if let Some(tracked) = object.as_tracked_mut() {
      let created = matches!(change, Change::New);
      tracked.metadata_mut().stamp(ctx.user, ctx.now, created);
    }
  }

  // 4. pre-flush revision for edits
  if let Change::Dirty { before } = change {
    if let Some(snapshot) = before.audit_snapshot() {
      revisions.push(revision(snapshot, false, ctx));
    }
  }

  // 5. terminal revision(s) for deletes
  if matches!(change, Change::Deleted) {
    if let Some(snapshot) = object.audit_snapshot() {
      revisions.push(revision(snapshot, true, ctx));

      // Record the deleting user: re-stamp, then audit the final image too.
      let restamped = match object.as_tracked_mut() {
        Some(tracked) => {
          tracked.metadata_mut().stamp(ctx.user, ctx.now, false);
          true
        }
        None => false,
      };
      if restamped {
        if let Some(snapshot) = object.audit_snapshot() {
          revisions.push(revision(snapshot, true, ctx));
        }
      }
    }
  }

  Ok(revisions)
}

fn revision(
  snapshot: RevisionSnapshot,
  deleted: bool,
  ctx: &FlushContext<'_>,
) -> Revision {
  Revision {
    snapshot,
    deleted,
    changed_by: ctx.user.to_owned(),
    changed_at: ctx.now,
  }
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone, Utc};
  use uuid::Uuid;

  use super::*;
  use crate::schema::AttributeType;

  fn ctx(user: &str) -> FlushContext<'_> {
    FlushContext {
      user,
      now: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
      completion: None,
    }
  }

  fn attribute() -> Attribute {
    Attribute::new(Uuid::new_v4(), "age", "Age", AttributeType::Integer, 0)
  }

  fn entity() -> Entity {
    Entity::new(
      Uuid::new_v4(),
      "visit-001",
      NaiveDate::from_ymd_opt(2024, 5, 20).unwrap(),
    )
  }

  #[test]
  fn new_attribute_gets_checksum_and_create_stamp() {
    let mut pending = Pending::Attribute(attribute());
    let revisions = dispatch(&mut pending, &Change::New, &ctx("alice")).unwrap();

    let Pending::Attribute(a) = pending else { unreachable!() };
    assert!(a.checksum.is_some());
    assert_eq!(a.metadata.create_user, "alice");
    assert_eq!(a.metadata.modify_user, "alice");
    // Creation is not an edit: no revision yet.
    assert!(revisions.is_empty());
  }

  #[test]
  fn dirty_attribute_audits_its_pre_flush_image() {
    let mut original = attribute();
    original.checksum = Some(attribute_checksum(&original));
    let before = Pending::Attribute(original.clone());

    let mut edited = original.clone();
    edited.ty = AttributeType::Decimal;
    let mut pending = Pending::Attribute(edited);

    let revisions =
      dispatch(&mut pending, &Change::Dirty { before }, &ctx("bob")).unwrap();

    // Checksum recomputed for the new definition.
    let Pending::Attribute(a) = &pending else { unreachable!() };
    assert_ne!(a.checksum, original.checksum);

    // The revision captures the image as it stood before this flush.
    assert_eq!(revisions.len(), 1);
    assert!(!revisions[0].deleted);
    let RevisionSnapshot::Attribute(snap) = &revisions[0].snapshot else {
      panic!("expected an attribute snapshot");
    };
    assert_eq!(snap.ty, AttributeType::Integer);
    assert_eq!(snap.checksum, original.checksum);
  }

  #[test]
  fn deleted_entity_audits_twice_with_the_deleting_user() {
    let mut e = entity();
    e.metadata.stamp("alice", ctx("alice").now, true);
    let mut pending = Pending::Entity(e);

    let revisions =
      dispatch(&mut pending, &Change::Deleted, &ctx("carol")).unwrap();

    assert_eq!(revisions.len(), 2);
    assert!(revisions.iter().all(|r| r.deleted));

    // First image still shows the last editor; the final one shows the
    // deleting user.
    let RevisionSnapshot::Entity(first) = &revisions[0].snapshot else {
      panic!("expected an entity snapshot");
    };
    let RevisionSnapshot::Entity(last) = &revisions[1].snapshot else {
      panic!("expected an entity snapshot");
    };
    assert_eq!(first.metadata.modify_user, "alice");
    assert_eq!(last.metadata.modify_user, "carol");
  }

  #[test]
  fn schema_is_tracked_but_never_audited() {
    let mut pending = Pending::Schema(Schema::draft("demographics", "Demographics"));
    let revisions = dispatch(&mut pending, &Change::New, &ctx("alice")).unwrap();
    assert!(revisions.is_empty());

    let Pending::Schema(s) = &pending else { unreachable!() };
    assert_eq!(s.metadata.create_user, "alice");

    let mut pending = pending.clone();
    let revisions =
      dispatch(&mut pending, &Change::Deleted, &ctx("alice")).unwrap();
    assert!(revisions.is_empty());
  }

  #[test]
  fn illegal_entity_transition_fails_the_flush() {
    let mut before = entity();
    before.state = EntityState::Complete;

    let mut backward = before.clone();
    backward.state = EntityState::PendingEntry;

    let mut pending = Pending::Entity(backward);
    let change = Change::Dirty { before: Pending::Entity(before) };
    let err = dispatch(&mut pending, &change, &ctx("alice")).unwrap_err();
    assert!(matches!(err, crate::Error::EntityState { .. }));
  }
}
