//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use chrono::NaiveDate;
use cohort_core::{
  audit::RevisionSnapshot,
  checksum::attribute_checksum,
  entity::{CompletionCheck, Entity, EntityState, Value},
  plan::Granularity,
  schema::{Attribute, AttributeType, Choice, Schema},
};
use serde_json::json;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Publish `demographics` v1 with a single integer `age` attribute.
async fn publish_demographics_v1(s: &SqliteStore) -> (Schema, Attribute) {
  s.transact("alice", |session| {
    let schema = Schema::draft("demographics", "Demographics");
    let age = Attribute::new(schema.id, "age", "Age", AttributeType::Integer, 0);
    session.add_schema(schema.clone())?;
    session.add_attribute(age.clone())?;
    let published = session.publish_schema(schema.id, date(2020, 1, 1))?;
    Ok((published, age))
  })
  .await
  .unwrap()
}

/// Publish a second `demographics` version that redefines `age` as decimal.
async fn publish_demographics_v2(s: &SqliteStore) -> (Schema, Attribute) {
  s.transact("alice", |session| {
    let schema = Schema::draft("demographics", "Demographics");
    let age = Attribute::new(schema.id, "age", "Age", AttributeType::Decimal, 0);
    session.add_schema(schema.clone())?;
    session.add_attribute(age.clone())?;
    let published = session.publish_schema(schema.id, date(2021, 1, 1))?;
    Ok((published, age))
  })
  .await
  .unwrap()
}

/// Add a pending-entry entity under `schema_id`.
async fn add_entity(s: &SqliteStore, schema_id: uuid::Uuid, name: &str) -> Entity {
  let name = name.to_owned();
  s.transact("alice", move |session| {
    let entity = Entity::new(schema_id, name, date(2024, 3, 1));
    session.add_entity(entity.clone())?;
    Ok(entity)
  })
  .await
  .unwrap()
}

// ─── Schema lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn publish_freezes_the_schema() {
  let s = store().await;
  let (schema, age) = publish_demographics_v1(&s).await;

  // No more attributes.
  let schema_id = schema.id;
  let err = s
    .transact("alice", move |session| {
      session.add_attribute(Attribute::new(
        schema_id,
        "height",
        "Height",
        AttributeType::Decimal,
        1,
      ))
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SchemaFrozen(_)));

  // No edits to existing attributes.
  let mut edited = s.get_attribute(age.id).await.unwrap().unwrap();
  edited.title = "Age in years".into();
  let err = s
    .transact("alice", move |session| session.update_attribute(edited))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SchemaFrozen(_)));

  // No second publication.
  let err = s
    .transact("alice", move |session| {
      session.publish_schema(schema_id, date(2022, 1, 1))
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyPublished(_)));
}

#[tokio::test]
async fn draft_lineage_is_empty_not_missing() {
  let s = store().await;
  s.transact("alice", |session| {
    session.add_schema(Schema::draft("intake", "Intake"))
  })
  .await
  .unwrap();

  // Draft-only lineage: empty, not an error.
  let lineage = s.schema_lineage("intake").await.unwrap();
  assert!(lineage.is_empty());

  // But a report over it is impossible.
  let err = s
    .build_plan("intake", Granularity::ByName, false)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(cohort_core::Error::UnpublishedSchema(_))
  ));

  // A name with no rows at all is a different failure.
  let err = s
    .build_plan("missing", Granularity::ByName, false)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(cohort_core::Error::SchemaNotFound(_))
  ));
}

#[tokio::test]
async fn metadata_stamps_record_creator_and_editor() {
  let s = store().await;
  let schema = s
    .transact("alice", |session| {
      let schema = Schema::draft("intake", "Intake");
      session.add_schema(schema.clone())?;
      Ok(schema)
    })
    .await
    .unwrap();

  let stored = s.get_schema(schema.id).await.unwrap().unwrap();
  assert_eq!(stored.metadata.create_user, "alice");
  assert_eq!(stored.metadata.modify_user, "alice");

  let mut edited = stored.clone();
  edited.title = "Intake form".into();
  s.transact("bob", move |session| session.update_schema(edited))
    .await
    .unwrap();

  let stored = s.get_schema(schema.id).await.unwrap().unwrap();
  assert_eq!(stored.metadata.create_user, "alice");
  assert_eq!(stored.metadata.modify_user, "bob");
  assert!(stored.metadata.modify_date > stored.metadata.create_date);
}

// ─── Checksums ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn checksums_are_stamped_at_flush() {
  let s = store().await;
  let (_, age) = publish_demographics_v1(&s).await;

  let stored = s.get_attribute(age.id).await.unwrap().unwrap();
  let checksum = stored.checksum.clone().unwrap();
  assert_eq!(checksum, attribute_checksum(&stored));

  // A semantically identical attribute in a later version fingerprints the
  // same; the drifted decimal version does not.
  let (_, age_v2) = publish_demographics_v2(&s).await;
  let stored_v2 = s.get_attribute(age_v2.id).await.unwrap().unwrap();
  assert_ne!(stored_v2.checksum.unwrap(), checksum);
}

#[tokio::test]
async fn attribute_edits_audit_the_previous_image() {
  let s = store().await;

  // Build a draft so the attribute stays editable.
  let weight = s
    .transact("alice", |session| {
      let schema = Schema::draft("vitals", "Vitals");
      let weight =
        Attribute::new(schema.id, "weight", "Weight", AttributeType::Integer, 0);
      session.add_schema(schema)?;
      session.add_attribute(weight.clone())?;
      Ok(weight)
    })
    .await
    .unwrap();

  let mut edited = s.get_attribute(weight.id).await.unwrap().unwrap();
  edited.ty = AttributeType::Decimal;
  s.transact("bob", move |session| session.update_attribute(edited))
    .await
    .unwrap();

  let revisions = s.attribute_revisions(weight.id).await.unwrap();
  assert_eq!(revisions.len(), 1);
  assert!(!revisions[0].deleted);
  assert_eq!(revisions[0].changed_by, "bob");

  let RevisionSnapshot::Attribute(snapshot) = &revisions[0].snapshot else {
    panic!("expected an attribute snapshot");
  };
  // The audit row holds the image before this flush.
  assert_eq!(snapshot.ty, AttributeType::Integer);
}

// ─── Entity state machine ────────────────────────────────────────────────────

#[tokio::test]
async fn entity_moves_forward_through_states() {
  let s = store().await;
  let (schema, _) = publish_demographics_v1(&s).await;
  let entity = add_entity(&s, schema.id, "visit-001").await;

  let mut step = s.get_entity(entity.id).await.unwrap().unwrap();
  assert_eq!(step.state, EntityState::PendingEntry);

  step.state = EntityState::InProgress;
  s.transact("bob", move |session| session.update_entity(step))
    .await
    .unwrap();

  let mut step = s.get_entity(entity.id).await.unwrap().unwrap();
  assert_eq!(step.state, EntityState::InProgress);

  step.state = EntityState::Complete;
  s.transact("bob", move |session| session.update_entity(step))
    .await
    .unwrap();

  let done = s.get_entity(entity.id).await.unwrap().unwrap();
  assert_eq!(done.state, EntityState::Complete);
  assert_eq!(done.metadata.create_user, "alice");
  assert_eq!(done.metadata.modify_user, "bob");
}

#[tokio::test]
async fn backward_transition_aborts_the_flush() {
  let s = store().await;
  let (schema, _) = publish_demographics_v1(&s).await;
  let entity = add_entity(&s, schema.id, "visit-001").await;

  let mut step = s.get_entity(entity.id).await.unwrap().unwrap();
  step.state = EntityState::Complete;
  s.transact("bob", move |session| session.update_entity(step))
    .await
    .unwrap();

  let mut backward = s.get_entity(entity.id).await.unwrap().unwrap();
  backward.state = EntityState::InProgress;
  let err = s
    .transact("bob", move |session| session.update_entity(backward))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(cohort_core::Error::EntityState { .. })
  ));
}

#[tokio::test]
async fn is_null_requires_the_complete_state() {
  let s = store().await;
  let (schema, _) = publish_demographics_v1(&s).await;
  let entity = add_entity(&s, schema.id, "visit-001").await;

  let mut wrong = s.get_entity(entity.id).await.unwrap().unwrap();
  wrong.state = EntityState::InProgress;
  wrong.is_null = true;
  let err = s
    .transact("bob", move |session| session.update_entity(wrong))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(cohort_core::Error::EntityState { .. })
  ));

  // Deliberately-not-applicable completion is fine.
  let mut null_complete = s.get_entity(entity.id).await.unwrap().unwrap();
  null_complete.state = EntityState::Complete;
  null_complete.is_null = true;
  s.transact("bob", move |session| session.update_entity(null_complete))
    .await
    .unwrap();

  let done = s.get_entity(entity.id).await.unwrap().unwrap();
  assert!(done.is_null);
}

#[tokio::test]
async fn completion_rule_is_caller_supplied() {
  let s = store().await;
  let (schema, _) = publish_demographics_v1(&s).await;
  let entity = add_entity(&s, schema.id, "visit-001").await;

  let completion: Arc<CompletionCheck> =
    Arc::new(|_: &Entity| Err("age is required".into()));

  let mut complete = s.get_entity(entity.id).await.unwrap().unwrap();
  complete.state = EntityState::Complete;
  let err = s
    .transact_with("bob", Some(completion.clone()), move |session| {
      session.update_entity(complete)
    })
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(cohort_core::Error::EntityState { ref reason, .. })
      if reason == "age is required"
  ));

  // The rule does not apply to an intentionally-null completion.
  let mut null_complete = s.get_entity(entity.id).await.unwrap().unwrap();
  null_complete.state = EntityState::Complete;
  null_complete.is_null = true;
  s.transact_with("bob", Some(completion), move |session| {
    session.update_entity(null_complete)
  })
  .await
  .unwrap();
}

#[tokio::test]
async fn entities_require_a_published_schema() {
  let s = store().await;
  let schema = s
    .transact("alice", |session| {
      let schema = Schema::draft("intake", "Intake");
      session.add_schema(schema.clone())?;
      Ok(schema)
    })
    .await
    .unwrap();

  let schema_id = schema.id;
  let err = s
    .transact("alice", move |session| {
      session.add_entity(Entity::new(schema_id, "visit-001", date(2024, 3, 1)))
    })
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(cohort_core::Error::UnpublishedSchema(_))
  ));
}

// ─── Audit trail ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn deletion_records_the_deleting_user() {
  let s = store().await;
  let (schema, _) = publish_demographics_v1(&s).await;
  let entity = add_entity(&s, schema.id, "visit-001").await;

  // Bob edits, Carol deletes.
  let mut edited = s.get_entity(entity.id).await.unwrap().unwrap();
  edited.state = EntityState::InProgress;
  s.transact("bob", move |session| session.update_entity(edited))
    .await
    .unwrap();

  let id = entity.id;
  s.transact("carol", move |session| session.delete_entity(id))
    .await
    .unwrap();

  assert!(s.get_entity(entity.id).await.unwrap().is_none());

  let revisions = s.entity_revisions(entity.id).await.unwrap();
  // Bob's edit snapshot, then the two terminal snapshots from the delete.
  assert_eq!(revisions.len(), 3);
  assert!(!revisions[0].deleted);
  assert!(revisions[1].deleted);
  assert!(revisions[2].deleted);

  let RevisionSnapshot::Entity(first_delete) = &revisions[1].snapshot else {
    panic!("expected an entity snapshot");
  };
  let RevisionSnapshot::Entity(last) = &revisions[2].snapshot else {
    panic!("expected an entity snapshot");
  };
  // The first terminal image still names the last editor; the final image
  // names the deleting user even though carol never edited the row.
  assert_eq!(first_delete.metadata.modify_user, "bob");
  assert_eq!(last.metadata.modify_user, "carol");
  assert_eq!(revisions[2].changed_by, "carol");
}

#[tokio::test]
async fn failed_flush_commits_nothing() {
  let s = store().await;
  let (schema, _) = publish_demographics_v1(&s).await;
  let existing = add_entity(&s, schema.id, "visit-001").await;

  let mut done = s.get_entity(existing.id).await.unwrap().unwrap();
  done.state = EntityState::Complete;
  s.transact("alice", move |session| session.update_entity(done))
    .await
    .unwrap();

  // One transaction: a valid new entity plus an illegal backward edit.
  let schema_id = schema.id;
  let mut backward = s.get_entity(existing.id).await.unwrap().unwrap();
  backward.state = EntityState::PendingEntry;
  let fresh = Entity::new(schema_id, "visit-002", date(2024, 3, 2));
  let fresh_id = fresh.id;

  let err = s
    .transact("alice", move |session| {
      session.add_entity(fresh)?;
      session.update_entity(backward)
    })
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::Core(cohort_core::Error::EntityState { .. })
  ));

  // The valid entity must not survive the aborted flush.
  assert!(s.get_entity(fresh_id).await.unwrap().is_none());
  let untouched = s.get_entity(existing.id).await.unwrap().unwrap();
  assert_eq!(untouched.state, EntityState::Complete);
}

// ─── Values ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn value_rows_must_match_the_declared_type() {
  let s = store().await;
  let (schema, age) = publish_demographics_v1(&s).await;
  let entity = add_entity(&s, schema.id, "visit-001").await;

  let (entity_id, age_id) = (entity.id, age.id);
  let err = s
    .transact("alice", move |session| {
      session.set_value(entity_id, age_id, Value::Text("thirty".into()))
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::TypeMismatch { .. }));

  let err = s
    .transact("alice", move |session| {
      session.set_values(
        entity_id,
        age_id,
        vec![Value::Integer(30), Value::Integer(31)],
      )
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotCollection(_)));

  s.transact("alice", move |session| {
    session.set_value(entity_id, age_id, Value::Integer(30))
  })
  .await
  .unwrap();
}

#[tokio::test]
async fn choice_values_are_validated_against_the_vocabulary() {
  let s = store().await;
  let (schema, symptoms) = s
    .transact("alice", |session| {
      let schema = Schema::draft("intake", "Intake");
      let mut symptoms =
        Attribute::new(schema.id, "symptoms", "Symptoms", AttributeType::Choice, 0);
      symptoms.is_collection = true;
      symptoms.choices =
        vec![Choice::new(0, "fever", "Fever"), Choice::new(1, "cough", "Cough")];
      session.add_schema(schema.clone())?;
      session.add_attribute(symptoms.clone())?;
      let published = session.publish_schema(schema.id, date(2020, 1, 1))?;
      Ok((published, symptoms))
    })
    .await
    .unwrap();

  let entity = add_entity(&s, schema.id, "visit-001").await;
  let (entity_id, symptoms_id) = (entity.id, symptoms.id);

  let err = s
    .transact("alice", move |session| {
      session.set_value(entity_id, symptoms_id, Value::Choice("rash".into()))
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownChoice { .. }));

  s.transact("alice", move |session| {
    session.set_values(
      entity_id,
      symptoms_id,
      vec![Value::Choice("fever".into()), Value::Choice("cough".into())],
    )
  })
  .await
  .unwrap();
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn checksum_granularity_splits_drifted_age_columns() {
  let s = store().await;
  let (v1, age_v1) = publish_demographics_v1(&s).await;
  let (v2, age_v2) = publish_demographics_v2(&s).await;

  let e1 = add_entity(&s, v1.id, "visit-001").await;
  let e2 = add_entity(&s, v2.id, "visit-002").await;

  let (e1_id, a1_id) = (e1.id, age_v1.id);
  s.transact("alice", move |session| {
    session.set_value(e1_id, a1_id, Value::Integer(30))
  })
  .await
  .unwrap();

  let (e2_id, a2_id) = (e2.id, age_v2.id);
  s.transact("alice", move |session| {
    session.set_value(e2_id, a2_id, Value::Decimal(30.5))
  })
  .await
  .unwrap();

  // Under BY_CHECKSUM the two definitions are distinct columns.
  let (report, rows) = s
    .fetch_report("demographics", Granularity::ByChecksum, false)
    .await
    .unwrap();
  assert_eq!(report.columns().len(), 2);
  let v1_col = &report.columns()[0].name;
  let v2_col = &report.columns()[1].name;

  assert_eq!(rows.len(), 2);
  let row1 = rows.iter().find(|r| r.entity_id == e1.id).unwrap();
  let row2 = rows.iter().find(|r| r.entity_id == e2.id).unwrap();

  assert_eq!(row1.get(v1_col), Some(&json!(30)));
  assert_eq!(row1.get(v2_col), Some(&json!(null)));
  assert_eq!(row2.get(v1_col), Some(&json!(null)));
  assert_eq!(row2.get(v2_col), Some(&json!(30.5)));

  // Under BY_NAME the lineage pools into one column, read through the most
  // recent type's value table — drifted history comes back null, which is
  // exactly the hazard the checksum granularity exists to avoid.
  let (report, rows) = s
    .fetch_report("demographics", Granularity::ByName, false)
    .await
    .unwrap();
  assert_eq!(report.columns().len(), 1);
  assert_eq!(report.columns()[0].name, "age");
  let row1 = rows.iter().find(|r| r.entity_id == e1.id).unwrap();
  let row2 = rows.iter().find(|r| r.entity_id == e2.id).unwrap();
  assert_eq!(row1.get("age"), Some(&json!(null)));
  assert_eq!(row2.get("age"), Some(&json!(30.5)));

  // Under BY_ID every version stands alone.
  let plan = s
    .build_plan("demographics", Granularity::ById, false)
    .await
    .unwrap();
  assert_eq!(plan.len(), 2);
}

#[tokio::test]
async fn choice_expansion_reports_boolean_flags() {
  let s = store().await;
  let (schema, symptoms) = s
    .transact("alice", |session| {
      let schema = Schema::draft("intake", "Intake");
      let mut symptoms =
        Attribute::new(schema.id, "symptoms", "Symptoms", AttributeType::Choice, 0);
      symptoms.is_collection = true;
      symptoms.choices =
        vec![Choice::new(0, "fever", "Fever"), Choice::new(1, "cough", "Cough")];
      session.add_schema(schema.clone())?;
      session.add_attribute(symptoms.clone())?;
      let published = session.publish_schema(schema.id, date(2020, 1, 1))?;
      Ok((published, symptoms))
    })
    .await
    .unwrap();

  let entity = add_entity(&s, schema.id, "visit-001").await;
  let (entity_id, symptoms_id) = (entity.id, symptoms.id);
  s.transact("alice", move |session| {
    session.set_values(entity_id, symptoms_id, vec![Value::Choice("fever".into())])
  })
  .await
  .unwrap();

  let (report, rows) = s
    .fetch_report("intake", Granularity::ByName, true)
    .await
    .unwrap();

  let names: Vec<&str> =
    report.columns().iter().map(|c| c.name.as_str()).collect();
  assert_eq!(names, ["symptoms_fever", "symptoms_cough"]);

  let row = rows.iter().find(|r| r.entity_id == entity.id).unwrap();
  assert_eq!(row.get("symptoms_fever"), Some(&json!(true)));
  assert_eq!(row.get("symptoms_cough"), Some(&json!(false)));
}

#[tokio::test]
async fn collections_aggregate_into_one_column() {
  let s = store().await;
  let (schema, symptoms) = s
    .transact("alice", |session| {
      let schema = Schema::draft("intake", "Intake");
      let mut symptoms =
        Attribute::new(schema.id, "symptoms", "Symptoms", AttributeType::Choice, 0);
      symptoms.is_collection = true;
      symptoms.choices =
        vec![Choice::new(0, "fever", "Fever"), Choice::new(1, "cough", "Cough")];
      session.add_schema(schema.clone())?;
      session.add_attribute(symptoms.clone())?;
      let published = session.publish_schema(schema.id, date(2020, 1, 1))?;
      Ok((published, symptoms))
    })
    .await
    .unwrap();

  let entity = add_entity(&s, schema.id, "visit-001").await;
  let (entity_id, symptoms_id) = (entity.id, symptoms.id);
  s.transact("alice", move |session| {
    session.set_values(
      entity_id,
      symptoms_id,
      vec![Value::Choice("fever".into()), Value::Choice("cough".into())],
    )
  })
  .await
  .unwrap();

  let (_, rows) = s
    .fetch_report("intake", Granularity::ByName, false)
    .await
    .unwrap();
  let row = rows.iter().find(|r| r.entity_id == entity.id).unwrap();

  // SQLite aggregates collections into a delimited string.
  let aggregated = row.get("symptoms").unwrap().as_str().unwrap();
  assert!(aggregated.contains("fever"));
  assert!(aggregated.contains("cough"));
}

#[tokio::test]
async fn nested_objects_flatten_with_prefixed_columns() {
  let s = store().await;

  let (visit, contact, emergency, phone) = s
    .transact("alice", |session| {
      // The inline sub-schema and its embedding attribute reference each
      // other; the sub-schema row goes in first.
      let mut contact = Schema::draft("contact", "Contact");
      contact.is_inline = true;

      let visit = Schema::draft("visit", "Visit");
      let mut emergency =
        Attribute::new(visit.id, "emergency", "Emergency contact", AttributeType::Object, 0);
      emergency.object_schema_id = Some(contact.id);
      contact.parent_attribute_id = Some(emergency.id);

      let phone =
        Attribute::new(contact.id, "phone", "Phone", AttributeType::Text, 0);

      session.add_schema(contact.clone())?;
      session.add_schema(visit.clone())?;
      session.add_attribute(emergency.clone())?;
      session.add_attribute(phone.clone())?;
      let contact = session.publish_schema(contact.id, date(2020, 1, 1))?;
      let visit = session.publish_schema(visit.id, date(2020, 1, 1))?;
      Ok((visit, contact, emergency, phone))
    })
    .await
    .unwrap();

  let parent = add_entity(&s, visit.id, "visit-001").await;
  let child = add_entity(&s, contact.id, "contact-001").await;

  let (parent_id, child_id) = (parent.id, child.id);
  let (emergency_id, phone_id) = (emergency.id, phone.id);
  s.transact("alice", move |session| {
    session.set_value(parent_id, emergency_id, Value::Object(child_id))?;
    session.set_value(child_id, phone_id, Value::Text("555-0100".into()))
  })
  .await
  .unwrap();

  let (report, rows) =
    s.fetch_report("visit", Granularity::ByName, false).await.unwrap();
  assert_eq!(report.columns()[0].name, "emergency_phone");

  let row = rows.iter().find(|r| r.entity_id == parent.id).unwrap();
  assert_eq!(row.get("emergency_phone"), Some(&json!("555-0100")));
}

#[tokio::test]
async fn columns_follow_the_most_recent_form_layout() {
  let s = store().await;

  // v1 orders (age, height); v2 flips them.
  s.transact("alice", |session| {
    let v1 = Schema::draft("vitals", "Vitals");
    session.add_schema(v1.clone())?;
    session.add_attribute(Attribute::new(v1.id, "age", "Age", AttributeType::Integer, 0))?;
    session.add_attribute(Attribute::new(
      v1.id,
      "height",
      "Height",
      AttributeType::Integer,
      1,
    ))?;
    session.publish_schema(v1.id, date(2020, 1, 1))?;

    let v2 = Schema::draft("vitals", "Vitals");
    session.add_schema(v2.clone())?;
    session.add_attribute(Attribute::new(
      v2.id,
      "height",
      "Height",
      AttributeType::Integer,
      0,
    ))?;
    session.add_attribute(Attribute::new(v2.id, "age", "Age", AttributeType::Integer, 1))?;
    session.publish_schema(v2.id, date(2021, 1, 1))?;
    Ok(())
  })
  .await
  .unwrap();

  let plan = s.build_plan("vitals", Granularity::ByName, false).await.unwrap();
  let names: Vec<String> =
    plan.columns().map(|c| c.name()).collect();
  // Current layout order wins: height now precedes age.
  assert_eq!(names, ["height", "age"]);

  // Each column pools both versions, oldest first.
  for column in plan.columns() {
    assert_eq!(column.attributes.len(), 2);
    let dates: Vec<_> =
      column.attributes.iter().map(|v| v.schema.publish_date).collect();
    assert!(dates[0] < dates[1]);
  }
}

#[tokio::test]
async fn plans_are_idempotent_over_unchanged_data() {
  let s = store().await;
  publish_demographics_v1(&s).await;
  publish_demographics_v2(&s).await;

  let a = s
    .build_plan("demographics", Granularity::ByChecksum, false)
    .await
    .unwrap();
  let b = s
    .build_plan("demographics", Granularity::ByChecksum, false)
    .await
    .unwrap();
  assert_eq!(a, b);
}
