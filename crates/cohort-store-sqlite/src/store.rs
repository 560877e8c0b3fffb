//! [`SqliteStore`] — the SQLite backend for the Cohort datastore.
//!
//! All mutation happens through [`SqliteStore::transact`]: the closure
//! receives a [`Session`] that queues pending objects, and at commit the
//! session runs the core dispatch pipeline (checksum stamping, entity-state
//! enforcement, metadata stamps, audit revisions) inside a single rusqlite
//! transaction. Any error aborts the whole flush; nothing partial commits.

use std::{collections::HashMap, path::Path, sync::Arc};

use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use tracing::debug;
use uuid::Uuid;

use cohort_core::{
  audit::{Revision, RevisionSnapshot},
  entity::{CompletionCheck, Entity, Value},
  pipeline::{Change, ChangeState, FlushContext, Pending, dispatch},
  plan::{ColumnPlan, Granularity, build_plan},
  report::{ColumnKind, Report, SqlDialect, TypeRegistry, build_report},
  schema::{Attribute, AttributeType, AttributeVersion, Choice, Schema, SchemaSummary},
  source::SchemaSource,
};

use crate::{
  Error, Result,
  encode::{
    RawAttribute, RawEntity, RawSchema, decode_dt, decode_uuid, encode_date,
    encode_dt, encode_uuid, encode_value,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Cohort datastore backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:     tokio_rusqlite::Connection,
  registry: TypeRegistry,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, registry: TypeRegistry::standard() };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, registry: TypeRegistry::standard() };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The type→table / type→cast registry this store was built with.
  pub fn registry(&self) -> &TypeRegistry { &self.registry }

  // ── Transactions ──────────────────────────────────────────────────────────

  /// Run `work` against a [`Session`] inside one transaction, flushing the
  /// pending set through the dispatch pipeline before commit. `user` is the
  /// acting identity recorded in metadata stamps and audit revisions.
  pub async fn transact<T, F>(&self, user: &str, work: F) -> Result<T>
  where
    F: FnOnce(&mut Session<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    self.transact_with(user, None, work).await
  }

  /// Like [`SqliteStore::transact`], with a completion rule applied to
  /// entities entering the complete state during this flush.
  pub async fn transact_with<T, F>(
    &self,
    user: &str,
    completion: Option<Arc<CompletionCheck>>,
    work: F,
  ) -> Result<T>
  where
    F: FnOnce(&mut Session<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let user = user.to_owned();
    let registry = self.registry.clone();

    let out: Result<T> = self
      .conn
      .call(move |conn| {
        Ok(run_transaction(conn, &registry, &user, completion, work))
      })
      .await?;
    out
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_schema(&self, id: Uuid) -> Result<Option<Schema>> {
    let out: Result<Option<Schema>> = self
      .conn
      .call(move |conn| Ok(query_schema(conn, id)))
      .await?;
    out
  }

  pub async fn get_attribute(&self, id: Uuid) -> Result<Option<Attribute>> {
    let out: Result<Option<Attribute>> = self
      .conn
      .call(move |conn| Ok(query_attribute(conn, id)))
      .await?;
    out
  }

  pub async fn get_entity(&self, id: Uuid) -> Result<Option<Entity>> {
    let out: Result<Option<Entity>> = self
      .conn
      .call(move |conn| Ok(query_entity(conn, id)))
      .await?;
    out
  }

  /// All published versions of the named schema, oldest to newest.
  pub async fn schema_lineage(&self, name: &str) -> Result<Vec<Schema>> {
    let name = name.to_owned();
    let out: Result<Vec<Schema>> = self
      .conn
      .call(move |conn| Ok(SqliteSource { conn: &*conn }.schema_lineage(&name)))
      .await?;
    out
  }

  /// Every attribute of every published version of the named schema, in
  /// lineage order.
  pub async fn published_attributes(
    &self,
    name: &str,
  ) -> Result<Vec<AttributeVersion>> {
    let name = name.to_owned();
    let out: Result<Vec<AttributeVersion>> = self
      .conn
      .call(move |conn| Ok(SqliteSource { conn: &*conn }.published_attributes(&name)))
      .await?;
    out
  }

  /// The audit trail for an entity, in recording order.
  pub async fn entity_revisions(&self, id: Uuid) -> Result<Vec<Revision>> {
    let id_str = encode_uuid(id);
    let out: Result<Vec<Revision>> = self
      .conn
      .call(move |conn| Ok(query_entity_revisions(conn, &id_str)))
      .await?;
    out
  }

  /// The audit trail for an attribute, in recording order.
  pub async fn attribute_revisions(&self, id: Uuid) -> Result<Vec<Revision>> {
    let id_str = encode_uuid(id);
    let out: Result<Vec<Revision>> = self
      .conn
      .call(move |conn| Ok(query_attribute_revisions(conn, &id_str)))
      .await?;
    out
  }

  // ── Reporting ─────────────────────────────────────────────────────────────

  /// Build a column plan over the named schema's published lineage.
  pub async fn build_plan(
    &self,
    schema_name: &str,
    granularity: Granularity,
    expand_choices: bool,
  ) -> Result<ColumnPlan> {
    let name = schema_name.to_owned();
    let out: Result<ColumnPlan> = self
      .conn
      .call(move |conn| {
        Ok(build_plan(&SqliteSource { conn: &*conn }, &name, granularity, expand_choices))
      })
      .await?;
    out
  }

  /// Plan and render the report relation for the named schema.
  pub async fn build_report(
    &self,
    schema_name: &str,
    granularity: Granularity,
    expand_choices: bool,
  ) -> Result<Report> {
    let name = schema_name.to_owned();
    let registry = self.registry.clone();
    let out: Result<Report> = self
      .conn
      .call(move |conn| {
        Ok((|| {
          let plan =
            build_plan(&SqliteSource { conn: &*conn }, &name, granularity, expand_choices)?;
          let report =
            build_report(&SqlDialect::sqlite(), &registry, &plan).map_err(Error::Core)?;
          debug!(
            schema = %name,
            columns = report.columns().len(),
            "report built"
          );
          Ok(report)
        })())
      })
      .await?;
    out
  }

  /// Plan, render and execute the report, returning one row per entity.
  pub async fn fetch_report(
    &self,
    schema_name: &str,
    granularity: Granularity,
    expand_choices: bool,
  ) -> Result<(Report, Vec<ReportRow>)> {
    let name = schema_name.to_owned();
    let registry = self.registry.clone();
    let out: Result<(Report, Vec<ReportRow>)> = self
      .conn
      .call(move |conn| {
        Ok((|| {
          let plan =
            build_plan(&SqliteSource { conn: &*conn }, &name, granularity, expand_choices)?;
          let report =
            build_report(&SqlDialect::sqlite(), &registry, &plan).map_err(Error::Core)?;
          let rows = execute_report(conn, &report)?;
          Ok((report, rows))
        })())
      })
      .await?;
    out
  }
}

fn run_transaction<T, F>(
  conn: &mut rusqlite::Connection,
  registry: &TypeRegistry,
  user: &str,
  completion: Option<Arc<CompletionCheck>>,
  work: F,
) -> Result<T>
where
  F: FnOnce(&mut Session<'_>) -> Result<T>,
{
  let tx = conn.transaction()?;
  let out = {
    let mut session = Session {
      tx: &tx,
      registry,
      user: user.to_owned(),
      completion,
      pending: Vec::new(),
      index: HashMap::new(),
      values: Vec::new(),
    };
    let out = work(&mut session)?;
    session.flush()?;
    out
  };
  tx.commit()?;
  Ok(out)
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// A unit of work over one transaction. Mutations queue as pending objects;
/// the flush (run automatically before commit) classifies each as new, dirty
/// or deleted — exactly one state per object, guaranteed by coalescing
/// repeated operations — and drives the dispatch pipeline over them before
/// applying SQL.
pub struct Session<'a> {
  tx:         &'a rusqlite::Transaction<'a>,
  registry:   &'a TypeRegistry,
  user:       String,
  completion: Option<Arc<CompletionCheck>>,
  /// Insertion-ordered pending set; `None` marks an add that was cancelled
  /// by a delete in the same session.
  pending: Vec<Option<PendingEntry>>,
  index:   HashMap<Uuid, usize>,
  values:  Vec<ValueWrite>,
}

struct PendingEntry {
  object: Pending,
  change: Change,
}

struct ValueWrite {
  entity_id:    Uuid,
  attribute_id: Uuid,
  values:       Vec<Value>,
}

impl Session<'_> {
  // ── Schemas ───────────────────────────────────────────────────────────────

  /// Queue a new draft schema version.
  pub fn add_schema(&mut self, schema: Schema) -> Result<()> {
    self.queue_insert(Pending::Schema(schema));
    Ok(())
  }

  /// Queue an edit to a draft schema. Published schemas are frozen.
  pub fn update_schema(&mut self, schema: Schema) -> Result<()> {
    let id = schema.id;
    if let Some(&i) = self.index.get(&id) {
      let entry =
        self.pending[i].as_mut().ok_or(Error::SchemaMissing(id))?;
      if let Pending::Schema(current) = &entry.object {
        if current.is_published() {
          return Err(Error::SchemaFrozen(current.name.clone()));
        }
      }
      entry.object = Pending::Schema(schema);
      return Ok(());
    }

    let before =
      query_schema(self.tx, id)?.ok_or(Error::SchemaMissing(id))?;
    if before.is_published() {
      return Err(Error::SchemaFrozen(before.name));
    }
    self.queue_update(Pending::Schema(schema), Pending::Schema(before));
    Ok(())
  }

  /// Set the publish date on a draft, freezing it. Fails if the schema is
  /// already published.
  pub fn publish_schema(&mut self, schema_id: Uuid, date: NaiveDate) -> Result<Schema> {
    let current = self.current_schema(schema_id)?;
    if current.is_published() {
      return Err(Error::AlreadyPublished(current.name));
    }

    let mut published = current.clone();
    published.publish_date = Some(date);

    if let Some(&i) = self.index.get(&schema_id) {
      let entry =
        self.pending[i].as_mut().ok_or(Error::SchemaMissing(schema_id))?;
      entry.object = Pending::Schema(published.clone());
    } else {
      self.queue_update(
        Pending::Schema(published.clone()),
        Pending::Schema(current),
      );
    }
    Ok(published)
  }

  // ── Attributes ────────────────────────────────────────────────────────────

  /// Queue a new attribute on a draft schema.
  pub fn add_attribute(&mut self, attribute: Attribute) -> Result<()> {
    self.require_draft(attribute.schema_id)?;
    self.queue_insert(Pending::Attribute(attribute));
    Ok(())
  }

  /// Queue an edit to an attribute of a draft schema.
  pub fn update_attribute(&mut self, attribute: Attribute) -> Result<()> {
    self.require_draft(attribute.schema_id)?;

    let id = attribute.id;
    if let Some(&i) = self.index.get(&id) {
      let entry =
        self.pending[i].as_mut().ok_or(Error::AttributeNotFound(id))?;
      entry.object = Pending::Attribute(attribute);
      return Ok(());
    }

    let before =
      query_attribute(self.tx, id)?.ok_or(Error::AttributeNotFound(id))?;
    self.queue_update(Pending::Attribute(attribute), Pending::Attribute(before));
    Ok(())
  }

  /// Queue removal of an attribute from a draft schema.
  pub fn delete_attribute(&mut self, id: Uuid) -> Result<()> {
    if let Some(&i) = self.index.get(&id) {
      let (schema_id, is_new) = {
        let entry =
          self.pending[i].as_ref().ok_or(Error::AttributeNotFound(id))?;
        let Pending::Attribute(attribute) = &entry.object else {
          return Err(Error::AttributeNotFound(id));
        };
        (attribute.schema_id, matches!(entry.change, Change::New))
      };
      self.require_draft(schema_id)?;

      if is_new {
        // Added and removed in the same session: it never existed.
        self.pending[i] = None;
        self.index.remove(&id);
      } else if let Some(entry) = self.pending[i].as_mut() {
        entry.change = Change::Deleted;
      }
      return Ok(());
    }

    let current =
      query_attribute(self.tx, id)?.ok_or(Error::AttributeNotFound(id))?;
    self.require_draft(current.schema_id)?;
    self.queue_delete(Pending::Attribute(current));
    Ok(())
  }

  // ── Entities ──────────────────────────────────────────────────────────────

  /// Queue a new entity. The entity's schema version must be published.
  pub fn add_entity(&mut self, entity: Entity) -> Result<()> {
    let schema = self.current_schema(entity.schema_id)?;
    if !schema.is_published() {
      return Err(cohort_core::Error::UnpublishedSchema(schema.name).into());
    }
    self.queue_insert(Pending::Entity(entity));
    Ok(())
  }

  /// Queue an edit to an entity. State-machine enforcement happens at flush.
  pub fn update_entity(&mut self, entity: Entity) -> Result<()> {
    let id = entity.id;
    if let Some(&i) = self.index.get(&id) {
      let entry =
        self.pending[i].as_mut().ok_or(Error::EntityNotFound(id))?;
      entry.object = Pending::Entity(entity);
      return Ok(());
    }

    let before =
      query_entity(self.tx, id)?.ok_or(Error::EntityNotFound(id))?;
    self.queue_update(Pending::Entity(entity), Pending::Entity(before));
    Ok(())
  }

  /// Queue deletion of an entity. Its value rows go with it; the audit trail
  /// keeps two terminal revisions recording who deleted it.
  pub fn delete_entity(&mut self, id: Uuid) -> Result<()> {
    if let Some(&i) = self.index.get(&id) {
      let is_new = matches!(
        self.pending[i].as_ref().ok_or(Error::EntityNotFound(id))?.change,
        Change::New
      );
      if is_new {
        self.pending[i] = None;
        self.index.remove(&id);
      } else if let Some(entry) = self.pending[i].as_mut() {
        entry.change = Change::Deleted;
      }
      return Ok(());
    }

    let current =
      query_entity(self.tx, id)?.ok_or(Error::EntityNotFound(id))?;
    self.queue_delete(Pending::Entity(current));
    Ok(())
  }

  // ── Values ────────────────────────────────────────────────────────────────

  /// Replace the stored values for one (entity, attribute) pair. Validation
  /// (type-table match, collection arity, choice vocabulary) runs at flush,
  /// after pending attributes are resolvable.
  pub fn set_values(
    &mut self,
    entity_id: Uuid,
    attribute_id: Uuid,
    values: Vec<Value>,
  ) -> Result<()> {
    self.values.push(ValueWrite { entity_id, attribute_id, values });
    Ok(())
  }

  /// Convenience for scalar attributes.
  pub fn set_value(
    &mut self,
    entity_id: Uuid,
    attribute_id: Uuid,
    value: Value,
  ) -> Result<()> {
    self.set_values(entity_id, attribute_id, vec![value])
  }

  // ── Queueing internals ────────────────────────────────────────────────────

  fn queue_insert(&mut self, object: Pending) {
    let id = object.id();
    match self.index.get(&id) {
      Some(&i) => {
        if let Some(entry) = self.pending[i].as_mut() {
          entry.object = object;
        }
      }
      None => {
        self.index.insert(id, self.pending.len());
        self.pending.push(Some(PendingEntry { object, change: Change::New }));
      }
    }
  }

  fn queue_update(&mut self, object: Pending, before: Pending) {
    self.index.insert(object.id(), self.pending.len());
    self
      .pending
      .push(Some(PendingEntry { object, change: Change::Dirty { before } }));
  }

  fn queue_delete(&mut self, object: Pending) {
    self.index.insert(object.id(), self.pending.len());
    self.pending.push(Some(PendingEntry { object, change: Change::Deleted }));
  }

  /// The in-session image of a schema row: the pending payload when one is
  /// queued, otherwise the committed row.
  fn current_schema(&self, id: Uuid) -> Result<Schema> {
    if let Some(&i) = self.index.get(&id) {
      if let Some(PendingEntry { object: Pending::Schema(s), change }) =
        self.pending[i].as_ref()
      {
        if change.state() == ChangeState::Deleted {
          return Err(Error::SchemaMissing(id));
        }
        return Ok(s.clone());
      }
    }
    query_schema(self.tx, id)?.ok_or(Error::SchemaMissing(id))
  }

  fn current_attribute(&self, id: Uuid) -> Result<Attribute> {
    if let Some(&i) = self.index.get(&id) {
      if let Some(PendingEntry { object: Pending::Attribute(a), change }) =
        self.pending[i].as_ref()
      {
        if change.state() == ChangeState::Deleted {
          return Err(Error::AttributeNotFound(id));
        }
        return Ok(a.clone());
      }
    }
    query_attribute(self.tx, id)?.ok_or(Error::AttributeNotFound(id))
  }

  fn require_draft(&self, schema_id: Uuid) -> Result<()> {
    let schema = self.current_schema(schema_id)?;
    if schema.is_published() {
      return Err(Error::SchemaFrozen(schema.name));
    }
    Ok(())
  }

  // ── Flush ─────────────────────────────────────────────────────────────────

  /// Run the dispatch pipeline over the pending set and apply SQL, all
  /// within the enclosing transaction. Called once, just before commit.
  pub(crate) fn flush(&mut self) -> Result<()> {
    let now = Utc::now();
    let completion = self.completion.clone();
    let ctx = FlushContext {
      user: &self.user,
      now,
      completion: completion.as_deref(),
    };

    let entries: Vec<PendingEntry> =
      std::mem::take(&mut self.pending).into_iter().flatten().collect();
    self.index.clear();
    let pending_count = entries.len();

    let mut revisions: Vec<Revision> = Vec::new();
    for mut entry in entries {
      revisions.extend(dispatch(&mut entry.object, &entry.change, &ctx)?);
      self.apply(&entry)?;
    }

    let writes = std::mem::take(&mut self.values);
    for write in &writes {
      self.apply_values(write)?;
    }

    let revision_count = revisions.len();
    for revision in &revisions {
      self.insert_revision(revision)?;
    }

    debug!(
      user = %self.user,
      pending = pending_count,
      values = writes.len(),
      revisions = revision_count,
      "flush complete"
    );
    Ok(())
  }

  fn apply(&self, entry: &PendingEntry) -> Result<()> {
    match (&entry.object, entry.change.state()) {
      (Pending::Schema(s), ChangeState::New) => self.insert_schema(s),
      (Pending::Schema(s), ChangeState::Dirty) => self.update_schema_row(s),
      (Pending::Schema(s), ChangeState::Deleted) => {
        self.tx.execute(
          "DELETE FROM schema WHERE id = ?1",
          rusqlite::params![encode_uuid(s.id)],
        )?;
        Ok(())
      }
      (Pending::Attribute(a), ChangeState::New) => self.insert_attribute(a),
      (Pending::Attribute(a), ChangeState::Dirty) => self.update_attribute_row(a),
      (Pending::Attribute(a), ChangeState::Deleted) => {
        self.tx.execute(
          "DELETE FROM attribute WHERE id = ?1",
          rusqlite::params![encode_uuid(a.id)],
        )?;
        Ok(())
      }
      (Pending::Entity(e), ChangeState::New) => self.insert_entity(e),
      (Pending::Entity(e), ChangeState::Dirty) => self.update_entity_row(e),
      (Pending::Entity(e), ChangeState::Deleted) => {
        self.tx.execute(
          "DELETE FROM entity WHERE id = ?1",
          rusqlite::params![encode_uuid(e.id)],
        )?;
        Ok(())
      }
    }
  }

  fn insert_schema(&self, s: &Schema) -> Result<()> {
    self.tx.execute(
      "INSERT INTO schema (id, name, title, publish_date, is_inline,
                           parent_attribute_id, create_date, create_user,
                           modify_date, modify_user)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
      rusqlite::params![
        encode_uuid(s.id),
        s.name,
        s.title,
        s.publish_date.map(encode_date),
        s.is_inline,
        s.parent_attribute_id.map(encode_uuid),
        encode_dt(s.metadata.create_date),
        s.metadata.create_user,
        encode_dt(s.metadata.modify_date),
        s.metadata.modify_user,
      ],
    )?;
    Ok(())
  }

  fn update_schema_row(&self, s: &Schema) -> Result<()> {
    self.tx.execute(
      "UPDATE schema SET name = ?2, title = ?3, publish_date = ?4,
                         is_inline = ?5, parent_attribute_id = ?6,
                         modify_date = ?7, modify_user = ?8
       WHERE id = ?1",
      rusqlite::params![
        encode_uuid(s.id),
        s.name,
        s.title,
        s.publish_date.map(encode_date),
        s.is_inline,
        s.parent_attribute_id.map(encode_uuid),
        encode_dt(s.metadata.modify_date),
        s.metadata.modify_user,
      ],
    )?;
    Ok(())
  }

  fn insert_attribute(&self, a: &Attribute) -> Result<()> {
    self.tx.execute(
      "INSERT INTO attribute (id, schema_id, name, title, type, ord,
                              is_collection, checksum, object_schema_id,
                              create_date, create_user, modify_date, modify_user)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
      rusqlite::params![
        encode_uuid(a.id),
        encode_uuid(a.schema_id),
        a.name,
        a.title,
        a.ty.as_str(),
        a.order,
        a.is_collection,
        a.checksum,
        a.object_schema_id.map(encode_uuid),
        encode_dt(a.metadata.create_date),
        a.metadata.create_user,
        encode_dt(a.metadata.modify_date),
        a.metadata.modify_user,
      ],
    )?;
    self.insert_choices(a)
  }

  fn update_attribute_row(&self, a: &Attribute) -> Result<()> {
    self.tx.execute(
      "UPDATE attribute SET schema_id = ?2, name = ?3, title = ?4, type = ?5,
                            ord = ?6, is_collection = ?7, checksum = ?8,
                            object_schema_id = ?9, modify_date = ?10,
                            modify_user = ?11
       WHERE id = ?1",
      rusqlite::params![
        encode_uuid(a.id),
        encode_uuid(a.schema_id),
        a.name,
        a.title,
        a.ty.as_str(),
        a.order,
        a.is_collection,
        a.checksum,
        a.object_schema_id.map(encode_uuid),
        encode_dt(a.metadata.modify_date),
        a.metadata.modify_user,
      ],
    )?;
    self.tx.execute(
      "DELETE FROM choice WHERE attribute_id = ?1",
      rusqlite::params![encode_uuid(a.id)],
    )?;
    self.insert_choices(a)
  }

  fn insert_choices(&self, a: &Attribute) -> Result<()> {
    for choice in &a.choices {
      self.tx.execute(
        "INSERT INTO choice (attribute_id, ord, value, title)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![encode_uuid(a.id), choice.order, choice.value, choice.title],
      )?;
    }
    Ok(())
  }

  fn insert_entity(&self, e: &Entity) -> Result<()> {
    self.tx.execute(
      "INSERT INTO entity (id, schema_id, name, collect_date, state, is_null,
                           create_date, create_user, modify_date, modify_user)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
      rusqlite::params![
        encode_uuid(e.id),
        encode_uuid(e.schema_id),
        e.name,
        encode_date(e.collect_date),
        e.state.as_str(),
        e.is_null,
        encode_dt(e.metadata.create_date),
        e.metadata.create_user,
        encode_dt(e.metadata.modify_date),
        e.metadata.modify_user,
      ],
    )?;
    Ok(())
  }

  fn update_entity_row(&self, e: &Entity) -> Result<()> {
    self.tx.execute(
      "UPDATE entity SET name = ?2, collect_date = ?3, state = ?4,
                         is_null = ?5, modify_date = ?6, modify_user = ?7
       WHERE id = ?1",
      rusqlite::params![
        encode_uuid(e.id),
        e.name,
        encode_date(e.collect_date),
        e.state.as_str(),
        e.is_null,
        encode_dt(e.metadata.modify_date),
        e.metadata.modify_user,
      ],
    )?;
    Ok(())
  }

  fn apply_values(&self, write: &ValueWrite) -> Result<()> {
    let attribute = self.current_attribute(write.attribute_id)?;

    if write.values.len() > 1 && !attribute.is_collection {
      return Err(Error::NotCollection(attribute.name));
    }
    for value in &write.values {
      if value.attribute_type() != attribute.ty {
        return Err(Error::TypeMismatch {
          attribute: attribute.name.clone(),
          expected:  attribute.ty.as_str().to_owned(),
          got:       value.attribute_type().as_str().to_owned(),
        });
      }
      if let Value::Choice(v) = value {
        if !attribute.choices.iter().any(|c| &c.value == v) {
          return Err(Error::UnknownChoice {
            attribute: attribute.name.clone(),
            value:     v.clone(),
          });
        }
      }
    }

    let table = self
      .registry
      .entry(attribute.ty)
      .map_err(Error::Core)?
      .table
      .clone();
    let entity_str = encode_uuid(write.entity_id);
    let attribute_str = encode_uuid(write.attribute_id);

    self.tx.execute(
      &format!("DELETE FROM {table} WHERE entity_id = ?1 AND attribute_id = ?2"),
      rusqlite::params![entity_str, attribute_str],
    )?;
    for value in &write.values {
      self.tx.execute(
        &format!(
          "INSERT INTO {table} (entity_id, attribute_id, value) VALUES (?1, ?2, ?3)"
        ),
        rusqlite::params![entity_str, attribute_str, encode_value(value)],
      )?;
    }
    Ok(())
  }

  fn insert_revision(&self, revision: &Revision) -> Result<()> {
    match &revision.snapshot {
      RevisionSnapshot::Entity(e) => {
        self.tx.execute(
          "INSERT INTO entity_audit (id, schema_id, name, collect_date, state,
                                     is_null, create_date, create_user,
                                     modify_date, modify_user, deleted,
                                     changed_by, changed_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
          rusqlite::params![
            encode_uuid(e.id),
            encode_uuid(e.schema_id),
            e.name,
            encode_date(e.collect_date),
            e.state.as_str(),
            e.is_null,
            encode_dt(e.metadata.create_date),
            e.metadata.create_user,
            encode_dt(e.metadata.modify_date),
            e.metadata.modify_user,
            revision.deleted,
            revision.changed_by,
            encode_dt(revision.changed_at),
          ],
        )?;
      }
      RevisionSnapshot::Attribute(a) => {
        self.tx.execute(
          "INSERT INTO attribute_audit (id, schema_id, name, title, type, ord,
                                        is_collection, checksum,
                                        object_schema_id, create_date,
                                        create_user, modify_date, modify_user,
                                        deleted, changed_by, changed_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
          rusqlite::params![
            encode_uuid(a.id),
            encode_uuid(a.schema_id),
            a.name,
            a.title,
            a.ty.as_str(),
            a.order,
            a.is_collection,
            a.checksum,
            a.object_schema_id.map(encode_uuid),
            encode_dt(a.metadata.create_date),
            a.metadata.create_user,
            encode_dt(a.metadata.modify_date),
            a.metadata.modify_user,
            revision.deleted,
            revision.changed_by,
            encode_dt(revision.changed_at),
          ],
        )?;
      }
    }
    Ok(())
  }
}

// ─── Plain queries ───────────────────────────────────────────────────────────

fn query_schema(conn: &rusqlite::Connection, id: Uuid) -> Result<Option<Schema>> {
  let raw = conn
    .query_row(
      "SELECT id, name, title, publish_date, is_inline, parent_attribute_id,
              create_date, create_user, modify_date, modify_user
       FROM schema WHERE id = ?1",
      rusqlite::params![encode_uuid(id)],
      RawSchema::from_row,
    )
    .optional()?;
  raw.map(RawSchema::into_schema).transpose()
}

fn query_choices(conn: &rusqlite::Connection, attribute_id: &str) -> Result<Vec<Choice>> {
  let mut stmt = conn.prepare(
    "SELECT ord, value, title FROM choice WHERE attribute_id = ?1 ORDER BY ord",
  )?;
  let choices = stmt
    .query_map(rusqlite::params![attribute_id], |row| {
      Ok(Choice {
        order: row.get(0)?,
        value: row.get(1)?,
        title: row.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(choices)
}

fn query_attribute(conn: &rusqlite::Connection, id: Uuid) -> Result<Option<Attribute>> {
  let id_str = encode_uuid(id);
  let raw = conn
    .query_row(
      "SELECT id, schema_id, name, title, type, ord, is_collection, checksum,
              object_schema_id, create_date, create_user, modify_date, modify_user
       FROM attribute WHERE id = ?1",
      rusqlite::params![id_str],
      RawAttribute::from_row,
    )
    .optional()?;

  match raw {
    Some(raw) => {
      let choices = query_choices(conn, &id_str)?;
      Ok(Some(raw.into_attribute(choices)?))
    }
    None => Ok(None),
  }
}

fn query_entity(conn: &rusqlite::Connection, id: Uuid) -> Result<Option<Entity>> {
  let raw = conn
    .query_row(
      "SELECT id, schema_id, name, collect_date, state, is_null,
              create_date, create_user, modify_date, modify_user
       FROM entity WHERE id = ?1",
      rusqlite::params![encode_uuid(id)],
      RawEntity::from_row,
    )
    .optional()?;
  raw.map(RawEntity::into_entity).transpose()
}

fn query_entity_revisions(conn: &rusqlite::Connection, id: &str) -> Result<Vec<Revision>> {
  let mut stmt = conn.prepare(
    "SELECT id, schema_id, name, collect_date, state, is_null,
            create_date, create_user, modify_date, modify_user,
            deleted, changed_by, changed_at
     FROM entity_audit WHERE id = ?1 ORDER BY rowid",
  )?;
  let raws = stmt
    .query_map(rusqlite::params![id], |row| {
      let raw = RawEntity::from_row(row)?;
      let deleted: bool = row.get(10)?;
      let changed_by: String = row.get(11)?;
      let changed_at: String = row.get(12)?;
      Ok((raw, deleted, changed_by, changed_at))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raws
    .into_iter()
    .map(|(raw, deleted, changed_by, changed_at)| {
      Ok(Revision {
        snapshot: RevisionSnapshot::Entity(raw.into_entity()?),
        deleted,
        changed_by,
        changed_at: decode_dt(&changed_at)?,
      })
    })
    .collect()
}

fn query_attribute_revisions(conn: &rusqlite::Connection, id: &str) -> Result<Vec<Revision>> {
  let mut stmt = conn.prepare(
    "SELECT id, schema_id, name, title, type, ord, is_collection, checksum,
            object_schema_id, create_date, create_user, modify_date, modify_user,
            deleted, changed_by, changed_at
     FROM attribute_audit WHERE id = ?1 ORDER BY rowid",
  )?;
  let raws = stmt
    .query_map(rusqlite::params![id], |row| {
      let raw = RawAttribute::from_row(row)?;
      let deleted: bool = row.get(13)?;
      let changed_by: String = row.get(14)?;
      let changed_at: String = row.get(15)?;
      Ok((raw, deleted, changed_by, changed_at))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raws
    .into_iter()
    .map(|(raw, deleted, changed_by, changed_at)| {
      Ok(Revision {
        // Audit snapshots don't re-load choices; the checksum already pins
        // the vocabulary the version had.
        snapshot: RevisionSnapshot::Attribute(raw.into_attribute(Vec::new())?),
        deleted,
        changed_by,
        changed_at: decode_dt(&changed_at)?,
      })
    })
    .collect()
}

// ─── Lineage source ──────────────────────────────────────────────────────────

/// [`SchemaSource`] over a live connection, used by the planner.
struct SqliteSource<'a> {
  conn: &'a rusqlite::Connection,
}

impl SchemaSource for SqliteSource<'_> {
  type Error = Error;

  fn schema_lineage(&self, name: &str) -> Result<Vec<Schema>> {
    let mut stmt = self.conn.prepare(
      "SELECT id, name, title, publish_date, is_inline, parent_attribute_id,
              create_date, create_user, modify_date, modify_user
       FROM schema
       WHERE name = ?1 AND publish_date IS NOT NULL
       ORDER BY publish_date ASC",
    )?;
    let raws = stmt
      .query_map(rusqlite::params![name], RawSchema::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    if raws.is_empty() {
      let exists: bool = self
        .conn
        .query_row(
          "SELECT 1 FROM schema WHERE name = ?1 LIMIT 1",
          rusqlite::params![name],
          |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
      if !exists {
        return Err(cohort_core::Error::SchemaNotFound(name.to_owned()).into());
      }
    }

    raws.into_iter().map(RawSchema::into_schema).collect()
  }

  fn published_attributes(&self, schema_name: &str) -> Result<Vec<AttributeVersion>> {
    // Lineages sort by the position the attribute name holds in its most
    // recent hosting version, then oldest to newest within the lineage.
    let mut stmt = self.conn.prepare(
      "SELECT a.id, a.schema_id, a.name, a.title, a.type, a.ord,
              a.is_collection, a.checksum, a.object_schema_id,
              a.create_date, a.create_user, a.modify_date, a.modify_user,
              s.name, s.publish_date, s.is_inline, s.parent_attribute_id,
              os.name
       FROM attribute a
       JOIN schema s ON s.id = a.schema_id
       LEFT JOIN schema os ON os.id = a.object_schema_id
       WHERE s.name = ?1 AND s.publish_date IS NOT NULL
       ORDER BY (SELECT ra.ord
                 FROM attribute ra
                 JOIN schema rs ON rs.id = ra.schema_id
                 WHERE rs.name = ?1
                   AND rs.publish_date IS NOT NULL
                   AND ra.name = a.name
                 ORDER BY rs.publish_date DESC
                 LIMIT 1) ASC,
                s.publish_date ASC",
    )?;

    struct RawVersion {
      attribute:     RawAttribute,
      schema_name:   String,
      publish_date:  Option<String>,
      is_inline:     bool,
      parent_id:     Option<String>,
      object_schema: Option<String>,
    }

    let raws = stmt
      .query_map(rusqlite::params![schema_name], |row| {
        Ok(RawVersion {
          attribute:     RawAttribute::from_row(row)?,
          schema_name:   row.get(13)?,
          publish_date:  row.get(14)?,
          is_inline:     row.get(15)?,
          parent_id:     row.get(16)?,
          object_schema: row.get(17)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    raws
      .into_iter()
      .map(|raw| {
        let schema_id = decode_uuid(&raw.attribute.schema_id)?;
        let choices = query_choices(self.conn, &raw.attribute.id)?;
        Ok(AttributeVersion {
          attribute: raw.attribute.into_attribute(choices)?,
          schema:    SchemaSummary {
            id: schema_id,
            name: raw.schema_name,
            publish_date: raw
              .publish_date
              .as_deref()
              .map(crate::encode::decode_date)
              .transpose()?,
            is_inline: raw.is_inline,
            parent_attribute_id: raw
              .parent_id
              .as_deref()
              .map(decode_uuid)
              .transpose()?,
          },
          object_schema: raw.object_schema,
        })
      })
      .collect()
  }
}

// ─── Report rows ─────────────────────────────────────────────────────────────

/// One materialised report row: the entity id plus one value per plan
/// column, coerced to JSON values (flag columns become booleans).
#[derive(Debug, Clone)]
pub struct ReportRow {
  pub entity_id: Uuid,
  columns:       Vec<(String, serde_json::Value)>,
}

impl ReportRow {
  pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
    self
      .columns
      .iter()
      .find(|(name, _)| name == column)
      .map(|(_, value)| value)
  }

  pub fn columns(&self) -> &[(String, serde_json::Value)] { &self.columns }
}

fn execute_report(conn: &rusqlite::Connection, report: &Report) -> Result<Vec<ReportRow>> {
  let mut stmt = conn.prepare(report.sql())?;
  let width = 1 + report.columns().len();

  let raw_rows = stmt
    .query_map([], |row| {
      let mut values = Vec::with_capacity(width);
      for i in 0..width {
        values.push(row.get::<_, rusqlite::types::Value>(i)?);
      }
      Ok(values)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raw_rows
    .into_iter()
    .map(|mut values| {
      let rest = values.split_off(1);
      let entity_id = match values.pop() {
        Some(rusqlite::types::Value::Text(s)) => decode_uuid(&s)?,
        other => {
          return Err(Error::DateParse(format!(
            "unexpected entity_id column: {other:?}"
          )));
        }
      };

      let columns = report
        .columns()
        .iter()
        .zip(rest)
        .map(|(column, value)| (column.name.clone(), coerce(column, value)))
        .collect();

      Ok(ReportRow { entity_id, columns })
    })
    .collect()
}

/// Map a raw SQLite value onto the column's semantic JSON shape.
fn coerce(
  column: &cohort_core::report::ReportColumn,
  value: rusqlite::types::Value,
) -> serde_json::Value {
  use rusqlite::types::Value as Sql;
  use serde_json::Value as Json;

  let boolish =
    column.kind == ColumnKind::ChoiceFlag || column.ty == AttributeType::Boolean;

  match value {
    Sql::Null => Json::Null,
    Sql::Integer(i) if boolish => Json::Bool(i != 0),
    Sql::Integer(i) => Json::from(i),
    Sql::Real(f) => serde_json::Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null),
    Sql::Text(s) => Json::String(s),
    Sql::Blob(_) => Json::Null,
  }
}
