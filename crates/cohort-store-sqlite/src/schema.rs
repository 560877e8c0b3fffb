//! SQL schema for the Cohort SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Form definitions. Rows sharing a name form a lineage; a row is frozen the
-- moment publish_date is set.
CREATE TABLE IF NOT EXISTS schema (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    title               TEXT NOT NULL,
    publish_date        TEXT,            -- ISO date; NULL while in draft
    is_inline           INTEGER NOT NULL DEFAULT 0,
    -- The object attribute in the parent version embedding this sub-schema.
    -- No FK: the attribute row is created after its sub-schema.
    parent_attribute_id TEXT,
    create_date         TEXT NOT NULL,
    create_user         TEXT NOT NULL,
    modify_date         TEXT NOT NULL,
    modify_user         TEXT NOT NULL,
    UNIQUE (name, publish_date)
);

CREATE TABLE IF NOT EXISTS attribute (
    id               TEXT PRIMARY KEY,
    schema_id        TEXT NOT NULL REFERENCES schema(id),
    name             TEXT NOT NULL,
    title            TEXT NOT NULL,
    type             TEXT NOT NULL,
    ord              INTEGER NOT NULL,
    is_collection    INTEGER NOT NULL DEFAULT 0,
    checksum         TEXT,               -- assigned at flush, never by callers
    object_schema_id TEXT REFERENCES schema(id),
    create_date      TEXT NOT NULL,
    create_user      TEXT NOT NULL,
    modify_date      TEXT NOT NULL,
    modify_user      TEXT NOT NULL,
    UNIQUE (schema_id, name)
);

CREATE TABLE IF NOT EXISTS choice (
    attribute_id TEXT NOT NULL REFERENCES attribute(id) ON DELETE CASCADE,
    ord          INTEGER NOT NULL,
    value        TEXT NOT NULL,
    title        TEXT NOT NULL,
    PRIMARY KEY (attribute_id, value)
);

CREATE TABLE IF NOT EXISTS entity (
    id           TEXT PRIMARY KEY,
    schema_id    TEXT NOT NULL REFERENCES schema(id),
    name         TEXT NOT NULL,
    collect_date TEXT NOT NULL,
    state        TEXT NOT NULL DEFAULT 'pending-entry',
    is_null      INTEGER NOT NULL DEFAULT 0,
    create_date  TEXT NOT NULL,
    create_user  TEXT NOT NULL,
    modify_date  TEXT NOT NULL,
    modify_user  TEXT NOT NULL
);

-- One value table per scalar type. A row's table must match its attribute's
-- declared type; the session validates before writing.
CREATE TABLE IF NOT EXISTS value_text (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS value_integer (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS value_decimal (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS value_boolean (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS value_date (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS value_datetime (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS value_choice (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        TEXT NOT NULL
);

-- Association rows: value is the child entity id of the embedded sub-schema.
CREATE TABLE IF NOT EXISTS value_object (
    id           INTEGER PRIMARY KEY,
    entity_id    TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
    attribute_id TEXT NOT NULL REFERENCES attribute(id),
    value        TEXT NOT NULL REFERENCES entity(id)
);

-- Audit mirrors are strictly append-only and carry no constraints, so
-- snapshots survive deletion of the rows they describe.
CREATE TABLE IF NOT EXISTS entity_audit (
    id           TEXT NOT NULL,
    schema_id    TEXT NOT NULL,
    name         TEXT NOT NULL,
    collect_date TEXT NOT NULL,
    state        TEXT NOT NULL,
    is_null      INTEGER NOT NULL,
    create_date  TEXT NOT NULL,
    create_user  TEXT NOT NULL,
    modify_date  TEXT NOT NULL,
    modify_user  TEXT NOT NULL,
    deleted      INTEGER NOT NULL,
    changed_by   TEXT NOT NULL,
    changed_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attribute_audit (
    id               TEXT NOT NULL,
    schema_id        TEXT NOT NULL,
    name             TEXT NOT NULL,
    title            TEXT NOT NULL,
    type             TEXT NOT NULL,
    ord              INTEGER NOT NULL,
    is_collection    INTEGER NOT NULL,
    checksum         TEXT,
    object_schema_id TEXT,
    create_date      TEXT NOT NULL,
    create_user      TEXT NOT NULL,
    modify_date      TEXT NOT NULL,
    modify_user      TEXT NOT NULL,
    deleted          INTEGER NOT NULL,
    changed_by       TEXT NOT NULL,
    changed_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS schema_name_idx        ON schema(name);
CREATE INDEX IF NOT EXISTS attribute_schema_idx   ON attribute(schema_id);
CREATE INDEX IF NOT EXISTS entity_schema_idx      ON entity(schema_id);
CREATE INDEX IF NOT EXISTS value_text_idx         ON value_text(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS value_integer_idx      ON value_integer(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS value_decimal_idx      ON value_decimal(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS value_boolean_idx      ON value_boolean(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS value_date_idx         ON value_date(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS value_datetime_idx     ON value_datetime(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS value_choice_idx       ON value_choice(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS value_object_idx       ON value_object(entity_id, attribute_id);
CREATE INDEX IF NOT EXISTS entity_audit_idx       ON entity_audit(id);
CREATE INDEX IF NOT EXISTS attribute_audit_idx    ON attribute_audit(id);

PRAGMA user_version = 1;
";
