use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS approvals (
    category TEXT NOT NULL,
    handler_target TEXT NOT NULL,
    handler_selector BLOB NOT NULL CHECK (length(handler_selector) = 4),
    label TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    PRIMARY KEY (category, handler_target, handler_selector)
);

CREATE TABLE IF NOT EXISTS bundles (
    bundle_id INTEGER PRIMARY KEY,
    commands BLOB NOT NULL,
    immutable INTEGER NOT NULL DEFAULT 0,
    conflict_group INTEGER,
    expires_at INTEGER,
    enabled INTEGER NOT NULL DEFAULT 1,
    metadata_set INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chain_entries (
    tenant BLOB NOT NULL CHECK (length(tenant) = 16),
    category TEXT NOT NULL,
    position INTEGER NOT NULL,
    handler_target TEXT NOT NULL,
    handler_selector BLOB NOT NULL CHECK (length(handler_selector) = 4),
    static_data BLOB NOT NULL,
    mode TEXT NOT NULL,
    PRIMARY KEY (tenant, category, position)
);

CREATE TABLE IF NOT EXISTS provenance (
    tenant BLOB NOT NULL CHECK (length(tenant) = 16),
    category TEXT NOT NULL,
    handler_target TEXT NOT NULL,
    handler_selector BLOB NOT NULL CHECK (length(handler_selector) = 4),
    bundle_id INTEGER NOT NULL,
    PRIMARY KEY (tenant, category, handler_target, handler_selector)
);

CREATE TABLE IF NOT EXISTS locks (
    tenant BLOB NOT NULL CHECK (length(tenant) = 16),
    category TEXT NOT NULL,
    handler_target TEXT NOT NULL,
    handler_selector BLOB NOT NULL CHECK (length(handler_selector) = 4),
    PRIMARY KEY (tenant, category, handler_target, handler_selector)
);

CREATE TABLE IF NOT EXISTS conflicts (
    tenant BLOB NOT NULL CHECK (length(tenant) = 16),
    conflict_group INTEGER NOT NULL,
    PRIMARY KEY (tenant, conflict_group)
);

CREATE TABLE IF NOT EXISTS tenants (
    tenant BLOB PRIMARY KEY CHECK (length(tenant) = 16),
    registered_at INTEGER NOT NULL DEFAULT (unixepoch())
);

CREATE TABLE IF NOT EXISTS tenant_admins (
    tenant BLOB NOT NULL CHECK (length(tenant) = 16),
    principal BLOB NOT NULL CHECK (length(principal) = 16),
    PRIMARY KEY (tenant, principal)
);
";
