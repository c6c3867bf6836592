use rusqlite::{Connection, OptionalExtension};

use hookchain_core::{
    clock::Timestamp,
    command::{commands_from_msgpack, commands_to_msgpack, BundleCommand, Command, InvocationMode},
    ids::*,
};

use crate::error::StorageError;
use crate::traits::{ApplyWrites, ApprovalRecord, BundleRecord, ChainReplacement, Storage};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn selector_bytes(handler: &HandlerRef) -> Vec<u8> {
    handler.selector().to_vec()
}

fn read_handler(target: String, selector: Vec<u8>) -> Result<HandlerRef, StorageError> {
    Ok(HandlerRef::new(target, to_array::<4>(selector, "handler_selector")?))
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn append_entry(
    tx: &rusqlite::Transaction,
    tenant: TenantId,
    command: &Command,
) -> Result<(), StorageError> {
    let next: i64 = tx.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM chain_entries WHERE tenant = ?1 AND category = ?2",
        rusqlite::params![tenant.as_bytes().as_slice(), command.category.as_str()],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO chain_entries (tenant, category, position, handler_target, handler_selector, static_data, mode) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            tenant.as_bytes().as_slice(),
            command.category.as_str(),
            next,
            command.handler.target(),
            selector_bytes(&command.handler),
            command.static_data,
            command.mode.as_str(),
        ],
    )?;
    Ok(())
}

impl Storage for SqliteStorage {
    fn get_approval(
        &self,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<Option<ApprovalRecord>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT label, enabled FROM approvals WHERE category = ?1 AND handler_target = ?2 AND handler_selector = ?3",
                rusqlite::params![category.as_str(), handler.target(), selector_bytes(handler)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(label, enabled)| ApprovalRecord {
            category: category.clone(),
            handler: handler.clone(),
            label,
            enabled,
        }))
    }

    fn put_approvals(&mut self, records: &[ApprovalRecord]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO approvals (category, handler_target, handler_selector, label, enabled) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(category, handler_target, handler_selector) DO UPDATE SET label = excluded.label, enabled = excluded.enabled",
                rusqlite::params![
                    record.category.as_str(),
                    record.handler.target(),
                    selector_bytes(&record.handler),
                    record.label,
                    record.enabled,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_bundle(&self, bundle_id: BundleId) -> Result<Option<BundleRecord>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT commands, immutable, conflict_group, expires_at, enabled, metadata_set FROM bundles WHERE bundle_id = ?1",
                rusqlite::params![bundle_id.get() as i64],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((commands, immutable, group, expires_at, enabled, metadata_set)) => {
                let commands: Vec<BundleCommand> = commands_from_msgpack(&commands)?;
                Ok(Some(BundleRecord {
                    bundle_id,
                    commands,
                    immutable,
                    conflict_group: ConflictGroup::normalize(
                        group.map(|g| ConflictGroup::new(g as u64)),
                    ),
                    expires_at: expires_at.map(|t| Timestamp::from_secs(t as u64)),
                    enabled,
                    metadata_set,
                }))
            }
            None => Ok(None),
        }
    }

    fn insert_bundle(&mut self, record: &BundleRecord) -> Result<(), StorageError> {
        let commands = commands_to_msgpack(&record.commands)?;
        let result = self.conn.execute(
            "INSERT INTO bundles (bundle_id, commands, immutable, conflict_group, expires_at, enabled, metadata_set) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.bundle_id.get() as i64,
                commands,
                record.immutable,
                record.conflict_group.map(|g| g.get() as i64),
                record.expires_at.map(|t| t.as_secs() as i64),
                record.enabled,
                record.metadata_set,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::BundleCollision {
                    bundle_id: record.bundle_id.to_string(),
                })
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn set_bundle_metadata(
        &mut self,
        bundle_id: BundleId,
        immutable: bool,
        conflict_group: Option<ConflictGroup>,
    ) -> Result<(), StorageError> {
        let updated = self.conn.execute(
            "UPDATE bundles SET immutable = ?1, conflict_group = ?2, metadata_set = 1 WHERE bundle_id = ?3",
            rusqlite::params![
                immutable,
                conflict_group.map(|g| g.get() as i64),
                bundle_id.get() as i64,
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("bundle {bundle_id}")));
        }
        Ok(())
    }

    fn revoke_bundle(&mut self, bundle_id: BundleId) -> Result<(), StorageError> {
        let empty = commands_to_msgpack::<BundleCommand>(&[])?;
        let updated = self.conn.execute(
            "UPDATE bundles SET enabled = 0, commands = ?1 WHERE bundle_id = ?2",
            rusqlite::params![empty, bundle_id.get() as i64],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("bundle {bundle_id}")));
        }
        Ok(())
    }

    fn get_chain(
        &self,
        tenant: TenantId,
        category: &Category,
    ) -> Result<Vec<Command>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT handler_target, handler_selector, static_data, mode FROM chain_entries
             WHERE tenant = ?1 AND category = ?2 ORDER BY position",
        )?;
        let rows: Vec<(String, Vec<u8>, Vec<u8>, String)> = stmt
            .query_map(
                rusqlite::params![tenant.as_bytes().as_slice(), category.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(target, selector, static_data, mode)| -> Result<Command, StorageError> {
                Ok(Command {
                    category: category.clone(),
                    handler: read_handler(target, selector)?,
                    static_data,
                    mode: InvocationMode::parse(&mode)?,
                })
            })
            .collect()
    }

    fn get_provenance(
        &self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<Option<BundleId>, StorageError> {
        let origin: Option<i64> = self
            .conn
            .query_row(
                "SELECT bundle_id FROM provenance WHERE tenant = ?1 AND category = ?2 AND handler_target = ?3 AND handler_selector = ?4",
                rusqlite::params![
                    tenant.as_bytes().as_slice(),
                    category.as_str(),
                    handler.target(),
                    selector_bytes(handler),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(origin.map(|id| BundleId::new(id as u64)))
    }

    fn get_lock(
        &self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM locks WHERE tenant = ?1 AND category = ?2 AND handler_target = ?3 AND handler_selector = ?4",
            rusqlite::params![
                tenant.as_bytes().as_slice(),
                category.as_str(),
                handler.target(),
                selector_bytes(handler),
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn set_lock(
        &mut self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO locks (tenant, category, handler_target, handler_selector) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                tenant.as_bytes().as_slice(),
                category.as_str(),
                handler.target(),
                selector_bytes(handler),
            ],
        )?;
        Ok(())
    }

    fn is_conflict_active(
        &self,
        tenant: TenantId,
        group: ConflictGroup,
    ) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM conflicts WHERE tenant = ?1 AND conflict_group = ?2",
            rusqlite::params![tenant.as_bytes().as_slice(), group.get() as i64],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn commit_apply(&mut self, writes: &ApplyWrites) -> Result<(), StorageError> {
        let tenant = writes.tenant;
        let tx = self.conn.transaction()?;

        for append in &writes.appends {
            let command = &append.command;
            append_entry(&tx, tenant, command)?;
            tx.execute(
                "INSERT INTO provenance (tenant, category, handler_target, handler_selector, bundle_id) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant, category, handler_target, handler_selector) DO UPDATE SET bundle_id = excluded.bundle_id",
                rusqlite::params![
                    tenant.as_bytes().as_slice(),
                    command.category.as_str(),
                    command.handler.target(),
                    selector_bytes(&command.handler),
                    append.origin.get() as i64,
                ],
            )?;
            if append.lock {
                tx.execute(
                    "INSERT OR IGNORE INTO locks (tenant, category, handler_target, handler_selector) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        tenant.as_bytes().as_slice(),
                        command.category.as_str(),
                        command.handler.target(),
                        selector_bytes(&command.handler),
                    ],
                )?;
            }
        }

        for group in &writes.conflict_groups {
            tx.execute(
                "INSERT OR IGNORE INTO conflicts (tenant, conflict_group) VALUES (?1, ?2)",
                rusqlite::params![tenant.as_bytes().as_slice(), group.get() as i64],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn replace_chain(&mut self, replacement: &ChainReplacement) -> Result<(), StorageError> {
        let tenant = replacement.tenant;
        let category = &replacement.category;
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM chain_entries WHERE tenant = ?1 AND category = ?2",
            rusqlite::params![tenant.as_bytes().as_slice(), category.as_str()],
        )?;
        for command in &replacement.commands {
            append_entry(&tx, tenant, command)?;
        }
        for handler in &replacement.dropped {
            tx.execute(
                "DELETE FROM provenance WHERE tenant = ?1 AND category = ?2 AND handler_target = ?3 AND handler_selector = ?4",
                rusqlite::params![
                    tenant.as_bytes().as_slice(),
                    category.as_str(),
                    handler.target(),
                    selector_bytes(handler),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn is_tenant_admin(
        &self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tenant_admins WHERE tenant = ?1 AND principal = ?2",
            rusqlite::params![tenant.as_bytes().as_slice(), principal.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn tenant_admin_count(&self, tenant: TenantId) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tenant_admins WHERE tenant = ?1",
            rusqlite::params![tenant.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn register_tenant(
        &mut self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO tenants (tenant) VALUES (?1)",
            rusqlite::params![tenant.as_bytes().as_slice()],
        )?;
        if inserted == 0 {
            return Err(StorageError::TenantAlreadyRegistered {
                tenant: tenant.to_string(),
            });
        }
        tx.execute(
            "INSERT INTO tenant_admins (tenant, principal) VALUES (?1, ?2)",
            rusqlite::params![tenant.as_bytes().as_slice(), principal.as_bytes().as_slice()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn add_tenant_admin(
        &mut self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tenant_admins (tenant, principal) VALUES (?1, ?2)",
            rusqlite::params![tenant.as_bytes().as_slice(), principal.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn remove_tenant_admin(
        &mut self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM tenant_admins WHERE tenant = ?1 AND principal = ?2",
            rusqlite::params![tenant.as_bytes().as_slice(), principal.as_bytes().as_slice()],
        )?;
        if removed == 0 {
            return Err(StorageError::NotFound(format!("admin {principal} of {tenant}")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}
