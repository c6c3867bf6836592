pub mod auth;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handler;
mod lock;
mod plan;
pub mod shared;

pub use auth::{AuthorizationDirectory, StaticDirectory};
pub use dispatch::{ChainSnapshot, DispatchReport, TypedCategory};
pub use error::EngineError;
pub use events::{EventLog, EventSink, RegistryEvent};
pub use handler::{handler_fn, Context, Handler, HandlerError, HandlerTable, Invocation, ResourceState};
pub use shared::SharedEngine;

use std::collections::HashSet;
use std::sync::Arc;

use hookchain_core::{
    command::{chain_hash, BundleCommand, Command},
    ids::*,
    Clock, EngineConfig, SystemClock, Timestamp,
};
use hookchain_storage::{ApprovalRecord, BundleRecord, ChainReplacement, SqliteStorage, Storage};
use tracing::{debug, info, warn};

use crate::lock::is_locked;
use crate::plan::plan_apply;

pub struct Engine {
    config: EngineConfig,
    storage: SqliteStorage,
    directory: Box<dyn AuthorizationDirectory>,
    clock: Box<dyn Clock>,
    handlers: HandlerTable,
    sinks: Vec<Box<dyn EventSink>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        storage: SqliteStorage,
        directory: impl AuthorizationDirectory + 'static,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            storage,
            directory: Box::new(directory),
            clock: Box::new(SystemClock),
            handlers: HandlerTable::new(),
            sinks: Vec::new(),
        })
    }

    /// Open the storage named by `config.database_path`, or an in-memory
    /// database when unset.
    pub fn open(
        config: EngineConfig,
        directory: impl AuthorizationDirectory + 'static,
    ) -> Result<Self, EngineError> {
        let storage = match &config.database_path {
            Some(path) => SqliteStorage::open(path)?,
            None => SqliteStorage::open_in_memory()?,
        };
        Self::new(config, storage, directory)
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn add_sink(&mut self, sink: impl EventSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_handler(&mut self, handler_ref: HandlerRef, handler: Arc<dyn Handler>) {
        debug!(handler = %handler_ref, "handler registered");
        self.handlers.register(handler_ref, handler);
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    fn emit(&self, event: RegistryEvent) {
        for sink in &self.sinks {
            sink.publish(&event);
        }
    }

    fn require_curator(&self, caller: PrincipalId, action: &'static str) -> Result<(), EngineError> {
        if self.directory.is_curator(caller) {
            Ok(())
        } else {
            warn!(principal = %caller, action, "curator check failed");
            Err(EngineError::Unauthorized {
                principal: caller,
                action,
            })
        }
    }

    fn is_admin(&self, tenant: TenantId, principal: PrincipalId) -> Result<bool, EngineError> {
        Ok(self.storage.is_tenant_admin(tenant, principal)?
            || self.directory.has_role(tenant, Role::TenantAdmin, principal))
    }

    fn require_tenant_admin(
        &self,
        tenant: TenantId,
        caller: PrincipalId,
        action: &'static str,
    ) -> Result<(), EngineError> {
        if self.is_admin(tenant, caller)? {
            Ok(())
        } else {
            warn!(principal = %caller, %tenant, action, "tenant admin check failed");
            Err(EngineError::Unauthorized {
                principal: caller,
                action,
            })
        }
    }

    // ========================================================================
    // Handler approvals
    // ========================================================================

    /// Approve (and enable) a handler for a category.
    pub fn approve_handler(
        &mut self,
        caller: PrincipalId,
        category: Category,
        handler: HandlerRef,
        label: &str,
    ) -> Result<(), EngineError> {
        self.approve_handlers(caller, &[category], &[handler], &[label.to_string()])
    }

    /// Batch form of `approve_handler`. The three lists are parallel.
    pub fn approve_handlers(
        &mut self,
        caller: PrincipalId,
        categories: &[Category],
        handlers: &[HandlerRef],
        labels: &[String],
    ) -> Result<(), EngineError> {
        self.require_curator(caller, "approve handlers")?;
        if categories.is_empty() {
            return Err(EngineError::EmptyInput("approval list"));
        }
        if categories.len() != handlers.len() || categories.len() != labels.len() {
            return Err(EngineError::LengthMismatch(format!(
                "{} categories, {} handlers, {} labels",
                categories.len(),
                handlers.len(),
                labels.len()
            )));
        }

        let records: Vec<ApprovalRecord> = categories
            .iter()
            .zip(handlers)
            .zip(labels)
            .map(|((category, handler), label)| ApprovalRecord {
                category: category.clone(),
                handler: handler.clone(),
                label: label.clone(),
                enabled: true,
            })
            .collect();
        self.storage.put_approvals(&records)?;

        for record in records {
            info!(category = %record.category, handler = %record.handler, label = %record.label, "handler approved");
            self.emit(RegistryEvent::ApprovalChanged {
                category: record.category,
                handler: record.handler,
                enabled: true,
            });
        }
        Ok(())
    }

    pub fn set_handler_enabled(
        &mut self,
        caller: PrincipalId,
        category: &Category,
        handler: &HandlerRef,
        enabled: bool,
    ) -> Result<(), EngineError> {
        self.require_curator(caller, "toggle handler approval")?;
        let mut record = self
            .storage
            .get_approval(category, handler)?
            .ok_or_else(|| EngineError::NotFound(format!("approval {category}/{handler}")))?;
        record.enabled = enabled;
        self.storage.put_approvals(std::slice::from_ref(&record))?;

        info!(%category, %handler, enabled, "handler approval changed");
        self.emit(RegistryEvent::ApprovalChanged {
            category: category.clone(),
            handler: handler.clone(),
            enabled,
        });
        Ok(())
    }

    pub fn is_approved(&self, category: &Category, handler: &HandlerRef) -> Result<bool, EngineError> {
        Ok(self
            .storage
            .get_approval(category, handler)?
            .is_some_and(|a| a.enabled))
    }

    pub fn handler_approval(
        &self,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<Option<ApprovalRecord>, EngineError> {
        Ok(self.storage.get_approval(category, handler)?)
    }

    fn require_approved(&self, category: &Category, handler: &HandlerRef) -> Result<(), EngineError> {
        if self.is_approved(category, handler)? {
            Ok(())
        } else {
            Err(EngineError::Unapproved {
                category: category.clone(),
                handler: handler.clone(),
            })
        }
    }

    // ========================================================================
    // Bundle store
    // ========================================================================

    pub fn create_bundle(
        &mut self,
        caller: PrincipalId,
        bundle_id: BundleId,
        commands: Vec<Command>,
        expires_at: Option<Timestamp>,
    ) -> Result<(), EngineError> {
        self.require_curator(caller, "create bundles")?;
        if self.storage.get_bundle(bundle_id)?.is_some() {
            return Err(EngineError::AlreadyExists(format!("bundle {bundle_id}")));
        }
        if commands.is_empty() {
            return Err(EngineError::EmptyBundle(bundle_id));
        }
        if commands.len() > self.config.max_commands_per_bundle {
            return Err(EngineError::TooLarge {
                count: commands.len(),
                max: self.config.max_commands_per_bundle,
            });
        }
        for command in &commands {
            self.require_approved(&command.category, &command.handler)?;
        }

        let record = BundleRecord {
            bundle_id,
            commands: commands.into_iter().map(BundleCommand::from_command).collect(),
            immutable: false,
            conflict_group: None,
            expires_at: expires_at.filter(|t| t.as_secs() != 0),
            enabled: true,
            metadata_set: false,
        };
        self.storage
            .insert_bundle(&record)
            .map_err(EngineError::from_storage)?;

        info!(bundle = %bundle_id, commands = record.commands.len(), "bundle created");
        self.emit(RegistryEvent::BundleCreated {
            bundle_id,
            command_count: record.commands.len(),
        });
        Ok(())
    }

    /// Fix a bundle's immutability and conflict group. Accepted once;
    /// repeating the same values is a no-op.
    pub fn set_bundle_metadata(
        &mut self,
        caller: PrincipalId,
        bundle_id: BundleId,
        immutable: bool,
        conflict_group: Option<ConflictGroup>,
    ) -> Result<(), EngineError> {
        self.require_curator(caller, "set bundle metadata")?;
        let conflict_group = ConflictGroup::normalize(conflict_group);
        let bundle = self
            .storage
            .get_bundle(bundle_id)?
            .filter(|b| b.enabled)
            .ok_or_else(|| EngineError::NotFound(format!("bundle {bundle_id}")))?;

        if bundle.metadata_set {
            if bundle.immutable == immutable && bundle.conflict_group == conflict_group {
                return Ok(());
            }
            return Err(EngineError::AlreadyExists(format!("metadata of bundle {bundle_id}")));
        }

        self.storage
            .set_bundle_metadata(bundle_id, immutable, conflict_group)
            .map_err(EngineError::from_storage)?;

        info!(bundle = %bundle_id, immutable, ?conflict_group, "bundle metadata set");
        self.emit(RegistryEvent::BundleMetadataSet {
            bundle_id,
            immutable,
            conflict_group,
        });
        Ok(())
    }

    /// Disable a bundle and discard its commands. Tenants that already
    /// applied it keep their chain entries.
    pub fn revoke_bundle(&mut self, caller: PrincipalId, bundle_id: BundleId) -> Result<(), EngineError> {
        self.require_curator(caller, "revoke bundles")?;
        let live = self.storage.get_bundle(bundle_id)?.is_some_and(|b| b.enabled);
        if !live {
            return Err(EngineError::NotFound(format!("bundle {bundle_id}")));
        }
        self.storage
            .revoke_bundle(bundle_id)
            .map_err(EngineError::from_storage)?;

        info!(bundle = %bundle_id, "bundle revoked");
        self.emit(RegistryEvent::BundleRevoked { bundle_id });
        Ok(())
    }

    pub fn get_bundle(&self, bundle_id: BundleId) -> Result<Option<BundleRecord>, EngineError> {
        Ok(self.storage.get_bundle(bundle_id)?)
    }

    // ========================================================================
    // Bundle application
    // ========================================================================

    /// Append every command of every bundle to the tenant's chains, in the
    /// given order. Validates the whole batch before writing anything.
    pub fn apply_bundles(
        &mut self,
        caller: PrincipalId,
        tenant: TenantId,
        bundle_ids: &[BundleId],
    ) -> Result<(), EngineError> {
        self.require_tenant_admin(tenant, caller, "apply bundles")?;
        let now = self.clock.now()?;

        let plan = match plan_apply(&self.storage, &self.config, now, tenant, bundle_ids) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(%tenant, ?bundle_ids, error = %e, "bundle application rejected");
                return Err(e);
            }
        };
        self.storage.commit_apply(&plan.writes)?;

        for bundle in plan.bundles {
            info!(%tenant, bundle = %bundle.bundle_id, category = %bundle.category, "bundle applied");
            self.emit(RegistryEvent::BundleApplied {
                tenant,
                bundle_id: bundle.bundle_id,
                category: bundle.category,
            });
        }
        Ok(())
    }

    pub fn is_conflict_active(&self, tenant: TenantId, group: ConflictGroup) -> Result<bool, EngineError> {
        Ok(self.storage.is_conflict_active(tenant, group)?)
    }

    // ========================================================================
    // Chain edits
    // ========================================================================

    pub fn get_chain(&self, tenant: TenantId, category: &Category) -> Result<Vec<Command>, EngineError> {
        Ok(self.storage.get_chain(tenant, category)?)
    }

    /// Replace a chain wholesale. Handlers new to the chain must be
    /// approved; every locked handler in the current chain must survive.
    pub fn set_chain(
        &mut self,
        caller: PrincipalId,
        tenant: TenantId,
        category: &Category,
        commands: Vec<Command>,
    ) -> Result<(), EngineError> {
        self.require_tenant_admin(tenant, caller, "edit chains")?;
        if commands.len() > self.config.max_apply_commands {
            return Err(EngineError::TooLarge {
                count: commands.len(),
                max: self.config.max_apply_commands,
            });
        }

        let current = self.storage.get_chain(tenant, category)?;
        let current_handlers: HashSet<&HandlerRef> = current.iter().map(|c| &c.handler).collect();
        let kept: HashSet<&HandlerRef> = commands.iter().map(|c| &c.handler).collect();

        for command in &commands {
            if command.category != *category {
                return Err(EngineError::CategoryMismatch {
                    expected: category.clone(),
                    found: command.category.clone(),
                });
            }
            if !current_handlers.contains(&command.handler) {
                self.require_approved(category, &command.handler)?;
            }
        }

        let mut dropped = Vec::new();
        for handler in current_handlers.iter().copied() {
            if kept.contains(handler) {
                continue;
            }
            if is_locked(&self.storage, tenant, category, handler)? {
                warn!(%tenant, %category, %handler, "chain edit would drop a locked handler");
                return Err(EngineError::Locked {
                    category: category.clone(),
                    handler: handler.clone(),
                });
            }
            dropped.push(handler.clone());
        }

        let hash = chain_hash(&commands)?;
        let replacement = ChainReplacement {
            tenant,
            category: category.clone(),
            commands,
            dropped,
        };
        self.storage.replace_chain(&replacement)?;

        info!(%tenant, %category, len = replacement.commands.len(), dropped = replacement.dropped.len(), "chain replaced");
        self.emit(RegistryEvent::ChainReplaced {
            tenant,
            category: replacement.category,
            hash,
        });
        Ok(())
    }

    pub fn clear_chain(
        &mut self,
        caller: PrincipalId,
        tenant: TenantId,
        category: &Category,
    ) -> Result<(), EngineError> {
        self.set_chain(caller, tenant, category, Vec::new())
    }

    /// Lock a handler currently in the chain. Tenant admins and curators
    /// may lock; nobody may unlock.
    pub fn lock_handler(
        &mut self,
        caller: PrincipalId,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<(), EngineError> {
        if !self.directory.is_curator(caller) {
            self.require_tenant_admin(tenant, caller, "lock handlers")?;
        }
        let present = self
            .storage
            .get_chain(tenant, category)?
            .iter()
            .any(|c| &c.handler == handler);
        if !present {
            return Err(EngineError::NotFound(format!("{handler} in {category} chain")));
        }
        self.storage.set_lock(tenant, category, handler)?;

        info!(%tenant, %category, %handler, "handler locked");
        self.emit(RegistryEvent::HandlerLocked {
            tenant,
            category: category.clone(),
            handler: handler.clone(),
        });
        Ok(())
    }

    pub fn is_locked(
        &self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<bool, EngineError> {
        is_locked(&self.storage, tenant, category, handler)
    }

    pub fn provenance_of(
        &self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<Option<BundleId>, EngineError> {
        Ok(self.storage.get_provenance(tenant, category, handler)?)
    }

    // ========================================================================
    // Tenant administration
    // ========================================================================

    /// Called once per tenant by the resource lifecycle manager.
    pub fn register_initial_admin(
        &mut self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), EngineError> {
        self.storage
            .register_tenant(tenant, principal)
            .map_err(EngineError::from_storage)?;

        info!(%tenant, %principal, "tenant registered");
        self.emit(RegistryEvent::AdminChanged {
            tenant,
            principal,
            granted: true,
        });
        Ok(())
    }

    pub fn grant_tenant_admin(
        &mut self,
        caller: PrincipalId,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), EngineError> {
        self.require_tenant_admin(tenant, caller, "grant tenant admin")?;
        self.storage.add_tenant_admin(tenant, principal)?;

        info!(%tenant, %principal, "tenant admin granted");
        self.emit(RegistryEvent::AdminChanged {
            tenant,
            principal,
            granted: true,
        });
        Ok(())
    }

    /// Revoke an admin recorded by this engine. The last one cannot be
    /// removed.
    pub fn revoke_tenant_admin(
        &mut self,
        caller: PrincipalId,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), EngineError> {
        self.require_tenant_admin(tenant, caller, "revoke tenant admin")?;
        if !self.storage.is_tenant_admin(tenant, principal)? {
            return Err(EngineError::NotFound(format!("admin {principal} of {tenant}")));
        }
        if self.storage.tenant_admin_count(tenant)? <= 1 {
            return Err(EngineError::Unauthorized {
                principal: caller,
                action: "remove the last tenant admin",
            });
        }
        self.storage
            .remove_tenant_admin(tenant, principal)
            .map_err(EngineError::from_storage)?;

        info!(%tenant, %principal, "tenant admin revoked");
        self.emit(RegistryEvent::AdminChanged {
            tenant,
            principal,
            granted: false,
        });
        Ok(())
    }

    pub fn is_tenant_admin(&self, tenant: TenantId, principal: PrincipalId) -> Result<bool, EngineError> {
        self.is_admin(tenant, principal)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Read the chain once and resolve its handlers.
    pub fn snapshot(&self, tenant: TenantId, category: &Category) -> Result<ChainSnapshot, EngineError> {
        let chain = self
            .storage
            .get_chain(tenant, category)?
            .into_iter()
            .map(|command| {
                let handler = self.handlers.get(&command.handler);
                (command, handler)
            })
            .collect();
        Ok(ChainSnapshot::new(tenant, category.clone(), chain))
    }

    pub fn dispatch(
        &self,
        tenant: TenantId,
        category: &Category,
        payload: &[u8],
        state: &mut ResourceState,
    ) -> Result<DispatchReport, EngineError> {
        self.snapshot(tenant, category)?.run(payload, state)
    }

    pub fn dispatch_threaded(
        &self,
        tenant: TenantId,
        category: &Category,
        payload: &[u8],
        initial: Vec<u8>,
        state: &mut ResourceState,
    ) -> Result<Vec<u8>, EngineError> {
        self.snapshot(tenant, category)?
            .run_threaded(payload, initial, state)
    }

    pub fn dispatch_typed<C: TypedCategory>(
        &self,
        tenant: TenantId,
        payload: &C::Payload,
        state: &mut ResourceState,
    ) -> Result<Option<C::Delta>, EngineError> {
        let category = Category::new(C::TAG)?;
        self.snapshot(tenant, &category)?.run_typed::<C>(payload, state)
    }
}
