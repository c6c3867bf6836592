use hookchain_core::{
    clock::Timestamp,
    command::{BundleCommand, Command},
    ids::*,
};

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub category: Category,
    pub handler: HandlerRef,
    pub label: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    pub bundle_id: BundleId,
    pub commands: Vec<BundleCommand>,
    pub immutable: bool,
    pub conflict_group: Option<ConflictGroup>,
    pub expires_at: Option<Timestamp>,
    pub enabled: bool,
    pub metadata_set: bool,
}

impl BundleRecord {
    /// `expires_at` is inclusive.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(at) if at.as_secs() != 0 && at < now)
    }
}

/// One chain entry to append during bundle application.
#[derive(Debug, Clone)]
pub struct ChainAppend {
    pub command: Command,
    pub origin: BundleId,
    pub lock: bool,
}

/// Every write produced by a validated `apply_bundles` call.
#[derive(Debug, Clone)]
pub struct ApplyWrites {
    pub tenant: TenantId,
    pub appends: Vec<ChainAppend>,
    pub conflict_groups: Vec<ConflictGroup>,
}

/// Wholesale replacement of one `(tenant, category)` chain.
#[derive(Debug, Clone)]
pub struct ChainReplacement {
    pub tenant: TenantId,
    pub category: Category,
    pub commands: Vec<Command>,
    /// Handlers leaving the chain; their provenance is dropped.
    pub dropped: Vec<HandlerRef>,
}

pub trait Storage {
    fn get_approval(
        &self,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<Option<ApprovalRecord>, StorageError>;

    /// Upsert every record in one transaction.
    fn put_approvals(&mut self, records: &[ApprovalRecord]) -> Result<(), StorageError>;

    fn get_bundle(&self, bundle_id: BundleId) -> Result<Option<BundleRecord>, StorageError>;

    /// Fails with `BundleCollision` if the id is taken.
    fn insert_bundle(&mut self, record: &BundleRecord) -> Result<(), StorageError>;

    fn set_bundle_metadata(
        &mut self,
        bundle_id: BundleId,
        immutable: bool,
        conflict_group: Option<ConflictGroup>,
    ) -> Result<(), StorageError>;

    /// Disable the bundle and discard its stored commands.
    fn revoke_bundle(&mut self, bundle_id: BundleId) -> Result<(), StorageError>;

    fn get_chain(&self, tenant: TenantId, category: &Category)
        -> Result<Vec<Command>, StorageError>;

    fn get_provenance(
        &self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<Option<BundleId>, StorageError>;

    fn get_lock(
        &self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<bool, StorageError>;

    fn set_lock(
        &mut self,
        tenant: TenantId,
        category: &Category,
        handler: &HandlerRef,
    ) -> Result<(), StorageError>;

    fn is_conflict_active(
        &self,
        tenant: TenantId,
        group: ConflictGroup,
    ) -> Result<bool, StorageError>;

    /// Apply all appends, provenance, locks and conflict flags atomically.
    fn commit_apply(&mut self, writes: &ApplyWrites) -> Result<(), StorageError>;

    fn replace_chain(&mut self, replacement: &ChainReplacement) -> Result<(), StorageError>;

    fn is_tenant_admin(
        &self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<bool, StorageError>;

    fn tenant_admin_count(&self, tenant: TenantId) -> Result<u64, StorageError>;

    /// Record the first admin of a tenant. Fails with `TenantAlreadyRegistered`
    /// if the tenant was registered before.
    fn register_tenant(
        &mut self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), StorageError>;

    fn add_tenant_admin(
        &mut self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), StorageError>;

    fn remove_tenant_admin(
        &mut self,
        tenant: TenantId,
        principal: PrincipalId,
    ) -> Result<(), StorageError>;
}
