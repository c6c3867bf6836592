use hookchain_core::{BundleId, Category, ConflictGroup, CoreError, HandlerRef, PrincipalId, TenantId};
use hookchain_storage::StorageError;
use thiserror::Error;

use crate::handler::HandlerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("unauthorized: {principal} may not {action}")]
    Unauthorized {
        principal: PrincipalId,
        action: &'static str,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("handler {handler} is not approved for {category}")]
    Unapproved {
        category: Category,
        handler: HandlerRef,
    },

    #[error("bundle {0} is revoked and no longer approved")]
    UnapprovedBundle(BundleId),

    #[error("bundle {0} has expired")]
    Expired(BundleId),

    #[error("conflict group {group} already active for tenant {tenant}")]
    ConflictActive { tenant: TenantId, group: ConflictGroup },

    #[error("handler {handler} is locked in {category}")]
    Locked {
        category: Category,
        handler: HandlerRef,
    },

    #[error("bundle {0} has no commands")]
    EmptyBundle(BundleId),

    #[error("too many commands: {count} (max {max})")]
    TooLarge { count: usize, max: usize },

    #[error("apply budget exceeded: {count} commands (max {max})")]
    BudgetExceeded { count: usize, max: usize },

    #[error("length mismatch: {0}")]
    LengthMismatch(String),

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("command for {found} placed in {expected} chain")]
    CategoryMismatch { expected: Category, found: Category },

    #[error("handler {handler} failed at position {position}: {source}")]
    HandlerFailure {
        handler: HandlerRef,
        position: usize,
        #[source]
        source: HandlerError,
    },
}

impl EngineError {
    /// Map the storage-level uniqueness failures onto `AlreadyExists`.
    pub(crate) fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::BundleCollision { bundle_id } => {
                Self::AlreadyExists(format!("bundle {bundle_id}"))
            }
            StorageError::TenantAlreadyRegistered { tenant } => {
                Self::AlreadyExists(format!("tenant {tenant}"))
            }
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}
