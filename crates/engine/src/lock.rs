//! The single lock rule shared by bundle application and chain edits.
//!
//! A chain entry is locked when its `LockRecord` is set, or when the bundle
//! that introduced it is immutable. Lock status is monotonic: nothing in the
//! engine ever clears a `LockRecord`, and bundle immutability can only be
//! fixed once.

use hookchain_core::{BundleCommand, Category, HandlerRef, TenantId};
use hookchain_storage::{BundleRecord, Storage};

use crate::error::EngineError;

/// Whether committing `command` from `bundle` writes a `LockRecord`.
pub(crate) fn locks_on_apply(bundle: &BundleRecord, command: &BundleCommand) -> bool {
    bundle.immutable || command.lock_on_apply
}

/// Current lock status of `(tenant, category, handler)`.
pub(crate) fn is_locked<S: Storage>(
    storage: &S,
    tenant: TenantId,
    category: &Category,
    handler: &HandlerRef,
) -> Result<bool, EngineError> {
    if storage.get_lock(tenant, category, handler)? {
        return Ok(true);
    }
    let Some(origin) = storage.get_provenance(tenant, category, handler)? else {
        return Ok(false);
    };
    Ok(storage
        .get_bundle(origin)?
        .is_some_and(|bundle| bundle.immutable))
}
