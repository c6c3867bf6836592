use std::collections::HashSet;

use hookchain_core::{BundleId, Category, ConflictGroup, EngineConfig, TenantId, Timestamp};
use hookchain_storage::{ApplyWrites, ChainAppend, Storage};

use crate::error::EngineError;
use crate::lock::{is_locked, locks_on_apply};

/// A bundle that passed validation, with the category reported in its
/// application event.
#[derive(Debug, Clone)]
pub(crate) struct PlannedBundle {
    pub bundle_id: BundleId,
    pub category: Category,
}

/// Output of the validation pass. Holds every write the commit pass will
/// perform; nothing is written while it is built.
#[derive(Debug)]
pub(crate) struct ApplyPlan {
    pub writes: ApplyWrites,
    pub bundles: Vec<PlannedBundle>,
}

/// Validate `bundle_ids` for `tenant` against current state.
pub(crate) fn plan_apply<S: Storage>(
    storage: &S,
    config: &EngineConfig,
    now: Timestamp,
    tenant: TenantId,
    bundle_ids: &[BundleId],
) -> Result<ApplyPlan, EngineError> {
    if bundle_ids.is_empty() {
        return Err(EngineError::EmptyInput("bundle id list"));
    }

    let mut appends = Vec::new();
    let mut conflict_groups: Vec<ConflictGroup> = Vec::new();
    let mut claimed: HashSet<ConflictGroup> = HashSet::new();
    let mut bundles = Vec::with_capacity(bundle_ids.len());
    let mut total = 0usize;

    for &bundle_id in bundle_ids {
        let bundle = storage
            .get_bundle(bundle_id)?
            .ok_or_else(|| EngineError::NotFound(format!("bundle {bundle_id}")))?;

        if !bundle.enabled {
            return Err(EngineError::UnapprovedBundle(bundle_id));
        }
        if bundle.is_expired(now) {
            return Err(EngineError::Expired(bundle_id));
        }
        if let Some(group) = bundle.conflict_group {
            // A second bundle of the same group in one batch loses too.
            if !claimed.insert(group) || storage.is_conflict_active(tenant, group)? {
                return Err(EngineError::ConflictActive { tenant, group });
            }
            conflict_groups.push(group);
        }

        total += bundle.commands.len();
        if total > config.max_apply_commands {
            return Err(EngineError::BudgetExceeded {
                count: total,
                max: config.max_apply_commands,
            });
        }

        for stored in &bundle.commands {
            let command = &stored.command;
            let approved = storage
                .get_approval(&command.category, &command.handler)?
                .is_some_and(|a| a.enabled);
            if !approved {
                return Err(EngineError::Unapproved {
                    category: command.category.clone(),
                    handler: command.handler.clone(),
                });
            }
            // Re-applying moves provenance, so an existing lock must be
            // pinned as a LockRecord first.
            let lock = locks_on_apply(&bundle, stored)
                || is_locked(storage, tenant, &command.category, &command.handler)?;
            appends.push(ChainAppend {
                command: command.clone(),
                origin: bundle_id,
                lock,
            });
        }

        let category = bundle
            .commands
            .first()
            .map(|c| c.command.category.clone())
            .ok_or(EngineError::EmptyBundle(bundle_id))?;
        bundles.push(PlannedBundle {
            bundle_id,
            category,
        });
    }

    Ok(ApplyPlan {
        writes: ApplyWrites {
            tenant,
            appends,
            conflict_groups,
        },
        bundles,
    })
}
