use hookchain_core::{
    command::{chain_hash, Command, InvocationMode},
    ids::*,
};
use hookchain_engine::{EngineError, RegistryEvent};
use hookchain_harness::{category, handler, TestRegistry};

#[test]
fn immutable_bundle_scenario() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let h = reg.approve("after-swap", "H")?;
    reg.create_immutable_bundle(42, vec![h.clone()])?;

    reg.apply(&[42])?;
    assert_eq!(reg.chain("after-swap")?, vec![h]);

    let result = reg.clear_chain("after-swap");
    assert!(matches!(result, Err(EngineError::Locked { .. })));
    assert_eq!(reg.chain("after-swap")?.len(), 1);
    Ok(())
}

#[test]
fn lock_survives_unrelated_edits() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let locked = reg.approve("after-swap", "locked")?;
    let extra = reg.approve("after-swap", "extra")?;
    let other = reg.approve("before-swap", "other")?;
    reg.create_immutable_bundle(1, vec![locked.clone()])?;
    reg.apply(&[1])?;

    for round in 0..10 {
        // Reorder and pad around the locked handler
        let chain = if round % 2 == 0 {
            vec![extra.clone(), locked.clone()]
        } else {
            vec![locked.clone().with_static_data(vec![round as u8]), extra.clone()]
        };
        reg.set_chain("after-swap", chain)?;
        reg.set_chain("before-swap", vec![other.clone()])?;
        reg.clear_chain("before-swap")?;

        assert!(matches!(
            reg.set_chain("after-swap", vec![extra.clone()]),
            Err(EngineError::Locked { .. })
        ));
        assert!(matches!(
            reg.clear_chain("after-swap"),
            Err(EngineError::Locked { .. })
        ));
    }
    Ok(())
}

#[test]
fn locks_are_keyed_by_handler_not_position() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?;
    let b = reg.approve("after-swap", "b")?;
    reg.create_immutable_bundle(1, vec![a.clone(), b.clone()])?;
    reg.apply(&[1])?;

    // Swapping positions keeps both handlers
    reg.set_chain("after-swap", vec![b.clone(), a.clone()])?;
    assert_eq!(reg.chain("after-swap")?, vec![b, a]);
    Ok(())
}

#[test]
fn lock_marker_locks_only_marked_commands() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let pinned = reg.approve("after-swap", "pinned")?;
    let loose = reg.approve("after-swap", "loose")?;
    reg.create_bundle(1, vec![pinned.clone().lock_on_apply(), loose.clone()])?;
    reg.apply(&[1])?;

    let cat = category("after-swap")?;
    assert!(reg.engine.is_locked(reg.tenant, &cat, &handler("pinned"))?);
    assert!(!reg.engine.is_locked(reg.tenant, &cat, &handler("loose"))?);

    // The marker never reaches the chain
    assert_eq!(reg.chain("after-swap")?[0].static_data, Vec::<u8>::new());

    reg.set_chain("after-swap", vec![pinned.clone()])?;
    assert!(matches!(
        reg.clear_chain("after-swap"),
        Err(EngineError::Locked { .. })
    ));
    Ok(())
}

#[test]
fn later_immutability_locks_through_provenance() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?;
    let id = reg.create_bundle(1, vec![a])?;
    reg.apply(&[1])?;

    let cat = category("after-swap")?;
    assert!(!reg.engine.is_locked(reg.tenant, &cat, &handler("a"))?);

    reg.engine.set_bundle_metadata(reg.curator, id, true, None)?;
    assert!(reg.engine.is_locked(reg.tenant, &cat, &handler("a"))?);
    assert!(matches!(
        reg.clear_chain("after-swap"),
        Err(EngineError::Locked { .. })
    ));

    // Revocation does not unlock
    reg.engine.revoke_bundle(reg.curator, id)?;
    assert!(reg.engine.is_locked(reg.tenant, &cat, &handler("a"))?);
    Ok(())
}

#[test]
fn reapplying_through_mutable_bundle_keeps_lock() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?;
    let first = reg.create_bundle(1, vec![a.clone()])?;
    reg.apply(&[1])?;
    reg.engine.set_bundle_metadata(reg.curator, first, true, None)?;

    // Provenance moves to the mutable bundle; the lock must not
    reg.create_bundle(2, vec![a])?;
    reg.apply(&[2])?;

    let cat = category("after-swap")?;
    assert_eq!(
        reg.engine.provenance_of(reg.tenant, &cat, &handler("a"))?,
        Some(BundleId::new(2))
    );
    assert!(reg.engine.is_locked(reg.tenant, &cat, &handler("a"))?);
    assert!(matches!(
        reg.clear_chain("after-swap"),
        Err(EngineError::Locked { .. })
    ));
    assert_eq!(reg.chain("after-swap")?.len(), 2);
    Ok(())
}

#[test]
fn mutable_entries_can_be_cleared() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?;
    reg.create_bundle(1, vec![a.clone()])?;
    reg.apply(&[1])?;

    reg.clear_chain("after-swap")?;
    assert!(reg.chain("after-swap")?.is_empty());

    // Dropped handlers lose their provenance
    let cat = category("after-swap")?;
    assert_eq!(reg.engine.provenance_of(reg.tenant, &cat, &handler("a"))?, None);

    reg.set_chain("after-swap", vec![a])?;
    assert_eq!(reg.engine.provenance_of(reg.tenant, &cat, &handler("a"))?, None);
    Ok(())
}

#[test]
fn kept_entries_keep_provenance() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?;
    let b = reg.approve("after-swap", "b")?;
    reg.create_bundle(1, vec![a.clone()])?;
    reg.apply(&[1])?;

    reg.set_chain("after-swap", vec![b, a])?;
    let cat = category("after-swap")?;
    assert_eq!(
        reg.engine.provenance_of(reg.tenant, &cat, &handler("a"))?,
        Some(BundleId::new(1))
    );
    Ok(())
}

// ============================================================================
// Approval and shape checks on direct edits
// ============================================================================

#[test]
fn new_handlers_must_be_approved() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let rogue = Command::new(category("after-swap")?, handler("rogue"), InvocationMode::Delegated);
    let result = reg.set_chain("after-swap", vec![rogue]);
    assert!(matches!(result, Err(EngineError::Unapproved { .. })));
    assert!(reg.chain("after-swap")?.is_empty());
    Ok(())
}

#[test]
fn disapproved_handler_already_in_chain_can_stay() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let locked = reg.approve("after-swap", "locked")?;
    let extra = reg.approve("after-swap", "extra")?;
    reg.create_immutable_bundle(1, vec![locked.clone()])?;
    reg.apply(&[1])?;

    let cat = category("after-swap")?;
    reg.engine
        .set_handler_enabled(reg.curator, &cat, &handler("locked"), false)?;

    // The locked handler is kept without re-approval
    reg.set_chain("after-swap", vec![locked, extra])?;
    assert_eq!(reg.chain("after-swap")?.len(), 2);
    Ok(())
}

#[test]
fn command_category_must_match_chain() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let before = reg.approve("before-swap", "limits")?;
    let result = reg.set_chain("after-swap", vec![before]);
    assert!(matches!(result, Err(EngineError::CategoryMismatch { .. })));
    Ok(())
}

#[test]
fn chain_edits_require_tenant_admin() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?;
    let (_, stranger) = reg.add_tenant()?;
    let cat = category("after-swap")?;

    let result = reg.engine.set_chain(stranger, reg.tenant, &cat, vec![a]);
    assert!(matches!(result, Err(EngineError::Unauthorized { .. })));
    let result = reg.engine.clear_chain(reg.curator, reg.tenant, &cat);
    assert!(matches!(result, Err(EngineError::Unauthorized { .. })));
    Ok(())
}

#[test]
fn chain_replaced_event_carries_content_hash() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?.with_static_data(vec![7]);
    let b = reg.approve("after-swap", "b")?;
    let chain = vec![a, b];
    reg.set_chain("after-swap", chain.clone())?;

    let last = reg.events.events().pop();
    assert_eq!(
        last,
        Some(RegistryEvent::ChainReplaced {
            tenant: reg.tenant,
            category: category("after-swap")?,
            hash: chain_hash(&chain)?,
        })
    );
    Ok(())
}

// ============================================================================
// Explicit locks
// ============================================================================

#[test]
fn explicit_lock_blocks_removal() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let a = reg.approve("after-swap", "a")?;
    reg.set_chain("after-swap", vec![a])?;

    let cat = category("after-swap")?;
    reg.engine
        .lock_handler(reg.admin, reg.tenant, &cat, &handler("a"))?;
    // Locking again is a no-op
    reg.engine
        .lock_handler(reg.curator, reg.tenant, &cat, &handler("a"))?;

    assert!(matches!(
        reg.clear_chain("after-swap"),
        Err(EngineError::Locked { .. })
    ));
    Ok(())
}

#[test]
fn explicit_lock_needs_presence_and_rights() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    reg.approve("after-swap", "a")?;
    let cat = category("after-swap")?;

    let result = reg
        .engine
        .lock_handler(reg.admin, reg.tenant, &cat, &handler("a"));
    assert!(matches!(result, Err(EngineError::NotFound(_))));

    let (_, stranger) = reg.add_tenant()?;
    let result = reg
        .engine
        .lock_handler(stranger, reg.tenant, &cat, &handler("a"));
    assert!(matches!(result, Err(EngineError::Unauthorized { .. })));
    Ok(())
}

// ============================================================================
// Tenant administration
// ============================================================================

#[test]
fn initial_admin_registers_once() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let result = reg
        .engine
        .register_initial_admin(reg.tenant, PrincipalId::new());
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
    Ok(())
}

#[test]
fn admins_are_managed_by_admins() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let deputy = PrincipalId::new();
    let (tenant, admin) = (reg.tenant, reg.admin);

    assert!(matches!(
        reg.engine.grant_tenant_admin(deputy, tenant, deputy),
        Err(EngineError::Unauthorized { .. })
    ));

    reg.engine.grant_tenant_admin(admin, tenant, deputy)?;
    assert!(reg.engine.is_tenant_admin(tenant, deputy)?);

    reg.engine.revoke_tenant_admin(deputy, tenant, admin)?;
    assert!(!reg.engine.is_tenant_admin(tenant, admin)?);

    // The last admin stays
    assert!(matches!(
        reg.engine.revoke_tenant_admin(deputy, tenant, deputy),
        Err(EngineError::Unauthorized { .. })
    ));
    assert!(reg.engine.is_tenant_admin(tenant, deputy)?);
    Ok(())
}
