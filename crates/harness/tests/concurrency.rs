use std::thread;

use hookchain_core::ids::*;
use hookchain_engine::{handler_fn, EngineError, HandlerError, ResourceState, SharedEngine};
use hookchain_harness::{category, handler, CallLog, TestRegistry};

#[test]
fn racing_applies_activate_a_group_once() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    for id in 1..=8u64 {
        let cmd = reg.approve("after-swap", &format!("fee-{id}"))?;
        reg.create_grouped_bundle(id, 5, vec![cmd])?;
    }
    let TestRegistry { engine, tenant, admin, .. } = reg;
    let shared = SharedEngine::new(engine);

    let results: Vec<Result<(), EngineError>> = thread::scope(|s| {
        let workers: Vec<_> = (1..=8u64)
            .map(|id| {
                let shared = shared.clone();
                s.spawn(move || shared.with(|e| e.apply_bundles(admin, tenant, &[BundleId::new(id)])))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().expect("worker panicked"))
            .collect()
    });

    let applied = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(applied, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EngineError::ConflictActive { .. })));

    let cat = category("after-swap")?;
    assert_eq!(shared.with(|e| e.get_chain(tenant, &cat))?.len(), 1);
    Ok(())
}

#[test]
fn dispatch_releases_the_engine_lock() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let clearer = reg.approve("after-swap", "clearer")?;
    let tail = reg.approve("after-swap", "tail")?.with_static_data(b"tail".to_vec());
    reg.set_chain("after-swap", vec![clearer, tail])?;
    let TestRegistry { engine, tenant, admin, .. } = reg;
    let shared = SharedEngine::new(engine);
    let cat = category("after-swap")?;

    // Rewrites the chain mid-dispatch; would deadlock if the lock were held
    let inner = shared.clone();
    let clear_cat = cat.clone();
    let log = CallLog::new();
    shared.with(|e| {
        e.register_handler(
            handler("clearer"),
            handler_fn(move |_, _| {
                inner
                    .with(|e| e.clear_chain(admin, tenant, &clear_cat))
                    .map_err(|err| HandlerError::Rejected(err.to_string()))?;
                Ok(Vec::new())
            }),
        );
        e.register_handler(handler("tail"), log.recording("tail"));
    });

    assert_eq!(shared.with(|e| e.handlers().len()), 2);
    let held = shared.with(|e| e.snapshot(tenant, &cat))?;
    assert_eq!(held.tenant(), tenant);
    assert_eq!(held.category(), &cat);
    assert_eq!(held.len(), 2);

    let mut state = ResourceState::new();
    let report = shared.dispatch(tenant, &cat, b"swap", &mut state)?;

    // The snapshot runs to the end even though the chain is now empty
    assert_eq!(report.handlers_run(), 2);
    assert_eq!(log.calls(), vec!["tail:isolated"]);
    assert!(shared.with(|e| e.get_chain(tenant, &cat))?.is_empty());
    assert!(shared.with(|e| e.snapshot(tenant, &cat))?.is_empty());

    // A snapshot taken before the edit still holds the old chain
    let targets: Vec<&str> = held.commands().map(|c| c.handler.target()).collect();
    assert_eq!(targets, vec!["clearer", "tail"]);
    Ok(())
}

#[test]
fn dispatch_sees_whole_chains_during_edits() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::new()?;
    let log = CallLog::new();
    let mut commands = Vec::new();
    for name in ["a", "b", "c"] {
        commands.push(reg.approve("after-swap", name)?.with_static_data(name.as_bytes().to_vec()));
        reg.engine.register_handler(handler(name), log.recording(name));
    }
    let pair = vec![commands[0].clone(), commands[1].clone()];
    let single = vec![commands[2].clone()];
    reg.set_chain("after-swap", pair.clone())?;
    let TestRegistry { engine, tenant, admin, .. } = reg;
    let shared = SharedEngine::new(engine);
    let cat = category("after-swap")?;

    let pair_out = vec![b"a".to_vec(), b"b".to_vec()];
    let single_out = vec![b"c".to_vec()];

    thread::scope(|s| -> Result<(), EngineError> {
        let writer = {
            let shared = shared.clone();
            let cat = cat.clone();
            s.spawn(move || -> Result<(), EngineError> {
                for round in 0..50 {
                    let next = if round % 2 == 0 { single.clone() } else { pair.clone() };
                    shared.with(|e| e.set_chain(admin, tenant, &cat, next))?;
                }
                Ok(())
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let cat = cat.clone();
                let (pair_out, single_out) = (pair_out.clone(), single_out.clone());
                s.spawn(move || -> Result<(), EngineError> {
                    for _ in 0..50 {
                        let mut state = ResourceState::new();
                        let report = shared.dispatch(tenant, &cat, b"swap", &mut state)?;
                        assert!(report.outputs == pair_out || report.outputs == single_out);
                    }
                    Ok(())
                })
            })
            .collect();

        writer.join().expect("writer panicked")?;
        for reader in readers {
            reader.join().expect("reader panicked")?;
        }
        Ok(())
    })?;
    Ok(())
}
