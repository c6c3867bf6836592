use std::sync::Arc;

use hookchain_core::{
    clock::{ManualClock, Timestamp},
    command::{Command, InvocationMode},
    config::EngineConfig,
    ids::*,
};
use hookchain_engine::{Engine, EngineError, EventLog, StaticDirectory};
use hookchain_storage::SqliteStorage;
use tempfile::TempDir;

/// Fixed start time for the manual clock: 2025-01-01T00:00:00Z.
pub const START_SECS: u64 = 1_735_689_600;

pub fn category(tag: &str) -> Result<Category, EngineError> {
    Ok(Category::new(tag)?)
}

/// Handler ref whose selector is the first four bytes of `target`, zero
/// padded.
pub fn handler(target: &str) -> HandlerRef {
    let mut selector = [0u8; 4];
    for (slot, byte) in selector.iter_mut().zip(target.bytes()) {
        *slot = byte;
    }
    HandlerRef::new(target, selector)
}

/// One curator, one registered tenant with one admin, a manual clock and an
/// event log.
pub struct TestRegistry {
    pub engine: Engine,
    pub curator: PrincipalId,
    pub tenant: TenantId,
    pub admin: PrincipalId,
    pub clock: Arc<ManualClock>,
    pub events: EventLog,
    _dir: Option<TempDir>,
}

impl TestRegistry {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_in_memory()?;
        Self::build(config, storage, None)
    }

    /// Registry backed by a database file in a fresh temp directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("registry.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;
        let storage = SqliteStorage::open(path)?;
        Ok(Self::build(EngineConfig::default(), storage, Some(dir))?)
    }

    fn build(
        config: EngineConfig,
        storage: SqliteStorage,
        dir: Option<TempDir>,
    ) -> Result<Self, EngineError> {
        let curator = PrincipalId::new();
        let tenant = TenantId::new();
        let admin = PrincipalId::new();
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(START_SECS)));
        let events = EventLog::new();

        let directory = StaticDirectory::new().with_curator(curator);
        let mut engine = Engine::new(config, storage, directory)?.with_clock(clock.clone());
        engine.add_sink(events.clone());
        engine.register_initial_admin(tenant, admin)?;

        Ok(Self {
            engine,
            curator,
            tenant,
            admin,
            clock,
            events,
            _dir: dir,
        })
    }

    /// Register another tenant with a fresh admin.
    pub fn add_tenant(&mut self) -> Result<(TenantId, PrincipalId), EngineError> {
        let tenant = TenantId::new();
        let admin = PrincipalId::new();
        self.engine.register_initial_admin(tenant, admin)?;
        Ok((tenant, admin))
    }

    /// Approve `target` for `tag` and return an isolated command for it.
    pub fn approve(&mut self, tag: &str, target: &str) -> Result<Command, EngineError> {
        let cat = category(tag)?;
        let h = handler(target);
        self.engine
            .approve_handler(self.curator, cat.clone(), h.clone(), target)?;
        Ok(Command::new(cat, h, InvocationMode::Isolated))
    }

    pub fn create_bundle(&mut self, id: u64, commands: Vec<Command>) -> Result<BundleId, EngineError> {
        let bundle_id = BundleId::new(id);
        self.engine
            .create_bundle(self.curator, bundle_id, commands, None)?;
        Ok(bundle_id)
    }

    pub fn create_immutable_bundle(
        &mut self,
        id: u64,
        commands: Vec<Command>,
    ) -> Result<BundleId, EngineError> {
        let bundle_id = self.create_bundle(id, commands)?;
        self.engine
            .set_bundle_metadata(self.curator, bundle_id, true, None)?;
        Ok(bundle_id)
    }

    pub fn create_grouped_bundle(
        &mut self,
        id: u64,
        group: u64,
        commands: Vec<Command>,
    ) -> Result<BundleId, EngineError> {
        let bundle_id = self.create_bundle(id, commands)?;
        self.engine.set_bundle_metadata(
            self.curator,
            bundle_id,
            false,
            Some(ConflictGroup::new(group)),
        )?;
        Ok(bundle_id)
    }

    /// Apply bundles to the default tenant as its admin.
    pub fn apply(&mut self, ids: &[u64]) -> Result<(), EngineError> {
        let ids: Vec<BundleId> = ids.iter().copied().map(BundleId::new).collect();
        self.engine.apply_bundles(self.admin, self.tenant, &ids)
    }

    pub fn chain(&self, tag: &str) -> Result<Vec<Command>, EngineError> {
        self.engine.get_chain(self.tenant, &category(tag)?)
    }

    pub fn set_chain(&mut self, tag: &str, commands: Vec<Command>) -> Result<(), EngineError> {
        let cat = category(tag)?;
        self.engine.set_chain(self.admin, self.tenant, &cat, commands)
    }

    pub fn clear_chain(&mut self, tag: &str) -> Result<(), EngineError> {
        let cat = category(tag)?;
        self.engine.clear_chain(self.admin, self.tenant, &cat)
    }
}
