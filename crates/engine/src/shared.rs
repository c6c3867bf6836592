use std::sync::Arc;

use hookchain_core::{Category, TenantId};
use parking_lot::Mutex;

use crate::dispatch::{DispatchReport, TypedCategory};
use crate::error::EngineError;
use crate::handler::ResourceState;
use crate::Engine;

/// Thread-safe handle to an engine. Every mutation runs under one exclusive
/// lock; dispatch takes its chain snapshot under the lock and runs the
/// handlers after releasing it, so slow handlers never block composition.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let mut engine = self.inner.lock();
        f(&mut engine)
    }

    pub fn dispatch(
        &self,
        tenant: TenantId,
        category: &Category,
        payload: &[u8],
        state: &mut ResourceState,
    ) -> Result<DispatchReport, EngineError> {
        let snapshot = self.inner.lock().snapshot(tenant, category)?;
        snapshot.run(payload, state)
    }

    pub fn dispatch_threaded(
        &self,
        tenant: TenantId,
        category: &Category,
        payload: &[u8],
        initial: Vec<u8>,
        state: &mut ResourceState,
    ) -> Result<Vec<u8>, EngineError> {
        let snapshot = self.inner.lock().snapshot(tenant, category)?;
        snapshot.run_threaded(payload, initial, state)
    }

    pub fn dispatch_typed<C: TypedCategory>(
        &self,
        tenant: TenantId,
        payload: &C::Payload,
        state: &mut ResourceState,
    ) -> Result<Option<C::Delta>, EngineError> {
        let category = Category::new(C::TAG)?;
        let snapshot = self.inner.lock().snapshot(tenant, &category)?;
        snapshot.run_typed::<C>(payload, state)
    }
}
