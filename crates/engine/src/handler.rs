use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use hookchain_core::{Category, HandlerRef, TenantId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no handler registered for {0}")]
    NotRegistered(HandlerRef),

    #[error("handler rejected the call: {0}")]
    Rejected(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("malformed output: {0}")]
    MalformedOutput(String),
}

/// Key/value state of a tenant resource. Owned by the event source and
/// lent to delegated handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceState {
    slots: BTreeMap<String, Vec<u8>>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.slots.get(key).map(Vec::as_slice)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.slots.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.slots.remove(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Execution context a handler runs in, chosen by the command's
/// invocation mode.
pub enum Context<'a> {
    /// Acts as part of the resource: full access to its state.
    Delegated(&'a mut ResourceState),
    /// Acts as an independent service: explicit inputs and outputs only.
    Isolated,
}

impl Context<'_> {
    pub fn state(&mut self) -> Option<&mut ResourceState> {
        match self {
            Context::Delegated(state) => Some(&mut **state),
            Context::Isolated => None,
        }
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, Context::Delegated(_))
    }
}

/// Explicit inputs to one handler call.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub tenant: TenantId,
    pub category: &'a Category,
    pub payload: &'a [u8],
    pub static_data: &'a [u8],
    /// Output of the previous handler in a value-threading dispatch.
    pub carried: Option<&'a [u8]>,
}

pub trait Handler: Send + Sync {
    fn call(&self, ctx: Context<'_>, invocation: &Invocation<'_>) -> Result<Vec<u8>, HandlerError>;
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(Context<'_>, &Invocation<'_>) -> Result<Vec<u8>, HandlerError> + Send + Sync,
{
    fn call(&self, ctx: Context<'_>, invocation: &Invocation<'_>) -> Result<Vec<u8>, HandlerError> {
        (self.0)(ctx, invocation)
    }
}

/// Wrap a closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Context<'_>, &Invocation<'_>) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Concrete callables by handler identity. Registration is independent of
/// approval.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<HandlerRef, Arc<dyn Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler_ref: HandlerRef, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler_ref, handler);
    }

    pub fn unregister(&mut self, handler_ref: &HandlerRef) -> bool {
        self.handlers.remove(handler_ref).is_some()
    }

    pub fn get(&self, handler_ref: &HandlerRef) -> Option<Arc<dyn Handler>> {
        self.handlers.get(handler_ref).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
