use std::sync::Arc;

use hookchain_core::{Category, Command, InvocationMode, TenantId};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::handler::{Context, Handler, HandlerError, Invocation, ResourceState};

/// A category with a fixed structured payload and a decoded per-handler
/// delta.
pub trait TypedCategory {
    const TAG: &'static str;
    type Payload: Serialize;
    type Delta: DeserializeOwned;
}

struct Step {
    command: Command,
    handler: Option<Arc<dyn Handler>>,
}

/// An immutable copy of one chain with its handlers resolved. Taken under
/// the engine lock, run without it.
pub struct ChainSnapshot {
    tenant: TenantId,
    category: Category,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outputs: Vec<Vec<u8>>,
}

impl DispatchReport {
    pub fn handlers_run(&self) -> usize {
        self.outputs.len()
    }
}

impl ChainSnapshot {
    pub(crate) fn new(
        tenant: TenantId,
        category: Category,
        chain: Vec<(Command, Option<Arc<dyn Handler>>)>,
    ) -> Self {
        let steps = chain
            .into_iter()
            .map(|(command, handler)| Step { command, handler })
            .collect();
        Self {
            tenant,
            category,
            steps,
        }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.steps.iter().map(|s| &s.command)
    }

    /// Invoke every handler in order. The caller's `state` is replaced only
    /// if the whole chain succeeds.
    pub fn run(&self, payload: &[u8], state: &mut ResourceState) -> Result<DispatchReport, EngineError> {
        let mut report = DispatchReport::default();
        self.run_with(state, None, |_| payload.to_vec(), |output| {
            report.outputs.push(output);
            Ok(())
        })?;
        Ok(report)
    }

    /// Value-threading dispatch: each handler receives the previous
    /// handler's output (or `initial`) as `carried`, and the last output is
    /// the result.
    pub fn run_threaded(
        &self,
        payload: &[u8],
        initial: Vec<u8>,
        state: &mut ResourceState,
    ) -> Result<Vec<u8>, EngineError> {
        let last = self.run_with(state, Some(initial), |_| payload.to_vec(), |_| Ok(()))?;
        Ok(last.unwrap_or_default())
    }

    /// Typed dispatch: every handler gets `msgpack(payload) ++ static_data`
    /// and may return an encoded `Option<Delta>`. Returns the last delta
    /// that decoded to `Some`.
    pub fn run_typed<C: TypedCategory>(
        &self,
        payload: &C::Payload,
        state: &mut ResourceState,
    ) -> Result<Option<C::Delta>, EngineError> {
        let encoded = rmp_serde::to_vec(payload)
            .map_err(|e| hookchain_core::CoreError::Serialization(e.to_string()))?;
        let mut aggregate = None;
        self.run_with(
            state,
            None,
            |command| {
                let mut input = encoded.clone();
                input.extend_from_slice(&command.static_data);
                input
            },
            |output| {
                if output.is_empty() {
                    return Ok(());
                }
                let delta: Option<C::Delta> = rmp_serde::from_slice(&output)
                    .map_err(|e| HandlerError::MalformedOutput(e.to_string()))?;
                if delta.is_some() {
                    aggregate = delta;
                }
                Ok(())
            },
        )?;
        Ok(aggregate)
    }

    /// Shared driver. `carried` switches on value threading; the final
    /// carried buffer is returned.
    fn run_with<I, O>(
        &self,
        state: &mut ResourceState,
        carried: Option<Vec<u8>>,
        mut input: I,
        mut output: O,
    ) -> Result<Option<Vec<u8>>, EngineError>
    where
        I: FnMut(&Command) -> Vec<u8>,
        O: FnMut(Vec<u8>) -> Result<(), HandlerError>,
    {
        debug!(
            tenant = %self.tenant,
            category = %self.category,
            handlers = self.steps.len(),
            "dispatch"
        );

        let mut staged = state.clone();
        let mut carry = carried;
        for (position, step) in self.steps.iter().enumerate() {
            let command = &step.command;
            let payload = input(command);

            let result = match &step.handler {
                None => Err(HandlerError::NotRegistered(command.handler.clone())),
                Some(handler) => {
                    let invocation = Invocation {
                        tenant: self.tenant,
                        category: &self.category,
                        payload: &payload,
                        static_data: &command.static_data,
                        carried: carry.as_deref(),
                    };
                    let ctx = match command.mode {
                        InvocationMode::Delegated => Context::Delegated(&mut staged),
                        InvocationMode::Isolated => Context::Isolated,
                    };
                    handler.call(ctx, &invocation)
                }
            }
            .and_then(|out| {
                if carry.is_some() {
                    carry = Some(out.clone());
                }
                output(out)
            });

            if let Err(source) = result {
                warn!(
                    tenant = %self.tenant,
                    category = %self.category,
                    handler = %command.handler,
                    position,
                    error = %source,
                    "dispatch aborted"
                );
                return Err(EngineError::HandlerFailure {
                    handler: command.handler.clone(),
                    position,
                    source,
                });
            }
        }

        *state = staged;
        Ok(carry)
    }
}
