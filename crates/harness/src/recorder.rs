use std::sync::Arc;

use hookchain_engine::{handler_fn, Handler, HandlerError};
use parking_lot::Mutex;

/// Shared record of handler calls, in call order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn push(&self, entry: String) {
        self.calls.lock().push(entry);
    }

    /// Handler that logs `name` and echoes its static data.
    pub fn recording(&self, name: &str) -> Arc<dyn Handler> {
        let log = self.clone();
        let name = name.to_string();
        handler_fn(move |ctx, inv| {
            let mode = if ctx.is_delegated() { "delegated" } else { "isolated" };
            log.push(format!("{name}:{mode}"));
            Ok(inv.static_data.to_vec())
        })
    }

    /// Handler that logs `name` and then fails.
    pub fn failing(&self, name: &str) -> Arc<dyn Handler> {
        let log = self.clone();
        let name = name.to_string();
        handler_fn(move |_, _| {
            log.push(format!("{name}:failed"));
            Err(HandlerError::Rejected(format!("{name} refused")))
        })
    }
}
