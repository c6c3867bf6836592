use std::sync::Arc;

use hookchain_core::{BundleId, Category, ConflictGroup, ContentHash, HandlerRef, PrincipalId, TenantId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Observable registry changes, published after the change is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    ApprovalChanged {
        category: Category,
        handler: HandlerRef,
        enabled: bool,
    },
    BundleCreated {
        bundle_id: BundleId,
        command_count: usize,
    },
    BundleMetadataSet {
        bundle_id: BundleId,
        immutable: bool,
        conflict_group: Option<ConflictGroup>,
    },
    BundleRevoked {
        bundle_id: BundleId,
    },
    BundleApplied {
        tenant: TenantId,
        bundle_id: BundleId,
        category: Category,
    },
    ChainReplaced {
        tenant: TenantId,
        category: Category,
        hash: ContentHash,
    },
    HandlerLocked {
        tenant: TenantId,
        category: Category,
        handler: HandlerRef,
    },
    AdminChanged {
        tenant: TenantId,
        principal: PrincipalId,
        granted: bool,
    },
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &RegistryEvent);
}

/// Sink that keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RegistryEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<RegistryEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for EventLog {
    fn publish(&self, event: &RegistryEvent) {
        debug!(?event, "registry event");
        self.events.lock().push(event.clone());
    }
}
