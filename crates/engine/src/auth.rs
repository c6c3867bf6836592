use std::collections::HashSet;

use hookchain_core::{PrincipalId, Role, TenantId};

/// External directory answering role questions.
pub trait AuthorizationDirectory: Send + Sync {
    fn has_role(&self, tenant: TenantId, role: Role, principal: PrincipalId) -> bool;

    fn is_curator(&self, principal: PrincipalId) -> bool;
}

/// Fixed in-memory directory, for embedding hosts without an identity
/// service and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    curators: HashSet<PrincipalId>,
    roles: HashSet<(TenantId, Role, PrincipalId)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_curator(mut self, principal: PrincipalId) -> Self {
        self.curators.insert(principal);
        self
    }

    pub fn with_role(mut self, tenant: TenantId, role: Role, principal: PrincipalId) -> Self {
        self.roles.insert((tenant, role, principal));
        self
    }
}

impl AuthorizationDirectory for StaticDirectory {
    fn has_role(&self, tenant: TenantId, role: Role, principal: PrincipalId) -> bool {
        self.roles.contains(&(tenant, role, principal))
    }

    fn is_curator(&self, principal: PrincipalId) -> bool {
        self.curators.contains(&principal)
    }
}
