use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(TenantId);
uuid_id!(PrincipalId);

/// Curator-chosen bundle identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleId(u64);

impl BundleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleId({})", self.0)
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event type a chain responds to, e.g. `"after-swap"`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Category(String);

impl Category {
    pub fn new(tag: impl Into<String>) -> Result<Self, CoreError> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(CoreError::InvalidData("empty category tag".into()));
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Category({})", self.0)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a callable unit: a target plus a 4-byte selector.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandlerRef {
    target: String,
    selector: [u8; 4],
}

impl HandlerRef {
    pub fn new(target: impl Into<String>, selector: [u8; 4]) -> Self {
        Self {
            target: target.into(),
            selector,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn selector(&self) -> [u8; 4] {
        self.selector
    }

    /// Parse the `target:0xselector` form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let (target, sel) = s
            .rsplit_once(":0x")
            .ok_or_else(|| CoreError::InvalidData(format!("malformed handler ref: {s}")))?;
        if sel.len() != 8 {
            return Err(CoreError::InvalidData(format!("malformed selector: {sel}")));
        }
        let mut selector = [0u8; 4];
        for (i, byte) in selector.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&sel[i * 2..i * 2 + 2], 16)
                .map_err(|_| CoreError::InvalidData(format!("malformed selector: {sel}")))?;
        }
        Ok(Self::new(target, selector))
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerRef({self})")
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:0x", self.target)?;
        for byte in &self.selector {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Mutual-exclusion tag for bundles. Zero means "no group".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ConflictGroup(u64);

impl ConflictGroup {
    pub fn new(group: u64) -> Self {
        Self(group)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Collapse the zero group to `None`.
    pub fn normalize(group: Option<ConflictGroup>) -> Option<ConflictGroup> {
        group.filter(|g| g.0 != 0)
    }
}

impl fmt::Display for ConflictGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Roles answered by the authorization directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Role {
    TenantAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantAdmin => "tenant_admin",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}...)", self.0[0], self.0[1])
    }
}
