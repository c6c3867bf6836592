use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{Category, ContentHash, HandlerRef};

/// Reserved `static_data` prefix requesting that the command be locked when
/// its bundle is applied, regardless of bundle-level immutability.
pub const LOCK_ON_APPLY_MARKER: [u8; 4] = [0xfe, b'L', b'C', b'K'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationMode {
    /// Runs against the tenant resource's own state.
    Delegated,
    /// Runs in a private context, seeing only explicit inputs.
    Isolated,
}

impl InvocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delegated => "delegated",
            Self::Isolated => "isolated",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "delegated" => Ok(Self::Delegated),
            "isolated" => Ok(Self::Isolated),
            _ => Err(CoreError::InvalidData(format!("unknown invocation mode: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub category: Category,
    pub handler: HandlerRef,
    pub static_data: Vec<u8>,
    pub mode: InvocationMode,
}

impl Command {
    pub fn new(category: Category, handler: HandlerRef, mode: InvocationMode) -> Self {
        Self {
            category,
            handler,
            static_data: Vec::new(),
            mode,
        }
    }

    pub fn with_static_data(mut self, static_data: Vec<u8>) -> Self {
        self.static_data = static_data;
        self
    }

    /// Prefix `static_data` with the lock-on-apply marker.
    pub fn lock_on_apply(mut self) -> Self {
        let mut data = LOCK_ON_APPLY_MARKER.to_vec();
        data.extend_from_slice(&self.static_data);
        self.static_data = data;
        self
    }
}

/// A command as stored inside a bundle, with the lock-on-apply marker
/// already stripped from `static_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCommand {
    pub command: Command,
    pub lock_on_apply: bool,
}

impl BundleCommand {
    pub fn from_command(mut command: Command) -> Self {
        let lock_on_apply = command.static_data.starts_with(&LOCK_ON_APPLY_MARKER);
        if lock_on_apply {
            command.static_data.drain(..LOCK_ON_APPLY_MARKER.len());
        }
        Self {
            command,
            lock_on_apply,
        }
    }
}

pub fn commands_to_msgpack<T: Serialize>(commands: &[T]) -> Result<Vec<u8>, CoreError> {
    rmp_serde::to_vec(commands).map_err(|e| CoreError::Serialization(e.to_string()))
}

pub fn commands_from_msgpack<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<Vec<T>, CoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// blake3 over the msgpack encoding of an ordered command list.
pub fn chain_hash(commands: &[Command]) -> Result<ContentHash, CoreError> {
    let bytes = commands_to_msgpack(commands)?;
    Ok(ContentHash::from_bytes(*blake3::hash(&bytes).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(data: &[u8]) -> Command {
        Command::new(
            Category::new("after-swap").unwrap(),
            HandlerRef::new("rewards", [1, 2, 3, 4]),
            InvocationMode::Isolated,
        )
        .with_static_data(data.to_vec())
    }

    #[test]
    fn marker_is_stripped_and_recorded() {
        let stored = BundleCommand::from_command(cmd(b"cfg").lock_on_apply());
        assert!(stored.lock_on_apply);
        assert_eq!(stored.command.static_data, b"cfg");
    }

    #[test]
    fn unmarked_command_is_untouched() {
        let stored = BundleCommand::from_command(cmd(b"cfg"));
        assert!(!stored.lock_on_apply);
        assert_eq!(stored.command.static_data, b"cfg");
    }

    #[test]
    fn partial_marker_is_not_a_marker() {
        let stored = BundleCommand::from_command(cmd(&LOCK_ON_APPLY_MARKER[..3]));
        assert!(!stored.lock_on_apply);
        assert_eq!(stored.command.static_data.len(), 3);
    }

    #[test]
    fn chain_hash_depends_on_order() {
        let a = cmd(b"a");
        let b = cmd(b"b");
        let h1 = chain_hash(&[a.clone(), b.clone()]).unwrap();
        let h2 = chain_hash(&[b, a.clone()]).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(h1, chain_hash(&[a, cmd(b"b")]).unwrap());
    }

    #[test]
    fn invocation_mode_parse() {
        assert_eq!(InvocationMode::parse("delegated").unwrap(), InvocationMode::Delegated);
        assert_eq!(InvocationMode::parse("isolated").unwrap(), InvocationMode::Isolated);
        assert!(InvocationMode::parse("call").is_err());
    }
}
