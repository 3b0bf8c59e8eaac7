//! Action module - what happens when an event fires
//!
//! An event owns at most one action of each [`ActionKind`]. The kinds run in a
//! fixed relative order (break, then custom code, then script) after the
//! event's condition, if any, evaluates to true.

pub mod registry;

pub use registry::parse_actions;

use crate::event::wire::WireError;
use crate::payload::Payload;
use std::fmt;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Bare words that belong to the action registry
pub const ACTION_FLAGS: &[&str] = &["break"];

/// Action kinds, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    BreakToDebugger,
    RunCustomCode,
    RunScript,
}

impl ActionKind {
    pub fn raw(self) -> u32 {
        match self {
            ActionKind::BreakToDebugger => 1,
            ActionKind::RunCustomCode => 2,
            ActionKind::RunScript => 3,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(ActionKind::BreakToDebugger),
            2 => Some(ActionKind::RunCustomCode),
            3 => Some(ActionKind::RunScript),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::BreakToDebugger => "break",
            ActionKind::RunCustomCode => "code",
            ActionKind::RunScript => "script",
        };
        f.write_str(name)
    }
}

/// One effect to run when an event fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDescriptor {
    BreakToDebugger,
    /// Raw machine code executed in the context of the trapped core
    RunCustomCode(Payload),
    /// Script body, opaque to the controller
    RunScript(Payload),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ActionHeader {
    pub event_tag: u64,
    pub action_type: u32,
    pub payload_length: u32,
}

pub const ACTION_HEADER_SIZE: usize = std::mem::size_of::<ActionHeader>();

impl ActionDescriptor {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionDescriptor::BreakToDebugger => ActionKind::BreakToDebugger,
            ActionDescriptor::RunCustomCode(_) => ActionKind::RunCustomCode,
            ActionDescriptor::RunScript(_) => ActionKind::RunScript,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            ActionDescriptor::BreakToDebugger => None,
            ActionDescriptor::RunCustomCode(p) | ActionDescriptor::RunScript(p) => Some(p),
        }
    }

    /// Byte length of the action's own payload
    pub fn len(&self) -> usize {
        self.payload().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn serialized_len(&self) -> usize {
        ACTION_HEADER_SIZE + self.len()
    }

    /// Serialize as the add-action request for the event with `event_tag`
    pub fn encode(&self, event_tag: u64) -> Vec<u8> {
        let header = ActionHeader {
            event_tag,
            action_type: self.kind().raw(),
            payload_length: self.len() as u32,
        };
        let mut bytes = Vec::with_capacity(self.serialized_len());
        bytes.extend_from_slice(header.as_bytes());
        if let Some(payload) = self.payload() {
            bytes.extend_from_slice(payload);
        }
        bytes
    }

    /// Decode an add-action request into its event tag and action
    pub fn decode(bytes: &[u8]) -> Result<(u64, Self), WireError> {
        let (header, rest) = ActionHeader::read_from_prefix(bytes).map_err(|_| WireError::Truncated {
            expected: ACTION_HEADER_SIZE,
            actual: bytes.len(),
        })?;

        let length = header.payload_length as usize;
        if rest.len() < length {
            return Err(WireError::Truncated {
                expected: ACTION_HEADER_SIZE + length,
                actual: bytes.len(),
            });
        }
        if rest.len() > length {
            return Err(WireError::TrailingBytes(rest.len() - length));
        }

        let action = match ActionKind::from_raw(header.action_type) {
            Some(ActionKind::BreakToDebugger) => ActionDescriptor::BreakToDebugger,
            Some(ActionKind::RunCustomCode) => ActionDescriptor::RunCustomCode(Payload::new(rest.to_vec())),
            Some(ActionKind::RunScript) => ActionDescriptor::RunScript(Payload::new(rest.to_vec())),
            None => return Err(WireError::UnknownActionType(header.action_type)),
        };

        Ok((header.event_tag, action))
    }
}

/// Ordered set of actions, at most one per kind, kept in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionList {
    actions: Vec<ActionDescriptor>,
}

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action; hands it back if one of the same kind is already present
    pub fn insert(&mut self, action: ActionDescriptor) -> Result<(), ActionDescriptor> {
        match self.actions.binary_search_by_key(&action.kind(), ActionDescriptor::kind) {
            Ok(_) => Err(action),
            Err(position) => {
                self.actions.insert(position, action);
                Ok(())
            }
        }
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActionDescriptor> {
        self.actions.iter()
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions.iter().map(ActionDescriptor::kind).collect()
    }

    /// Sum of the action payload lengths
    pub fn total_len(&self) -> usize {
        self.actions.iter().map(ActionDescriptor::len).sum()
    }
}

impl<'a> IntoIterator for &'a ActionList {
    type Item = &'a ActionDescriptor;
    type IntoIter = std::slice::Iter<'a, ActionDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}
