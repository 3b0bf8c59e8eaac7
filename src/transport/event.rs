//! Two-phase event registration
//!
//! Phase one submits the event shell and receives its tag. Phase two attaches
//! each action to that tag, in execution order. If any action is refused the
//! event is cleared again, so a registered event is either complete or absent.
//! When even the clear fails the tag is recorded on the session as orphaned.

use super::{call, IoctlCode, TransportError};
use crate::action::{ActionList, ActionKind};
use crate::event::EventDescriptor;
use crate::session::Session;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// An event the kernel has accepted but whose actions are not attached yet
#[derive(Debug)]
pub struct SubmittedEvent {
    tag: u64,
    event: EventDescriptor,
}

impl SubmittedEvent {
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn event(&self) -> &EventDescriptor {
        &self.event
    }
}

/// An event and its actions, live in the kernel engine
#[derive(Debug)]
pub struct RegisteredEvent {
    pub tag: u64,
    pub event: EventDescriptor,
    pub actions: ActionList,
    pub enabled: bool,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyEventAction {
    Enable = 1,
    Disable = 2,
    Clear = 3,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ModifyEventRequest {
    pub tag: u64,
    pub action: u32,
    pub reserved: u32,
}

/// Send the event shell; the kernel answers with the event's tag
pub fn submit_event(session: &mut Session, event: EventDescriptor) -> Result<SubmittedEvent, TransportError> {
    let request = event.encode();
    let result = call(session, IoctlCode::RegisterEvent, &request)?;

    log::debug!("{} event submitted, tag {:#x}", event.kind, result.tag);
    Ok(SubmittedEvent {
        tag: result.tag,
        event,
    })
}

/// Attach `actions` to a submitted event and record it on the session
pub fn attach_actions(
    session: &mut Session,
    submitted: SubmittedEvent,
    actions: ActionList,
) -> Result<u64, TransportError> {
    let tag = submitted.tag;

    for action in &actions {
        if let Err(err) = call(session, IoctlCode::AddActionToEvent, &action.encode(tag)) {
            return Err(roll_back(session, tag, action.kind(), err));
        }
    }

    log::info!(
        "event {:#x} registered ({}, actions {:?})",
        tag,
        submitted.event.kind,
        actions.kinds()
    );
    session.insert_event(RegisteredEvent {
        tag,
        event: submitted.event,
        actions,
        enabled: true,
    });
    Ok(tag)
}

fn roll_back(session: &mut Session, tag: u64, kind: ActionKind, err: TransportError) -> TransportError {
    log::warn!("'{}' action rejected for event {:#x} ({}), clearing the event", kind, tag, err);

    match send_modify(session, tag, ModifyEventAction::Clear) {
        Ok(()) => TransportError::ActionRejected {
            tag,
            kind,
            source: Box::new(err),
        },
        Err(rollback) => {
            log::error!("event {:#x} is orphaned in the kernel: {}", tag, rollback);
            session.record_orphan(tag);
            TransportError::OrphanedEvent {
                tag,
                kind,
                action: Box::new(err),
                rollback: Box::new(rollback),
            }
        }
    }
}

fn send_modify(session: &mut Session, tag: u64, action: ModifyEventAction) -> Result<(), TransportError> {
    let request = ModifyEventRequest {
        tag,
        action: action as u32,
        reserved: 0,
    };
    call(session, IoctlCode::ModifyEvent, request.as_bytes()).map(|_| ())
}

/// Submit an event, then attach its actions
pub fn register_event(
    session: &mut Session,
    event: EventDescriptor,
    actions: ActionList,
) -> Result<u64, TransportError> {
    let submitted = submit_event(session, event)?;
    attach_actions(session, submitted, actions)
}

/// Remove an event from the kernel and from the session
pub fn clear_event(session: &mut Session, tag: u64) -> Result<(), TransportError> {
    send_modify(session, tag, ModifyEventAction::Clear)?;
    if session.remove_event(tag).is_none() {
        session.forget_orphan(tag);
    }
    log::info!("event {:#x} cleared", tag);
    Ok(())
}

/// Enable or disable a registered event without removing it
pub fn set_event_enabled(session: &mut Session, tag: u64, enabled: bool) -> Result<(), TransportError> {
    let action = if enabled {
        ModifyEventAction::Enable
    } else {
        ModifyEventAction::Disable
    };
    send_modify(session, tag, action)?;
    if let Some(event) = session.event_mut(tag) {
        event.enabled = enabled;
    }
    log::info!("event {:#x} {}", tag, if enabled { "enabled" } else { "disabled" });
    Ok(())
}
