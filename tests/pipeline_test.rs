//! Event command to kernel: registration, rollback and payload release
//!
//! Run with: cargo test --test pipeline_test

mod common;

use common::{calls, ioctls, MockDevice, Reply};
use hyperctl::action::{ActionDescriptor, ActionKind};
use hyperctl::event::{EventDescriptor, ProcessScope, TrapKind};
use hyperctl::expr::NoSymbols;
use hyperctl::payload::ledger;
use hyperctl::pipeline::{submit_command, CommandError};
use hyperctl::transport::event::{ModifyEventAction, ModifyEventRequest};
use hyperctl::transport::{clear_event, set_event_enabled, write_msr, IoctlCode, KernelResult, MsrRequest, TransportError};
use hyperctl::Session;
use zerocopy::FromBytes;

const TRACE_WITH_CODE: &[&str] = &["!trace", "u", "pid", "1c0", "condition", "{90}", "code", "{c3}"];

fn session_with(device: MockDevice) -> Session {
    let mut session = Session::new();
    session.attach_device(Box::new(device)).unwrap();
    session
}

#[test]
fn test_register_event_with_actions() {
    let (device, log) = MockDevice::new();
    let mut session = session_with(device);

    let before = ledger();
    let tag = submit_command(
        &mut session,
        TrapKind::TrapExecutionSingleInstruction,
        &["!trace", "u", "pid", "1c0", "break", "code", "{c3}", "script", "{", "x", "}"],
        &NoSymbols,
    )
    .unwrap();
    assert_eq!(tag, 0x1000);

    // Payloads now belong to the registered event
    let delta = ledger().since(before);
    assert_eq!(delta.allocated, 2);
    assert_eq!(delta.released, 0);

    assert_eq!(
        ioctls(&log),
        vec![
            IoctlCode::RegisterEvent,
            IoctlCode::AddActionToEvent,
            IoctlCode::AddActionToEvent,
            IoctlCode::AddActionToEvent,
        ]
    );

    let sent = calls(&log);
    let event = EventDescriptor::decode(&sent[0].input).unwrap();
    assert_eq!(event.process, ProcessScope::Process(0x1c0));

    let kinds: Vec<ActionKind> = sent[1..]
        .iter()
        .map(|call| {
            let (event_tag, action) = ActionDescriptor::decode(&call.input).unwrap();
            assert_eq!(event_tag, tag);
            action.kind()
        })
        .collect();
    assert_eq!(
        kinds,
        vec![ActionKind::BreakToDebugger, ActionKind::RunCustomCode, ActionKind::RunScript]
    );

    let registered = session.event(tag).unwrap();
    assert!(registered.enabled);
    assert_eq!(registered.actions.len(), 3);
}

#[test]
fn test_rejected_action_rolls_back_event() {
    let (device, log) = MockDevice::new();
    let device = device.script(IoctlCode::AddActionToEvent, Reply::Result(KernelResult::failure(0xc000_0001)));
    let mut session = session_with(device);

    let before = ledger();
    let err = submit_command(&mut session, TrapKind::TrapExecutionSingleInstruction, TRACE_WITH_CODE, &NoSymbols)
        .unwrap_err();

    match err {
        CommandError::Transport(TransportError::ActionRejected { tag, kind, source }) => {
            assert_eq!(tag, 0x1000);
            assert_eq!(kind, ActionKind::RunCustomCode);
            assert!(matches!(*source, TransportError::Rejected { code: 0xc000_0001, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }

    let delta = ledger().since(before);
    assert_eq!(delta.allocated, 2);
    assert_eq!(delta.released, 2);

    assert_eq!(
        ioctls(&log),
        vec![IoctlCode::RegisterEvent, IoctlCode::AddActionToEvent, IoctlCode::ModifyEvent]
    );
    let clear = ModifyEventRequest::read_from_bytes(&calls(&log)[2].input).unwrap();
    assert_eq!(clear.tag, 0x1000);
    assert_eq!(clear.action, ModifyEventAction::Clear as u32);

    assert_eq!(session.registered_events().count(), 0);
    assert!(session.orphaned_events().is_empty());
}

#[test]
fn test_failed_rollback_records_orphan() {
    let (device, _log) = MockDevice::new();
    let device = device
        .script(IoctlCode::AddActionToEvent, Reply::OsError(31))
        .script(IoctlCode::ModifyEvent, Reply::OsError(6));
    let mut session = session_with(device);

    let err = submit_command(&mut session, TrapKind::TrapExecutionSingleInstruction, TRACE_WITH_CODE, &NoSymbols)
        .unwrap_err();

    match err {
        CommandError::Transport(TransportError::OrphanedEvent {
            tag,
            action,
            rollback,
            ..
        }) => {
            assert_eq!(tag, 0x1000);
            assert_eq!(action.os_code(), Some(31));
            assert_eq!(rollback.os_code(), Some(6));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.orphaned_events(), &[0x1000]);
    assert!(session.event(0x1000).is_none());

    // A later successful clear forgets the orphan
    clear_event(&mut session, 0x1000).unwrap();
    assert!(session.orphaned_events().is_empty());
}

#[test]
fn test_device_error_code_is_passed_through() {
    let (device, log) = MockDevice::new();
    let device = device.script(IoctlCode::RegisterEvent, Reply::OsError(1167));
    let mut session = session_with(device);

    let before = ledger();
    let err = submit_command(&mut session, TrapKind::TrapExecutionSingleInstruction, TRACE_WITH_CODE, &NoSymbols)
        .unwrap_err();
    match err {
        CommandError::Transport(err) => {
            assert_eq!(err.os_code(), Some(1167));
            assert!(matches!(err, TransportError::DeviceIo { ioctl: IoctlCode::RegisterEvent, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }

    // No action is sent for an event the kernel never accepted
    assert_eq!(ioctls(&log), vec![IoctlCode::RegisterEvent]);
    let delta = ledger().since(before);
    assert_eq!(delta.allocated, delta.released);
}

#[test]
fn test_short_response() {
    let (device, _log) = MockDevice::new();
    let device = device.script(IoctlCode::RegisterEvent, Reply::Short(4));
    let mut session = session_with(device);

    let err = submit_command(&mut session, TrapKind::CpuidInstructionExecution, &["!cpuid"], &NoSymbols).unwrap_err();
    assert!(matches!(
        err,
        CommandError::Transport(TransportError::ShortResponse {
            expected: 16,
            actual: 4,
            ..
        })
    ));
}

#[test]
fn test_clear_and_toggle_registered_event() {
    let (device, log) = MockDevice::new();
    let mut session = session_with(device);

    let tag = submit_command(&mut session, TrapKind::TrapExecutionSingleInstruction, TRACE_WITH_CODE, &NoSymbols)
        .unwrap();

    set_event_enabled(&mut session, tag, false).unwrap();
    assert!(!session.event(tag).unwrap().enabled);
    set_event_enabled(&mut session, tag, true).unwrap();
    assert!(session.event(tag).unwrap().enabled);

    let before = ledger();
    clear_event(&mut session, tag).unwrap();
    assert!(session.event(tag).is_none());
    assert_eq!(ledger().since(before).released, 2);

    let modify: Vec<u32> = calls(&log)
        .iter()
        .filter(|c| c.ioctl == IoctlCode::ModifyEvent)
        .map(|c| ModifyEventRequest::read_from_bytes(&c.input).unwrap().action)
        .collect();
    assert_eq!(
        modify,
        vec![
            ModifyEventAction::Disable as u32,
            ModifyEventAction::Enable as u32,
            ModifyEventAction::Clear as u32,
        ]
    );
}

#[test]
fn test_teardown_releases_registered_payloads() {
    let (device, _log) = MockDevice::new();
    let mut session = session_with(device);

    let before = ledger();
    submit_command(&mut session, TrapKind::TrapExecutionSingleInstruction, TRACE_WITH_CODE, &NoSymbols).unwrap();
    session.teardown();

    let delta = ledger().since(before);
    assert_eq!(delta.allocated, 2);
    assert_eq!(delta.released, 2);
    assert!(!session.has_device());
}

#[test]
fn test_write_msr_request() {
    let (device, log) = MockDevice::new();
    let mut session = session_with(device);

    let request = MsrRequest::parse(&["wrmsr", "c0000082", "1234", "core", "2"], &NoSymbols).unwrap();
    write_msr(&mut session, &request).unwrap();

    let sent = calls(&log);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ioctl, IoctlCode::ReadOrWriteMsr);
    let decoded = MsrRequest::read_from_bytes(&sent[0].input).unwrap();
    assert_eq!(decoded.msr, 0xc000_0082);
    assert_eq!(decoded.value, 0x1234);
    assert_eq!(decoded.core_number, 2);
}
