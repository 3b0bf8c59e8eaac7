//! Usermode debuggee state machine against fake OS primitives
//!
//! Run with: cargo test --test debuggee_test

mod common;

use common::{calls, ioctls, MockDevice, MockProcessControl, Reply};
use hyperctl::debug::{DebuggeeError, DebuggeeManager, DebuggeeState, GuestRegisters};
use hyperctl::transport::usermode::{AttachDetachAction, AttachDetachRequest};
use hyperctl::transport::{IoctlCode, KernelResult, TransportError};
use hyperctl::Session;
use std::path::Path;
use zerocopy::FromBytes;

const PID: u32 = 0x1c0;
const TID: u32 = 0x1c4;

fn setup(device: MockDevice) -> (Session, DebuggeeManager<MockProcessControl>) {
    let mut session = Session::new();
    session.attach_device(Box::new(device)).unwrap();
    let control = MockProcessControl::new().with_process(PID, &[TID, TID + 4]);
    (session, DebuggeeManager::new(control))
}

#[test]
fn test_attach_existing_thread() {
    let (device, log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);

    let id = manager.attach(&mut session, PID, TID, None, None).unwrap();
    let thread = manager.get(id).unwrap();
    assert_eq!(thread.state, DebuggeeState::Running);
    assert!(thread.is_active);
    assert!(!thread.is_paused);
    assert_eq!(manager.control().attached, vec![(PID, TID)]);

    let sent = calls(&log);
    assert_eq!(sent.len(), 1);
    let request = AttachDetachRequest::read_from_bytes(&sent[0].input).unwrap();
    assert_eq!(
        request,
        AttachDetachRequest {
            process_id: PID,
            thread_id: TID,
            action: AttachDetachAction::Attach as u32,
            is_starting_new_process: 0,
        }
    );

    let err = manager.attach(&mut session, PID, TID, None, None).unwrap_err();
    assert!(matches!(err, DebuggeeError::AlreadyAttached { pid: PID, tid: TID }));
}

#[test]
fn test_refused_attach_detaches_thread() {
    let (device, _log) = MockDevice::new();
    let device = device.script(IoctlCode::AttachDetachUserModeProcess, Reply::Result(KernelResult::failure(1)));
    let (mut session, mut manager) = setup(device);

    let err = manager.attach(&mut session, PID, TID, None, None).unwrap_err();
    assert!(matches!(err, DebuggeeError::Kernel(TransportError::Rejected { code: 1, .. })));
    assert!(manager.is_empty());
    assert!(manager.control().attached.is_empty());
    assert!(manager.control().terminated.is_empty());
}

#[test]
fn test_attach_starts_image_for_missing_pid() {
    let (device, log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);

    let id = manager
        .attach(&mut session, 0x77, 0x78, Some(Path::new("target.exe")), Some("-x"))
        .unwrap();
    let thread = manager.get(id).unwrap();
    assert_eq!(thread.state, DebuggeeState::Running);
    assert_eq!((thread.process_id, thread.thread_id), (0x2000, 0x2001));
    assert_eq!(manager.control().released.len(), 1);

    let request = AttachDetachRequest::read_from_bytes(&calls(&log)[0].input).unwrap();
    assert_eq!(request.process_id, 0x2000);
    assert_eq!(request.is_starting_new_process, 1);
}

#[test]
fn test_attach_rejects_foreign_thread() {
    let (device, log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);

    let err = manager.attach(&mut session, PID, 0x999, None, None).unwrap_err();
    assert!(matches!(err, DebuggeeError::ThreadProcessMismatch { pid: PID, tid: 0x999 }));
    assert!(manager.is_empty());
    assert!(ioctls(&log).is_empty());

    let err = manager.attach(&mut session, 0x77, 0x78, None, None).unwrap_err();
    assert!(matches!(err, DebuggeeError::ProcessNotFound(0x77)));
}

#[test]
fn test_attach_without_device() {
    let mut session = Session::new();
    let mut manager = DebuggeeManager::new(MockProcessControl::new().with_process(PID, &[TID]));

    let err = manager.attach(&mut session, PID, TID, None, None).unwrap_err();
    assert!(matches!(err, DebuggeeError::Kernel(TransportError::DeviceNotLoaded)));
    assert!(manager.control().attached.is_empty());

    let err = manager.start(&mut session, Path::new("target.exe"), None).unwrap_err();
    assert!(matches!(err, DebuggeeError::Kernel(TransportError::DeviceNotLoaded)));
    assert_eq!(manager.control().processes.len(), 1);
}

#[test]
fn test_pause_resume_cycle() {
    let (device, _log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);
    manager.control_mut().registers = GuestRegisters {
        rip: 0x7ff6_0000_1000,
        rax: 0x42,
        ..Default::default()
    };

    let id = manager.attach(&mut session, PID, TID, None, None).unwrap();

    let err = manager.resume(id).unwrap_err();
    assert!(matches!(
        err,
        DebuggeeError::InvalidStateTransition {
            from: DebuggeeState::Running,
            operation: "resume"
        }
    ));

    let thread = manager.pause(id).unwrap();
    assert_eq!(thread.state, DebuggeeState::Paused);
    assert_eq!(thread.registers.rip, 0x7ff6_0000_1000);
    assert_eq!(manager.control().suspended, vec![(PID, TID)]);

    // Pausing again is a no-op, the thread is not suspended twice
    let thread = manager.pause(id).unwrap();
    assert_eq!(thread.registers.rax, 0x42);
    assert_eq!(manager.control().suspended.len(), 1);

    manager.resume(id).unwrap();
    let thread = manager.get(id).unwrap();
    assert_eq!(thread.state, DebuggeeState::Running);
    assert!(!thread.is_paused);
    assert!(manager.control().suspended.is_empty());
}

#[test]
fn test_failed_snapshot_resumes_thread() {
    let (device, _log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);
    let id = manager.attach(&mut session, PID, TID, None, None).unwrap();

    manager.control_mut().fail_capture = true;
    assert!(manager.pause(id).is_err());
    assert_eq!(manager.get(id).unwrap().state, DebuggeeState::Running);
    assert!(manager.control().suspended.is_empty());
}

#[test]
fn test_unknown_id() {
    let (device, _log) = MockDevice::new();
    let (_session, mut manager) = setup(device);

    let err = manager.pause(42).unwrap_err();
    assert!(matches!(
        err,
        DebuggeeError::InvalidStateTransition {
            from: DebuggeeState::Detached,
            ..
        }
    ));
}

#[test]
fn test_kill_drops_every_thread_of_process() {
    let (device, _log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);

    let first = manager.attach(&mut session, PID, TID, None, None).unwrap();
    let second = manager.attach(&mut session, PID, TID + 4, None, None).unwrap();
    assert_eq!(manager.threads_of(PID).count(), 2);

    let killed = manager.kill(PID).unwrap();
    assert_eq!(killed.len(), 2);
    assert!(killed.iter().all(|t| t.state == DebuggeeState::Terminated && !t.is_active));
    assert!(manager.get(first).is_none());
    assert!(manager.get(second).is_none());
    assert_eq!(manager.control().terminated, vec![PID]);

    // Killing again does not touch the OS
    assert!(manager.kill(PID).unwrap().is_empty());
    assert_eq!(manager.control().terminated.len(), 1);
}

#[test]
fn test_detach_resumes_paused_thread() {
    let (device, log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);

    let id = manager.attach(&mut session, PID, TID, None, None).unwrap();
    manager.pause(id).unwrap();

    let thread = manager.detach(&mut session, id).unwrap();
    assert_eq!(thread.state, DebuggeeState::Detached);
    assert!(manager.is_empty());
    assert!(manager.control().suspended.is_empty());
    assert!(manager.control().attached.is_empty());

    let sent = calls(&log);
    let request = AttachDetachRequest::read_from_bytes(&sent[1].input).unwrap();
    assert_eq!(request.action, AttachDetachAction::Detach as u32);
}

#[test]
fn test_refused_detach_keeps_record() {
    let (device, _log) = MockDevice::new();
    let device = device
        .script(IoctlCode::AttachDetachUserModeProcess, Reply::Result(KernelResult::success(0)))
        .script(IoctlCode::AttachDetachUserModeProcess, Reply::Result(KernelResult::failure(5)));
    let (mut session, mut manager) = setup(device);

    let id = manager.attach(&mut session, PID, TID, None, None).unwrap();
    let err = manager.detach(&mut session, id).unwrap_err();
    assert!(matches!(err, DebuggeeError::Kernel(TransportError::Rejected { code: 5, .. })));
    assert_eq!(manager.get(id).unwrap().state, DebuggeeState::Running);
}

#[test]
fn test_start_releases_created_process() {
    let (device, log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);

    let id = manager
        .start(&mut session, Path::new("target.exe"), Some("--flag"))
        .unwrap();
    let thread = manager.get(id).unwrap();
    assert_eq!(thread.state, DebuggeeState::Running);
    assert_eq!(manager.control().released.len(), 1);
    assert!(manager.control().suspended.is_empty());

    let request = AttachDetachRequest::read_from_bytes(&calls(&log)[0].input).unwrap();
    assert_eq!(request.is_starting_new_process, 1);
    assert_eq!(request.process_id, thread.process_id);
}

#[test]
fn test_rejected_start_terminates_created_process() {
    let (device, _log) = MockDevice::new();
    let device = device.script(IoctlCode::AttachDetachUserModeProcess, Reply::Result(KernelResult::failure(1)));
    let (mut session, mut manager) = setup(device);

    let err = manager.start(&mut session, Path::new("target.exe"), None).unwrap_err();
    assert!(matches!(err, DebuggeeError::Kernel(TransportError::Rejected { .. })));
    assert!(manager.is_empty());
    assert_eq!(manager.control().terminated.len(), 1);
    assert!(manager.control().released.is_empty());
}

#[test]
fn test_failed_release_undoes_kernel_attach() {
    let (device, log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);
    manager.control_mut().fail_release = true;

    assert!(manager.start(&mut session, Path::new("target.exe"), None).is_err());
    assert!(manager.is_empty());
    assert_eq!(manager.control().terminated, vec![0x2000]);

    let actions: Vec<u32> = calls(&log)
        .iter()
        .map(|call| AttachDetachRequest::read_from_bytes(&call.input).unwrap().action)
        .collect();
    assert_eq!(
        actions,
        vec![AttachDetachAction::Attach as u32, AttachDetachAction::Detach as u32]
    );
}

#[test]
fn test_recycled_pid_does_not_replace_record() {
    let (device, _log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);
    manager.control_mut().processes.insert(0x2000, vec![0x2001]);

    let stale = manager.attach(&mut session, 0x2000, 0x2001, None, None).unwrap();

    // The process exits on its own and its pid comes back for a new one
    manager.control_mut().processes.remove(&0x2000);
    manager.control_mut().next_pid = 0x2000;

    let err = manager.start(&mut session, Path::new("target.exe"), None).unwrap_err();
    assert!(matches!(err, DebuggeeError::AlreadyAttached { pid: 0x2000, tid: 0x2001 }));
    assert_eq!(manager.control().terminated, vec![0x2000]);
    assert_eq!(manager.find(0x2000, 0x2001).unwrap().unique_debugging_id, stale);
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_debugging_ids_are_not_reused() {
    let (device, _log) = MockDevice::new();
    let (mut session, mut manager) = setup(device);

    let first = manager.attach(&mut session, PID, TID, None, None).unwrap();
    manager.detach(&mut session, first).unwrap();
    let second = manager.attach(&mut session, PID, TID, None, None).unwrap();
    assert_ne!(first, second);
    assert!(manager.get(first).is_none());
    assert_eq!(manager.find(PID, TID).unwrap().unique_debugging_id, second);
}
