//! Session - the controller's explicit context object
//!
//! Holds the hypervisor device handle, the events registered through it and the
//! last transparency measurements. Lifecycle is `Initialized -> Ready -> TornDown`;
//! `unload` drops back to `Initialized`, `teardown` is final.

use crate::measure::TransparencyMeasurements;
use crate::transport::{DeviceChannel, RegisteredEvent, TransportError};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Initialized,
    Ready,
    TornDown,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("the hypervisor device is already loaded")]
    AlreadyLoaded,

    #[error("the session has been torn down")]
    TornDown,

    #[error("failed to open the hypervisor device: {0}")]
    OpenDevice(#[source] io::Error),

    #[error("the hypervisor device is only available on Windows")]
    Unsupported,
}

#[derive(Default)]
pub struct Session {
    state: SessionState,
    device: Option<Box<dyn DeviceChannel>>,
    events: BTreeMap<u64, RegisteredEvent>,
    orphaned: Vec<u64>,
    measurements: Option<TransparencyMeasurements>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("device", &self.device.is_some())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("orphaned", &self.orphaned)
            .finish()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Install a device channel and move to `Ready`
    pub fn attach_device(&mut self, device: Box<dyn DeviceChannel>) -> Result<(), SessionError> {
        match self.state {
            SessionState::TornDown => Err(SessionError::TornDown),
            SessionState::Ready => Err(SessionError::AlreadyLoaded),
            SessionState::Initialized => {
                self.device = Some(device);
                self.state = SessionState::Ready;
                log::info!("hypervisor device attached, session ready");
                Ok(())
            }
        }
    }

    /// Open the installed hypervisor device (`load vmm`)
    #[cfg(target_os = "windows")]
    pub fn open_hypervisor_device(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::TornDown {
            return Err(SessionError::TornDown);
        }
        if self.device.is_some() {
            return Err(SessionError::AlreadyLoaded);
        }
        let device = crate::transport::windows::HypervisorDevice::open().map_err(SessionError::OpenDevice)?;
        self.attach_device(Box::new(device))
    }

    #[cfg(not(target_os = "windows"))]
    pub fn open_hypervisor_device(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::TornDown {
            return Err(SessionError::TornDown);
        }
        Err(SessionError::Unsupported)
    }

    /// The device handle, or `DeviceNotLoaded`
    pub fn device(&mut self) -> Result<&mut dyn DeviceChannel, TransportError> {
        match self.device.as_mut() {
            Some(device) => Ok(device.as_mut()),
            None => Err(TransportError::DeviceNotLoaded),
        }
    }

    /// Close the device and forget registered events; the session can be loaded again
    pub fn unload(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::TornDown {
            return Err(SessionError::TornDown);
        }
        self.release();
        self.state = SessionState::Initialized;
        log::info!("hypervisor device unloaded");
        Ok(())
    }

    /// Drop everything the session owns; final
    pub fn teardown(&mut self) {
        if self.state != SessionState::TornDown {
            self.release();
            self.measurements = None;
            self.state = SessionState::TornDown;
            log::debug!("session torn down");
        }
    }

    fn release(&mut self) {
        if !self.events.is_empty() {
            log::debug!("releasing {} registered event(s)", self.events.len());
        }
        self.events.clear();
        self.orphaned.clear();
        self.device = None;
    }

    pub fn registered_events(&self) -> impl Iterator<Item = &RegisteredEvent> {
        self.events.values()
    }

    pub fn event(&self, tag: u64) -> Option<&RegisteredEvent> {
        self.events.get(&tag)
    }

    pub(crate) fn event_mut(&mut self, tag: u64) -> Option<&mut RegisteredEvent> {
        self.events.get_mut(&tag)
    }

    pub(crate) fn insert_event(&mut self, event: RegisteredEvent) {
        self.events.insert(event.tag, event);
    }

    pub(crate) fn remove_event(&mut self, tag: u64) -> Option<RegisteredEvent> {
        self.events.remove(&tag)
    }

    pub(crate) fn record_orphan(&mut self, tag: u64) {
        if !self.orphaned.contains(&tag) {
            self.orphaned.push(tag);
        }
    }

    pub(crate) fn forget_orphan(&mut self, tag: u64) {
        self.orphaned.retain(|&t| t != tag);
    }

    /// Tags of events left in the kernel after a failed rollback
    pub fn orphaned_events(&self) -> &[u64] {
        &self.orphaned
    }

    pub fn measurements(&self) -> Option<&TransparencyMeasurements> {
        self.measurements.as_ref()
    }

    pub fn set_measurements(&mut self, measurements: TransparencyMeasurements) {
        self.measurements = Some(measurements);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
