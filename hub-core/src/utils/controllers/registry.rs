//! Per-device completion status.
//!
//! Every set-up motor and the drivebase own exactly one entry. Issuing a
//! command resets the entry to [`Status::Pending`]; the control loop moves it
//! to a terminal value. Callers observe it through a [`CompletionHandle`].

use serde::{Deserialize, Serialize};

use crate::utils::{
    controllers::actuator::{Port, PORT_COUNT},
    error::{Completion, HubError, HubResult},
};

/// A device that can own a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Motor(Port),
    DriveBase,
}

impl Device {
    const fn slot(self) -> usize {
        match self {
            Device::Motor(port) => port.index(),
            Device::DriveBase => PORT_COUNT,
        }
    }
}

/// Stored value of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    Success,
    Error(HubError),
}

impl Status {
    pub const fn is_pending(self) -> bool {
        matches!(self, Status::Pending)
    }
}

impl From<HubResult> for Status {
    fn from(result: HubResult) -> Self {
        match result {
            Ok(()) => Status::Success,
            Err(e) => Status::Error(e),
        }
    }
}

impl From<Status> for Completion {
    fn from(status: Status) -> Self {
        match status {
            Status::Pending => Completion::Pending,
            Status::Success => Completion::Done(Ok(())),
            Status::Error(e) => Completion::Done(Err(e)),
        }
    }
}

/// Fixed arena with one slot per port plus the drivebase.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRegistry {
    entries: [Option<Status>; PORT_COUNT + 1],
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub const fn new() -> Self {
        Self {
            entries: [None; PORT_COUNT + 1],
        }
    }

    /// Allocate the entry for `device`, or reset the existing one.
    pub fn claim(
        &mut self,
        device: Device,
    ) -> CompletionHandle {
        self.entries[device.slot()] = Some(Status::Pending);
        CompletionHandle { device }
    }

    /// Mark a new command on `device`.
    ///
    /// Overwrites any terminal value. Fails `NoDev` if the device has no
    /// entry.
    pub fn issue(
        &mut self,
        device: Device,
    ) -> HubResult<CompletionHandle> {
        let entry = self.entries[device.slot()]
            .as_mut()
            .ok_or(HubError::NoDev)?;
        *entry = Status::Pending;
        Ok(CompletionHandle { device })
    }

    /// Store a terminal value. Ignored for devices without an entry.
    pub fn complete(
        &mut self,
        device: Device,
        result: HubResult,
    ) {
        if let Some(entry) = self.entries[device.slot()].as_mut() {
            *entry = result.into();
        }
    }

    pub fn status(
        &self,
        device: Device,
    ) -> Option<Status> {
        self.entries[device.slot()]
    }

    /// Non-blocking read of the entry for `device`.
    pub fn poll(
        &self,
        device: Device,
    ) -> Completion {
        match self.status(device) {
            Some(status) => status.into(),
            None => Completion::Done(Err(HubError::NoDev)),
        }
    }

    pub fn release(
        &mut self,
        device: Device,
    ) {
        self.entries[device.slot()] = None;
    }
}

/// Returned when a command is issued; polls the device's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionHandle {
    device: Device,
}

impl CompletionHandle {
    pub const fn device(&self) -> Device {
        self.device
    }

    pub fn poll(
        &self,
        registry: &StatusRegistry,
    ) -> Completion {
        registry.poll(self.device)
    }
}
