//! System status flags and the event bus.
//!
//! Flags live in a bit-set. Changing a flag posts a status event to the
//! supervisor's queue, in the same order the changes happened.

use core::cell::Cell;

use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex},
    channel::Channel,
};
use serde::{Deserialize, Serialize};

/// Depth of the supervisor event queue.
pub const EVENT_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFlag {
    UserProgramRunning,
    PowerButtonPressed,
    BatteryLowVoltageWarning,
    BatteryLowVoltageShutdown,
    BleAdvertising,
    Shutdown,
}

impl StatusFlag {
    pub const ALL: [StatusFlag; 6] = [
        StatusFlag::UserProgramRunning,
        StatusFlag::PowerButtonPressed,
        StatusFlag::BatteryLowVoltageWarning,
        StatusFlag::BatteryLowVoltageShutdown,
        StatusFlag::BleAdvertising,
        StatusFlag::Shutdown,
    ];

    const fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Everything the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    TimerExpired,
    StatusSet { flag: StatusFlag },
    StatusCleared { flag: StatusFlag },
    StdinReceived { byte: u8 },
    IoReady,
}

pub type EventChannel = Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_DEPTH>;

/// The supervisor's event queue.
pub static EVENTS: EventChannel = Channel::new();

/// Queue `event` without blocking. A full queue drops it.
pub fn post(
    events: &EventChannel,
    event: Event,
) {
    if events.try_send(event).is_err() {
        tracing::warn!(?event, "event queue full, dropped");
    }
}

/// Status bit-set bound to an event queue.
pub struct SystemStatus<'a> {
    flags: Mutex<CriticalSectionRawMutex, Cell<u32>>,
    events: &'a EventChannel,
}

impl<'a> SystemStatus<'a> {
    pub const fn new(events: &'a EventChannel) -> Self {
        Self {
            flags: Mutex::new(Cell::new(0)),
            events,
        }
    }

    /// Raise `flag`. Posts an event only if it was clear.
    pub fn set(
        &self,
        flag: StatusFlag,
    ) {
        if self.swap(flag, true) {
            post(self.events, Event::StatusSet { flag });
        }
    }

    /// Lower `flag`. Posts an event only if it was set.
    pub fn clear(
        &self,
        flag: StatusFlag,
    ) {
        if self.swap(flag, false) {
            post(self.events, Event::StatusCleared { flag });
        }
    }

    pub fn test(
        &self,
        flag: StatusFlag,
    ) -> bool {
        self.flags.lock(|f| f.get() & flag.bit() != 0)
    }

    /// Raw bit-set, one bit per [`StatusFlag`] in declaration order.
    pub fn flags(&self) -> u32 {
        self.flags.lock(Cell::get)
    }

    pub const fn events(&self) -> &'a EventChannel {
        self.events
    }

    /// Returns whether the bit changed.
    fn swap(
        &self,
        flag: StatusFlag,
        on: bool,
    ) -> bool {
        self.flags.lock(|f| {
            let old = f.get();
            let new = if on { old | flag.bit() } else { old & !flag.bit() };
            f.set(new);
            old != new
        })
    }
}
