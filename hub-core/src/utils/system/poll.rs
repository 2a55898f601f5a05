//! Cooperative yield point.
//!
//! Busy loops in the foreground (completion waits, transport retries) call
//! [`EventPoll::poll_events`] between attempts so that pending work can run.

use crate::utils::system::status::EventChannel;

/// One cooperative yield.
pub trait EventPoll {
    fn poll_events(&mut self);
}

impl<P: EventPoll + ?Sized> EventPoll for &mut P {
    fn poll_events(&mut self) {
        (**self).poll_events()
    }
}

/// Adapts a closure into an [`EventPoll`].
pub struct PollFn<F>(F);

pub fn poll_fn<F: FnMut()>(f: F) -> PollFn<F> {
    PollFn(f)
}

impl<F: FnMut()> EventPoll for PollFn<F> {
    fn poll_events(&mut self) {
        (self.0)()
    }
}

/// Processor hooks needed to sleep between events.
pub trait Cpu {
    fn interrupts_enabled(&self) -> bool;

    /// Sleep until the next interrupt. Called with interrupts masked; a
    /// pending interrupt must still wake the core.
    fn wait_for_interrupt(&self);
}

/// Sleeps until an interrupt unless an event is already queued.
///
/// The queue is re-checked with interrupts masked right before sleeping,
/// so an event posted just before the check cannot be missed. With
/// interrupts already masked by the caller the hook only spins.
pub struct IdleHook<'a, C> {
    events: &'a EventChannel,
    cpu: C,
}

impl<'a, C: Cpu> IdleHook<'a, C> {
    pub const fn new(
        events: &'a EventChannel,
        cpu: C,
    ) -> Self {
        Self { events, cpu }
    }
}

impl<C: Cpu> EventPoll for IdleHook<'_, C> {
    fn poll_events(&mut self) {
        if !self.cpu.interrupts_enabled() {
            core::hint::spin_loop();
            return;
        }
        critical_section::with(|_| {
            if self.events.is_empty() {
                self.cpu.wait_for_interrupt();
            }
        });
    }
}
