//! Standard I/O over two independent transports.
//!
//! Output goes to USB (when present) and then to Bluetooth; both carry the
//! whole stream. A busy transport is retried after a cooperative yield with
//! no retry limit. A transport that fails hard is skipped for the rest of
//! that write and the unsent bytes for it are dropped. Losing data on
//! disconnect is accepted.

use core::fmt;

use crate::utils::{
    connection::transport::Transport,
    system::{
        poll::EventPoll,
        status::{post, Event, EventChannel},
    },
};

pub struct StdioMux<B, U, P> {
    bluetooth: B,
    usb: Option<U>,
    hook: P,
}

impl<B, U, P> StdioMux<B, U, P>
where
    B: Transport,
    U: Transport,
    P: EventPoll,
{
    pub fn new(
        bluetooth: B,
        usb: Option<U>,
        hook: P,
    ) -> Self {
        Self {
            bluetooth,
            usb,
            hook,
        }
    }

    pub fn bluetooth(&self) -> &B {
        &self.bluetooth
    }

    pub fn bluetooth_mut(&mut self) -> &mut B {
        &mut self.bluetooth
    }

    pub fn usb(&self) -> Option<&U> {
        self.usb.as_ref()
    }

    pub fn usb_mut(&mut self) -> Option<&mut U> {
        self.usb.as_mut()
    }

    pub fn into_parts(self) -> (B, Option<U>, P) {
        (self.bluetooth, self.usb, self.hook)
    }

    /// Send `data` on every transport.
    pub fn write(
        &mut self,
        data: &[u8],
    ) {
        if let Some(usb) = self.usb.as_mut() {
            send_all(usb, data, &mut self.hook, "usb");
        }
        send_all(&mut self.bluetooth, data, &mut self.hook, "bluetooth");
    }

    /// Yield until both transports are idle at the same time.
    pub fn flush(&mut self) {
        loop {
            let usb_idle = self.usb.as_ref().is_none_or(|u| u.transmit_is_idle());
            if usb_idle && self.bluetooth.transmit_is_idle() {
                return;
            }
            self.hook.poll_events();
        }
    }

    /// Yield until a byte arrives, then take exactly one. USB is checked
    /// first.
    pub fn read_byte(&mut self) -> u8 {
        loop {
            if let Some(usb) = self.usb.as_mut() {
                if let Some(b) = take_byte(usb, "usb") {
                    return b;
                }
            }
            if let Some(b) = take_byte(&mut self.bluetooth, "bluetooth") {
                return b;
            }
            self.hook.poll_events();
        }
    }

    /// Whether any transport has input waiting.
    pub fn poll(&self) -> bool {
        self.usb.as_ref().is_some_and(|u| u.receive_available())
            || self.bluetooth.receive_available()
    }

    /// Hand every waiting input byte to the supervisor as stdin events.
    ///
    /// Returns the number of bytes forwarded.
    pub fn forward_input(
        &mut self,
        events: &EventChannel,
    ) -> usize {
        let mut forwarded = 0;
        while self.poll() && !events.is_full() {
            let byte = self.read_byte();
            post(events, Event::StdinReceived { byte });
            forwarded += 1;
        }
        forwarded
    }
}

impl<B, U, P> fmt::Write for StdioMux<B, U, P>
where
    B: Transport,
    U: Transport,
    P: EventPoll,
{
    fn write_str(
        &mut self,
        s: &str,
    ) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}

/// Returns the number of bytes the transport accepted.
fn send_all<T: Transport, P: EventPoll>(
    transport: &mut T,
    data: &[u8],
    poll: &mut P,
    name: &'static str,
) -> usize {
    let mut sent = 0;
    while sent < data.len() {
        match transport.transmit(&data[sent..]) {
            Ok(0) => poll.poll_events(),
            Ok(n) => sent += n,
            Err(e) if e.is_transient() => poll.poll_events(),
            Err(e) => {
                tracing::warn!(
                    transport = name,
                    dropped = data.len() - sent,
                    error = e.as_label(),
                    "write dropped"
                );
                break;
            }
        }
    }
    sent
}

fn take_byte<T: Transport>(
    transport: &mut T,
    name: &'static str,
) -> Option<u8> {
    if !transport.receive_available() {
        return None;
    }
    let mut buf = [0u8; 1];
    match transport.receive(&mut buf) {
        Ok(1) => Some(buf[0]),
        Ok(_) => None,
        Err(e) => {
            if !e.is_transient() {
                tracing::warn!(transport = name, error = e.as_label(), "read failed");
            }
            None
        }
    }
}
