//! Buffer-backed [`Transport`].
//!
//! Outgoing bytes land in a TX queue the other side drains, incoming bytes
//! are pushed into an RX queue. Busy periods and disconnects can be scripted.

use core::cell::Cell;

use heapless::Deque;

use crate::utils::{
    connection::transport::Transport,
    error::{HubError, HubResult},
};

#[derive(Debug)]
pub struct MemoryTransport<const TX: usize, const RX: usize> {
    tx: Deque<u8, TX>,
    rx: Deque<u8, RX>,
    connected: bool,
    /// Largest chunk accepted per `transmit` call.
    chunk: usize,
    /// Upcoming `transmit` calls rejected with `Again`.
    busy_writes: u32,
    /// Upcoming `transmit_is_idle` queries answered `false`.
    busy_queries: Cell<u32>,
}

impl<const TX: usize, const RX: usize> Default for MemoryTransport<TX, RX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const TX: usize, const RX: usize> MemoryTransport<TX, RX> {
    pub const fn new() -> Self {
        Self {
            tx: Deque::new(),
            rx: Deque::new(),
            connected: true,
            chunk: usize::MAX,
            busy_writes: 0,
            busy_queries: Cell::new(0),
        }
    }

    pub fn with_chunk(
        mut self,
        chunk: usize,
    ) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn connect(&mut self) {
        self.connected = true;
    }

    /// Later calls fail with `Io` until reconnected.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Reject the next `writes` transmissions as busy.
    pub fn busy_for(
        &mut self,
        writes: u32,
    ) {
        self.busy_writes = writes;
    }

    /// Report not idle for the next `queries` idle checks.
    pub fn not_idle_for(
        &self,
        queries: u32,
    ) {
        self.busy_queries.set(queries);
    }

    /// Bytes handed in by the far side. Returns how many fit.
    pub fn push_received(
        &mut self,
        data: &[u8],
    ) -> usize {
        data.iter()
            .take_while(|&&b| self.rx.push_back(b).is_ok())
            .count()
    }

    /// Take the oldest transmitted byte.
    pub fn pop_sent(&mut self) -> Option<u8> {
        self.tx.pop_front()
    }

    pub fn sent(&self) -> impl Iterator<Item = &u8> {
        self.tx.iter()
    }

    pub fn sent_len(&self) -> usize {
        self.tx.len()
    }
}

impl<const TX: usize, const RX: usize> Transport for MemoryTransport<TX, RX> {
    fn transmit(
        &mut self,
        data: &[u8],
    ) -> HubResult<usize> {
        if !self.connected {
            return Err(HubError::Io);
        }
        if self.busy_writes > 0 {
            self.busy_writes -= 1;
            return Err(HubError::Again);
        }
        let room = self.tx.capacity() - self.tx.len();
        if room == 0 {
            return Err(HubError::Again);
        }
        let n = data.len().min(room).min(self.chunk);
        for &b in &data[..n] {
            // Bounded by `room` above.
            let _ = self.tx.push_back(b);
        }
        Ok(n)
    }

    fn transmit_is_idle(&self) -> bool {
        let pending = self.busy_queries.get();
        if pending > 0 {
            self.busy_queries.set(pending - 1);
            return false;
        }
        self.busy_writes == 0
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> HubResult<usize> {
        if !self.connected {
            return Err(HubError::Io);
        }
        if self.rx.is_empty() {
            return Err(HubError::Again);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn receive_available(&self) -> bool {
        self.connected && !self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_transmit() {
        let mut t = MemoryTransport::<16, 4>::new().with_chunk(3);
        assert_eq!(t.transmit(b"hello"), Ok(3));
        assert_eq!(t.transmit(b"lo"), Ok(2));
        assert!(t.sent().copied().eq(b"hello".iter().copied()));
        assert_eq!(t.sent_len(), 5);
    }

    #[test]
    fn test_scripted_busy_and_disconnect() {
        let mut t = MemoryTransport::<4, 4>::new();
        t.busy_for(1);
        assert!(!t.transmit_is_idle());
        assert_eq!(t.transmit(b"x"), Err(HubError::Again));
        assert_eq!(t.transmit(b"x"), Ok(1));
        t.disconnect();
        assert_eq!(t.transmit(b"x"), Err(HubError::Io));
        assert!(!t.receive_available());
    }

    #[test]
    fn test_receive_drains_in_order() {
        let mut t = MemoryTransport::<4, 4>::new();
        assert_eq!(t.push_received(b"abcdef"), 4);
        let mut buf = [0u8; 3];
        assert_eq!(t.receive(&mut buf), Ok(3));
        assert_eq!(&buf, b"abc");
        assert_eq!(t.receive(&mut buf), Ok(1));
        assert_eq!(t.receive(&mut buf), Err(HubError::Again));
    }
}
