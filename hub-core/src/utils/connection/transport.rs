//! Byte transport capability.
//!
//! Link layers (USB CDC, Bluetooth serial) sit behind this trait. Calls never
//! block: a busy transport answers `Err(HubError::Again)`, and any other
//! error means the link is gone for now.

use crate::utils::error::HubResult;

pub trait Transport {
    /// Queue as much of `data` as fits. Returns the number of bytes taken.
    fn transmit(
        &mut self,
        data: &[u8],
    ) -> HubResult<usize>;

    /// Nothing is waiting to go out.
    fn transmit_is_idle(&self) -> bool;

    /// Move buffered input into `buf`. Returns the number of bytes read.
    fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> HubResult<usize>;

    /// At least one byte can be received.
    fn receive_available(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transmit(
        &mut self,
        data: &[u8],
    ) -> HubResult<usize> {
        (**self).transmit(data)
    }

    fn transmit_is_idle(&self) -> bool {
        (**self).transmit_is_idle()
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> HubResult<usize> {
        (**self).receive(buf)
    }

    fn receive_available(&self) -> bool {
        (**self).receive_available()
    }
}
