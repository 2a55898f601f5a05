//! Host communication over two byte transports.
//!
//! # Modules
//! - `transport`: the capability every transport provides
//! - `memory`: buffer-backed transport for the simulator and tests
//! - `stdio`: multiplexes stdin/stdout over USB and Bluetooth

pub mod memory;
pub mod stdio;
pub mod transport;

pub use stdio::StdioMux;
pub use transport::Transport;
