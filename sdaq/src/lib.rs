//! Host-side driver for the SDAQ CAN-bus sensor acquisition protocol.
//!
//! The crate is layered the same way the bus traffic is: [`id`] and [`messages`]
//! turn raw frames into typed [`messages::Packet`]s, [`commands`] builds the
//! outbound frames, and the stateful sequences ([`discovery`], [`autoconfig`],
//! [`calibration`] and [`firmware`]) drive a [`port::Port`].

pub mod autoconfig;
pub mod bus;
pub mod calibration;
pub mod catalog;
pub mod commands;
pub mod deadline;
pub mod discovery;
pub mod firmware;
pub mod id;
pub mod ihex;
pub mod messages;
pub mod monitor;
pub mod port;
pub mod sim;

pub use deadline::{Deadline, RunFlag};
pub use messages::{Message, Packet};
pub use port::{Frame, Port, PortError};

/// Value of the 6-bit protocol field every SDAQ identifier carries.
pub const PROTOCOL_ID: u8 = 0x35;
/// Destination address reaching every device on the bus.
pub const BROADCAST_ADDRESS: u8 = 0;
/// Address of a device that has not been configured yet.
pub const PARKING_ADDRESS: u8 = 63;
/// Highest address a configured device may hold.
pub const MAX_DEVICE_ADDRESS: u8 = PARKING_ADDRESS - 1;
pub const MAX_CHANNELS: u8 = 16;
pub const MAX_POINTS: u8 = 16;
pub const POINT_TYPES: u8 = 6;
