use std::io::ErrorKind;
use std::time::Duration;

use socketcan::{CanFilter, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, SocketOptions};

use crate::id::{EFF_FLAG, EXTENDED_MASK, RxFilter};

/// Largest payload of a classic CAN frame.
pub const MAX_PAYLOAD: usize = 8;

/// One classic CAN frame with a 29-bit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    len: u8,
    data: [u8; MAX_PAYLOAD],
}
impl Frame {
    /// `None` when `payload` does not fit a classic frame.
    pub fn new(id: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD {
            return None;
        }
        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self::from_array(id, data, payload.len() as u8))
    }
    pub const fn from_array(id: u32, data: [u8; MAX_PAYLOAD], len: u8) -> Self {
        Self {
            id: id & EXTENDED_MASK,
            len: if len as usize > MAX_PAYLOAD { MAX_PAYLOAD as u8 } else { len },
            data,
        }
    }
    pub const fn id(&self) -> u32 { self.id }
    pub fn data(&self) -> &[u8] { &self.data[..self.len as usize] }
}

#[derive(thiserror::Error, Debug)]
pub enum PortError {
    #[error("Failed to open CAN interface {interface}: {source}")]
    Open {
        interface: String,
        source: std::io::Error,
    },
    #[error("Identifier {0:#x} is not a valid extended identifier")]
    InvalidIdentifier(u32),
    #[error("Failed to send frame: {0}")]
    Send(std::io::Error),
    #[error("Failed to receive frame: {0}")]
    Receive(std::io::Error),
    #[error("Bus endpoint is disconnected")]
    Disconnected,
}

/// Blocking access to a CAN bus.
pub trait Port {
    fn send(&self, frame: &Frame) -> Result<(), PortError>;
    /// Waits at most `timeout` for the next frame passing the port's filter.
    /// `Ok(None)` means the timeout elapsed.
    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, PortError>;
}
impl<P: Port + ?Sized> Port for &P {
    fn send(&self, frame: &Frame) -> Result<(), PortError> { (**self).send(frame) }
    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, PortError> { (**self).receive(timeout) }
}
impl<P: Port + ?Sized> Port for std::sync::Arc<P> {
    fn send(&self, frame: &Frame) -> Result<(), PortError> { (**self).send(frame) }
    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, PortError> { (**self).receive(timeout) }
}

/// Raw SocketCAN socket bound to one interface.
pub struct CanPort {
    socket: CanSocket,
    interface: String,
}
impl CanPort {
    /// Zero durations are not accepted by the socket, the smallest wait is used instead.
    const MIN_TIMEOUT: Duration = Duration::from_micros(1);

    pub fn open(interface: &str, filter: RxFilter) -> Result<Self, PortError> {
        let open_error = |source| PortError::Open {
            interface: interface.to_owned(),
            source,
        };
        let socket = CanSocket::open(interface).map_err(open_error)?;
        let filter = CanFilter::new(filter.id | EFF_FLAG, filter.mask | EFF_FLAG);
        socket.set_filters(&[filter]).map_err(open_error)?;
        tracing::debug!(interface, "CAN socket open");
        Ok(Self {
            socket,
            interface: interface.to_owned(),
        })
    }
    pub fn interface(&self) -> &str { &self.interface }
}
impl Port for CanPort {
    fn send(&self, frame: &Frame) -> Result<(), PortError> {
        let id = ExtendedId::new(frame.id()).ok_or(PortError::InvalidIdentifier(frame.id()))?;
        let can_frame = CanFrame::new(id, frame.data()).ok_or(PortError::InvalidIdentifier(frame.id()))?;
        self.socket.write_frame(&can_frame).map_err(PortError::Send)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, PortError> {
        let deadline = crate::Deadline::after(timeout);
        loop {
            let remaining = deadline.remaining().max(Self::MIN_TIMEOUT);
            self.socket.set_read_timeout(remaining).map_err(PortError::Receive)?;
            match self.socket.read_frame() {
                Ok(frame) => match frame.id() {
                    Id::Extended(id) => return Ok(Frame::new(id.as_raw(), frame.data())),
                    Id::Standard(_) => {
                        if deadline.expired() {
                            return Ok(None);
                        }
                    }
                },
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => return Ok(None),
                Err(err) => return Err(PortError::Receive(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_keeps_only_its_payload() {
        let frame = Frame::new(0x1234, &[1, 2, 3]).unwrap();
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.id(), 0x1234);
        assert!(Frame::new(0, &[0; 9]).is_none());
    }

    #[test]
    fn frame_drops_flag_bits() {
        let frame = Frame::from_array(0xFFFF_FFFF, [0; 8], 12);
        assert_eq!(frame.id(), EXTENDED_MASK);
        assert_eq!(frame.data().len(), MAX_PAYLOAD);
    }
}
