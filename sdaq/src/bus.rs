use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::id::RxFilter;
use crate::port::{Frame, Port, PortError};

struct Endpoint {
    id: usize,
    filter: RxFilter,
    tx: mpsc::Sender<Frame>,
}

/// In-process CAN bus. Every frame sent through one of its ports is delivered,
/// in order, to every other port whose filter accepts it.
#[derive(Clone, Default)]
pub struct VirtualBus {
    endpoints: Arc<Mutex<Vec<Endpoint>>>,
    next_id: Arc<AtomicUsize>,
}
impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn open(&self, filter: RxFilter) -> BusPort {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.endpoints.lock().push(Endpoint { id, filter, tx });
        BusPort {
            id,
            bus: self.clone(),
            rx: Mutex::new(rx),
        }
    }
    pub fn endpoints(&self) -> usize {
        self.endpoints.lock().len()
    }
}

/// One node attached to a [`VirtualBus`]. A port never receives its own frames.
pub struct BusPort {
    id: usize,
    bus: VirtualBus,
    rx: Mutex<mpsc::Receiver<Frame>>,
}
impl Port for BusPort {
    fn send(&self, frame: &Frame) -> Result<(), PortError> {
        let endpoints = self.bus.endpoints.lock();
        for endpoint in endpoints.iter() {
            if endpoint.id != self.id && endpoint.filter.matches(frame.id()) {
                // a receiver that went away just misses the frame, like a node leaving the bus
                let _ = endpoint.tx.send(*frame);
            }
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, PortError> {
        match self.rx.lock().recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PortError::Disconnected),
        }
    }
}
impl Drop for BusPort {
    fn drop(&mut self) {
        self.bus.endpoints.lock().retain(|endpoint| endpoint.id != self.id);
    }
}
