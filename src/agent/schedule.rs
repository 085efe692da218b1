//! Servicing cadence for connections started with PROCESS_LOOP
//!
//! An armed connection stays armed until it is disconnected, freed or fails.
//! Armed connections are serviced round-robin, one per loop iteration.

use crate::connection::ConnectionHandle;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ServiceSchedule {
    armed: VecDeque<(ConnectionHandle, Duration)>,
}

impl ServiceSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `handle`, or update its service timeout if already armed
    pub fn arm(&mut self, handle: ConnectionHandle, timeout: Duration) {
        match self.armed.iter_mut().find(|(h, _)| *h == handle) {
            Some(entry) => entry.1 = timeout,
            None => self.armed.push_back((handle, timeout)),
        }
    }

    /// Returns whether the handle was armed
    pub fn disarm(&mut self, handle: ConnectionHandle) -> bool {
        let before = self.armed.len();
        self.armed.retain(|(h, _)| *h != handle);
        self.armed.len() != before
    }

    /// Next connection to service, rotating it to the back
    pub fn next_due(&mut self) -> Option<(ConnectionHandle, Duration)> {
        let next = self.armed.pop_front()?;
        self.armed.push_back(next);
        Some(next)
    }

    pub fn is_armed(&self, handle: ConnectionHandle) -> bool {
        self.armed.iter().any(|(h, _)| *h == handle)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}
