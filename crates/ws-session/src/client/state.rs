//! Client connection state, stored in an atomic for cross-thread reads.

use std::sync::atomic::{AtomicU8, Ordering};

/// A client's lifecycle. Transitions are monotone: `Ready -> Connected ->
/// Disconnected`, or `Ready -> Disconnected` directly on a pre-handshake
/// failure. There is no path back to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Ready = 0,
    Connected = 1,
    Disconnected = 2,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Ready,
            1 => ClientState::Connected,
            _ => ClientState::Disconnected,
        }
    }
}

/// An `AtomicU8`-backed cell holding a `ClientState`, safe to read from any
/// thread while all writes happen on the engine's I/O thread.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(initial: ClientState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub(crate) fn load(&self) -> ClientState {
        ClientState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ClientState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
