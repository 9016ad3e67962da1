//! Byte buffers for record assembly.
//!
//! [`Buf`] wraps `Vec<u8>` and is the unit records are built in and
//! handed out as. [`BufferPool`] recycles them so steady-state record
//! production does not allocate.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Pool of reusable buffers.
#[derive(Default)]
pub struct BufferPool {
    free: VecDeque<Buf>,
}

impl BufferPool {
    /// Take a buffer from the pool, creating one if none is free.
    pub fn pop(&mut self) -> Buf {
        self.free.pop_front().unwrap_or_default()
    }

    /// Return a buffer to the pool.
    pub fn push(&mut self, mut buffer: Buf) {
        buffer.clear();
        self.free.push_front(buffer);
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("free", &self.free.len())
            .finish()
    }
}

/// Growable byte buffer.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Buf(Vec<u8>);

impl Buf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Buf(Vec::with_capacity(cap))
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Buf(data.to_vec())
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn extend_from_slice(&mut self, other: &[u8]) {
        self.0.extend_from_slice(other);
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn resize(&mut self, len: usize, value: u8) {
        self.0.resize(len, value);
    }

    /// No effect if `len` is greater than the current length.
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Remove `n` bytes from the front.
    pub fn drain_front(&mut self, n: usize) {
        self.0.drain(..n.min(self.0.len()));
    }

}

impl Deref for Buf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<[u8]> for Buf {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Buf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buf").field("len", &self.0.len()).finish()
    }
}
