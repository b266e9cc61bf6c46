//! Holds remote candidates that arrive before the remote description is known.

use std::collections::VecDeque;

use vrcast_common::IceCandidate;

/// FIFO of early remote candidates, owned by one negotiation.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    /// Hands every buffered candidate to `sink` in arrival order and empties the buffer.
    ///
    /// Calling this on an empty buffer does nothing. Returns how many were flushed.
    pub fn flush_into<F>(&mut self, mut sink: F) -> usize
    where
        F: FnMut(IceCandidate),
    {
        let flushed = self.queue.len();
        for candidate in self.queue.drain(..) {
            sink(candidate);
        }
        flushed
    }

    /// Drops everything without applying it.
    pub fn discard(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
