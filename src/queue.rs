//! Pending queue and in-progress frame store
//!
//! The DCF treats both as opaque collaborators, the heapless-backed
//! implementations here are the defaults used by [`crate::station::Station`].

use heapless::{Deque, Vec};
use log::{debug, warn};

use crate::packet::{FrameFlags, Packet};

/// FIFO of frames awaiting their first transmission
pub trait PacketQueue {
    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;

    fn peek_first(&self) -> Option<&Packet>;

    fn dequeue(&mut self) -> Option<Packet>;

    /// Enqueue a frame, returning it if the queue is full
    fn enqueue(&mut self, frame: Packet) -> Result<(), Packet>;
}

/// Store of frames already handed to a frame sequence and awaiting completion
pub trait InProgressFrameStore {
    fn has_in_progress_frames(&self) -> bool;

    /// Fetch the next frame to transmit, moving the head of the queue
    /// into the store when nothing is in progress
    fn get_frame_to_transmit<Q: PacketQueue>(&mut self, queue: &mut Q) -> Option<Packet>;

    /// Fetch the frame that follows the provided one in the same exchange
    fn get_pending_frame_for(&self, frame: &Packet) -> Option<&Packet>;

    /// Remove a frame from the store
    fn drop_frame(&mut self, seq: u16) -> Option<Packet>;

    /// Flag a stored frame as a retransmission
    fn mark_for_retry(&mut self, seq: u16);
}

/// Heapless FIFO pending queue
#[derive(Debug)]
pub struct PendingQueue<const N: usize> {
    frames: Deque<Packet, N>,
}

impl <const N: usize> PendingQueue<N> {
    pub fn new() -> Self {
        Self { frames: Deque::new() }
    }
}

impl <const N: usize> Default for PendingQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl <const N: usize> PacketQueue for PendingQueue<N> {
    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn peek_first(&self) -> Option<&Packet> {
        self.frames.front()
    }

    fn dequeue(&mut self) -> Option<Packet> {
        self.frames.pop_front()
    }

    fn enqueue(&mut self, frame: Packet) -> Result<(), Packet> {
        self.frames.push_back(frame)
    }
}

/// Heapless in-progress frame store, ordered by insertion
#[derive(Debug)]
pub struct InProgressFrames<const N: usize> {
    frames: Vec<Packet, N>,
}

impl <const N: usize> InProgressFrames<N> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn get(&self, seq: u16) -> Option<&Packet> {
        self.frames.iter().find(|f| f.header.seq == seq)
    }
}

impl <const N: usize> Default for InProgressFrames<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl <const N: usize> InProgressFrameStore for InProgressFrames<N> {
    fn has_in_progress_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    fn get_frame_to_transmit<Q: PacketQueue>(&mut self, queue: &mut Q) -> Option<Packet> {
        if let Some(f) = self.frames.first() {
            return Some(f.clone());
        }

        let frame = queue.dequeue()?;
        let copy = frame.clone();

        if let Err(f) = self.frames.push(frame) {
            warn!("In-progress store full, dropping frame {}", f.header.seq);
            return None;
        }

        debug!("Moved frame {} to in-progress store", copy.header.seq);

        Some(copy)
    }

    fn get_pending_frame_for(&self, frame: &Packet) -> Option<&Packet> {
        if !frame.header.flags.contains(FrameFlags::MORE_FRAGMENTS) {
            return None;
        }

        let index = self.frames.iter().position(|f| f.header.seq == frame.header.seq)?;
        self.frames.get(index + 1)
    }

    fn drop_frame(&mut self, seq: u16) -> Option<Packet> {
        let index = self.frames.iter().position(|f| f.header.seq == seq)?;

        // Rotate to the tail to preserve ordering of the remaining frames
        self.frames[index..].rotate_left(1);
        self.frames.pop()
    }

    fn mark_for_retry(&mut self, seq: u16) {
        if let Some(f) = self.frames.iter_mut().find(|f| f.header.seq == seq) {
            f.header.flags.insert(FrameFlags::RETRY);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::MacAddress;

    fn frame(seq: u16) -> Packet {
        let mut p = Packet::data(MacAddress::new([2, 0, 0, 0, 0, 2]), MacAddress::new([2, 0, 0, 0, 0, 1]), &[seq as u8]).unwrap();
        p.header.seq = seq;
        p
    }

    #[test]
    fn queue_fifo_and_capacity() {
        let mut q = PendingQueue::<2>::new();
        assert!(q.is_empty());

        q.enqueue(frame(1)).unwrap();
        q.enqueue(frame(2)).unwrap();
        assert_eq!(q.enqueue(frame(3)).unwrap_err().header.seq, 3);

        assert_eq!(q.peek_first().map(|f| f.header.seq), Some(1));
        assert_eq!(q.dequeue().map(|f| f.header.seq), Some(1));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn store_holds_frame_until_dropped() {
        let mut q = PendingQueue::<4>::new();
        let mut s = InProgressFrames::<2>::new();

        q.enqueue(frame(1)).unwrap();
        q.enqueue(frame(2)).unwrap();

        // Head moves into the store and is returned until dropped
        assert_eq!(s.get_frame_to_transmit(&mut q).map(|f| f.header.seq), Some(1));
        assert_eq!(s.get_frame_to_transmit(&mut q).map(|f| f.header.seq), Some(1));
        assert_eq!(q.len(), 1);

        s.mark_for_retry(1);
        assert!(s.get(1).unwrap().is_retry());

        assert!(s.drop_frame(1).is_some());
        assert!(s.drop_frame(1).is_none());
        assert!(!s.has_in_progress_frames());

        assert_eq!(s.get_frame_to_transmit(&mut q).map(|f| f.header.seq), Some(2));
    }
}
