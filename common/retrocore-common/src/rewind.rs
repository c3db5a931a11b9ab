//! Frame-granularity rewind buffer
//!
//! The host captures one serialized state per interval plus the input log for the frames in
//! between. Blocks are stored as XOR deltas against the previous block, with a periodic full
//! block so that a damaged or evicted prefix never strands a delta run.

use std::collections::VecDeque;

// Store a full (non-delta) block at least this often
const FULL_BLOCK_INTERVAL: u32 = 30;

#[derive(Debug, Clone)]
struct RewindBlock<I> {
    frame_count: u64,
    input_log: Vec<I>,
    full: bool,
    state_bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RewindManager<I> {
    blocks: VecDeque<RewindBlock<I>>,
    pending_inputs: Vec<I>,
    frame_count: u64,
    blocks_since_full: u32,
    capacity_bytes: usize,
    stored_bytes: usize,
    enabled: bool,
}

impl<I: Clone> RewindManager<I> {
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            pending_inputs: Vec::new(),
            frame_count: 0,
            blocks_since_full: 0,
            capacity_bytes,
            stored_bytes: 0,
            enabled: false,
        }
    }

    pub fn start(&mut self) {
        self.enabled = true;
        self.blocks.clear();
        self.pending_inputs.clear();
        self.frame_count = 0;
        self.blocks_since_full = 0;
        self.stored_bytes = 0;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the input that was applied for one emulated frame.
    pub fn record_input(&mut self, input: I) {
        if self.enabled {
            self.pending_inputs.push(input);
            self.frame_count += 1;
        }
    }

    /// Capture a serialized state snapshot. The pending input log (one entry per frame since
    /// the previous snapshot) is attached to the new block.
    pub fn push_snapshot(&mut self, state_bytes: Vec<u8>) {
        if !self.enabled {
            return;
        }

        let make_full = self.blocks_since_full >= FULL_BLOCK_INTERVAL
            || !self.blocks.back().is_some_and(|prev| can_delta(prev, &state_bytes));

        let block = if make_full {
            self.blocks_since_full = 0;
            RewindBlock {
                frame_count: self.frame_count,
                input_log: std::mem::take(&mut self.pending_inputs),
                full: true,
                state_bytes,
            }
        } else {
            self.blocks_since_full += 1;
            let prev = self.reconstruct(self.blocks.len() - 1);
            let delta = xor_bytes(&prev, &state_bytes);
            RewindBlock {
                frame_count: self.frame_count,
                input_log: std::mem::take(&mut self.pending_inputs),
                full: false,
                state_bytes: delta,
            }
        };

        self.stored_bytes += block.state_bytes.len();
        self.blocks.push_back(block);
        self.evict();
    }

    /// Pop the most recent snapshot, returning the serialized state and the input log that was
    /// recorded after it. Returns `None` when the buffer is empty.
    pub fn pop_snapshot(&mut self) -> Option<(Vec<u8>, Vec<I>)> {
        if !self.enabled || self.blocks.is_empty() {
            return None;
        }

        let state_bytes = self.reconstruct(self.blocks.len() - 1);
        let block = self.blocks.pop_back().expect("checked non-empty above");
        self.stored_bytes -= block.state_bytes.len();
        self.frame_count = self.frame_count.saturating_sub(block.input_log.len() as u64);
        self.pending_inputs.clear();

        Some((state_bytes, block.input_log))
    }

    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn reconstruct(&self, index: usize) -> Vec<u8> {
        // Walk back to the nearest full block, then re-apply deltas forward
        let base = (0..=index)
            .rev()
            .find(|&i| self.blocks[i].full)
            .expect("a delta run is always preceded by a full block");

        let mut state = self.blocks[base].state_bytes.clone();
        for i in base + 1..=index {
            state = xor_bytes(&state, &self.blocks[i].state_bytes);
        }
        state
    }

    fn evict(&mut self) {
        while self.stored_bytes > self.capacity_bytes && self.blocks.len() > 1 {
            // Never leave a delta at the front of the buffer
            if !self.blocks[1].full {
                let front = self.blocks[0].state_bytes.clone();
                let second = &mut self.blocks[1];
                second.state_bytes = xor_bytes(&front, &second.state_bytes);
                second.full = true;
            }

            self.blocks.pop_front();
            // The new front block's length may have changed when it was converted to full
            self.stored_bytes = self.blocks.iter().map(|b| b.state_bytes.len()).sum();
        }
    }
}

fn can_delta<I>(prev: &RewindBlock<I>, state_bytes: &[u8]) -> bool {
    // Deltas only work between equal-length serializations; a mapper that resized a buffer
    // forces a full block. Delta blocks are the same length as the state they encode, so the
    // previous block's stored length is always the run's state length.
    prev.state_bytes.len() == state_bytes.len()
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x ^ y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(seed: u8) -> Vec<u8> {
        (0..64).map(|i| seed.wrapping_add(i)).collect()
    }

    #[test]
    fn pop_restores_pushed_snapshots_in_reverse_order() {
        let mut rewind = RewindManager::new(1024 * 1024);
        rewind.start();

        for frame in 0_u8..10 {
            rewind.record_input(frame);
            rewind.push_snapshot(state(frame));
        }

        for frame in (0_u8..10).rev() {
            let (snapshot, inputs) = rewind.pop_snapshot().unwrap();
            assert_eq!(snapshot, state(frame));
            assert_eq!(inputs, vec![frame]);
        }

        assert!(rewind.pop_snapshot().is_none());
    }

    #[test]
    fn input_log_length_matches_frames_elapsed() {
        let mut rewind = RewindManager::new(1024 * 1024);
        rewind.start();

        for frame in 0_u16..6 {
            rewind.record_input(frame);
        }
        rewind.push_snapshot(state(1));
        assert_eq!(rewind.frame_count(), 6);

        let (_, inputs) = rewind.pop_snapshot().unwrap();
        assert_eq!(inputs.len(), 6);
        assert_eq!(rewind.frame_count(), 0);
    }

    #[test]
    fn eviction_keeps_front_block_full() {
        // Capacity fits only a handful of 64-byte blocks
        let mut rewind = RewindManager::<u8>::new(256);
        rewind.start();

        for frame in 0_u8..100 {
            rewind.record_input(frame);
            rewind.push_snapshot(state(frame));
        }

        // Most blocks were evicted, but the survivors must still reconstruct correctly
        let (snapshot, _) = rewind.pop_snapshot().unwrap();
        assert_eq!(snapshot, state(99));
    }

    #[test]
    fn delta_runs_are_preceded_by_full_blocks() {
        let mut rewind = RewindManager::<u8>::new(1024 * 1024);
        rewind.start();

        for frame in 0_u8..80 {
            rewind.push_snapshot(state(frame));
        }

        assert!(rewind.blocks[0].full);
        for i in 0..rewind.blocks.len() {
            if !rewind.blocks[i].full {
                assert!((0..i).any(|j| rewind.blocks[j].full));
            }
        }
    }
}
