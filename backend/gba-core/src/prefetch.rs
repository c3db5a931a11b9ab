//! Cartridge ROM prefetch buffer
//!
//! Sequential ROM fetches hit the internal queue and cost the sequential wait state;
//! a non-sequential access flushes the queue and pays the full first-access penalty from
//! WAITCNT.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct PrefetchBuffer {
    pub(crate) enabled: bool,
    read_address: u32,
    prefetch_address: u32,
    buffered_halfwords: u8,
    started: bool,
}

impl PrefetchBuffer {
    /// Account a ROM opcode fetch; returns the wait-state cycles to charge on top of the
    /// 1-cycle access.
    pub(crate) fn fetch(&mut self, address: u32, n_wait: u32, s_wait: u32) -> u32 {
        if !self.enabled {
            self.started = false;
            return if self.sequential(address) { s_wait } else { n_wait };
        }

        let sequential = self.sequential(address);
        if sequential && self.started {
            self.read_address = address;
            if self.buffered_halfwords > 0 {
                // Hit: the bus already holds the halfword
                self.buffered_halfwords -= 1;
                return 0;
            }
            return s_wait;
        }

        // Miss: restart the prefetcher at this address
        self.read_address = address;
        self.prefetch_address = address.wrapping_add(2);
        self.buffered_halfwords = 0;
        self.started = true;
        n_wait
    }

    fn sequential(&self, address: u32) -> bool {
        address == self.read_address.wrapping_add(2)
    }

    /// Idle bus cycles let the prefetcher pull ahead, up to 8 halfwords.
    pub(crate) fn run_idle_cycles(&mut self, cycles: u32) {
        if !self.enabled || !self.started {
            return;
        }
        let fetched = (cycles / 2).min(u32::from(8 - self.buffered_halfwords.min(8)));
        self.buffered_halfwords = (self.buffered_halfwords + fetched as u8).min(8);
        self.prefetch_address = self.prefetch_address.wrapping_add(fetched * 2);
    }

    pub(crate) fn flush(&mut self) {
        self.started = false;
        self.buffered_halfwords = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_hits_are_free_after_buffering() {
        let mut prefetch = PrefetchBuffer { enabled: true, ..PrefetchBuffer::default() };

        // First access: non-sequential, full penalty
        assert_eq!(prefetch.fetch(0x0800_0000, 4, 2), 4);
        prefetch.run_idle_cycles(8);
        // Buffered sequential accesses cost nothing extra
        assert_eq!(prefetch.fetch(0x0800_0002, 4, 2), 0);
    }

    #[test]
    fn branch_flushes_and_pays_n_wait() {
        let mut prefetch = PrefetchBuffer { enabled: true, ..PrefetchBuffer::default() };
        prefetch.fetch(0x0800_0000, 4, 2);
        assert_eq!(prefetch.fetch(0x0800_1000, 4, 2), 4);
    }

    #[test]
    fn disabled_prefetch_charges_raw_waits() {
        let mut prefetch = PrefetchBuffer::default();
        assert_eq!(prefetch.fetch(0x0800_0000, 4, 2), 4);
        assert_eq!(prefetch.fetch(0x0800_0002, 4, 2), 2);
    }
}
