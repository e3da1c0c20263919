//! External RAM model.
//!
//! One array per tile, behind the L2's transaction table. The access
//! latency is modelled by the TRT (completion cycle stamped at
//! allocation); this module is the storage itself plus the preload
//! interface used by the platform in place of the external loader.

use crate::common::{NLine, PhysAddr};

/// The external RAM of one tile.
pub struct ExternalRam {
    base: PhysAddr,
    size: u64,
    words_per_line: usize,
    data: Vec<u32>,
}

impl ExternalRam {
    /// Creates a zero-filled RAM of `size` bytes based at `base`.
    pub fn new(base: PhysAddr, size: u64, words_per_line: usize) -> Self {
        Self {
            base,
            size,
            words_per_line,
            data: vec![0; (size / 4) as usize],
        }
    }

    /// `true` when the line falls inside this RAM.
    pub fn contains(&self, nline: NLine) -> bool {
        let addr = nline.base(self.words_per_line).val();
        addr >= self.base.val() && addr + ((self.words_per_line as u64) << 2)
            <= self.base.val() + self.size
    }

    fn line_index(&self, nline: NLine) -> usize {
        ((nline.base(self.words_per_line).val() - self.base.val()) / 4) as usize
    }

    /// Reads a whole line. Out-of-range lines read as zeroes.
    pub fn read_line(&self, nline: NLine) -> Vec<u32> {
        if !self.contains(nline) {
            return vec![0; self.words_per_line];
        }
        let idx = self.line_index(nline);
        self.data[idx..idx + self.words_per_line].to_vec()
    }

    /// Writes a whole line back. Out-of-range lines are dropped.
    pub fn write_line(&mut self, nline: NLine, line: &[u32]) {
        if !self.contains(nline) {
            return;
        }
        let idx = self.line_index(nline);
        self.data[idx..idx + self.words_per_line].copy_from_slice(line);
    }

    /// Preloads one word (platform/loader interface).
    pub fn preload_word(&mut self, addr: PhysAddr, value: u32) {
        if addr.val() < self.base.val() || addr.val() + 4 > self.base.val() + self.size {
            return;
        }
        let idx = ((addr.val() - self.base.val()) / 4) as usize;
        self.data[idx] = value;
    }

    /// Reads one word directly (test and device inspection interface).
    pub fn peek_word(&self, addr: PhysAddr) -> u32 {
        if addr.val() < self.base.val() || addr.val() + 4 > self.base.val() + self.size {
            return 0;
        }
        self.data[((addr.val() - self.base.val()) / 4) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_round_trip() {
        let mut ram = ExternalRam::new(PhysAddr(0x1000), 0x1000, 4);
        let nline = PhysAddr(0x1040).nline(4);
        assert!(ram.contains(nline));
        ram.write_line(nline, &[1, 2, 3, 4]);
        assert_eq!(ram.read_line(nline), vec![1, 2, 3, 4]);
        assert_eq!(ram.peek_word(PhysAddr(0x1048)), 3);
    }

    #[test]
    fn out_of_range_reads_zero() {
        let ram = ExternalRam::new(PhysAddr(0x1000), 0x1000, 4);
        assert!(!ram.contains(PhysAddr(0x4000).nline(4)));
        assert_eq!(ram.read_line(PhysAddr(0x4000).nline(4)), vec![0; 4]);
    }
}
