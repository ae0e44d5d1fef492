//! Flat, word-addressed main memory.

use crate::error::{CoherenceError, Result};

/// Main memory: a flat array of 64-bit words. Addresses are word indices, not
/// byte offsets; one cache line covers `line_words` consecutive words.
#[derive(Debug, Clone)]
pub struct MainMemory {
    words: Vec<u64>,
}

impl MainMemory {
    pub fn new(size_words: usize) -> Self {
        Self {
            words: vec![0; size_words],
        }
    }

    pub fn size_words(&self) -> usize {
        self.words.len()
    }

    fn check(&self, address: u64, len: usize) -> Result<usize> {
        let start = usize::try_from(address).map_err(|_| CoherenceError::AddressOutOfRange {
            address,
            size: self.words.len(),
        })?;
        let end = start.checked_add(len).filter(|&e| e <= self.words.len());
        match end {
            Some(_) => Ok(start),
            None => Err(CoherenceError::AddressOutOfRange {
                address,
                size: self.words.len(),
            }),
        }
    }

    /// Validate that a full line starting at `address` lies within memory.
    pub fn check_line(&self, address: u64, line_words: usize) -> Result<()> {
        self.check(address, line_words).map(|_| ())
    }

    pub fn read_word(&self, address: u64) -> Result<u64> {
        let idx = self.check(address, 1)?;
        Ok(self.words[idx])
    }

    pub fn write_word(&mut self, address: u64, value: u64) -> Result<()> {
        let idx = self.check(address, 1)?;
        self.words[idx] = value;
        Ok(())
    }

    /// Read `line_words` consecutive words starting at `address` (which the
    /// caller has already aligned to a line boundary).
    pub fn read_line(&self, address: u64, line_words: usize) -> Result<Vec<u64>> {
        let start = self.check(address, line_words)?;
        Ok(self.words[start..start + line_words].to_vec())
    }

    /// Write a full line back. Fails without touching memory if any word of
    /// the line would land out of range.
    pub fn write_line(&mut self, address: u64, data: &[u64]) -> Result<()> {
        let start = self.check(address, data.len())?;
        self.words[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.words.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_round_trip() {
        let mut mem = MainMemory::new(16);
        mem.write_word(3, 0xdead_beef).unwrap();
        assert_eq!(mem.read_word(3).unwrap(), 0xdead_beef);
    }

    #[test]
    fn line_access_is_bounds_checked() {
        let mut mem = MainMemory::new(16);
        assert!(mem.read_line(12, 8).is_err());
        assert!(mem.write_line(12, &[0; 8]).is_err());
        // A failed line write must not partially apply.
        assert_eq!(mem.read_word(12).unwrap(), 0);

        assert_eq!(mem.read_line(8, 8).unwrap(), vec![0; 8]);
    }

    #[test]
    fn out_of_range_word_is_an_error() {
        let mem = MainMemory::new(4);
        assert_eq!(
            mem.read_word(4),
            Err(CoherenceError::AddressOutOfRange {
                address: 4,
                size: 4
            })
        );
    }
}
