// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenEthereum.

// OpenEthereum is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenEthereum is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenEthereum.  If not, see <http://www.gnu.org/licenses/>.

//! Byte-addressable, word-rounded expandable memory.

use ethereum_types::U256;

use crate::error::{Error, Result};

const WORD_SIZE: usize = 32;

/// Per-frame expandable memory. Always a multiple of 32 bytes.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    buffer: Vec<u8>,
}

/// Quadratic memory expansion cost for `words` 32-byte words, per the Yellow
/// Paper's `Cmem(a) = 3a + floor(a^2 / 512)`.
pub fn memory_gas_cost(words: usize, memory_gas: usize, quad_coeff_div: usize) -> u64 {
    let words = words as u64;
    words * memory_gas as u64 + (words * words) / quad_coeff_div as u64
}

/// Number of 32-byte words needed to cover `bytes` bytes.
fn words_for(bytes: usize) -> usize {
    (bytes + WORD_SIZE - 1) / WORD_SIZE
}

/// Compute `offset + len` as a `usize`, treating overflow as out-of-gas per
/// the consensus rule (§4.2): an unrepresentable offset can never be paid for.
pub fn checked_range(offset: U256, len: U256) -> Result<usize> {
    if len.is_zero() {
        return Ok(0);
    }
    let end = offset
        .checked_add(len)
        .ok_or(Error::MemoryOffsetOverflow)?;
    if end > U256::from(u32::MAX) {
        return Err(Error::MemoryOffsetOverflow);
    }
    Ok(end.as_u64() as usize)
}

impl Memory {
    /// New, empty memory.
    pub fn new() -> Self {
        Memory::default()
    }

    /// Current size in bytes (always a multiple of 32).
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of 32-byte words currently allocated.
    #[inline]
    pub fn words(&self) -> usize {
        self.buffer.len() / WORD_SIZE
    }

    /// Number of words required to cover up to (exclusive) byte `end`,
    /// without mutating. Used by the gasometer to compute the cost delta
    /// before committing to the expansion.
    pub fn words_required(end: usize) -> usize {
        words_for(end)
    }

    /// Grow the buffer, if needed, to cover `end` bytes, word-rounded.
    pub fn expand(&mut self, end: usize) {
        let target_words = words_for(end);
        let target_len = target_words * WORD_SIZE;
        if target_len > self.buffer.len() {
            self.buffer.resize(target_len, 0);
        }
    }

    /// Load a 32-byte word at `offset`. Caller must have already expanded.
    pub fn load_word(&self, offset: usize) -> U256 {
        let mut bytes = [0u8; WORD_SIZE];
        let available = self.buffer.len().saturating_sub(offset);
        let to_copy = available.min(WORD_SIZE);
        if to_copy > 0 {
            bytes[..to_copy].copy_from_slice(&self.buffer[offset..offset + to_copy]);
        }
        U256::from_big_endian(&bytes)
    }

    /// Store a 32-byte word at `offset`. Caller must have already expanded.
    pub fn store_word(&mut self, offset: usize, value: U256) {
        let mut bytes = [0u8; WORD_SIZE];
        value.to_big_endian(&mut bytes);
        self.buffer[offset..offset + WORD_SIZE].copy_from_slice(&bytes);
    }

    /// Store a single byte at `offset`. Caller must have already expanded.
    pub fn store_byte(&mut self, offset: usize, byte: u8) {
        self.buffer[offset] = byte;
    }

    /// Read `len` bytes at `offset`, zero-padding for any portion beyond the
    /// buffer (the caller is expected to have expanded for `offset+len`, but
    /// reads of already-expanded-but-untouched memory are legitimately zero).
    pub fn read_slice(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if offset < self.buffer.len() {
            let available = (self.buffer.len() - offset).min(len);
            out[..available].copy_from_slice(&self.buffer[offset..offset + available]);
        }
        out
    }

    /// Copy `source` into memory at `offset`, zero-filling where `source` is
    /// shorter than `len`. Caller must have already expanded for `offset+len`.
    pub fn copy_in(&mut self, offset: usize, source: &[u8], len: usize) {
        let copy_len = source.len().min(len);
        self.buffer[offset..offset + copy_len].copy_from_slice(&source[..copy_len]);
        for byte in &mut self.buffer[offset + copy_len..offset + len] {
            *byte = 0;
        }
    }

    /// Extract the final return-data slice for `RETURN`/`REVERT`, per
    /// `offset`/`len` already validated and expanded for.
    pub fn into_return_data(mut self, offset: usize, len: usize) -> Vec<u8> {
        if len == 0 {
            return Vec::new();
        }
        self.expand(offset + len);
        self.buffer[offset..offset + len].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_rounds_up_to_words() {
        let mut mem = Memory::new();
        mem.expand(1);
        assert_eq!(mem.size(), 32);
        mem.expand(33);
        assert_eq!(mem.size(), 64);
    }

    #[test]
    fn store_and_load_word() {
        let mut mem = Memory::new();
        mem.expand(32);
        mem.store_word(0, U256::from(0x42));
        assert_eq!(mem.load_word(0), U256::from(0x42));
    }

    #[test]
    fn reads_past_length_are_zero() {
        let mem = Memory::new();
        assert_eq!(mem.load_word(0), U256::zero());
        assert_eq!(mem.read_slice(0, 10), vec![0u8; 10]);
    }

    #[test]
    fn quadratic_cost_matches_yellow_paper_example() {
        // 1 word: 3*1 + floor(1/512) = 3
        assert_eq!(memory_gas_cost(1, 3, 512), 3);
        // 32 words: 3*32 + floor(1024/512) = 96 + 2 = 98
        assert_eq!(memory_gas_cost(32, 3, 512), 98);
    }

    #[test]
    fn checked_range_overflow_is_rejected() {
        let huge = U256::from(u64::MAX);
        assert_eq!(checked_range(huge, huge), Err(Error::MemoryOffsetOverflow));
    }
}
