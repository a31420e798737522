// Copyright © 2018 Cormac O'Brien
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of this software
// and associated documentation files (the "Software"), to deal in the Software without
// restriction, including without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all copies or
// substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING
// BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
// DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

/// A growable set of small integers backed by 64-bit blocks.
///
/// Traces use these to make sure each brush and surface is tested at most once, even when it is
/// referenced by several of the leafs a move passes through.
#[derive(Clone, Debug, Default)]
pub struct BitSet {
    blocks: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { blocks: Vec::new() }
    }

    /// Creates a set able to hold `bits` values without reallocating.
    pub fn with_capacity(bits: usize) -> Self {
        BitSet {
            blocks: vec![0; (bits + 63) / 64],
        }
    }

    #[inline]
    fn bit_location(bit: usize) -> (usize, u64) {
        (
            bit >> 6,        // divide by 64
            1 << (bit & 63), // modulo 64
        )
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    #[inline]
    pub fn contains(&self, bit: usize) -> bool {
        let (index, mask) = Self::bit_location(bit);
        match self.blocks.get(index) {
            Some(block) => block & mask != 0,
            None => false,
        }
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        let (index, mask) = Self::bit_location(bit);
        if index >= self.blocks.len() {
            self.blocks.resize(index + 1, 0);
        }
        self.blocks[index] |= mask;
    }

    /// Sets `bit`, returning `true` if it was not already set.
    #[inline]
    pub fn insert(&mut self, bit: usize) -> bool {
        if self.contains(bit) {
            return false;
        }

        self.set(bit);
        true
    }

    #[inline]
    pub fn clear(&mut self, bit: usize) {
        let (index, mask) = Self::bit_location(bit);
        if let Some(block) = self.blocks.get_mut(index) {
            *block &= !mask;
        }
    }

    #[inline]
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter::new(&self.blocks)
    }
}

pub struct BitSetIter<'a> {
    block_index: usize,
    block_val: u64,
    blocks: &'a [u64],
}

impl<'a> BitSetIter<'a> {
    fn new(blocks: &'a [u64]) -> BitSetIter<'a> {
        BitSetIter {
            block_index: 0,
            block_val: blocks.first().copied().unwrap_or(0),
            blocks,
        }
    }
}

impl<'a> Iterator for BitSetIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.block_index < self.blocks.len() {
            if self.block_val != 0 {
                // Locate the next set bit in the block.
                let next_bit = self.block_val.trailing_zeros();

                // Clear the bit.
                self.block_val &= !(1 << next_bit);

                // Return it.
                return Some(64 * self.block_index + next_bit as usize);
            } else {
                // No set bits, move to the next block.
                self.block_index += 1;
                self.block_val = *self.blocks.get(self.block_index)?;
            }
        }

        None
    }
}
