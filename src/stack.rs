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

//! Fixed-capacity 1024-slot EVM stack.
//!
//! The reference interpreter this is ported from indexes a raw pointer into
//! a fixed buffer; here the same "proven safe by the caller" discipline is
//! expressed with a plain `Vec<U256>` and two access tiers instead: checked
//! methods that return `Result` for use at block entry / unknown contexts,
//! and unchecked methods for use inside a block whose prevalidation
//! (`Gasometer`/block-header check) has already proved the access is safe.

use ethereum_types::U256;

use crate::error::{Error, Result};

/// Capacity of the EVM stack.
pub const STACK_LIMIT: usize = 1024;

/// A 1024-slot LIFO of 256-bit words.
#[derive(Debug, Clone)]
pub struct Stack {
    values: Vec<U256>,
}

impl Stack {
    /// An empty stack with `STACK_LIMIT` reserved capacity.
    pub fn new() -> Self {
        Stack {
            values: Vec::with_capacity(STACK_LIMIT),
        }
    }

    /// Number of words currently on the stack.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the stack is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Push a word, checking the 1024 capacity. Used outside block
    /// prevalidation (e.g. before the analyzer/gasometer have run, or in
    /// tests exercising a single opcode in isolation).
    pub fn push_checked(&mut self, value: U256, instruction: &'static str) -> Result<()> {
        if self.values.len() >= STACK_LIMIT {
            return Err(Error::StackOverflow {
                instruction,
                limit: STACK_LIMIT,
            });
        }
        self.values.push(value);
        Ok(())
    }

    /// Pop a word, checking for underflow.
    pub fn pop_checked(&mut self, instruction: &'static str) -> Result<U256> {
        self.values.pop().ok_or(Error::StackUnderflow {
            instruction,
            wanted: 1,
            on_stack: 0,
        })
    }

    /// Push a word. Only reachable after block-entry prevalidation has
    /// proved `len() + block.stack_max_growth <= STACK_LIMIT`.
    #[inline]
    pub fn push(&mut self, value: U256) {
        debug_assert!(self.values.len() < STACK_LIMIT, "push would overflow stack");
        self.values.push(value);
    }

    /// Pop a word. Only reachable after block-entry prevalidation has proved
    /// `len() >= block.stack_min`.
    #[inline]
    pub fn pop(&mut self) -> U256 {
        self.values
            .pop()
            .expect("block prevalidation guarantees enough elements; qed")
    }

    /// Peek `n`-th element from the top, `n >= 1` meaning the very top.
    #[inline]
    pub fn peek(&self, n: usize) -> &U256 {
        let len = self.values.len();
        &self.values[len - n]
    }

    /// Whether at least `depth` elements are present.
    #[inline]
    pub fn has(&self, depth: usize) -> bool {
        self.values.len() >= depth
    }

    /// Duplicate the `n`-th element (`1..=16`, top = 1) onto the top.
    #[inline]
    pub fn dup(&mut self, n: usize) {
        let value = *self.peek(n);
        self.push(value);
    }

    /// Swap the top element with the `n`-th element below it (`1..=16`).
    #[inline]
    pub fn swap_with_top(&mut self, n: usize) {
        let len = self.values.len();
        self.values.swap(len - 1, len - 1 - n);
    }

    /// The top `n` elements, top-first. Used by tracing.
    pub fn peek_top(&self, n: usize) -> &[U256] {
        let len = self.values.len();
        &self.values[len - n.min(len)..]
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips() {
        let mut stack = Stack::new();
        stack.push(U256::from(42));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.pop(), U256::from(42));
        assert!(stack.is_empty());
    }

    #[test]
    fn checked_push_rejects_overflow() {
        let mut stack = Stack::new();
        for i in 0..STACK_LIMIT {
            stack.push_checked(U256::from(i), "PUSH1").unwrap();
        }
        let err = stack.push_checked(U256::zero(), "PUSH1").unwrap_err();
        assert_eq!(
            err,
            Error::StackOverflow {
                instruction: "PUSH1",
                limit: STACK_LIMIT
            }
        );
    }

    #[test]
    fn checked_pop_rejects_underflow() {
        let mut stack = Stack::new();
        let err = stack.pop_checked("ADD").unwrap_err();
        assert_eq!(
            err,
            Error::StackUnderflow {
                instruction: "ADD",
                wanted: 1,
                on_stack: 0,
            }
        );
    }

    #[test]
    fn dup_and_swap() {
        let mut stack = Stack::new();
        stack.push(U256::from(1));
        stack.push(U256::from(2));
        stack.dup(2);
        assert_eq!(stack.peek(1), &U256::from(1));
        stack.swap_with_top(1);
        assert_eq!(stack.peek(1), &U256::from(2));
        assert_eq!(stack.peek(2), &U256::from(1));
    }
}
