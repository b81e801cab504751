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

//! Frame-local error kinds.

use thiserror::Error;

/// Errors raised while executing a single frame.
///
/// All variants except [`Error::DebugAbort`] are revert-class: the frame's
/// journal checkpoint is rolled back and the caller observes `success=false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Execution ran out of gas.
    #[error("out of gas")]
    OutOfGas,
    /// `JUMP`/`JUMPI` targeted an offset that isn't a valid `JUMPDEST`.
    #[error("bad jump destination {destination:#x}")]
    InvalidJump {
        /// Offset execution tried to jump to.
        destination: u64,
    },
    /// Opcode byte has no defined instruction (or is gated off by the schedule).
    #[error("bad instruction {instruction:#x}")]
    InvalidOpcode {
        /// The offending opcode byte.
        instruction: u8,
    },
    /// Not enough stack elements to execute the instruction.
    #[error("stack underflow in {instruction}: wanted {wanted}, had {on_stack}")]
    StackUnderflow {
        /// Invoked instruction's mnemonic.
        instruction: &'static str,
        /// How many stack elements the instruction required.
        wanted: usize,
        /// How many elements were actually on the stack.
        on_stack: usize,
    },
    /// Executing the instruction would push the stack past its 1024 limit.
    #[error("stack overflow in {instruction}: stack limit {limit}")]
    StackOverflow {
        /// Invoked instruction's mnemonic.
        instruction: &'static str,
        /// Configured stack limit.
        limit: usize,
    },
    /// A state-mutating opcode ran inside a `STATICCALL` frame.
    #[error("write protection violated in static context")]
    WriteProtection,
    /// Call/create depth would exceed the configured maximum.
    #[error("call depth limit exceeded")]
    DepthLimit,
    /// Caller's balance is insufficient for the requested value transfer.
    #[error("insufficient balance for value transfer")]
    InsufficientBalance,
    /// Deployed code exceeds the EIP-170 size limit.
    #[error("code too large: {size} bytes (limit {limit})")]
    CodeTooLarge {
        /// Actual size of the code that was about to be installed.
        size: usize,
        /// Configured limit (24576 post EIP-170).
        limit: usize,
    },
    /// Deployed code starts with the reserved `0xEF` byte (EIP-3541).
    #[error("code starts with reserved 0xef byte")]
    CodeStartsWithEf,
    /// A memory offset/length computation overflowed `usize`/`U256`.
    #[error("memory offset overflow")]
    MemoryOffsetOverflow,
    /// A `RETURNDATACOPY` read range exceeded the return-data buffer.
    #[error("out of bounds returndata access")]
    OutOfBounds,
    /// A debug hook requested that execution abort entirely.
    #[error("debug hook requested abort")]
    DebugAbort,
    /// `REVERT` was executed; state reverted but output is preserved.
    #[error("execution reverted")]
    Reverted,
}

impl Error {
    /// Whether this error consumes all gas forwarded to the frame (plain
    /// failures) as opposed to returning the remainder (`REVERT` only).
    pub fn consumes_all_gas(&self) -> bool {
        !matches!(self, Error::Reverted)
    }
}

/// Result type used throughout the interpreter.
pub type Result<T> = std::result::Result<T, Error>;
