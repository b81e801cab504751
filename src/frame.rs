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

//! Per-call execution context. The teacher folds all of this into one
//! `Interpreter<Cost>` struct; here it is split out so a `Frame` is VM-agnostic
//! data the orchestrator can construct, push, and tear down independently of
//! dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use ethereum_types::{Address, U256};

use crate::analysis::Analysis;
use crate::gasometer::GasMeter;
use crate::memory::Memory;
use crate::stack::Stack;

/// Transaction/block-wide context: constant across every frame spawned while
/// executing one transaction, as opposed to `CallContext` which is fresh per
/// frame. Backs `ORIGIN`/`GASPRICE` and the block-info opcode group.
#[derive(Debug, Clone)]
pub struct TxContext {
    /// Transaction sender (`ORIGIN`), distinct from the immediate caller.
    pub origin: Address,
    /// Transaction gas price (`GASPRICE`).
    pub gas_price: U256,
    pub block_coinbase: Address,
    pub block_timestamp: u64,
    pub block_number: u64,
    /// `DIFFICULTY` pre-Merge, reused as `PREVRANDAO` post-Merge.
    pub block_difficulty: U256,
    pub block_gas_limit: u64,
    /// `CHAINID`, read only when `Schedule.have_chain_id`.
    pub chain_id: u64,
    /// `BASEFEE`, read only when `Schedule.eip3198`.
    pub base_fee: U256,
    /// `BLOCKHASH` lookup table, populated by the caller with however many of
    /// the last 256 block hashes it can supply; absent entries read as zero,
    /// matching the protocol's behavior past the 256-block window.
    pub block_hashes: HashMap<U256, U256>,
}

/// Static parameters a frame is invoked with, fixed for its whole lifetime.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Address whose code is executing (`ADDRESS`).
    pub address: Address,
    /// Account whose storage this frame reads/writes (differs from `address`
    /// under `DELEGATECALL`/`CALLCODE`, where it's the caller's own storage).
    pub code_address: Address,
    /// The immediate caller (`CALLER`).
    pub caller: Address,
    /// Value attached to this call (`CALLVALUE`).
    pub value: U256,
    /// Calldata (`CALLDATALOAD`/`CALLDATASIZE`/`CALLDATACOPY`).
    pub input: Vec<u8>,
    /// Whether writes are forbidden (`STATICCALL` or an ancestor thereof).
    pub is_static: bool,
    /// Call-stack depth, 0 for the outermost frame.
    pub depth: usize,
    /// Whether `address` was created earlier in the *same* transaction.
    /// `SELFDESTRUCT` only actually destroys the account when this holds,
    /// post EIP-6780.
    pub created_this_tx: bool,
}

/// One call/create frame's mutable execution state.
pub struct Frame {
    pub context: CallContext,
    pub code: Arc<Vec<u8>>,
    pub analysis: Arc<Analysis>,
    pub stack: Stack,
    pub memory: Memory,
    pub gas: GasMeter,
    /// Index into `analysis.instructions`, not a raw bytecode offset.
    pub instruction_index: usize,
    /// Data returned by the most recently completed child call
    /// (`RETURNDATASIZE`/`RETURNDATACOPY`).
    pub return_data: Vec<u8>,
    /// `BEGINSUB`/`JUMPSUB`/`RETURNSUB` return addresses (EIP-2315), only
    /// populated when `Schedule.have_subs` is set.
    pub return_stack: Vec<usize>,
}

impl Frame {
    pub fn new(
        context: CallContext,
        code: Arc<Vec<u8>>,
        analysis: Arc<Analysis>,
        gas: u64,
    ) -> Self {
        Frame {
            context,
            code,
            analysis,
            stack: Stack::new(),
            memory: Memory::new(),
            gas: GasMeter::new(gas),
            instruction_index: 0,
            return_data: Vec::new(),
            return_stack: Vec::new(),
        }
    }

    /// The original bytecode offset of the instruction about to execute, for
    /// the `PC` opcode and error reporting. `None` once the stream is
    /// exhausted (implicit `STOP`).
    pub fn current_pc(&self) -> Option<u32> {
        let mut idx = self.instruction_index;
        while let Some(entry) = self.analysis.instructions.get(idx) {
            match entry {
                crate::analysis::StreamEntry::Op { pc, .. } => return Some(*pc),
                crate::analysis::StreamEntry::BlockHeader(_) => idx += 1,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;

    fn ctx() -> CallContext {
        CallContext {
            address: Address::from_low_u64_be(1),
            code_address: Address::from_low_u64_be(1),
            caller: Address::from_low_u64_be(2),
            value: U256::zero(),
            input: Vec::new(),
            is_static: false,
            depth: 0,
            created_this_tx: false,
        }
    }

    #[test]
    fn fresh_frame_starts_at_the_first_instruction() {
        let code = Arc::new(vec![0x00]);
        let analysis = Arc::new(Analysis::analyze(&code));
        let frame = Frame::new(ctx(), code, analysis, 1000);
        assert_eq!(frame.current_pc(), Some(0));
        assert_eq!(frame.gas.remaining(), 1000);
    }
}
