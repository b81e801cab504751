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

//! Single-pass bytecode analyzer (§4.4): jump-destination discovery, basic
//! block partitioning with per-block gas/stack metrics, and a translated
//! instruction stream.
//!
//! Only opcodes whose cost is a fixed, schedule-independent constant are
//! folded into a block's aggregate `gas_cost` (the Yellow Paper's tier
//! opcodes, `JUMP`/`JUMPI`/`JUMPDEST`, and the handful of zero-argument
//! environment reads). Opcodes with a schedule- or data-dependent cost
//! (`SLOAD`, `SSTORE`, `BALANCE`, `EXTCODE*`, `CALL*`, `CREATE*`, `LOG*`,
//! `SHA3`, `EXP`, the `*COPY` family) contribute nothing to the block
//! aggregate and are charged in full by the interpreter at dispatch time.
//! This keeps the analysis artifact itself schedule-independent, so it can
//! be memoized purely by code hash as §3 requires, even though the same
//! code may later execute under different hard-fork schedules.

use bit_set::BitSet;
use ethereum_types::U256;

use crate::error::{Error, Result};
use crate::instructions::Instruction;

/// Per-block aggregate metrics, validated once at block entry (§4.5 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Bytecode offset where the block starts.
    pub start_pc: u32,
    /// Sum of schedule-independent constant opcode costs in the block.
    pub gas_cost: u32,
    /// Minimum stack height required to enter the block without underflow.
    pub stack_min: i16,
    /// Maximum additional stack height reached while executing the block.
    pub stack_max_growth: i16,
}

/// The tagged payload carried by one instruction-stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrArg {
    /// No extra payload.
    None,
    /// The literal value of a `PUSHn`.
    Push(U256),
    /// A statically resolved jump target: the instruction-stream index a
    /// `PUSHn; JUMP`/`PUSHn; JUMPI` pair should dispatch to in O(1), instead
    /// of a runtime binary search over `jumpdests`.
    JumpTarget(usize),
}

/// One entry in the translated instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEntry {
    /// Synthetic marker at each block's first real instruction, carrying the
    /// index of its [`BlockInfo`] in [`Analysis::blocks`].
    BlockHeader(usize),
    /// One decoded opcode.
    Op {
        /// The decoded instruction.
        instruction: Instruction,
        /// Its original bytecode offset (`PC` reads this).
        pc: u32,
        /// Tagged argument.
        arg: InstrArg,
    },
}

/// The immutable result of analyzing one code object. Cheap to share
/// read-only across frames/threads once built (see `shared_cache`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    jumpdests: BitSet,
    /// Basic blocks in program order.
    pub blocks: Vec<BlockInfo>,
    /// The translated instruction stream. Iteration uses a running index;
    /// reaching `instructions.len()` is the stream's terminator (the
    /// reference interpreter's null-terminated array re-expressed as a
    /// slice-plus-index per the redesign notes).
    pub instructions: Vec<StreamEntry>,
}

fn tier_gas(instruction: Instruction) -> Option<u32> {
    use Instruction::*;
    let g = match instruction {
        STOP => 0,
        ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE | COINBASE
        | TIMESTAMP | NUMBER | DIFFICULTY | GASLIMIT | RETURNDATASIZE | POP | PC | MSIZE | GAS
        | CHAINID | BASEFEE | PUSH0 => 2,
        ADD | SUB | NOT | LT | GT | SLT | SGT | EQ | ISZERO | AND | OR | XOR | BYTE | SHL | SHR
        | SAR | CALLDATALOAD | MLOAD | MSTORE | MSTORE8 | TLOAD => 3,
        PUSH1 | PUSH2 | PUSH3 | PUSH4 | PUSH5 | PUSH6 | PUSH7 | PUSH8 | PUSH9 | PUSH10 | PUSH11
        | PUSH12 | PUSH13 | PUSH14 | PUSH15 | PUSH16 | PUSH17 | PUSH18 | PUSH19 | PUSH20
        | PUSH21 | PUSH22 | PUSH23 | PUSH24 | PUSH25 | PUSH26 | PUSH27 | PUSH28 | PUSH29
        | PUSH30 | PUSH31 | PUSH32 => 3,
        DUP1 | DUP2 | DUP3 | DUP4 | DUP5 | DUP6 | DUP7 | DUP8 | DUP9 | DUP10 | DUP11 | DUP12
        | DUP13 | DUP14 | DUP15 | DUP16 => 3,
        SWAP1 | SWAP2 | SWAP3 | SWAP4 | SWAP5 | SWAP6 | SWAP7 | SWAP8 | SWAP9 | SWAP10 | SWAP11
        | SWAP12 | SWAP13 | SWAP14 | SWAP15 | SWAP16 => 3,
        MUL | DIV | SDIV | MOD | SMOD | SIGNEXTEND => 5,
        ADDMOD | MULMOD | JUMP => 8,
        JUMPI => 10,
        JUMPDEST => 1,
        TSTORE => 0, // fully dynamic (write-protection + transient accounting)
        _ => return None,
    };
    Some(g)
}

impl Analysis {
    /// Whether `offset` is a valid `JUMPDEST` outside of push data.
    pub fn is_jumpdest(&self, offset: usize) -> bool {
        self.jumpdests.contains(offset)
    }

    /// Resolve a dynamic jump target by binary search (the set is a bitmap
    /// so this is a direct membership test; the "binary search" of §4.4 is
    /// the bitmap's constant-time lookup in this representation).
    pub fn validate_jump(&self, dest: U256) -> Result<usize> {
        if dest > U256::from(u32::MAX) {
            return Err(Error::InvalidJump {
                destination: dest.low_u64(),
            });
        }
        let offset = dest.as_u32() as usize;
        if self.is_jumpdest(offset) {
            Ok(offset)
        } else {
            Err(Error::InvalidJump {
                destination: offset as u64,
            })
        }
    }

    /// Map a bytecode offset that is a valid jumpdest to its instruction
    /// stream index (linear scan; called only on the cold dynamic-jump path,
    /// static jumps resolved at analysis time skip this entirely).
    pub fn instruction_index_at(&self, pc: usize) -> Option<usize> {
        self.instructions.iter().position(|entry| {
            matches!(entry, StreamEntry::Op { pc: entry_pc, .. } if *entry_pc as usize == pc)
        })
    }

    /// Run the single-pass analyzer over `code`.
    pub fn analyze(code: &[u8]) -> Analysis {
        let mut jumpdests = BitSet::new();
        let mut blocks = Vec::new();
        let mut instructions = Vec::new();

        let mut pc: usize = 0;
        // pc -> (block_index, instruction_index) used to resolve static jumps.
        let mut pc_to_index: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();

        // Pending block accumulator.
        let mut block_start_pc: u32 = 0;
        let mut block_gas: u64 = 0;
        let mut running_delta: i64 = 0;
        let mut stack_min_req: i64 = 0;
        let mut stack_max_growth: i64 = 0;
        let mut block_open = false;
        // (instruction index of a pending PUSH, its pushed value) so a
        // following JUMP/JUMPI can be statically resolved.
        let mut pending_push: Option<(usize, U256)> = None;

        macro_rules! close_block {
            () => {
                if block_open {
                    blocks.push(BlockInfo {
                        start_pc: block_start_pc,
                        gas_cost: block_gas.min(u32::MAX as u64) as u32,
                        stack_min: stack_min_req.min(i16::MAX as i64) as i16,
                        stack_max_growth: stack_max_growth.min(i16::MAX as i64) as i16,
                    });
                    block_open = false;
                }
            };
        }

        macro_rules! open_block_if_needed {
            () => {
                if !block_open {
                    block_start_pc = pc as u32;
                    block_gas = 0;
                    running_delta = 0;
                    stack_min_req = 0;
                    stack_max_growth = 0;
                    block_open = true;
                    instructions.push(StreamEntry::BlockHeader(blocks.len()));
                }
            };
        }

        while pc < code.len() {
            let opcode = code[pc];
            let instruction = Instruction::from_u8(opcode);

            // A JUMPDEST always starts a fresh block, even when reached by
            // straight-line fall-through rather than after a terminator, so
            // that every valid jump target lands exactly on a BlockHeader.
            if matches!(instruction, Some(Instruction::JUMPDEST))
                && block_open
                && pc as u32 != block_start_pc
            {
                close_block!();
            }

            open_block_if_needed!();

            match instruction {
                Some(Instruction::JUMPDEST) => {
                    jumpdests.insert(pc);
                }
                _ => {}
            }

            let entry_pc = pc as u32;
            let instruction_index = instructions.len();
            pc_to_index.insert(pc, instruction_index);

            match instruction {
                Some(instr) => {
                    if let Some(tier) = tier_gas(instr) {
                        block_gas += tier as u64;
                    }
                    let info = instr.info();
                    let deficit = info.args as i64 - running_delta;
                    if deficit > stack_min_req {
                        stack_min_req = deficit;
                    }
                    running_delta += info.ret as i64 - info.args as i64;
                    if running_delta > stack_max_growth {
                        stack_max_growth = running_delta;
                    }

                    if let Some(push_len) = instr.push_bytes() {
                        let start = pc + 1;
                        let end = (start + push_len).min(code.len());
                        let mut bytes = [0u8; 32];
                        let avail = end - start;
                        bytes[32 - push_len..32 - push_len + avail]
                            .copy_from_slice(&code[start..end]);
                        let value = U256::from_big_endian(&bytes);
                        instructions.push(StreamEntry::Op {
                            instruction: instr,
                            pc: entry_pc,
                            arg: InstrArg::Push(value),
                        });
                        pending_push = Some((instruction_index, value));
                        pc += 1 + push_len;
                        continue;
                    }

                    let arg = if matches!(instr, Instruction::JUMP | Instruction::JUMPI) {
                        if let Some((push_idx, target)) = pending_push {
                            if push_idx == instruction_index - 1
                                && target <= U256::from(u32::MAX)
                            {
                                InstrArg::JumpTarget(target.as_u32() as usize)
                            } else {
                                InstrArg::None
                            }
                        } else {
                            InstrArg::None
                        }
                    } else {
                        InstrArg::None
                    };

                    instructions.push(StreamEntry::Op {
                        instruction: instr,
                        pc: entry_pc,
                        arg,
                    });
                    pending_push = None;

                    if instr.is_terminator() || instr == Instruction::JUMPI {
                        close_block!();
                    }
                }
                None => {
                    // Unknown opcode: still occupies one instruction slot so
                    // that static jump targets and PC readings stay aligned;
                    // the interpreter raises InvalidOpcode on dispatch.
                    instructions.push(StreamEntry::Op {
                        instruction: Instruction::INVALID,
                        pc: entry_pc,
                        arg: InstrArg::None,
                    });
                    pending_push = None;
                    close_block!();
                }
            }

            pc += 1;
        }
        close_block!();

        // Resolve JumpTarget arguments from bytecode offsets to instruction
        // stream indices now that the whole stream (and pc_to_index map) is
        // built; offsets that aren't valid jumpdests fall back to None so the
        // interpreter takes the runtime-validated dynamic-jump path instead.
        for entry in instructions.iter_mut() {
            if let StreamEntry::Op {
                arg: arg @ InstrArg::JumpTarget(_),
                ..
            } = entry
            {
                if let InstrArg::JumpTarget(offset) = *arg {
                    match pc_to_index.get(&offset) {
                        Some(&idx) if jumpdests.contains(offset) => *arg = InstrArg::JumpTarget(idx),
                        _ => *arg = InstrArg::None,
                    }
                }
            }
        }

        Analysis {
            jumpdests,
            blocks,
            instructions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_across_runs() {
        let code = hex_literal::hex!("6002600301");
        let a = Analysis::analyze(&code);
        let b = Analysis::analyze(&code);
        assert_eq!(a, b);
    }

    #[test]
    fn jumpdest_outside_push_data_is_not_recorded() {
        // PUSH1 0x5b (push-data byte equal to JUMPDEST's opcode) followed by
        // a real JUMPDEST.
        let code = hex_literal::hex!("605b5b");
        let analysis = Analysis::analyze(&code);
        assert!(!analysis.is_jumpdest(1));
        assert!(analysis.is_jumpdest(2));
    }

    #[test]
    fn blocks_split_after_jumpdest_and_terminators() {
        // JUMPDEST STOP JUMPDEST STOP
        let code = hex_literal::hex!("5b005b00");
        let analysis = Analysis::analyze(&code);
        assert_eq!(analysis.blocks.len(), 2);
        assert_eq!(analysis.blocks[0].start_pc, 0);
        assert_eq!(analysis.blocks[1].start_pc, 2);
    }

    #[test]
    fn stack_min_reflects_deepest_shortfall() {
        // ADD with nothing pushed first requires 2 elements already present.
        let code = hex_literal::hex!("01");
        let analysis = Analysis::analyze(&code);
        assert_eq!(analysis.blocks[0].stack_min, 2);
    }

    #[test]
    fn static_jump_resolves_to_instruction_index() {
        // PUSH1 0x04 JUMP JUMPDEST STOP -> jump lands on the JUMPDEST at pc=4.
        let code = hex_literal::hex!("6004565b00");
        let analysis = Analysis::analyze(&code);
        let jump_entry = &analysis.instructions[2]; // header, push, jump
        match jump_entry {
            StreamEntry::Op {
                instruction: Instruction::JUMP,
                arg: InstrArg::JumpTarget(idx),
                ..
            } => {
                let target = &analysis.instructions[*idx];
                assert!(matches!(
                    target,
                    StreamEntry::Op {
                        instruction: Instruction::JUMPDEST,
                        ..
                    }
                ));
            }
            other => panic!("expected resolved jump target, got {other:?}"),
        }
    }
}
