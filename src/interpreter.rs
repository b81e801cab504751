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

//! Dispatch loop: walks a frame's translated instruction stream, validating
//! each basic block on entry and executing opcode handlers in order. Ported
//! from the teacher's `Interpreter::step`/`step_inner`/`exec_instruction`,
//! generalized from a raw byte reader to a walk over `analysis::Analysis`'s
//! block/instruction stream (§4.5).

use ethereum_types::{Address, BigEndianHash, H256, U256};
#[cfg(feature = "debug-tracing")]
use log::trace;

use crate::analysis::{InstrArg, StreamEntry};
use crate::debug::{DebugHooks, StepAction, StepContext};
use crate::error::{Error, Result};
use crate::frame::{Frame, TxContext};
use crate::gasometer::{self, GasMeter, RefundCounter};
use crate::instructions::Instruction;
use crate::memory::{checked_range, Memory};
use crate::orchestrator::{self, CallKind, CreateKind};
use crate::schedule::{Schedule, SSTORE_SENTRY_GAS};
use crate::shared_cache::SharedCache;
use crate::state::{LogEntry, State};
use crate::word;

/// Terminal outcome of running a frame to completion.
#[derive(Debug)]
pub enum Halt {
    /// `STOP`, implicit end-of-stream, or `RETURN`.
    Success { output: Vec<u8> },
    /// `REVERT`: state rolled back by the caller, output preserved.
    Revert { output: Vec<u8> },
    /// A step hook requested `StepAction::Pause`; `frame` is left exactly at
    /// the pre-dispatch point and this same `frame` can be passed back into
    /// `run` to resume.
    Paused,
}

/// What one opcode handler did to control flow.
enum Dispatch {
    Continue,
    Jump(usize),
    Return(Vec<u8>),
    Revert(Vec<u8>),
    Stop,
}

/// Run `frame` until it halts, pauses, or raises an error.
pub fn run(
    frame: &mut Frame,
    state: &mut dyn State,
    schedule: &Schedule,
    cache: &SharedCache,
    refund: &mut RefundCounter,
    mut hooks: Option<&mut dyn DebugHooks>,
    tx: &TxContext,
) -> Result<Halt> {
    loop {
        let entry = match frame.analysis.instructions.get(frame.instruction_index) {
            Some(entry) => entry.clone(),
            None => return Ok(Halt::Success { output: Vec::new() }),
        };

        match entry {
            StreamEntry::BlockHeader(block_idx) => {
                let block = frame.analysis.blocks[block_idx];
                frame.gas.charge(block.gas_cost as u64)?;
                let size = frame.stack.len() as i64;
                if size < block.stack_min as i64 {
                    return Err(Error::StackUnderflow {
                        instruction: "block-entry",
                        wanted: block.stack_min as usize,
                        on_stack: size.max(0) as usize,
                    });
                }
                if size + block.stack_max_growth as i64 > crate::stack::STACK_LIMIT as i64 {
                    return Err(Error::StackOverflow {
                        instruction: "block-entry",
                        limit: crate::stack::STACK_LIMIT,
                    });
                }
                frame.instruction_index += 1;
            }
            StreamEntry::Op {
                instruction,
                pc,
                arg,
            } => {
                if let Some(hook) = hooks.as_deref_mut() {
                    let ctx = StepContext {
                        pc,
                        instruction,
                        gas_left: frame.gas.remaining(),
                        depth: frame.context.depth,
                        stack_top: frame.stack.peek_top(frame.stack.len().min(4)),
                    };
                    match hook.on_step(&ctx) {
                        StepAction::Continue => {}
                        StepAction::Pause => return Ok(Halt::Paused),
                        StepAction::Abort => return Err(Error::DebugAbort),
                    }
                }

                #[cfg(feature = "debug-tracing")]
                trace!(target: "evm", "pc={} op={:?} gas={}", pc, instruction, frame.gas.remaining());

                let dispatch = dispatch_one(
                    frame,
                    state,
                    schedule,
                    cache,
                    refund,
                    hooks.as_deref_mut(),
                    tx,
                    instruction,
                    pc,
                    &arg,
                )?;

                match dispatch {
                    Dispatch::Continue => frame.instruction_index += 1,
                    Dispatch::Jump(idx) => frame.instruction_index = idx,
                    Dispatch::Return(output) => return Ok(Halt::Success { output }),
                    Dispatch::Revert(output) => return Ok(Halt::Revert { output }),
                    Dispatch::Stop => return Ok(Halt::Success { output: Vec::new() }),
                }
            }
        }
    }
}

fn clamp_usize(value: U256) -> Result<usize> {
    if value > U256::from(u32::MAX) {
        Err(Error::MemoryOffsetOverflow)
    } else {
        Ok(value.as_u32() as usize)
    }
}

/// Validate and flatten an `(offset, len)` operand pair into a byte range,
/// per §4.2: `len == 0` never touches memory regardless of `offset`.
fn mem_region(offset: U256, len: U256) -> Result<(usize, usize)> {
    if len.is_zero() {
        return Ok((0, 0));
    }
    let end = checked_range(offset, len)?;
    let start = clamp_usize(offset)?;
    Ok((start, end - start))
}

fn charge_memory(memory: &mut Memory, gas: &mut GasMeter, schedule: &Schedule, end: usize) -> Result<()> {
    let current_words = memory.words();
    let new_words = Memory::words_required(end);
    let cost = gasometer::memory_expansion_cost(current_words, new_words, schedule);
    gas.charge(cost)?;
    memory.expand(end);
    Ok(())
}

/// Shared body for `CALLDATACOPY`/`CODECOPY`/`EXTCODECOPY`: charge memory
/// expansion plus the per-word copy cost, then copy from `source`
/// zero-padding past its end, exactly as `Memory::copy_in` already does.
fn copy_from(
    memory: &mut Memory,
    gas: &mut GasMeter,
    schedule: &Schedule,
    dest_offset: U256,
    source: &[u8],
    src_offset: U256,
    len: U256,
) -> Result<()> {
    let (dest, copy_len) = mem_region(dest_offset, len)?;
    if copy_len > 0 {
        charge_memory(memory, gas, schedule, dest + copy_len)?;
    }
    gas.charge(gasometer::copy_cost(copy_len, schedule))?;
    if copy_len == 0 {
        return Ok(());
    }
    let src_start = clamp_usize(src_offset).unwrap_or(usize::MAX);
    let slice = if src_start >= source.len() {
        &[][..]
    } else {
        &source[src_start..]
    };
    memory.copy_in(dest, slice, copy_len);
    Ok(())
}

/// EIP-2929 cold/warm account-access surcharge, collapsing to the flat
/// pre-Berlin cost when the schedule doesn't carry access-list accounting.
fn account_access_gas(
    state: &mut dyn State,
    schedule: &Schedule,
    address: Address,
    warm_gas: u64,
    cold_gas: u64,
    legacy_gas: u64,
) -> u64 {
    if schedule.eip2929 {
        if state.mark_account_warm(address) {
            cold_gas
        } else {
            warm_gas
        }
    } else {
        legacy_gas
    }
}

fn bool_word(value: bool) -> U256 {
    if value {
        U256::one()
    } else {
        U256::zero()
    }
}

fn signed_lt(a: U256, b: U256) -> bool {
    match (a.bit(255), b.bit(255)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

/// `base.pow(exponent) mod 2^256`, wrapping at every multiplication rather
/// than ever computing the true (unbounded) power.
fn wrapping_pow(base: U256, exponent: U256) -> U256 {
    let mut result = U256::one();
    let mut base = base;
    let mut exp = exponent;
    while !exp.is_zero() {
        if exp.bit(0) {
            result = result.overflowing_mul(base).0;
        }
        base = base.overflowing_mul(base).0;
        exp >>= 1;
    }
    result
}

/// Resolve a dynamic `JUMP`/`JUMPI` target to the instruction-stream index of
/// its `BlockHeader` (one before the `JUMPDEST`'s own `Op` entry — safe
/// because `analysis::Analysis` always opens a fresh block at every
/// `JUMPDEST`, so the header immediately precedes it).
fn resolve_jump(frame: &Frame, dest: U256) -> Result<usize> {
    let offset = frame.analysis.validate_jump(dest)?;
    let idx = frame
        .analysis
        .instruction_index_at(offset)
        .expect("validate_jump guarantees a corresponding Op entry; qed");
    Ok(idx.saturating_sub(1))
}

fn jump_target(frame: &Frame, arg: &InstrArg, dest: U256) -> Result<usize> {
    match arg {
        InstrArg::JumpTarget(idx) => Ok(idx.saturating_sub(1)),
        _ => resolve_jump(frame, dest),
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_call(
    frame: &mut Frame,
    kind: CallKind,
    gas_req: U256,
    to: Address,
    value: U256,
    in_off: U256,
    in_len: U256,
    out_off: U256,
    out_len: U256,
    state: &mut dyn State,
    schedule: &Schedule,
    cache: &SharedCache,
    refund: &mut RefundCounter,
    tx: &TxContext,
    hooks: Option<&mut dyn DebugHooks>,
) -> Result<Dispatch> {
    let (in_start, in_length) = mem_region(in_off, in_len)?;
    let (out_start, out_length) = mem_region(out_off, out_len)?;
    let expand_to = (in_start + in_length).max(out_start + out_length);
    if expand_to > 0 {
        charge_memory(&mut frame.memory, &mut frame.gas, schedule, expand_to)?;
    }

    let transfers_value = matches!(kind, CallKind::Call | CallKind::CallCode) && !value.is_zero();
    if transfers_value && frame.context.is_static {
        return Err(Error::WriteProtection);
    }

    let access_cost = account_access_gas(
        state,
        schedule,
        to,
        schedule.warm_storage_read_cost as u64,
        schedule.cold_account_access_cost as u64,
        schedule.call_gas as u64,
    );
    let new_account_cost = if transfers_value && schedule.kill_empty && !state.account_exists(to) {
        schedule.call_new_account_gas as u64
    } else {
        0
    };
    let value_cost = if transfers_value {
        schedule.call_value_transfer_gas as u64
    } else {
        0
    };
    frame.gas.charge(access_cost + new_account_cost + value_cost)?;

    let gas_cap = if gas_req > U256::from(u64::MAX) {
        u64::MAX
    } else {
        gas_req.as_u64()
    };
    let input = frame.memory.read_slice(in_start, in_length);
    let effective_value = if matches!(kind, CallKind::DelegateCall | CallKind::StaticCall) {
        U256::zero()
    } else {
        value
    };

    let outcome = orchestrator::execute_call(
        frame,
        kind,
        gas_cap,
        to,
        effective_value,
        input,
        state,
        schedule,
        cache,
        refund,
        tx,
        hooks,
    )?;

    let copy_len = out_length.min(outcome.output.len());
    if copy_len > 0 {
        frame.memory.copy_in(out_start, &outcome.output, copy_len);
    }
    frame.return_data = outcome.output;
    frame.stack.push(bool_word(outcome.success));
    Ok(Dispatch::Continue)
}

#[allow(clippy::too_many_arguments)]
fn dispatch_one(
    frame: &mut Frame,
    state: &mut dyn State,
    schedule: &Schedule,
    cache: &SharedCache,
    refund: &mut RefundCounter,
    hooks: Option<&mut dyn DebugHooks>,
    tx: &TxContext,
    instruction: Instruction,
    pc: u32,
    arg: &InstrArg,
) -> Result<Dispatch> {
    use Instruction::*;

    macro_rules! require_enabled {
        ($cond:expr) => {
            if !($cond) {
                return Err(Error::InvalidOpcode {
                    instruction: instruction.as_u8(),
                });
            }
        };
    }

    match instruction {
        STOP => Ok(Dispatch::Stop),

        ADD => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(a.overflowing_add(b).0);
            Ok(Dispatch::Continue)
        }
        MUL => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(a.overflowing_mul(b).0);
            Ok(Dispatch::Continue)
        }
        SUB => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(a.overflowing_sub(b).0);
            Ok(Dispatch::Continue)
        }
        DIV => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(if b.is_zero() { U256::zero() } else { a / b });
            Ok(Dispatch::Continue)
        }
        SDIV => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            let result = if b.is_zero() {
                U256::zero()
            } else {
                let (a_mag, a_neg) = word::get_and_reset_sign(a);
                let (b_mag, b_neg) = word::get_and_reset_sign(b);
                word::set_sign(a_mag / b_mag, a_neg ^ b_neg)
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }
        MOD => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(if b.is_zero() { U256::zero() } else { a % b });
            Ok(Dispatch::Continue)
        }
        SMOD => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            let result = if b.is_zero() {
                U256::zero()
            } else {
                let (a_mag, a_neg) = word::get_and_reset_sign(a);
                let (b_mag, _) = word::get_and_reset_sign(b);
                word::set_sign(a_mag % b_mag, a_neg)
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }
        ADDMOD => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            let m = frame.stack.pop();
            let result = if m.is_zero() {
                U256::zero()
            } else {
                let sum = word::to_biguint(a) + word::to_biguint(b);
                word::from_biguint(sum % word::to_biguint(m))
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }
        MULMOD => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            let m = frame.stack.pop();
            let result = if m.is_zero() {
                U256::zero()
            } else {
                let product = word::to_biguint(a) * word::to_biguint(b);
                word::from_biguint(product % word::to_biguint(m))
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }
        EXP => {
            let base = frame.stack.pop();
            let exponent = frame.stack.pop();
            frame.gas.charge(gasometer::exp_cost(&exponent, schedule))?;
            frame.stack.push(wrapping_pow(base, exponent));
            Ok(Dispatch::Continue)
        }
        SIGNEXTEND => {
            let k = frame.stack.pop();
            let x = frame.stack.pop();
            let result = if k >= U256::from(32) {
                x
            } else {
                let bit_index = k.as_u32() * 8 + 7;
                if bit_index >= 255 {
                    x
                } else {
                    let mask = (U256::one() << (bit_index + 1)) - U256::one();
                    if x.bit(bit_index as usize) {
                        x | !mask
                    } else {
                        x & mask
                    }
                }
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }

        LT => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(bool_word(a < b));
            Ok(Dispatch::Continue)
        }
        GT => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(bool_word(a > b));
            Ok(Dispatch::Continue)
        }
        SLT => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(bool_word(signed_lt(a, b)));
            Ok(Dispatch::Continue)
        }
        SGT => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(bool_word(signed_lt(b, a)));
            Ok(Dispatch::Continue)
        }
        EQ => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(bool_word(a == b));
            Ok(Dispatch::Continue)
        }
        ISZERO => {
            let a = frame.stack.pop();
            frame.stack.push(bool_word(a.is_zero()));
            Ok(Dispatch::Continue)
        }
        AND => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(a & b);
            Ok(Dispatch::Continue)
        }
        OR => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(a | b);
            Ok(Dispatch::Continue)
        }
        XOR => {
            let a = frame.stack.pop();
            let b = frame.stack.pop();
            frame.stack.push(a ^ b);
            Ok(Dispatch::Continue)
        }
        NOT => {
            let a = frame.stack.pop();
            frame.stack.push(!a);
            Ok(Dispatch::Continue)
        }
        BYTE => {
            let i = frame.stack.pop();
            let x = frame.stack.pop();
            let result = if i >= U256::from(32) {
                U256::zero()
            } else {
                let shift = 8 * (31 - i.as_u32());
                (x >> shift) & U256::from(0xffu8)
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }
        SHL => {
            require_enabled!(schedule.have_bitwise_shifting);
            let shift = frame.stack.pop();
            let value = frame.stack.pop();
            let result = if shift >= U256::from(256) {
                U256::zero()
            } else {
                value << shift.as_u32()
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }
        SHR => {
            require_enabled!(schedule.have_bitwise_shifting);
            let shift = frame.stack.pop();
            let value = frame.stack.pop();
            let result = if shift >= U256::from(256) {
                U256::zero()
            } else {
                value >> shift.as_u32()
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }
        SAR => {
            require_enabled!(schedule.have_bitwise_shifting);
            let shift = frame.stack.pop();
            let value = frame.stack.pop();
            let negative = value.bit(255);
            let result = if shift >= U256::from(256) {
                if negative {
                    U256::max_value()
                } else {
                    U256::zero()
                }
            } else {
                let shift_amt = shift.as_u32();
                let shifted = value >> shift_amt;
                if negative && shift_amt > 0 {
                    shifted | (U256::max_value() << (256 - shift_amt))
                } else {
                    shifted
                }
            };
            frame.stack.push(result);
            Ok(Dispatch::Continue)
        }

        SHA3 => {
            let offset = frame.stack.pop();
            let len = frame.stack.pop();
            let (start, length) = mem_region(offset, len)?;
            if length > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            }
            frame.gas.charge(gasometer::sha3_cost(length, schedule))?;
            let data = frame.memory.read_slice(start, length);
            let hash = keccak_hash::keccak(&data);
            frame.stack.push(hash.into_uint());
            Ok(Dispatch::Continue)
        }

        ADDRESS => {
            frame.stack.push(word::address_to_u256(frame.context.address));
            Ok(Dispatch::Continue)
        }
        BALANCE => {
            let addr = word::u256_to_address(&frame.stack.pop());
            let gas = account_access_gas(
                state,
                schedule,
                addr,
                schedule.warm_storage_read_cost as u64,
                schedule.cold_account_access_cost as u64,
                schedule.balance_gas as u64,
            );
            frame.gas.charge(gas)?;
            let balance = state.get_account(addr).map(|a| a.balance).unwrap_or_default();
            frame.stack.push(balance);
            Ok(Dispatch::Continue)
        }
        ORIGIN => {
            frame.stack.push(word::address_to_u256(tx.origin));
            Ok(Dispatch::Continue)
        }
        CALLER => {
            frame.stack.push(word::address_to_u256(frame.context.caller));
            Ok(Dispatch::Continue)
        }
        CALLVALUE => {
            frame.stack.push(frame.context.value);
            Ok(Dispatch::Continue)
        }
        CALLDATALOAD => {
            let offset = frame.stack.pop();
            let off = clamp_usize(offset).unwrap_or(usize::MAX);
            let mut bytes = [0u8; 32];
            if off < frame.context.input.len() {
                let avail = (frame.context.input.len() - off).min(32);
                bytes[..avail].copy_from_slice(&frame.context.input[off..off + avail]);
            }
            frame.stack.push(U256::from_big_endian(&bytes));
            Ok(Dispatch::Continue)
        }
        CALLDATASIZE => {
            frame.stack.push(U256::from(frame.context.input.len()));
            Ok(Dispatch::Continue)
        }
        CALLDATACOPY => {
            let dest = frame.stack.pop();
            let src = frame.stack.pop();
            let len = frame.stack.pop();
            let input = frame.context.input.clone();
            copy_from(&mut frame.memory, &mut frame.gas, schedule, dest, &input, src, len)?;
            Ok(Dispatch::Continue)
        }
        CODESIZE => {
            frame.stack.push(U256::from(frame.code.len()));
            Ok(Dispatch::Continue)
        }
        CODECOPY => {
            let dest = frame.stack.pop();
            let src = frame.stack.pop();
            let len = frame.stack.pop();
            let code = frame.code.clone();
            copy_from(&mut frame.memory, &mut frame.gas, schedule, dest, &code, src, len)?;
            Ok(Dispatch::Continue)
        }
        GASPRICE => {
            frame.stack.push(tx.gas_price);
            Ok(Dispatch::Continue)
        }
        EXTCODESIZE => {
            let addr = word::u256_to_address(&frame.stack.pop());
            let gas = account_access_gas(
                state,
                schedule,
                addr,
                schedule.warm_storage_read_cost as u64,
                schedule.cold_account_access_cost as u64,
                schedule.extcodesize_gas as u64,
            );
            frame.gas.charge(gas)?;
            let size = match state.get_account(addr) {
                Some(a) => state.get_code(a.code_hash).len(),
                None => 0,
            };
            frame.stack.push(U256::from(size));
            Ok(Dispatch::Continue)
        }
        EXTCODECOPY => {
            let addr = word::u256_to_address(&frame.stack.pop());
            let dest = frame.stack.pop();
            let src = frame.stack.pop();
            let len = frame.stack.pop();
            let gas = account_access_gas(
                state,
                schedule,
                addr,
                schedule.warm_storage_read_cost as u64,
                schedule.cold_account_access_cost as u64,
                schedule.extcodecopy_base_gas as u64,
            );
            frame.gas.charge(gas)?;
            let code = match state.get_account(addr) {
                Some(a) => state.get_code(a.code_hash),
                None => Vec::new(),
            };
            copy_from(&mut frame.memory, &mut frame.gas, schedule, dest, &code, src, len)?;
            Ok(Dispatch::Continue)
        }
        RETURNDATASIZE => {
            require_enabled!(schedule.have_return_data);
            frame.stack.push(U256::from(frame.return_data.len()));
            Ok(Dispatch::Continue)
        }
        RETURNDATACOPY => {
            require_enabled!(schedule.have_return_data);
            let dest = frame.stack.pop();
            let src = frame.stack.pop();
            let len = frame.stack.pop();
            let src_start = clamp_usize(src)?;
            let length = clamp_usize(len)?;
            if src_start
                .checked_add(length)
                .map_or(true, |end| end > frame.return_data.len())
            {
                return Err(Error::OutOfBounds);
            }
            let (dest_start, copy_len) = mem_region(dest, len)?;
            if copy_len > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, dest_start + copy_len)?;
            }
            frame.gas.charge(gasometer::copy_cost(copy_len, schedule))?;
            if copy_len > 0 {
                let data = frame.return_data[src_start..src_start + copy_len].to_vec();
                frame.memory.copy_in(dest_start, &data, copy_len);
            }
            Ok(Dispatch::Continue)
        }
        EXTCODEHASH => {
            require_enabled!(schedule.have_extcodehash);
            let addr = word::u256_to_address(&frame.stack.pop());
            let gas = account_access_gas(
                state,
                schedule,
                addr,
                schedule.warm_storage_read_cost as u64,
                schedule.cold_account_access_cost as u64,
                schedule.extcodehash_gas as u64,
            );
            frame.gas.charge(gas)?;
            let hash = match state.get_account(addr) {
                Some(a) if a.code_hash != H256::zero() => a.code_hash,
                _ => H256::zero(),
            };
            frame.stack.push(hash.into_uint());
            Ok(Dispatch::Continue)
        }

        BLOCKHASH => {
            let number = frame.stack.pop();
            let hash = tx.block_hashes.get(&number).copied().unwrap_or_default();
            frame.stack.push(hash);
            Ok(Dispatch::Continue)
        }
        COINBASE => {
            frame.stack.push(word::address_to_u256(tx.block_coinbase));
            Ok(Dispatch::Continue)
        }
        TIMESTAMP => {
            frame.stack.push(U256::from(tx.block_timestamp));
            Ok(Dispatch::Continue)
        }
        NUMBER => {
            frame.stack.push(U256::from(tx.block_number));
            Ok(Dispatch::Continue)
        }
        DIFFICULTY => {
            frame.stack.push(tx.block_difficulty);
            Ok(Dispatch::Continue)
        }
        GASLIMIT => {
            frame.stack.push(U256::from(tx.block_gas_limit));
            Ok(Dispatch::Continue)
        }
        CHAINID => {
            require_enabled!(schedule.have_chain_id);
            frame.stack.push(U256::from(tx.chain_id));
            Ok(Dispatch::Continue)
        }
        SELFBALANCE => {
            require_enabled!(schedule.have_selfbalance);
            let balance = state
                .get_account(frame.context.address)
                .map(|a| a.balance)
                .unwrap_or_default();
            frame.stack.push(balance);
            Ok(Dispatch::Continue)
        }
        BASEFEE => {
            require_enabled!(schedule.eip3198);
            frame.stack.push(tx.base_fee);
            Ok(Dispatch::Continue)
        }

        POP => {
            frame.stack.pop();
            Ok(Dispatch::Continue)
        }
        MLOAD => {
            let offset = frame.stack.pop();
            let (start, length) = mem_region(offset, U256::from(32u8))?;
            charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            frame.stack.push(frame.memory.load_word(start));
            Ok(Dispatch::Continue)
        }
        MSTORE => {
            let offset = frame.stack.pop();
            let value = frame.stack.pop();
            let (start, length) = mem_region(offset, U256::from(32u8))?;
            charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            frame.memory.store_word(start, value);
            Ok(Dispatch::Continue)
        }
        MSTORE8 => {
            let offset = frame.stack.pop();
            let value = frame.stack.pop();
            let (start, length) = mem_region(offset, U256::one())?;
            charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            frame.memory.store_byte(start, (value.low_u32() & 0xff) as u8);
            Ok(Dispatch::Continue)
        }
        SLOAD => {
            let key = frame.stack.pop();
            let gas = if schedule.eip2929 {
                if state.mark_storage_warm(frame.context.address, key) {
                    schedule.cold_sload_cost as u64
                } else {
                    schedule.warm_storage_read_cost as u64
                }
            } else {
                schedule.sload_gas as u64
            };
            frame.gas.charge(gas)?;
            frame.stack.push(state.get_storage(frame.context.address, key));
            Ok(Dispatch::Continue)
        }
        SSTORE => {
            if frame.context.is_static {
                return Err(Error::WriteProtection);
            }
            let key = frame.stack.pop();
            let new = frame.stack.pop();
            if schedule.eip1283 && frame.gas.remaining() <= SSTORE_SENTRY_GAS as u64 {
                return Err(Error::OutOfGas);
            }
            let current = state.get_storage(frame.context.address, key);
            let original = state.original_storage(frame.context.address, key);
            let mut cost = gasometer::sstore_cost(original, current, new, schedule);
            if schedule.eip2929 && state.mark_storage_warm(frame.context.address, key) {
                cost.gas += schedule.cold_sload_cost as u64;
            }
            frame.gas.charge(cost.gas)?;
            if cost.refund_delta >= 0 {
                refund.add(cost.refund_delta as u64);
            } else {
                refund.remove((-cost.refund_delta) as u64);
            }
            state.write_storage(frame.context.address, key, new);
            Ok(Dispatch::Continue)
        }
        JUMP => {
            let dest = frame.stack.pop();
            let idx = jump_target(frame, arg, dest)?;
            Ok(Dispatch::Jump(idx))
        }
        JUMPI => {
            let dest = frame.stack.pop();
            let cond = frame.stack.pop();
            if cond.is_zero() {
                Ok(Dispatch::Continue)
            } else {
                let idx = jump_target(frame, arg, dest)?;
                Ok(Dispatch::Jump(idx))
            }
        }
        PC => {
            frame.stack.push(U256::from(pc));
            Ok(Dispatch::Continue)
        }
        MSIZE => {
            frame.stack.push(U256::from(frame.memory.size()));
            Ok(Dispatch::Continue)
        }
        GAS => {
            frame.stack.push(U256::from(frame.gas.remaining()));
            Ok(Dispatch::Continue)
        }
        JUMPDEST => Ok(Dispatch::Continue),
        TLOAD => {
            require_enabled!(schedule.have_transient_storage);
            let key = frame.stack.pop();
            frame.stack.push(state.get_transient_storage(frame.context.address, key));
            Ok(Dispatch::Continue)
        }
        TSTORE => {
            require_enabled!(schedule.have_transient_storage);
            if frame.context.is_static {
                return Err(Error::WriteProtection);
            }
            frame.gas.charge(schedule.warm_storage_read_cost as u64)?;
            let key = frame.stack.pop();
            let value = frame.stack.pop();
            state.write_transient_storage(frame.context.address, key, value);
            Ok(Dispatch::Continue)
        }
        MCOPY => {
            require_enabled!(schedule.have_mcopy);
            let dest = frame.stack.pop();
            let src = frame.stack.pop();
            let len = frame.stack.pop();
            let (dest_start, length) = mem_region(dest, len)?;
            let (src_start, _) = mem_region(src, len)?;
            let expand_to = dest_start.max(src_start) + length;
            if length > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, expand_to)?;
            }
            frame.gas.charge(gasometer::copy_cost(length, schedule))?;
            if length > 0 {
                let data = frame.memory.read_slice(src_start, length);
                frame.memory.copy_in(dest_start, &data, length);
            }
            Ok(Dispatch::Continue)
        }
        PUSH0 => {
            require_enabled!(schedule.have_push0);
            frame.stack.push(U256::zero());
            Ok(Dispatch::Continue)
        }

        CREATE => {
            if frame.context.is_static {
                return Err(Error::WriteProtection);
            }
            let value = frame.stack.pop();
            let offset = frame.stack.pop();
            let len = frame.stack.pop();
            let (start, length) = mem_region(offset, len)?;
            if length > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            }
            let init_code = frame.memory.read_slice(start, length);
            let outcome = orchestrator::execute_create(
                frame,
                CreateKind::Create,
                value,
                init_code,
                state,
                schedule,
                cache,
                refund,
                tx,
                hooks,
            )?;
            frame.return_data = outcome.output;
            frame
                .stack
                .push(outcome.address.map(word::address_to_u256).unwrap_or_default());
            Ok(Dispatch::Continue)
        }
        CALL => {
            let gas_req = frame.stack.pop();
            let to = word::u256_to_address(&frame.stack.pop());
            let value = frame.stack.pop();
            let in_off = frame.stack.pop();
            let in_len = frame.stack.pop();
            let out_off = frame.stack.pop();
            let out_len = frame.stack.pop();
            dispatch_call(
                frame, CallKind::Call, gas_req, to, value, in_off, in_len, out_off, out_len, state,
                schedule, cache, refund, tx, hooks,
            )
        }
        CALLCODE => {
            let gas_req = frame.stack.pop();
            let to = word::u256_to_address(&frame.stack.pop());
            let value = frame.stack.pop();
            let in_off = frame.stack.pop();
            let in_len = frame.stack.pop();
            let out_off = frame.stack.pop();
            let out_len = frame.stack.pop();
            dispatch_call(
                frame, CallKind::CallCode, gas_req, to, value, in_off, in_len, out_off, out_len, state,
                schedule, cache, refund, tx, hooks,
            )
        }
        RETURN => {
            let offset = frame.stack.pop();
            let len = frame.stack.pop();
            let (start, length) = mem_region(offset, len)?;
            if length > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            }
            let memory = std::mem::take(&mut frame.memory);
            Ok(Dispatch::Return(memory.into_return_data(start, length)))
        }
        DELEGATECALL => {
            require_enabled!(schedule.have_delegate_call);
            let gas_req = frame.stack.pop();
            let to = word::u256_to_address(&frame.stack.pop());
            let in_off = frame.stack.pop();
            let in_len = frame.stack.pop();
            let out_off = frame.stack.pop();
            let out_len = frame.stack.pop();
            dispatch_call(
                frame,
                CallKind::DelegateCall,
                gas_req,
                to,
                U256::zero(),
                in_off,
                in_len,
                out_off,
                out_len,
                state,
                schedule,
                cache,
                refund,
                tx,
                hooks,
            )
        }
        CREATE2 => {
            require_enabled!(schedule.have_create2);
            if frame.context.is_static {
                return Err(Error::WriteProtection);
            }
            let value = frame.stack.pop();
            let offset = frame.stack.pop();
            let len = frame.stack.pop();
            let salt = frame.stack.pop();
            let (start, length) = mem_region(offset, len)?;
            if length > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            }
            frame.gas.charge(schedule.sha3_word_gas as u64 * ((length as u64 + 31) / 32))?;
            let init_code = frame.memory.read_slice(start, length);
            let outcome = orchestrator::execute_create(
                frame,
                CreateKind::Create2 { salt },
                value,
                init_code,
                state,
                schedule,
                cache,
                refund,
                tx,
                hooks,
            )?;
            frame.return_data = outcome.output;
            frame
                .stack
                .push(outcome.address.map(word::address_to_u256).unwrap_or_default());
            Ok(Dispatch::Continue)
        }
        STATICCALL => {
            require_enabled!(schedule.have_static_call);
            let gas_req = frame.stack.pop();
            let to = word::u256_to_address(&frame.stack.pop());
            let in_off = frame.stack.pop();
            let in_len = frame.stack.pop();
            let out_off = frame.stack.pop();
            let out_len = frame.stack.pop();
            dispatch_call(
                frame,
                CallKind::StaticCall,
                gas_req,
                to,
                U256::zero(),
                in_off,
                in_len,
                out_off,
                out_len,
                state,
                schedule,
                cache,
                refund,
                tx,
                hooks,
            )
        }
        REVERT => {
            require_enabled!(schedule.have_revert);
            let offset = frame.stack.pop();
            let len = frame.stack.pop();
            let (start, length) = mem_region(offset, len)?;
            if length > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            }
            let memory = std::mem::take(&mut frame.memory);
            Ok(Dispatch::Revert(memory.into_return_data(start, length)))
        }
        INVALID => Err(Error::InvalidOpcode {
            instruction: frame.code.get(pc as usize).copied().unwrap_or(0xfe),
        }),
        SELFDESTRUCT => {
            if frame.context.is_static {
                return Err(Error::WriteProtection);
            }
            let beneficiary = word::u256_to_address(&frame.stack.pop());
            let mut gas = schedule.suicide_gas as u64;
            if schedule.eip2929 && state.mark_account_warm(beneficiary) {
                gas += schedule.cold_account_access_cost as u64;
            }
            let this_account = state.get_account(frame.context.address).unwrap_or_default();
            let beneficiary_exists = state.account_exists(beneficiary);
            if schedule.kill_empty
                && !this_account.balance.is_zero()
                && !beneficiary_exists
                && beneficiary != frame.context.address
            {
                gas += schedule.suicide_to_new_account_cost as u64;
            }
            frame.gas.charge(gas)?;

            let moved = this_account.balance;
            if beneficiary != frame.context.address {
                let mut beneficiary_account = state.get_account(beneficiary).unwrap_or_default();
                beneficiary_account.balance = beneficiary_account.balance.overflowing_add(moved).0;
                state.set_account(beneficiary, beneficiary_account);
            }

            if schedule.eip6780 && !frame.context.created_this_tx {
                if beneficiary != frame.context.address {
                    let mut zeroed = this_account;
                    zeroed.balance = U256::zero();
                    state.set_account(frame.context.address, zeroed);
                }
            } else {
                state.delete_account(frame.context.address);
                if schedule.suicide_refund_gas > 0 {
                    refund.add(schedule.suicide_refund_gas as u64);
                }
            }
            Ok(Dispatch::Stop)
        }

        BEGINSUB => {
            require_enabled!(schedule.have_subs);
            Ok(Dispatch::Continue)
        }
        RETURNSUB => {
            require_enabled!(schedule.have_subs);
            let target = frame
                .return_stack
                .pop()
                .ok_or(Error::InvalidJump { destination: 0 })?;
            Ok(Dispatch::Jump(target))
        }
        JUMPSUB => {
            require_enabled!(schedule.have_subs);
            let dest = frame.stack.pop();
            let idx = resolve_jump(frame, dest)?;
            frame.return_stack.push(frame.instruction_index + 1);
            Ok(Dispatch::Jump(idx))
        }

        other if other.push_bytes().is_some() => match arg {
            InstrArg::Push(value) => {
                frame.stack.push(*value);
                Ok(Dispatch::Continue)
            }
            _ => unreachable!("analysis always tags PUSHn with a Push argument; qed"),
        },
        other if other.dup_position().is_some() => {
            frame.stack.dup(other.dup_position().expect("guarded above; qed"));
            Ok(Dispatch::Continue)
        }
        other if other.swap_position().is_some() => {
            frame
                .stack
                .swap_with_top(other.swap_position().expect("guarded above; qed"));
            Ok(Dispatch::Continue)
        }
        other if other.log_topics().is_some() => {
            if frame.context.is_static {
                return Err(Error::WriteProtection);
            }
            let topics_n = other.log_topics().expect("guarded above; qed");
            let offset = frame.stack.pop();
            let len = frame.stack.pop();
            let mut topics = Vec::with_capacity(topics_n);
            for _ in 0..topics_n {
                let t = frame.stack.pop();
                let mut bytes = [0u8; 32];
                t.to_big_endian(&mut bytes);
                topics.push(H256::from(bytes));
            }
            let (start, length) = mem_region(offset, len)?;
            if length > 0 {
                charge_memory(&mut frame.memory, &mut frame.gas, schedule, start + length)?;
            }
            frame.gas.charge(gasometer::log_cost(topics_n, length, schedule))?;
            let data = frame.memory.read_slice(start, length);
            state.append_log(LogEntry {
                address: frame.context.address,
                topics,
                data,
            });
            Ok(Dispatch::Continue)
        }

        _ => Err(Error::InvalidOpcode {
            instruction: instruction.as_u8(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CallContext, Frame};
    use crate::schedule::Schedule;
    use crate::shared_cache::SharedCache;
    use crate::state::InMemoryState;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx(address: Address, input: Vec<u8>) -> CallContext {
        CallContext {
            address,
            code_address: address,
            caller: Address::from_low_u64_be(0xca11),
            value: U256::zero(),
            input,
            is_static: false,
            depth: 0,
            created_this_tx: false,
        }
    }

    fn tx_context() -> TxContext {
        TxContext {
            origin: Address::from_low_u64_be(0x0718),
            gas_price: U256::from(1),
            block_coinbase: Address::zero(),
            block_timestamp: 0,
            block_number: 0,
            block_difficulty: U256::zero(),
            block_gas_limit: 30_000_000,
            chain_id: 1,
            base_fee: U256::zero(),
            block_hashes: HashMap::new(),
        }
    }

    fn run_code(code: &[u8], gas: u64) -> (Result<Halt>, Frame) {
        let schedule = Schedule::new_london();
        let cache = SharedCache::default();
        let analysis = cache.analysis_for(code);
        let address = Address::from_low_u64_be(1);
        let mut frame = Frame::new(ctx(address, Vec::new()), Arc::new(code.to_vec()), analysis, gas);
        let mut state = InMemoryState::new();
        let mut refund = RefundCounter::new();
        let tx = tx_context();
        let result = run(&mut frame, &mut state, &schedule, &cache, &mut refund, None, &tx);
        (result, frame)
    }

    #[test]
    fn push_add_stop_leaves_five_on_the_stack() {
        // PUSH1 2 PUSH1 3 ADD STOP
        let code = hex_literal::hex!("6002600301" "00");
        let (result, frame) = run_code(&code, 21000);
        assert!(matches!(result, Ok(Halt::Success { .. })));
        assert_eq!(frame.stack.peek(1), &U256::from(5));
    }

    #[test]
    fn jump_to_non_jumpdest_is_invalid() {
        // PUSH1 5 JUMP STOP JUMPDEST
        let code = hex_literal::hex!("6005565b00");
        let (result, _frame) = run_code(&code, 21000);
        assert!(matches!(result, Err(Error::InvalidJump { .. })));
    }

    #[test]
    fn jump_loop_sums_one_to_five() {
        // PUSH1 0 JUMPDEST PUSH1 1 ADD DUP1 PUSH1 5 LT PUSH1 2 JUMPI STOP
        let code = hex_literal::hex!("6000" "5b" "6001" "01" "80" "6005" "11" "6002" "57" "00");
        let (result, frame) = run_code(&code, 100_000);
        assert!(matches!(result, Ok(Halt::Success { .. })));
        assert_eq!(frame.stack.peek(1), &U256::from(5));
    }

    #[test]
    fn revert_preserves_output_and_reverts_state() {
        // PUSH1 0x42 PUSH1 0 MSTORE PUSH1 0x20 PUSH1 0 REVERT
        let code = hex_literal::hex!("6042" "6000" "52" "6020" "6000" "fd");
        let (result, _frame) = run_code(&code, 100_000);
        match result {
            Ok(Halt::Revert { output }) => {
                assert_eq!(output.len(), 32);
                assert_eq!(output[31], 0x42);
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn sstore_clear_then_reset_cancels_refund() {
        let schedule = Schedule::new_london();
        let cache = SharedCache::default();
        let address = Address::from_low_u64_be(9);
        let mut state = InMemoryState::new();
        state.write_storage(address, U256::one(), U256::one());
        state.begin_batch();

        // PUSH1 0 PUSH1 1 SSTORE STOP (slot 1 cleared to 0)
        let code = hex_literal::hex!("6000" "6001" "55" "00");
        let analysis = cache.analysis_for(&code);
        let mut frame = Frame::new(ctx(address, Vec::new()), Arc::new(code.to_vec()), analysis, 100_000);
        let mut refund = RefundCounter::new();
        let tx = tx_context();
        run(&mut frame, &mut state, &schedule, &cache, &mut refund, None, &tx).unwrap();
        assert_eq!(refund.raw(), schedule.sstore_refund_gas as i64);

        // PUSH1 1 PUSH1 1 SSTORE STOP (same tx, set slot 1 back to 1)
        let code2 = hex_literal::hex!("6001" "6001" "55" "00");
        let analysis2 = cache.analysis_for(&code2);
        let mut frame2 = Frame::new(ctx(address, Vec::new()), Arc::new(code2.to_vec()), analysis2, 100_000);
        run(&mut frame2, &mut state, &schedule, &cache, &mut refund, None, &tx).unwrap();
        assert_eq!(refund.raw(), 0);
    }

    #[test]
    fn selfdestruct_to_self_under_eip6780_does_not_burn_the_balance() {
        use crate::state::Account;

        let schedule = Schedule::new_cancun();
        let cache = SharedCache::default();
        let address = Address::from_low_u64_be(42);
        let mut state = InMemoryState::new();
        state.set_account(
            address,
            Account {
                balance: U256::from(1000),
                nonce: 1,
                code_hash: Default::default(),
            },
        );
        state.begin_batch();

        // PUSH20 <self address> SELFDESTRUCT. The account was not created
        // earlier in this transaction, so EIP-6780 keeps it alive instead of
        // deleting it; beneficiary == self must leave the balance untouched
        // rather than zeroing it out from under the still-live account.
        let mut code = vec![0x73];
        code.extend_from_slice(address.as_bytes());
        code.push(0xff);
        let analysis = cache.analysis_for(&code);
        let mut frame = Frame::new(ctx(address, Vec::new()), Arc::new(code), analysis, 100_000);
        let mut refund = RefundCounter::new();
        run(&mut frame, &mut state, &schedule, &cache, &mut refund, None, &tx_context()).unwrap();

        assert_eq!(state.get_account(address).unwrap().balance, U256::from(1000));
    }
}
