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

//! Call/Create orchestrator (§4.7): spawns child frames for the CALL and
//! CREATE opcode families, moves value, installs CREATE-deployed code,
//! enforces the depth cap, and folds a child frame's revert/out-of-gas
//! outcome into the 0/1 status its parent's opcode handler pushes, rather
//! than propagating it as a frame-halting `Err`. Grounded on the teacher's
//! `CALL`/`CALLCODE`/`DELEGATECALL`/`STATICCALL`/`CREATE`/`CREATE2` arms in
//! `exec_instruction`, generalized into direct recursion on the host call
//! stack (§5: depth is capped at 1024, bounding recursion depth) instead of
//! the teacher's `Resume`-trait trampoline.

use std::sync::Arc;

use ethereum_types::{Address, U256};
use keccak_hash::keccak;

use crate::debug::{DebugHooks, MessageContext, StepAction};
use crate::error::{Error, Result};
use crate::frame::{CallContext, Frame, TxContext};
use crate::gasometer::{self, RefundCounter};
use crate::interpreter::{self, Halt};
use crate::precompile::PrecompileRegistry;
use crate::schedule::{Schedule, MAX_INITCODE_SIZE};
use crate::shared_cache::SharedCache;
use crate::state::State;
use crate::word;

/// Which CALL-family opcode spawned a child frame; controls value transfer,
/// the `address`/`code_address` split, and caller/value inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
}

/// Which CREATE-family opcode spawned a child frame; controls address
/// derivation only.
#[derive(Debug, Clone)]
pub enum CreateKind {
    Create,
    Create2 { salt: U256 },
}

/// Outcome of a CALL-family dispatch, already folded into what the caller's
/// opcode handler needs: a 0/1 status to push and bytes to copy into memory.
pub struct CallOutcome {
    pub success: bool,
    pub output: Vec<u8>,
}

/// Outcome of a CREATE-family dispatch.
pub struct CreateOutcome {
    pub address: Option<Address>,
    pub output: Vec<u8>,
}

/// Move `value` from `from` to `to`, journaled through `State::set_account`
/// so a later snapshot revert restores both balances. Fails only if `from`
/// can't cover it; callers are expected to have already checked this, so a
/// failure here is a logic error rather than a reachable consensus path.
pub(crate) fn transfer_value(state: &mut dyn State, from: Address, to: Address, value: U256) -> Result<()> {
    if value.is_zero() {
        return Ok(());
    }
    let mut from_account = state.get_account(from).unwrap_or_default();
    if from_account.balance < value {
        return Err(Error::InsufficientBalance);
    }
    from_account.balance -= value;
    state.set_account(from, from_account);
    let mut to_account = state.get_account(to).unwrap_or_default();
    to_account.balance = to_account.balance.overflowing_add(value).0;
    state.set_account(to, to_account);
    Ok(())
}

fn notify_enter(
    hooks: &mut Option<&mut dyn DebugHooks>,
    caller: Address,
    callee: Address,
    value: U256,
    gas: u64,
    depth: usize,
    is_create: bool,
) -> Result<()> {
    if let Some(hooks) = hooks.as_deref_mut() {
        let ctx = MessageContext {
            caller,
            callee,
            value,
            gas,
            depth,
            is_create,
        };
        if hooks.on_enter(&ctx) == StepAction::Abort {
            return Err(Error::DebugAbort);
        }
    }
    Ok(())
}

fn notify_exit(
    hooks: &mut Option<&mut dyn DebugHooks>,
    caller: Address,
    callee: Address,
    value: U256,
    gas: u64,
    depth: usize,
    is_create: bool,
    success: bool,
) {
    if let Some(hooks) = hooks.as_deref_mut() {
        let ctx = MessageContext {
            caller,
            callee,
            value,
            gas,
            depth,
            is_create,
        };
        hooks.on_exit(&ctx, success);
    }
}

/// Run one CALL-family opcode to completion (§4.7 steps 1-5).
#[allow(clippy::too_many_arguments)]
pub fn execute_call(
    frame: &mut Frame,
    kind: CallKind,
    gas_requested: u64,
    to: Address,
    value: U256,
    input: Vec<u8>,
    state: &mut dyn State,
    schedule: &Schedule,
    cache: &SharedCache,
    refund: &mut RefundCounter,
    tx: &TxContext,
    mut hooks: Option<&mut dyn DebugHooks>,
) -> Result<CallOutcome> {
    let depth = frame.context.depth;
    if depth + 1 > schedule.max_depth {
        return Ok(CallOutcome {
            success: false,
            output: Vec::new(),
        });
    }
    if !value.is_zero() {
        let caller_balance = state
            .get_account(frame.context.address)
            .map(|a| a.balance)
            .unwrap_or_default();
        if caller_balance < value {
            return Ok(CallOutcome {
                success: false,
                output: Vec::new(),
            });
        }
    }

    let forwarded = gasometer::forwarded_gas(gas_requested, frame.gas.remaining(), schedule);
    let stipend = if !value.is_zero() {
        schedule.call_stipend as u64
    } else {
        0
    };
    frame.gas.charge(forwarded)?;
    let child_gas = forwarded.saturating_add(stipend);

    notify_enter(&mut hooks, frame.context.address, to, value, child_gas, depth + 1, false)?;

    let checkpoint = state.create_snapshot();
    let recipient = match kind {
        CallKind::Call => to,
        CallKind::CallCode | CallKind::DelegateCall | CallKind::StaticCall => frame.context.address,
    };
    if !value.is_zero() {
        transfer_value(state, frame.context.address, recipient, value)
            .expect("balance checked against the caller before any gas was forwarded");
    }

    let outcome = if PrecompileRegistry::is_precompile(to) {
        match PrecompileRegistry::run(to, &input) {
            Some(Ok((gas_cost, output))) if gas_cost <= child_gas => {
                state.commit_snapshot(checkpoint);
                frame.gas.credit(child_gas - gas_cost);
                CallOutcome { success: true, output }
            }
            _ => {
                state.revert_to_snapshot(checkpoint);
                CallOutcome {
                    success: false,
                    output: Vec::new(),
                }
            }
        }
    } else {
        let code = {
            let code_hash = state.get_account(to).map(|a| a.code_hash).unwrap_or_default();
            state.get_code(code_hash)
        };
        if code.is_empty() {
            state.commit_snapshot(checkpoint);
            frame.gas.credit(child_gas);
            CallOutcome {
                success: true,
                output: Vec::new(),
            }
        } else {
            let child_context = CallContext {
                address: match kind {
                    CallKind::Call | CallKind::StaticCall => to,
                    CallKind::CallCode | CallKind::DelegateCall => frame.context.address,
                },
                code_address: to,
                caller: match kind {
                    CallKind::DelegateCall => frame.context.caller,
                    _ => frame.context.address,
                },
                value: match kind {
                    CallKind::DelegateCall => frame.context.value,
                    _ => value,
                },
                input,
                is_static: frame.context.is_static || matches!(kind, CallKind::StaticCall),
                depth: depth + 1,
                created_this_tx: match kind {
                    CallKind::CallCode | CallKind::DelegateCall => frame.context.created_this_tx,
                    CallKind::Call | CallKind::StaticCall => false,
                },
            };
            let code = Arc::new(code);
            let analysis = cache.analysis_for(&code);
            let mut child = Frame::new(child_context, code, analysis, child_gas);
            match interpreter::run(&mut child, state, schedule, cache, refund, hooks.as_deref_mut(), tx) {
                Ok(Halt::Success { output }) => {
                    state.commit_snapshot(checkpoint);
                    frame.gas.credit(child.gas.remaining());
                    CallOutcome { success: true, output }
                }
                Ok(Halt::Revert { output }) => {
                    state.revert_to_snapshot(checkpoint);
                    frame.gas.credit(child.gas.remaining());
                    CallOutcome { success: false, output }
                }
                Ok(Halt::Paused) => return Err(Error::DebugAbort),
                Err(Error::DebugAbort) => return Err(Error::DebugAbort),
                Err(_) => {
                    state.revert_to_snapshot(checkpoint);
                    CallOutcome {
                        success: false,
                        output: Vec::new(),
                    }
                }
            }
        }
    };

    notify_exit(
        &mut hooks,
        frame.context.address,
        to,
        value,
        child_gas,
        depth + 1,
        false,
        outcome.success,
    );
    Ok(outcome)
}

/// Run one CREATE-family opcode to completion (§4.7 CREATE/CREATE2).
#[allow(clippy::too_many_arguments)]
pub fn execute_create(
    frame: &mut Frame,
    kind: CreateKind,
    value: U256,
    init_code: Vec<u8>,
    state: &mut dyn State,
    schedule: &Schedule,
    cache: &SharedCache,
    refund: &mut RefundCounter,
    tx: &TxContext,
    mut hooks: Option<&mut dyn DebugHooks>,
) -> Result<CreateOutcome> {
    let depth = frame.context.depth;
    if depth + 1 > schedule.max_depth {
        return Ok(CreateOutcome {
            address: None,
            output: Vec::new(),
        });
    }
    // EIP-3860 init-code size cap, bundled with the same Shanghai constructor
    // that turns on PUSH0 (no dedicated schedule flag exists for it).
    if schedule.have_push0 && init_code.len() > MAX_INITCODE_SIZE {
        return Ok(CreateOutcome {
            address: None,
            output: Vec::new(),
        });
    }

    let sender = frame.context.address;
    let sender_account = state.get_account(sender).unwrap_or_default();
    if sender_account.balance < value {
        return Ok(CreateOutcome {
            address: None,
            output: Vec::new(),
        });
    }

    let new_address = match &kind {
        CreateKind::Create => {
            let rlp = word::rlp_encode_sender_nonce(sender, sender_account.nonce);
            Address::from(keccak(&rlp))
        }
        CreateKind::Create2 { salt } => {
            let init_hash = keccak(&init_code);
            let mut buf = Vec::with_capacity(1 + 20 + 32 + 32);
            buf.push(0xff);
            buf.extend_from_slice(sender.as_bytes());
            let mut salt_bytes = [0u8; 32];
            salt.to_big_endian(&mut salt_bytes);
            buf.extend_from_slice(&salt_bytes);
            buf.extend_from_slice(init_hash.as_bytes());
            Address::from(keccak(&buf))
        }
    };

    let mut bumped_sender = sender_account.clone();
    bumped_sender.nonce = sender_account.nonce.saturating_add(1);
    state.set_account(sender, bumped_sender);

    let collides = state.account_exists(new_address) && {
        let existing = state.get_account(new_address).unwrap_or_default();
        existing.nonce != 0 || !state.get_code(existing.code_hash).is_empty()
    };
    if collides {
        return Ok(CreateOutcome {
            address: None,
            output: Vec::new(),
        });
    }

    frame.gas.charge(schedule.create_gas as u64)?;

    let remaining = frame.gas.remaining();
    let forwarded = gasometer::forwarded_gas(remaining, remaining, schedule);
    frame.gas.charge(forwarded)?;

    notify_enter(&mut hooks, sender, new_address, value, forwarded, depth + 1, true)?;

    let checkpoint = state.create_snapshot();
    if let Err(_) = transfer_value(state, sender, new_address, value) {
        state.revert_to_snapshot(checkpoint);
        frame.gas.credit(forwarded);
        notify_exit(&mut hooks, sender, new_address, value, forwarded, depth + 1, true, false);
        return Ok(CreateOutcome {
            address: None,
            output: Vec::new(),
        });
    }
    // The new account's nonce starts at 1 as soon as it begins holding code
    // (EIP-161), distinguishing it from a merely value-received EOA.
    let mut new_account = state.get_account(new_address).unwrap_or_default();
    new_account.nonce = 1;
    state.set_account(new_address, new_account);

    let child_context = CallContext {
        address: new_address,
        code_address: new_address,
        caller: sender,
        value,
        input: Vec::new(),
        is_static: frame.context.is_static,
        depth: depth + 1,
        created_this_tx: true,
    };
    let code = Arc::new(init_code);
    let analysis = cache.analysis_for(&code);
    let mut child = Frame::new(child_context, code, analysis, forwarded);

    let outcome = match interpreter::run(&mut child, state, schedule, cache, refund, hooks.as_deref_mut(), tx) {
        Ok(Halt::Success { output }) => {
            let code_len = output.len();
            if code_len > schedule.create_data_limit {
                state.revert_to_snapshot(checkpoint);
                CreateOutcome {
                    address: None,
                    output: Vec::new(),
                }
            } else if schedule.eip3541 && output.first() == Some(&0xef) {
                state.revert_to_snapshot(checkpoint);
                CreateOutcome {
                    address: None,
                    output: Vec::new(),
                }
            } else {
                let deposit_cost = schedule.create_data_gas as u64 * code_len as u64;
                if child.gas.charge(deposit_cost).is_err() {
                    if schedule.exceptional_failed_code_deposit {
                        state.revert_to_snapshot(checkpoint);
                        CreateOutcome {
                            address: None,
                            output,
                        }
                    } else {
                        // Frontier quirk: a failed code deposit still leaves
                        // the call "successful" with no code installed, and
                        // does not refund the gas spent attempting it.
                        state.install_code(new_address, Vec::new());
                        state.commit_snapshot(checkpoint);
                        CreateOutcome {
                            address: Some(new_address),
                            output: Vec::new(),
                        }
                    }
                } else {
                    state.install_code(new_address, output.clone());
                    state.commit_snapshot(checkpoint);
                    frame.gas.credit(child.gas.remaining());
                    CreateOutcome {
                        address: Some(new_address),
                        output,
                    }
                }
            }
        }
        Ok(Halt::Revert { output }) => {
            state.revert_to_snapshot(checkpoint);
            frame.gas.credit(child.gas.remaining());
            CreateOutcome { address: None, output }
        }
        Ok(Halt::Paused) => return Err(Error::DebugAbort),
        Err(Error::DebugAbort) => return Err(Error::DebugAbort),
        Err(_) => {
            state.revert_to_snapshot(checkpoint);
            CreateOutcome {
                address: None,
                output: Vec::new(),
            }
        }
    };

    let _ = refund; // SSTORE/SELFDESTRUCT refunds inside init code already landed in `refund`.
    notify_exit(
        &mut hooks,
        sender,
        new_address,
        value,
        forwarded,
        depth + 1,
        true,
        outcome.address.is_some(),
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use crate::frame::CallContext;
    use crate::schedule::Schedule;
    use crate::state::{Account, InMemoryState};
    use std::collections::HashMap;

    fn tx() -> TxContext {
        TxContext {
            origin: Address::from_low_u64_be(1),
            gas_price: U256::one(),
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

    fn root_frame(code: &[u8], gas: u64) -> Frame {
        let context = CallContext {
            address: Address::from_low_u64_be(100),
            code_address: Address::from_low_u64_be(100),
            caller: Address::from_low_u64_be(1),
            value: U256::zero(),
            input: Vec::new(),
            is_static: false,
            depth: 0,
            created_this_tx: false,
        };
        let code = Arc::new(code.to_vec());
        let analysis = Arc::new(Analysis::analyze(&code));
        Frame::new(context, code, analysis, gas)
    }

    #[test]
    fn call_to_account_with_no_code_succeeds_immediately() {
        let mut state = InMemoryState::new();
        state.set_account(
            Address::from_low_u64_be(100),
            Account {
                balance: U256::from(1000),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        let mut frame = root_frame(&[], 100_000);
        let schedule = Schedule::new_cancun();
        let cache = SharedCache::default();
        let mut refund = RefundCounter::new();
        let outcome = execute_call(
            &mut frame,
            CallKind::Call,
            50_000,
            Address::from_low_u64_be(200),
            U256::zero(),
            Vec::new(),
            &mut state,
            &schedule,
            &cache,
            &mut refund,
            &tx(),
            None,
        )
        .unwrap();
        assert!(outcome.success);
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn call_exceeding_depth_cap_pushes_failure_without_charging_gas() {
        let mut state = InMemoryState::new();
        let mut frame = root_frame(&[], 100_000);
        frame.context.depth = 1024;
        let schedule = Schedule::new_cancun();
        let cache = SharedCache::default();
        let mut refund = RefundCounter::new();
        let gas_before = frame.gas.remaining();
        let outcome = execute_call(
            &mut frame,
            CallKind::Call,
            50_000,
            Address::from_low_u64_be(200),
            U256::zero(),
            Vec::new(),
            &mut state,
            &schedule,
            &cache,
            &mut refund,
            &tx(),
            None,
        )
        .unwrap();
        assert!(!outcome.success);
        assert_eq!(frame.gas.remaining(), gas_before);
    }

    #[test]
    fn create2_address_is_deterministic() {
        let mut state = InMemoryState::new();
        state.set_account(
            Address::from_low_u64_be(100),
            Account {
                balance: U256::from(1_000_000),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        let schedule = Schedule::new_cancun();
        let cache = SharedCache::default();
        let mut refund = RefundCounter::new();
        // init code: PUSH1 0 PUSH1 0 RETURN (deploys empty code)
        let init_code = vec![0x60, 0x00, 0x60, 0x00, 0xf3];

        let mut frame_a = root_frame(&[], 1_000_000);
        let outcome_a = execute_create(
            &mut frame_a,
            CreateKind::Create2 { salt: U256::from(7) },
            U256::zero(),
            init_code.clone(),
            &mut state,
            &schedule,
            &cache,
            &mut refund,
            &tx(),
            None,
        )
        .unwrap();

        let mut state_b = InMemoryState::new();
        state_b.set_account(
            Address::from_low_u64_be(100),
            Account {
                balance: U256::from(1_000_000),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        let mut frame_b = root_frame(&[], 1_000_000);
        let outcome_b = execute_create(
            &mut frame_b,
            CreateKind::Create2 { salt: U256::from(7) },
            U256::zero(),
            init_code,
            &mut state_b,
            &schedule,
            &cache,
            &mut refund,
            &tx(),
            None,
        )
        .unwrap();

        assert!(outcome_a.address.is_some());
        assert_eq!(outcome_a.address, outcome_b.address);
    }

    #[test]
    fn create_deploys_code_and_installs_it_at_the_derived_address() {
        let mut state = InMemoryState::new();
        state.set_account(
            Address::from_low_u64_be(100),
            Account {
                balance: U256::zero(),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        let schedule = Schedule::new_cancun();
        let cache = SharedCache::default();
        let mut refund = RefundCounter::new();
        // init code: PUSH1 1 PUSH1 0 MSTORE8 PUSH1 1 PUSH1 0 RETURN -> deploys [0x01]
        let init_code = vec![
            0x60, 0x01, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3,
        ];
        let mut frame = root_frame(&[], 1_000_000);
        let outcome = execute_create(
            &mut frame,
            CreateKind::Create,
            U256::zero(),
            init_code,
            &mut state,
            &schedule,
            &cache,
            &mut refund,
            &tx(),
            None,
        )
        .unwrap();
        let address = outcome.address.expect("deployment should succeed");
        let account = state.get_account(address).unwrap();
        assert_eq!(state.get_code(account.code_hash), vec![0x01]);
    }

    #[test]
    fn create_charges_the_base_create_cost_before_forwarding() {
        let mut state = InMemoryState::new();
        state.set_account(
            Address::from_low_u64_be(100),
            Account {
                balance: U256::zero(),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        let schedule = Schedule::new_cancun();
        let cache = SharedCache::default();
        let mut refund = RefundCounter::new();
        // init code: STOP
        let init_code = vec![0x00];
        let mut frame = root_frame(&[], 1_000_000);
        let gas_before = frame.gas.remaining();
        execute_create(
            &mut frame,
            CreateKind::Create,
            U256::zero(),
            init_code,
            &mut state,
            &schedule,
            &cache,
            &mut refund,
            &tx(),
            None,
        )
        .unwrap();
        // The base 32000 create cost is charged to the parent directly, on
        // top of whatever the child frame consumed (here, nothing but STOP).
        assert!(gas_before - frame.gas.remaining() >= schedule.create_gas as u64);
    }
}
