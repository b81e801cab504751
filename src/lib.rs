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

//! Standalone Ethereum Virtual Machine execution engine.
//!
//! This crate is the teacher's `evm`/`vm` crate pair folded into a single,
//! self-contained interpreter: a code analyzer, a stack/memory/gas machine,
//! a call/create orchestrator, and a pluggable state backend, fronted by the
//! [`Evm`] facade that runs one whole transaction (intrinsic gas, the
//! top-level call or create, refund capping) rather than just one frame.

pub mod analysis;
pub mod debug;
pub mod error;
pub mod frame;
pub mod gasometer;
pub mod instructions;
pub mod interpreter;
pub mod journal;
pub mod memory;
pub mod orchestrator;
pub mod precompile;
pub mod schedule;
pub mod shared_cache;
pub mod stack;
pub mod state;
pub mod word;

use std::sync::Arc;

use ethereum_types::{Address, U256};
use keccak_hash::keccak;

pub use error::{Error, Result};
pub use frame::TxContext;
pub use schedule::Schedule;
pub use state::{LogEntry, State};

use debug::DebugHooks;
use frame::{CallContext, Frame};
use gasometer::RefundCounter;
use interpreter::Halt;
use shared_cache::SharedCache;

/// What kind of transaction [`Evm::execute_transaction`] runs.
#[derive(Debug, Clone)]
pub enum TransactionKind {
    /// A message call to an existing (or not yet existing, for a plain value
    /// transfer) account.
    Call {
        /// Callee address.
        to: Address,
    },
    /// Contract creation; `input` on the enclosing [`TransactionRequest`] is
    /// the init code.
    Create,
}

/// One transaction's worth of input to [`Evm::execute_transaction`].
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    pub value: U256,
    /// Calldata for a call, init code for a create.
    pub input: Vec<u8>,
    pub gas_limit: u64,
}

/// Transaction execution outcome (§6).
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub gas_left: u64,
    pub output: Vec<u8>,
    /// Set only for a successful `Create` transaction.
    pub created_address: Option<Address>,
    pub logs: Vec<LogEntry>,
    pub gas_refund: u64,
}

impl ExecutionResult {
    fn failed(gas_limit: u64) -> Self {
        ExecutionResult {
            success: false,
            gas_left: gas_limit,
            output: Vec::new(),
            created_address: None,
            logs: Vec::new(),
            gas_refund: 0,
        }
    }
}

/// Calldata cost per zero byte, constant since Frontier.
const G_TXDATAZERO: u64 = 4;
/// Calldata cost per nonzero byte pre-Istanbul.
const G_TXDATANONZERO: u64 = 68;
/// Calldata cost per nonzero byte from Istanbul onward (EIP-2028).
const G_TXDATANONZERO_EIP2028: u64 = 16;
const G_TRANSACTION: u64 = 21_000;
const G_TXCREATE: u64 = 32_000;

/// Intrinsic gas a transaction must cover before any interpreter gas is
/// spent: the flat 21000 (plus another 32000 for a create), plus a per-byte
/// charge for calldata. Ported from the teacher's `Schedule::tx_gas`-style
/// intrinsic calculation, generalized to take calldata directly instead of a
/// pre-built `SignedTransaction`.
///
/// The EIP-2028 calldata discount is gated on `Schedule.have_chain_id`
/// (the Istanbul constructor flag) in the absence of a dedicated schedule
/// field for it.
pub fn intrinsic_gas(is_create: bool, input: &[u8], schedule: &Schedule) -> u64 {
    let mut gas = G_TRANSACTION;
    if is_create {
        gas += G_TXCREATE;
    }
    let nonzero_gas = if schedule.have_chain_id {
        G_TXDATANONZERO_EIP2028
    } else {
        G_TXDATANONZERO
    };
    for &byte in input {
        gas += if byte == 0 { G_TXDATAZERO } else { nonzero_gas };
    }
    gas
}

/// Top-level facade: one instance is configured with a hard-fork schedule
/// and a shared analysis cache, and runs as many transactions against as
/// many state backends as the caller likes.
pub struct Evm {
    schedule: Schedule,
    cache: Arc<SharedCache>,
}

impl Evm {
    /// New engine with a fresh, default-sized analysis cache.
    pub fn new(schedule: Schedule) -> Self {
        Evm {
            schedule,
            cache: Arc::new(SharedCache::default()),
        }
    }

    /// New engine sharing an existing cache, e.g. across multiple `Evm`
    /// instances that execute transactions from the same block.
    pub fn with_cache(schedule: Schedule, cache: Arc<SharedCache>) -> Self {
        Evm { schedule, cache }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Execute one transaction to completion: checks intrinsic gas, runs the
    /// call or create, and folds the result into an [`ExecutionResult`].
    /// `state`'s batch boundary brackets the whole transaction, so a
    /// `DebugAbort` (the only propagated error) rolls back everything the
    /// transaction did, including the intrinsic-gas deduction.
    pub fn execute_transaction(
        &self,
        request: &TransactionRequest,
        tx: &TxContext,
        state: &mut dyn State,
        mut hooks: Option<&mut dyn DebugHooks>,
    ) -> ExecutionResult {
        state.begin_batch();

        let is_create = matches!(request.kind, TransactionKind::Create);
        let intrinsic = intrinsic_gas(is_create, &request.input, &self.schedule);
        if request.gas_limit < intrinsic {
            state.rollback_batch();
            return ExecutionResult::failed(request.gas_limit);
        }
        let budget = request.gas_limit - intrinsic;

        let mut refund = RefundCounter::new();
        let result = match &request.kind {
            TransactionKind::Call { to } => self.run_call(
                tx.origin,
                *to,
                request.value,
                request.input.clone(),
                budget,
                tx,
                state,
                &mut refund,
                hooks.as_deref_mut(),
            ),
            TransactionKind::Create => self.run_create(
                tx.origin,
                request.value,
                request.input.clone(),
                budget,
                tx,
                state,
                &mut refund,
                hooks.as_deref_mut(),
            ),
        };

        match result {
            Ok(outcome) => {
                state.commit_batch();
                outcome
            }
            Err(_) => {
                state.rollback_batch();
                ExecutionResult::failed(request.gas_limit)
            }
        }
    }

    /// Top-level message call (§4.7, depth 0). Balance/value-transfer logic
    /// mirrors `orchestrator::execute_call`, but a transaction's own frame
    /// starts at depth 0 rather than the depth+1 a nested call gets, so it
    /// cannot simply delegate to the orchestrator's child-frame helper.
    #[allow(clippy::too_many_arguments)]
    fn run_call(
        &self,
        origin: Address,
        to: Address,
        value: U256,
        input: Vec<u8>,
        gas: u64,
        tx: &TxContext,
        state: &mut dyn State,
        refund: &mut RefundCounter,
        hooks: Option<&mut dyn DebugHooks>,
    ) -> Result<ExecutionResult> {
        if !value.is_zero() {
            let balance = state.get_account(origin).map(|a| a.balance).unwrap_or_default();
            if balance < value {
                return Ok(ExecutionResult::failed(gas));
            }
            orchestrator::transfer_value(state, origin, to, value)?;
        }

        let code = {
            let code_hash = state.get_account(to).map(|a| a.code_hash).unwrap_or_default();
            state.get_code(code_hash)
        };
        if code.is_empty() {
            return Ok(ExecutionResult {
                success: true,
                gas_left: gas,
                output: Vec::new(),
                created_address: None,
                logs: state.logs().to_vec(),
                gas_refund: 0,
            });
        }

        let context = CallContext {
            address: to,
            code_address: to,
            caller: origin,
            value,
            input,
            is_static: false,
            depth: 0,
            created_this_tx: false,
        };
        let code = Arc::new(code);
        let analysis = self.cache.analysis_for(&code);
        let mut frame = Frame::new(context, code, analysis, gas);

        match interpreter::run(&mut frame, state, &self.schedule, &self.cache, refund, hooks, tx)? {
            Halt::Success { output } => {
                let gas_used = gas - frame.gas.remaining();
                let capped_refund = refund.capped(gas_used, &self.schedule);
                Ok(ExecutionResult {
                    success: true,
                    gas_left: frame.gas.remaining() + capped_refund,
                    output,
                    created_address: None,
                    logs: state.logs().to_vec(),
                    gas_refund: capped_refund,
                })
            }
            Halt::Revert { output } => Ok(ExecutionResult {
                success: false,
                gas_left: frame.gas.remaining(),
                output,
                created_address: None,
                logs: Vec::new(),
                gas_refund: 0,
            }),
            Halt::Paused => Err(Error::DebugAbort),
        }
    }

    /// Top-level contract creation (§4.7 CREATE, depth 0). Duplicates the
    /// address-derivation/collision/deposit-cost sequence from
    /// `orchestrator::execute_create` rather than sharing it, since that
    /// helper is keyed to a *caller* frame whose depth it increments by one;
    /// a transaction's own root frame has no caller frame to take that depth
    /// from.
    #[allow(clippy::too_many_arguments)]
    fn run_create(
        &self,
        origin: Address,
        value: U256,
        init_code: Vec<u8>,
        gas: u64,
        tx: &TxContext,
        state: &mut dyn State,
        refund: &mut RefundCounter,
        hooks: Option<&mut dyn DebugHooks>,
    ) -> Result<ExecutionResult> {
        if self.schedule.have_push0 && init_code.len() > schedule::MAX_INITCODE_SIZE {
            return Ok(ExecutionResult::failed(gas));
        }

        let sender_account = state.get_account(origin).unwrap_or_default();
        if sender_account.balance < value {
            return Ok(ExecutionResult::failed(gas));
        }

        let rlp = word::rlp_encode_sender_nonce(origin, sender_account.nonce);
        let new_address = Address::from(keccak(&rlp));

        let mut bumped_sender = sender_account.clone();
        bumped_sender.nonce = sender_account.nonce.saturating_add(1);
        state.set_account(origin, bumped_sender);

        let collides = state.account_exists(new_address) && {
            let existing = state.get_account(new_address).unwrap_or_default();
            existing.nonce != 0 || !state.get_code(existing.code_hash).is_empty()
        };
        if collides {
            return Ok(ExecutionResult::failed(gas));
        }

        if !value.is_zero() {
            orchestrator::transfer_value(state, origin, new_address, value)?;
        }
        let mut new_account = state.get_account(new_address).unwrap_or_default();
        new_account.nonce = 1;
        state.set_account(new_address, new_account);

        let context = CallContext {
            address: new_address,
            code_address: new_address,
            caller: origin,
            value,
            input: Vec::new(),
            is_static: false,
            depth: 0,
            created_this_tx: true,
        };
        let code = Arc::new(init_code);
        let analysis = self.cache.analysis_for(&code);
        let mut frame = Frame::new(context, code, analysis, gas);

        match interpreter::run(&mut frame, state, &self.schedule, &self.cache, refund, hooks, tx)? {
            Halt::Success { output } => {
                let code_len = output.len();
                if code_len > self.schedule.create_data_limit {
                    return Ok(ExecutionResult::failed(gas));
                }
                if self.schedule.eip3541 && output.first() == Some(&0xef) {
                    return Ok(ExecutionResult::failed(gas));
                }
                let deposit_cost = self.schedule.create_data_gas as u64 * code_len as u64;
                if frame.gas.charge(deposit_cost).is_err() {
                    if self.schedule.exceptional_failed_code_deposit {
                        return Ok(ExecutionResult {
                            success: false,
                            gas_left: 0,
                            output,
                            created_address: None,
                            logs: Vec::new(),
                            gas_refund: 0,
                        });
                    }
                    // Frontier quirk: a failed code deposit still "succeeds"
                    // with no code installed and no gas credited back.
                    state.install_code(new_address, Vec::new());
                    return Ok(ExecutionResult {
                        success: true,
                        gas_left: frame.gas.remaining(),
                        output: Vec::new(),
                        created_address: Some(new_address),
                        logs: state.logs().to_vec(),
                        gas_refund: 0,
                    });
                }
                state.install_code(new_address, output.clone());
                let gas_used = gas - frame.gas.remaining();
                let capped_refund = refund.capped(gas_used, &self.schedule);
                Ok(ExecutionResult {
                    success: true,
                    gas_left: frame.gas.remaining() + capped_refund,
                    output,
                    created_address: Some(new_address),
                    logs: state.logs().to_vec(),
                    gas_refund: capped_refund,
                })
            }
            Halt::Revert { output } => Ok(ExecutionResult {
                success: false,
                gas_left: frame.gas.remaining(),
                output,
                created_address: None,
                logs: Vec::new(),
                gas_refund: 0,
            }),
            Halt::Paused => Err(Error::DebugAbort),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Account, InMemoryState};
    use std::collections::HashMap;

    fn tx(origin: Address) -> TxContext {
        TxContext {
            origin,
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

    #[test]
    fn intrinsic_gas_charges_per_calldata_byte() {
        let schedule = Schedule::new_cancun();
        let base = intrinsic_gas(false, &[], &schedule);
        assert_eq!(base, G_TRANSACTION);
        let with_data = intrinsic_gas(false, &[0x00, 0x01], &schedule);
        assert_eq!(with_data, G_TRANSACTION + G_TXDATAZERO + G_TXDATANONZERO_EIP2028);
        let create = intrinsic_gas(true, &[], &schedule);
        assert_eq!(create, G_TRANSACTION + G_TXCREATE);
    }

    #[test]
    fn plain_value_transfer_to_an_empty_account_succeeds() {
        let evm = Evm::new(Schedule::new_cancun());
        let origin = Address::from_low_u64_be(1);
        let to = Address::from_low_u64_be(2);
        let mut state = InMemoryState::new();
        state.set_account(
            origin,
            Account {
                balance: U256::from(1_000_000),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        let request = TransactionRequest {
            kind: TransactionKind::Call { to },
            value: U256::from(100),
            input: Vec::new(),
            gas_limit: 21_000,
        };
        let result = evm.execute_transaction(&request, &tx(origin), &mut state, None);
        assert!(result.success);
        assert_eq!(state.get_account(to).unwrap().balance, U256::from(100));
        assert_eq!(state.get_account(origin).unwrap().balance, U256::from(999_900));
    }

    #[test]
    fn gas_limit_below_intrinsic_gas_fails_without_touching_state() {
        let evm = Evm::new(Schedule::new_cancun());
        let origin = Address::from_low_u64_be(1);
        let mut state = InMemoryState::new();
        state.set_account(
            origin,
            Account {
                balance: U256::from(1_000_000),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        let request = TransactionRequest {
            kind: TransactionKind::Call {
                to: Address::from_low_u64_be(2),
            },
            value: U256::zero(),
            input: Vec::new(),
            gas_limit: 100,
        };
        let result = evm.execute_transaction(&request, &tx(origin), &mut state, None);
        assert!(!result.success);
        assert_eq!(result.gas_left, 100);
    }

    #[test]
    fn create_deploys_code_and_reports_the_new_address() {
        let evm = Evm::new(Schedule::new_cancun());
        let origin = Address::from_low_u64_be(1);
        let mut state = InMemoryState::new();
        state.set_account(
            origin,
            Account {
                balance: U256::zero(),
                nonce: 0,
                code_hash: Default::default(),
            },
        );
        // init code: PUSH1 1 PUSH1 0 MSTORE8 PUSH1 1 PUSH1 0 RETURN -> deploys [0x01]
        let init_code = vec![0x60, 0x01, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3];
        let request = TransactionRequest {
            kind: TransactionKind::Create,
            value: U256::zero(),
            input: init_code,
            gas_limit: 1_000_000,
        };
        let result = evm.execute_transaction(&request, &tx(origin), &mut state, None);
        assert!(result.success);
        let address = result.created_address.expect("deployment should succeed");
        let account = state.get_account(address).unwrap();
        assert_eq!(state.get_code(account.code_hash), vec![0x01]);
    }
}
