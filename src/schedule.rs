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

//! Cost schedule and other parameterisations for the EVM.

/// Gas per non-accessed address when `SLOAD`ing (EIP-2929).
pub const EIP2929_COLD_SLOAD_COST: usize = 2100;
/// Gas per non-accessed address accessed from other opcodes (EIP-2929).
pub const EIP2929_COLD_ACCOUNT_ACCESS_COST: usize = 2600;
/// Gas per already-accessed address (EIP-2929).
pub const EIP2929_WARM_STORAGE_READ_COST: usize = 100;
/// Gas for an `SSTORE` that resets a warm slot (EIP-2929).
pub const EIP2929_SSTORE_RESET_GAS: usize = 5000 - EIP2929_COLD_SLOAD_COST;
/// Gas per storage key in an EIP-2930 access list.
pub const EIP2930_ACCESS_LIST_STORAGE_KEY_COST: usize = 1900;
/// Gas per address in an EIP-2930 access list.
pub const EIP2930_ACCESS_LIST_ADDRESS_COST: usize = 2400;
/// Pre-London refund cap divisor: refund capped at `gas_used / MAX_REFUND_QUOTIENT`.
pub const MAX_REFUND_QUOTIENT: usize = 2;
/// Post-London (EIP-3529) refund cap divisor.
pub const EIP3529_MAX_REFUND_QUOTIENT: usize = 5;
/// Reduced SSTORE clear refund introduced by EIP-3529.
pub const EIP3529_SSTORE_CLEARS_SCHEDULE: usize =
    EIP2929_SSTORE_RESET_GAS + EIP2930_ACCESS_LIST_STORAGE_KEY_COST;
/// Gas stipend granted to an `SSTORE` sentry check (frame must retain more
/// than this much gas to even attempt a net-metered `SSTORE`).
pub const SSTORE_SENTRY_GAS: usize = 2300;
/// EIP-170 maximum contract code size.
pub const MAX_CODE_SIZE: usize = 24576;
/// EIP-3860 maximum init-code size (Shanghai); enforced only when `have_push0`-era
/// schedules are in effect.
pub const MAX_INITCODE_SIZE: usize = 2 * MAX_CODE_SIZE;

/// Named hard-fork rule sets this crate can key a [`Schedule`] off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkSpec {
    Frontier,
    Homestead,
    #[default]
    Byzantium,
    Constantinople,
    Istanbul,
    Berlin,
    London,
    Shanghai,
    Cancun,
}

impl ForkSpec {
    /// Build the [`Schedule`] for this fork.
    pub fn schedule(self) -> Schedule {
        match self {
            ForkSpec::Frontier => Schedule::new_frontier(),
            ForkSpec::Homestead => Schedule::new_homestead(),
            ForkSpec::Byzantium => Schedule::new_byzantium(),
            ForkSpec::Constantinople => Schedule::new_constantinople(),
            ForkSpec::Istanbul => Schedule::new_istanbul(),
            ForkSpec::Berlin => Schedule::new_berlin(),
            ForkSpec::London => Schedule::new_london(),
            ForkSpec::Shanghai => Schedule::new_shanghai(),
            ForkSpec::Cancun => Schedule::new_cancun(),
        }
    }
}

/// Definition of the cost schedule and other parameterisations for the EVM.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Does a failed `CREATE` code deposit still charge/refund exceptionally.
    pub exceptional_failed_code_deposit: bool,
    /// `DELEGATECALL` enabled (Homestead+).
    pub have_delegate_call: bool,
    /// `CREATE2` enabled (Constantinople+).
    pub have_create2: bool,
    /// `REVERT` enabled (Byzantium+).
    pub have_revert: bool,
    /// `EXTCODEHASH` enabled (Constantinople+).
    pub have_extcodehash: bool,
    /// `STATICCALL` enabled (Byzantium+).
    pub have_static_call: bool,
    /// `RETURNDATASIZE`/`RETURNDATACOPY` enabled (Byzantium+).
    pub have_return_data: bool,
    /// `SHL`/`SHR`/`SAR` enabled (Constantinople+).
    pub have_bitwise_shifting: bool,
    /// `CHAINID` enabled (Istanbul+).
    pub have_chain_id: bool,
    /// `SELFBALANCE` enabled (Istanbul+).
    pub have_selfbalance: bool,
    /// `BEGINSUB`/`JUMPSUB`/`RETURNSUB` enabled. Never set by a named fork
    /// constructor in this crate (EIP-2315 was never activated on mainnet);
    /// retained for callers who build a custom `Schedule`.
    pub have_subs: bool,
    /// `BASEFEE` enabled (EIP-3198, London+).
    pub eip3198: bool,
    /// `PUSH0` enabled (EIP-3855, Shanghai+).
    pub have_push0: bool,
    /// `MCOPY` enabled (EIP-5656, Cancun+).
    pub have_mcopy: bool,
    /// `TLOAD`/`TSTORE` transient storage enabled (EIP-1153, Cancun+).
    pub have_transient_storage: bool,
    /// EIP-6780: `SELFDESTRUCT` only actually destroys same-transaction creations.
    pub eip6780: bool,
    /// EIP-3541: reject deploying code that starts with the reserved `0xEF` byte.
    pub eip3541: bool,
    /// VM stack limit.
    pub stack_limit: usize,
    /// Max number of nested calls/creates.
    pub max_depth: usize,
    /// Gas price for `EXP`.
    pub exp_gas: usize,
    /// Additional gas per byte of `EXP`'s exponent.
    pub exp_byte_gas: usize,
    /// Gas price for `SHA3`.
    pub sha3_gas: usize,
    /// Additional gas per word hashed by `SHA3`.
    pub sha3_word_gas: usize,
    /// Gas price for `SLOAD` (cold/legacy, pre EIP-2929).
    pub sload_gas: usize,
    /// Gas price for setting a zero slot to non-zero.
    pub sstore_set_gas: usize,
    /// Gas price for altering an already non-zero slot.
    pub sstore_reset_gas: usize,
    /// Refund for clearing a slot back to zero.
    pub sstore_refund_gas: usize,
    /// Gas price for `JUMPDEST`.
    pub jumpdest_gas: usize,
    /// Base gas price for `LOG*`.
    pub log_gas: usize,
    /// Additional gas per byte of `LOG*` data.
    pub log_data_gas: usize,
    /// Additional gas per `LOG*` topic.
    pub log_topic_gas: usize,
    /// Gas price for `CREATE`.
    pub create_gas: usize,
    /// Base gas price for `CALL`-family opcodes.
    pub call_gas: usize,
    /// EIP-2929 cold SLOAD cost.
    pub cold_sload_cost: usize,
    /// EIP-2929 cold account access cost.
    pub cold_account_access_cost: usize,
    /// EIP-2929 warm storage read cost.
    pub warm_storage_read_cost: usize,
    /// Stipend forwarded on `CALL`/`CALLCODE` when `value != 0`.
    pub call_stipend: usize,
    /// Additional gas required for a non-zero value transfer.
    pub call_value_transfer_gas: usize,
    /// Additional gas for creating a new account on `CALL`/`CALLCODE`.
    pub call_new_account_gas: usize,
    /// Refund for `SELFDESTRUCT` (removed by EIP-3529/London).
    pub suicide_refund_gas: usize,
    /// Per-word gas for memory already allocated.
    pub memory_gas: usize,
    /// Divisor in the quadratic memory cost term.
    pub quad_coeff_div: usize,
    /// Gas per byte of deployed code (`CREATE` code deposit).
    pub create_data_gas: usize,
    /// Maximum code size when creating a contract (EIP-170).
    pub create_data_limit: usize,
    /// Gas price for copy opcodes, per word.
    pub copy_gas: usize,
    /// Price of `EXTCODESIZE`.
    pub extcodesize_gas: usize,
    /// Base price of `EXTCODECOPY`.
    pub extcodecopy_base_gas: usize,
    /// Price of `BALANCE`.
    pub balance_gas: usize,
    /// Price of `EXTCODEHASH`.
    pub extcodehash_gas: usize,
    /// Price of `SELFDESTRUCT`.
    pub suicide_gas: usize,
    /// Additional gas when `SELFDESTRUCT` credits a new account.
    pub suicide_to_new_account_cost: usize,
    /// `63/64` retention divisor for forwarded call gas (`None` = forward all).
    pub sub_gas_cap_divisor: Option<usize>,
    /// Kill empty accounts if touched (Spurious Dragon+).
    pub kill_empty: bool,
    /// `BLOCKHASH` gas price.
    pub blockhash_gas: usize,
    /// EIP-1283 net-metered `SSTORE` gas accounting.
    pub eip1283: bool,
    /// EIP-2929 access-list cold/warm accounting.
    pub eip2929: bool,
    /// EIP-2930 optional access-list transactions.
    pub eip2930: bool,
    /// Gas used divided by this number is the maximum refundable amount.
    pub max_refund_quotient: usize,
}

impl Schedule {
    /// Schedule for the Frontier era of the Ethereum main net.
    pub fn new_frontier() -> Schedule {
        Self::bare(false, false, 21000)
    }

    /// Schedule for the Homestead era.
    pub fn new_homestead() -> Schedule {
        Self::bare(true, true, 53000)
    }

    /// Schedule for the Byzantium fork.
    pub fn new_byzantium() -> Schedule {
        let mut schedule = Self::bare(true, true, 53000);
        schedule.have_create2 = false;
        schedule.have_revert = true;
        schedule.have_static_call = true;
        schedule.have_return_data = true;
        schedule.kill_empty = true;
        schedule.exp_byte_gas = 50;
        schedule.create_data_limit = MAX_CODE_SIZE;
        schedule.suicide_gas = 5000;
        schedule.suicide_to_new_account_cost = 25000;
        schedule
    }

    /// Schedule for the Constantinople fork.
    pub fn new_constantinople() -> Schedule {
        let mut schedule = Self::new_byzantium();
        schedule.have_create2 = true;
        schedule.have_bitwise_shifting = true; // EIP-145
        schedule.have_extcodehash = true; // EIP-1052
        schedule
    }

    /// Schedule for the Istanbul fork.
    pub fn new_istanbul() -> Schedule {
        let mut schedule = Self::new_constantinople();
        schedule.have_chain_id = true; // EIP-1344
        schedule.sload_gas = 800; // EIP-1884
        schedule.balance_gas = 700; // EIP-1884
        schedule.extcodehash_gas = 700; // EIP-1884
        schedule.have_selfbalance = true; // EIP-1884
        schedule
    }

    /// Schedule for the Berlin fork.
    pub fn new_berlin() -> Schedule {
        let mut schedule = Self::new_istanbul();
        schedule.eip1283 = true;
        schedule.eip2929 = true;
        schedule.eip2930 = true;

        schedule.cold_sload_cost = EIP2929_COLD_SLOAD_COST;
        schedule.cold_account_access_cost = EIP2929_COLD_ACCOUNT_ACCESS_COST;
        schedule.warm_storage_read_cost = EIP2929_WARM_STORAGE_READ_COST;

        schedule.sload_gas = EIP2929_WARM_STORAGE_READ_COST;
        schedule.call_gas = EIP2929_COLD_ACCOUNT_ACCESS_COST;
        schedule.balance_gas = EIP2929_COLD_ACCOUNT_ACCESS_COST;
        schedule.extcodecopy_base_gas = EIP2929_COLD_ACCOUNT_ACCESS_COST;
        schedule.extcodehash_gas = EIP2929_COLD_ACCOUNT_ACCESS_COST;
        schedule.extcodesize_gas = EIP2929_COLD_ACCOUNT_ACCESS_COST;
        schedule.sstore_reset_gas = EIP2929_SSTORE_RESET_GAS;

        schedule
    }

    /// Schedule for the London fork.
    pub fn new_london() -> Schedule {
        let mut schedule = Self::new_berlin();
        schedule.eip3198 = true;
        schedule.suicide_refund_gas = 0;
        schedule.sstore_refund_gas = EIP3529_SSTORE_CLEARS_SCHEDULE;
        schedule.max_refund_quotient = EIP3529_MAX_REFUND_QUOTIENT;
        schedule.eip3541 = true;
        schedule
    }

    /// Schedule for the Shanghai fork (adds `PUSH0`, EIP-3855).
    pub fn new_shanghai() -> Schedule {
        let mut schedule = Self::new_london();
        schedule.have_push0 = true;
        schedule
    }

    /// Schedule for the Cancun fork (adds transient storage, `MCOPY`, EIP-6780).
    pub fn new_cancun() -> Schedule {
        let mut schedule = Self::new_shanghai();
        schedule.have_transient_storage = true;
        schedule.have_mcopy = true;
        schedule.eip6780 = true;
        schedule
    }

    fn bare(exceptional_failed_code_deposit: bool, have_delegate_call: bool, _tx_create_gas: usize) -> Schedule {
        Schedule {
            exceptional_failed_code_deposit,
            have_delegate_call,
            have_create2: false,
            have_revert: false,
            have_extcodehash: false,
            have_static_call: false,
            have_return_data: false,
            have_bitwise_shifting: false,
            have_chain_id: false,
            have_selfbalance: false,
            have_subs: false,
            eip3198: false,
            have_push0: false,
            have_mcopy: false,
            have_transient_storage: false,
            eip6780: false,
            eip3541: false,
            stack_limit: 1024,
            max_depth: 1024,
            exp_gas: 10,
            exp_byte_gas: 10,
            sha3_gas: 30,
            sha3_word_gas: 6,
            sload_gas: 50,
            sstore_set_gas: 20000,
            sstore_reset_gas: 5000,
            sstore_refund_gas: 15000,
            jumpdest_gas: 1,
            log_gas: 375,
            log_data_gas: 8,
            log_topic_gas: 375,
            create_gas: 32000,
            call_gas: 40,
            cold_sload_cost: 0,
            cold_account_access_cost: 0,
            warm_storage_read_cost: 0,
            call_stipend: 2300,
            call_value_transfer_gas: 9000,
            call_new_account_gas: 25000,
            suicide_refund_gas: 24000,
            memory_gas: 3,
            quad_coeff_div: 512,
            create_data_gas: 200,
            create_data_limit: usize::MAX,
            copy_gas: 3,
            extcodesize_gas: 20,
            extcodecopy_base_gas: 20,
            extcodehash_gas: 400,
            balance_gas: 20,
            suicide_gas: 0,
            suicide_to_new_account_cost: 0,
            sub_gas_cap_divisor: Some(64),
            kill_empty: false,
            blockhash_gas: 20,
            eip1283: false,
            eip2929: false,
            eip2930: false,
            max_refund_quotient: MAX_REFUND_QUOTIENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn london_raises_refund_quotient() {
        assert_eq!(Schedule::new_byzantium().max_refund_quotient, MAX_REFUND_QUOTIENT);
        assert_eq!(Schedule::new_london().max_refund_quotient, EIP3529_MAX_REFUND_QUOTIENT);
    }

    #[test]
    fn cancun_enables_transient_storage_and_mcopy() {
        let schedule = ForkSpec::Cancun.schedule();
        assert!(schedule.have_transient_storage);
        assert!(schedule.have_mcopy);
        assert!(schedule.eip6780);
    }

    #[test]
    fn berlin_warms_up_sload() {
        let schedule = Schedule::new_berlin();
        assert_eq!(schedule.sload_gas, EIP2929_WARM_STORAGE_READ_COST);
        assert_eq!(schedule.cold_sload_cost, EIP2929_COLD_SLOAD_COST);
    }
}
