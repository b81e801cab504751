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

//! Gas accounting: the monotonic remaining-gas counter, dynamic cost
//! formulas for the opcodes that need them, and per-transaction refund
//! bookkeeping.

use ethereum_types::U256;

use crate::error::{Error, Result};
use crate::memory::memory_gas_cost;
use crate::schedule::Schedule;

/// Monotonic remaining-gas counter for one frame.
#[derive(Debug, Clone, Copy)]
pub struct GasMeter {
    remaining: u64,
}

impl GasMeter {
    /// New meter with `gas` units available.
    pub fn new(gas: u64) -> Self {
        GasMeter { remaining: gas }
    }

    /// Gas left.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Charge `cost`; halts with [`Error::OutOfGas`] rather than underflow.
    pub fn charge(&mut self, cost: u64) -> Result<()> {
        if self.remaining < cost {
            self.remaining = 0;
            return Err(Error::OutOfGas);
        }
        self.remaining -= cost;
        Ok(())
    }

    /// Refund unused gas back into the meter (child-call return, `UnusedGas`
    /// in the reference interpreter's `InstructionResult`).
    pub fn credit(&mut self, amount: u64) {
        self.remaining += amount;
    }

    /// Consume every remaining unit (plain `InvalidOpcode`/`OutOfGas` failures).
    pub fn consume_all(&mut self) {
        self.remaining = 0;
    }
}

/// Per-transaction refund counter (EIP-2200/3529 SSTORE clears, pre-3529
/// `SELFDESTRUCT`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RefundCounter {
    total: i64,
}

impl RefundCounter {
    /// New, empty counter.
    pub fn new() -> Self {
        RefundCounter::default()
    }

    /// Add to the refund (e.g. clearing a storage slot).
    pub fn add(&mut self, amount: u64) {
        self.total += amount as i64;
    }

    /// Remove from the refund (e.g. EIP-1283 un-clearing a slot within the
    /// same transaction).
    pub fn remove(&mut self, amount: u64) {
        self.total -= amount as i64;
    }

    /// Raw accumulated refund, pre-cap.
    pub fn raw(&self) -> i64 {
        self.total
    }

    /// Capped refund applied on outermost commit: `gas_used / max_refund_quotient`.
    pub fn capped(&self, gas_used: u64, schedule: &Schedule) -> u64 {
        let raw = self.total.max(0) as u64;
        let cap = gas_used / schedule.max_refund_quotient as u64;
        raw.min(cap)
    }
}

/// `SHA3` gas: `30 + 6 * ceil(len / 32)`.
pub fn sha3_cost(len: usize, schedule: &Schedule) -> u64 {
    schedule.sha3_gas as u64 + schedule.sha3_word_gas as u64 * words(len)
}

/// Copy opcodes (`CALLDATACOPY`/`CODECOPY`/`EXTCODECOPY`/`RETURNDATACOPY`):
/// `copy_gas * ceil(len / 32)`, on top of any base cost and memory expansion.
pub fn copy_cost(len: usize, schedule: &Schedule) -> u64 {
    schedule.copy_gas as u64 * words(len)
}

/// `LOGn` gas: `375 + 375*n + 8*len`, on top of memory expansion.
pub fn log_cost(topics: usize, len: usize, schedule: &Schedule) -> u64 {
    schedule.log_gas as u64
        + schedule.log_topic_gas as u64 * topics as u64
        + schedule.log_data_gas as u64 * len as u64
}

/// `EXP` gas: base cost plus `exp_byte_gas` per non-zero byte of the exponent.
pub fn exp_cost(exponent: &U256, schedule: &Schedule) -> u64 {
    let byte_len = (exponent.bits() + 7) / 8;
    schedule.exp_gas as u64 + schedule.exp_byte_gas as u64 * byte_len as u64
}

/// Quadratic memory expansion cost delta for growing from `current_words` to
/// `new_words` (only the delta is charged, per §4.2).
pub fn memory_expansion_cost(current_words: usize, new_words: usize, schedule: &Schedule) -> u64 {
    if new_words <= current_words {
        return 0;
    }
    let new_cost = memory_gas_cost(new_words, schedule.memory_gas, schedule.quad_coeff_div);
    let old_cost = memory_gas_cost(current_words, schedule.memory_gas, schedule.quad_coeff_div);
    new_cost - old_cost
}

fn words(len: usize) -> u64 {
    ((len as u64) + 31) / 32
}

/// EIP-150 "63/64 retention": gas forwarded to a child call/create is
/// `min(requested, remaining - remaining/64)` once `sub_gas_cap_divisor` is
/// configured (Tangerine Whistle+); pre-150 schedules forward gas unchanged
/// (or fail outright if `requested > remaining`).
pub fn forwarded_gas(requested: u64, remaining: u64, schedule: &Schedule) -> u64 {
    match schedule.sub_gas_cap_divisor {
        Some(divisor) => {
            let cap = remaining - remaining / divisor as u64;
            requested.min(cap)
        }
        None => requested.min(remaining),
    }
}

/// Outcome of SSTORE gas metering: the gas to charge now, and the refund
/// delta to apply to the transaction's [`RefundCounter`] (positive = add,
/// negative = remove, matching EIP-1283's "undo a previous refund" case).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SstoreCost {
    /// Gas to charge for this `SSTORE`.
    pub gas: u64,
    /// Signed refund adjustment.
    pub refund_delta: i64,
}

/// Compute `SSTORE` gas/refund per the schedule in effect.
///
/// - Pre EIP-1283 (`Frontier`..`Constantinople` as shipped, modeled here as
///   `!schedule.eip1283`): flat `sstore_set_gas`/`sstore_reset_gas`, with a
///   flat refund when a non-zero slot is cleared to zero.
/// - EIP-1283/2200 net-metering (`schedule.eip1283`): distinguishes
///   original/current/new value to avoid charging repeatedly for writes
///   that cancel out within one transaction.
pub fn sstore_cost(original: U256, current: U256, new: U256, schedule: &Schedule) -> SstoreCost {
    if !schedule.eip1283 {
        return if current.is_zero() && !new.is_zero() {
            SstoreCost {
                gas: schedule.sstore_set_gas as u64,
                refund_delta: 0,
            }
        } else if !current.is_zero() && new.is_zero() {
            SstoreCost {
                gas: schedule.sstore_reset_gas as u64,
                refund_delta: schedule.sstore_refund_gas as i64,
            }
        } else {
            SstoreCost {
                gas: schedule.sstore_reset_gas as u64,
                refund_delta: 0,
            }
        };
    }

    let sload = schedule.sload_gas as u64;
    let sstore_reset = schedule.sstore_reset_gas as u64;
    let sstore_set = schedule.sstore_set_gas as u64;
    let clears_refund = schedule.sstore_refund_gas as i64;

    if current == new {
        return SstoreCost {
            gas: sload,
            refund_delta: 0,
        };
    }

    if original == current {
        if original.is_zero() {
            return SstoreCost {
                gas: sstore_set,
                refund_delta: 0,
            };
        }
        let mut refund_delta = 0i64;
        if new.is_zero() {
            refund_delta = clears_refund;
        }
        return SstoreCost {
            gas: sstore_reset,
            refund_delta,
        };
    }

    // original != current: slot was already dirtied earlier this transaction.
    let mut refund_delta = 0i64;
    if !original.is_zero() {
        if current.is_zero() && !new.is_zero() {
            refund_delta -= clears_refund;
        } else if !current.is_zero() && new.is_zero() {
            refund_delta += clears_refund;
        }
    }
    if original == new {
        if original.is_zero() {
            refund_delta += sstore_set as i64 - sload as i64;
        } else {
            refund_delta += sstore_reset as i64 - sload as i64;
        }
    }
    SstoreCost {
        gas: sload,
        refund_delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;

    #[test]
    fn charge_halts_on_insufficient_gas() {
        let mut meter = GasMeter::new(10);
        assert!(meter.charge(5).is_ok());
        assert_eq!(meter.remaining(), 5);
        assert_eq!(meter.charge(100), Err(Error::OutOfGas));
        assert_eq!(meter.remaining(), 0);
    }

    #[test]
    fn eip150_forwards_63_of_64() {
        let schedule = Schedule::new_byzantium();
        assert_eq!(forwarded_gas(64_000, 64_000, &schedule), 63_000);
        assert_eq!(forwarded_gas(1_000, 64_000, &schedule), 1_000);
    }

    #[test]
    fn sstore_clear_then_reset_removes_refund_eip1283() {
        let schedule = Schedule::new_berlin();
        let slot_originally_one = U256::from(1);
        let clear = sstore_cost(slot_originally_one, slot_originally_one, U256::zero(), &schedule);
        assert_eq!(clear.refund_delta, schedule.sstore_refund_gas as i64);

        // setting it back to 1 within the same tx removes the refund again.
        let reset = sstore_cost(slot_originally_one, U256::zero(), U256::one(), &schedule);
        assert_eq!(reset.refund_delta, -(schedule.sstore_refund_gas as i64));
    }

    #[test]
    fn refund_cap_respects_schedule_quotient() {
        let schedule_pre_london = Schedule::new_byzantium();
        let mut refund = RefundCounter::new();
        refund.add(10_000);
        // gas_used=20000, quotient=2 => cap 10000
        assert_eq!(refund.capped(20_000, &schedule_pre_london), 10_000);

        let schedule_london = Schedule::new_london();
        // gas_used=20000, quotient=5 => cap 4000
        assert_eq!(refund.capped(20_000, &schedule_london), 4_000);
    }

    #[test]
    fn memory_expansion_only_charges_delta() {
        let schedule = Schedule::new_byzantium();
        let first = memory_expansion_cost(0, 1, &schedule);
        let second = memory_expansion_cost(1, 1, &schedule);
        assert!(first > 0);
        assert_eq!(second, 0);
    }
}
