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

//! The state backend contract (§6) plus `InMemoryState`, the reference
//! implementation generalized from the teacher's `vm::tests::FakeExt` test
//! double into a first-class (if non-persistent) backend.

use std::collections::{HashMap, HashSet};

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;

use crate::journal::{Backend, Journal, JournalEntry};

/// Account metadata the state backend tracks. Code is stored separately,
/// keyed by hash, so identical init code deployed at two addresses is only
/// stored once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub code_hash: H256,
}

/// One emitted `LOGn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// Opaque snapshot handle returned by [`State::create_snapshot`].
pub type SnapshotId = usize;

/// The account/storage/code backend frames read and write against.
///
/// `State: Backend` so that any `State` implementation is automatically
/// revertible by a [`Journal`] without duplicating the mutator surface.
pub trait State: Backend {
    fn get_account(&self, address: Address) -> Option<Account>;
    fn set_account(&mut self, address: Address, account: Account);
    fn delete_account(&mut self, address: Address);
    fn account_exists(&self, address: Address) -> bool;

    fn get_storage(&self, address: Address, key: U256) -> U256;
    fn get_transient_storage(&self, address: Address, key: U256) -> U256;

    /// Journaled persistent-storage write: records the pre-write value so a
    /// later `revert_to_snapshot` restores it, then applies the write via
    /// `Backend::set_storage`. The opcode layer must go through this rather
    /// than `Backend::set_storage` directly, which is only the raw
    /// undo-applier the journal itself calls during a revert.
    fn write_storage(&mut self, address: Address, key: U256, value: U256);
    /// EIP-1153 transient-storage write: never journaled (frame revert does
    /// not undo it), cleared only at the transaction's outer batch boundary.
    fn write_transient_storage(&mut self, address: Address, key: U256, value: U256);

    /// EIP-1283/2200 net-metering: the value `(address, key)` held at the
    /// start of the current transaction, captured lazily on first touch (and
    /// untouched by any later revert, since it predates the transaction's own
    /// writes). Needed by `SSTORE`'s dirty/clean-slot gas accounting.
    fn original_storage(&mut self, address: Address, key: U256) -> U256;

    fn get_code(&self, code_hash: H256) -> Vec<u8>;
    /// Install `code`, returning its hash (`keccak256(code)`).
    fn install_code(&mut self, address: Address, code: Vec<u8>) -> H256;

    /// Root hash of the current (uncommitted) state. `InMemoryState` has no
    /// real trie, so this is a keccak over a deterministic serialization of
    /// every touched account, good enough to satisfy determinism tests.
    fn get_state_root(&self) -> H256;
    /// Finalize pending mutations and return the new root. For
    /// `InMemoryState` this is equivalent to `get_state_root`.
    fn commit_changes(&mut self) -> H256;

    fn append_log(&mut self, entry: LogEntry);
    fn logs(&self) -> &[LogEntry];

    /// EIP-2929: whether `address` had not yet been touched this
    /// transaction. Marks it warm as a side effect.
    fn mark_account_warm(&mut self, address: Address) -> bool;
    /// EIP-2929: whether `(address, key)` had not yet been touched this
    /// transaction. Marks it warm as a side effect.
    fn mark_storage_warm(&mut self, address: Address, key: U256) -> bool;

    fn create_snapshot(&mut self) -> SnapshotId;
    fn revert_to_snapshot(&mut self, id: SnapshotId);
    fn commit_snapshot(&mut self, id: SnapshotId);

    fn begin_batch(&mut self);
    fn commit_batch(&mut self);
    fn rollback_batch(&mut self);
}

/// In-memory reference backend: a pair of hash maps behind the [`State`]
/// capability, generalized from the teacher's `vm::tests::FakeExt`.
#[derive(Debug, Default)]
pub struct InMemoryState {
    accounts: HashMap<Address, Account>,
    storage: HashMap<(Address, U256), U256>,
    transient: HashMap<(Address, U256), U256>,
    code: HashMap<H256, Vec<u8>>,
    logs: Vec<LogEntry>,
    journal: Journal,
    warm_accounts: HashSet<Address>,
    warm_storage: HashSet<(Address, U256)>,
    original_storage: HashMap<(Address, U256), U256>,
    batch_checkpoint: Option<SnapshotId>,
}

impl InMemoryState {
    pub fn new() -> Self {
        InMemoryState::default()
    }

    /// Run `f` with the journal temporarily moved out, so `f` can mutate
    /// `self` through the `Backend` impl without a double-borrow of
    /// `self.journal`.
    fn with_journal_detached<R>(&mut self, f: impl FnOnce(&mut Self, &mut Journal) -> R) -> R {
        let mut journal = std::mem::take(&mut self.journal);
        let result = f(self, &mut journal);
        self.journal = journal;
        result
    }
}

impl Backend for InMemoryState {
    fn set_balance(&mut self, address: Address, balance: U256) {
        self.accounts.entry(address).or_default().balance = balance;
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.accounts.entry(address).or_default().nonce = nonce;
    }

    fn set_storage(&mut self, address: Address, key: U256, value: U256) {
        if value.is_zero() {
            self.storage.remove(&(address, key));
        } else {
            self.storage.insert((address, key), value);
        }
    }

    fn set_transient_storage(&mut self, address: Address, key: U256, value: U256) {
        if value.is_zero() {
            self.transient.remove(&(address, key));
        } else {
            self.transient.insert((address, key), value);
        }
    }

    fn set_code(&mut self, address: Address, code: Option<Vec<u8>>) {
        match code {
            Some(bytes) => {
                let hash = keccak(&bytes);
                self.code.insert(hash, bytes);
                self.accounts.entry(address).or_default().code_hash = hash;
            }
            None => {
                self.accounts.entry(address).or_default().code_hash = H256::zero();
            }
        }
    }

    fn set_account_existence(&mut self, address: Address, exists: bool) {
        if exists {
            self.accounts.entry(address).or_default();
        } else {
            self.accounts.remove(&address);
        }
    }

    fn pop_log(&mut self) {
        self.logs.pop();
    }
}

impl State for InMemoryState {
    fn get_account(&self, address: Address) -> Option<Account> {
        self.accounts.get(&address).cloned()
    }

    fn set_account(&mut self, address: Address, account: Account) {
        let before = self.accounts.get(&address).cloned().unwrap_or_default();
        self.with_journal_detached(|state, journal| {
            // Recorded before the field-level entries below: revert_to pops
            // most-recent-first, so this must be the oldest entry to be the
            // last one undone, or the balance/nonce undo would resurrect a
            // ghost account after AccountCreated already removed it.
            if !state.accounts.contains_key(&address) {
                journal.record(JournalEntry::AccountCreated { address });
            }
            if before.balance != account.balance {
                journal.record(JournalEntry::BalanceChanged {
                    address,
                    prev: before.balance,
                });
            }
            if before.nonce != account.nonce {
                journal.record(JournalEntry::NonceChanged {
                    address,
                    prev: before.nonce,
                });
            }
            state.accounts.insert(address, account);
        });
    }

    fn delete_account(&mut self, address: Address) {
        if let Some(account) = self.accounts.remove(&address) {
            self.journal.record(JournalEntry::AccountDestroyed {
                address,
                prev_balance: account.balance,
            });
        }
    }

    fn account_exists(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    fn get_storage(&self, address: Address, key: U256) -> U256 {
        self.storage
            .get(&(address, key))
            .copied()
            .unwrap_or_default()
    }

    fn get_transient_storage(&self, address: Address, key: U256) -> U256 {
        self.transient
            .get(&(address, key))
            .copied()
            .unwrap_or_default()
    }

    fn original_storage(&mut self, address: Address, key: U256) -> U256 {
        let current = self.get_storage(address, key);
        *self.original_storage.entry((address, key)).or_insert(current)
    }

    fn write_storage(&mut self, address: Address, key: U256, value: U256) {
        let prev = self.get_storage(address, key);
        if prev != value {
            self.with_journal_detached(|state, journal| {
                journal.record(JournalEntry::StorageChanged { address, key, prev });
                state.set_storage(address, key, value);
            });
        }
    }

    fn write_transient_storage(&mut self, address: Address, key: U256, value: U256) {
        self.set_transient_storage(address, key, value);
    }

    fn get_code(&self, code_hash: H256) -> Vec<u8> {
        self.code.get(&code_hash).cloned().unwrap_or_default()
    }

    fn install_code(&mut self, address: Address, code: Vec<u8>) -> H256 {
        let hash = keccak(&code);
        self.with_journal_detached(|state, journal| {
            let prev = state
                .accounts
                .get(&address)
                .and_then(|a| state.code.get(&a.code_hash).cloned());
            journal.record(JournalEntry::CodeInstalled { address, prev });
            state.code.insert(hash, code);
            state.accounts.entry(address).or_default().code_hash = hash;
        });
        hash
    }

    fn get_state_root(&self) -> H256 {
        let mut entries: Vec<_> = self.accounts.iter().collect();
        entries.sort_by_key(|(addr, _)| **addr);
        let mut buf = Vec::new();
        for (addr, account) in entries {
            buf.extend_from_slice(addr.as_bytes());
            let mut balance_bytes = [0u8; 32];
            account.balance.to_big_endian(&mut balance_bytes);
            buf.extend_from_slice(&balance_bytes);
            buf.extend_from_slice(&account.nonce.to_be_bytes());
            buf.extend_from_slice(account.code_hash.as_bytes());
        }
        keccak(&buf)
    }

    fn commit_changes(&mut self) -> H256 {
        self.get_state_root()
    }

    fn append_log(&mut self, entry: LogEntry) {
        self.journal.record(JournalEntry::LogAppended);
        self.logs.push(entry);
    }

    fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    fn mark_account_warm(&mut self, address: Address) -> bool {
        self.warm_accounts.insert(address)
    }

    fn mark_storage_warm(&mut self, address: Address, key: U256) -> bool {
        self.warm_storage.insert((address, key))
    }

    fn create_snapshot(&mut self) -> SnapshotId {
        self.journal.checkpoint()
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) {
        self.with_journal_detached(|state, journal| journal.revert_to(id, state));
    }

    fn commit_snapshot(&mut self, _id: SnapshotId) {
        // Entries stay in the journal; an enclosing frame may still need to
        // revert them. Nothing to do until the transaction-level commit.
    }

    fn begin_batch(&mut self) {
        self.batch_checkpoint = Some(self.journal.checkpoint());
        self.original_storage.clear();
    }

    fn commit_batch(&mut self) {
        self.batch_checkpoint = None;
        self.journal.commit_all();
        self.warm_accounts.clear();
        self.warm_storage.clear();
        self.original_storage.clear();
    }

    fn rollback_batch(&mut self) {
        if let Some(checkpoint) = self.batch_checkpoint.take() {
            self.revert_to_snapshot(checkpoint);
        }
        self.warm_accounts.clear();
        self.warm_storage.clear();
        self.original_storage.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_revert_restores_balance_and_storage() {
        let mut state = InMemoryState::new();
        let addr = Address::from_low_u64_be(9);
        state.set_account(
            addr,
            Account {
                balance: U256::from(100),
                nonce: 0,
                code_hash: H256::zero(),
            },
        );
        state.set_storage(addr, U256::from(1), U256::from(7));

        let snapshot = state.create_snapshot();
        state.set_account(
            addr,
            Account {
                balance: U256::from(1),
                nonce: 1,
                code_hash: H256::zero(),
            },
        );
        state.set_storage(addr, U256::from(1), U256::from(99));
        assert_eq!(state.get_storage(addr, U256::from(1)), U256::from(99));

        state.revert_to_snapshot(snapshot);
        assert_eq!(state.get_account(addr).unwrap().balance, U256::from(100));
        assert_eq!(state.get_storage(addr, U256::from(1)), U256::from(7));
    }

    #[test]
    fn delete_account_is_reverted_by_resurrection() {
        let mut state = InMemoryState::new();
        let addr = Address::from_low_u64_be(3);
        state.set_account(
            addr,
            Account {
                balance: U256::from(5),
                nonce: 0,
                code_hash: H256::zero(),
            },
        );
        let snapshot = state.create_snapshot();
        state.delete_account(addr);
        assert!(!state.account_exists(addr));

        state.revert_to_snapshot(snapshot);
        assert!(state.account_exists(addr));
        assert_eq!(state.get_account(addr).unwrap().balance, U256::from(5));
    }

    #[test]
    fn install_code_round_trips_by_hash() {
        let mut state = InMemoryState::new();
        let addr = Address::from_low_u64_be(4);
        let hash = state.install_code(addr, vec![0x60, 0x01]);
        assert_eq!(state.get_code(hash), vec![0x60, 0x01]);
    }

    #[test]
    fn write_storage_is_undone_by_snapshot_revert() {
        let mut state = InMemoryState::new();
        let addr = Address::from_low_u64_be(7);
        state.write_storage(addr, U256::from(1), U256::from(10));
        let snapshot = state.create_snapshot();
        state.write_storage(addr, U256::from(1), U256::from(20));
        assert_eq!(state.get_storage(addr, U256::from(1)), U256::from(20));
        state.revert_to_snapshot(snapshot);
        assert_eq!(state.get_storage(addr, U256::from(1)), U256::from(10));
    }

    #[test]
    fn eip2929_warms_an_account_exactly_once() {
        let mut state = InMemoryState::new();
        let addr = Address::from_low_u64_be(5);
        assert!(state.mark_account_warm(addr));
        assert!(!state.mark_account_warm(addr));
    }

    #[test]
    fn rollback_batch_undoes_the_whole_transaction() {
        let mut state = InMemoryState::new();
        let addr = Address::from_low_u64_be(6);
        state.begin_batch();
        state.set_account(
            addr,
            Account {
                balance: U256::from(42),
                nonce: 0,
                code_hash: H256::zero(),
            },
        );
        state.rollback_batch();
        assert!(!state.account_exists(addr));
    }
}
