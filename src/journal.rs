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

//! Checkpoint/revert log backing every call/create frame's all-or-nothing
//! state semantics (§5). A checkpoint is just the journal's length; reverting
//! replays recorded entries backwards against a [`Backend`], restoring the
//! pre-entry value for each mutation.

use ethereum_types::{Address, U256};

/// One recorded state mutation, carrying enough of the pre-mutation value to
/// undo itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// An account's balance changed.
    BalanceChanged { address: Address, prev: U256 },
    /// An account's nonce changed.
    NonceChanged { address: Address, prev: u64 },
    /// A persistent storage slot changed.
    StorageChanged {
        address: Address,
        key: U256,
        prev: U256,
    },
    /// A transient (EIP-1153) storage slot changed.
    TransientStorageChanged {
        address: Address,
        key: U256,
        prev: U256,
    },
    /// Code was installed on an account (`CREATE`/`CREATE2` deposit).
    CodeInstalled {
        address: Address,
        prev: Option<Vec<u8>>,
    },
    /// A previously nonexistent account came into existence.
    AccountCreated { address: Address },
    /// `SELFDESTRUCT` marked an account for destruction.
    AccountDestroyed { address: Address, prev_balance: U256 },
    /// A `LOG0..4` was appended to the frame's log buffer.
    LogAppended,
}

/// The mutating surface a [`Journal`] needs in order to undo its own entries.
/// `state::State` requires this as a supertrait, so every `State` backend is
/// automatically journal-revertible.
pub trait Backend {
    fn set_balance(&mut self, address: Address, balance: U256);
    fn set_nonce(&mut self, address: Address, nonce: u64);
    fn set_storage(&mut self, address: Address, key: U256, value: U256);
    fn set_transient_storage(&mut self, address: Address, key: U256, value: U256);
    fn set_code(&mut self, address: Address, code: Option<Vec<u8>>);
    fn set_account_existence(&mut self, address: Address, exists: bool);
    fn pop_log(&mut self);
}

/// Append-only log of state mutations, sliced into nested checkpoints.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// A fresh, empty journal.
    pub fn new() -> Self {
        Journal::default()
    }

    /// Take a checkpoint: the current journal length. Pass this back to
    /// [`Journal::revert_to`] to undo everything recorded since.
    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    /// Record one mutation. Called by the frame immediately before applying
    /// the corresponding write to the backend.
    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Undo every entry recorded since `checkpoint`, most recent first.
    pub fn revert_to<B: Backend>(&mut self, checkpoint: usize, backend: &mut B) {
        while self.entries.len() > checkpoint {
            let entry = self
                .entries
                .pop()
                .expect("loop condition guarantees an entry is present; qed");
            match entry {
                JournalEntry::BalanceChanged { address, prev } => {
                    backend.set_balance(address, prev)
                }
                JournalEntry::NonceChanged { address, prev } => backend.set_nonce(address, prev),
                JournalEntry::StorageChanged { address, key, prev } => {
                    backend.set_storage(address, key, prev)
                }
                JournalEntry::TransientStorageChanged { address, key, prev } => {
                    backend.set_transient_storage(address, key, prev)
                }
                JournalEntry::CodeInstalled { address, prev } => backend.set_code(address, prev),
                JournalEntry::AccountCreated { address } => {
                    backend.set_account_existence(address, false)
                }
                JournalEntry::AccountDestroyed {
                    address,
                    prev_balance,
                } => {
                    backend.set_account_existence(address, true);
                    backend.set_balance(address, prev_balance);
                }
                JournalEntry::LogAppended => backend.pop_log(),
            }
        }
    }

    /// Discard the whole journal. Only valid once the outermost frame of a
    /// transaction has finished successfully; nested frames simply let their
    /// entries live on for an enclosing frame's potential revert instead.
    pub fn commit_all(&mut self) {
        self.entries.clear();
    }

    /// Number of entries currently recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeBackend {
        balances: HashMap<Address, U256>,
        logs: usize,
    }

    impl Backend for FakeBackend {
        fn set_balance(&mut self, address: Address, balance: U256) {
            self.balances.insert(address, balance);
        }
        fn set_nonce(&mut self, _address: Address, _nonce: u64) {}
        fn set_storage(&mut self, _address: Address, _key: U256, _value: U256) {}
        fn set_transient_storage(&mut self, _address: Address, _key: U256, _value: U256) {}
        fn set_code(&mut self, _address: Address, _code: Option<Vec<u8>>) {}
        fn set_account_existence(&mut self, _address: Address, _exists: bool) {}
        fn pop_log(&mut self) {
            self.logs -= 1;
        }
    }

    #[test]
    fn revert_restores_prior_balance() {
        let addr = Address::from_low_u64_be(1);
        let mut backend = FakeBackend::default();
        backend.set_balance(addr, U256::from(100));

        let mut journal = Journal::new();
        let checkpoint = journal.checkpoint();
        journal.record(JournalEntry::BalanceChanged {
            address: addr,
            prev: U256::from(100),
        });
        backend.set_balance(addr, U256::from(40));
        assert_eq!(backend.balances[&addr], U256::from(40));

        journal.revert_to(checkpoint, &mut backend);
        assert_eq!(backend.balances[&addr], U256::from(100));
        assert!(journal.is_empty());
    }

    #[test]
    fn nested_checkpoint_only_unwinds_its_own_slice() {
        let addr = Address::from_low_u64_be(2);
        let mut backend = FakeBackend::default();
        let mut journal = Journal::new();

        journal.record(JournalEntry::BalanceChanged {
            address: addr,
            prev: U256::zero(),
        });
        let inner_checkpoint = journal.checkpoint();
        journal.record(JournalEntry::BalanceChanged {
            address: addr,
            prev: U256::from(1),
        });
        assert_eq!(journal.len(), 2);

        journal.revert_to(inner_checkpoint, &mut backend);
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn commit_all_clears_the_log() {
        let mut journal = Journal::new();
        journal.record(JournalEntry::LogAppended);
        journal.commit_all();
        assert!(journal.is_empty());
    }
}
