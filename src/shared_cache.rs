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

//! Analysis memoization, keyed by code hash and shared read-only across
//! frames/threads behind an `Arc` (§3: "the analyzer's output is cached per
//! code hash").

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ethereum_types::H256;
use keccak_hash::keccak;
use parking_lot::Mutex;

use crate::analysis::Analysis;

/// Default number of distinct code objects kept analyzed at once before the
/// least-recently-used entry is evicted.
pub const DEFAULT_CACHE_SIZE: usize = 4096;

struct Inner {
    entries: HashMap<H256, Arc<Analysis>>,
    order: VecDeque<H256>,
    capacity: usize,
}

impl Inner {
    fn touch(&mut self, hash: H256) {
        if let Some(pos) = self.order.iter().position(|h| *h == hash) {
            self.order.remove(pos);
        }
        self.order.push_back(hash);
    }

    fn insert(&mut self, hash: H256, analysis: Arc<Analysis>) {
        self.entries.insert(hash, analysis);
        self.touch(hash);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

/// A bounded, thread-shared cache mapping code hash to its [`Analysis`].
///
/// Cloning an `Arc<Analysis>` out of the cache is the only thing call sites
/// ever do with it: the analysis is immutable once built, so no lock is held
/// across actual execution, only across the (cheap) hashmap lookup/insert.
pub struct SharedCache {
    inner: Mutex<Inner>,
}

impl SharedCache {
    /// A new cache bounded at `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        SharedCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Look up (or build and insert) the [`Analysis`] for `code`, keyed by
    /// `keccak256(code)`.
    pub fn analysis_for(&self, code: &[u8]) -> Arc<Analysis> {
        let hash = keccak(code);
        {
            let mut inner = self.inner.lock();
            if let Some(analysis) = inner.entries.get(&hash).cloned() {
                inner.touch(hash);
                return analysis;
            }
        }
        let analysis = Arc::new(Analysis::analyze(code));
        self.inner.lock().insert(hash, analysis.clone());
        analysis
    }

    /// Number of distinct code objects currently memoized.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache currently holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        SharedCache::new(DEFAULT_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookups_share_the_same_analysis() {
        let cache = SharedCache::default();
        let code = hex_literal::hex!("6001600201");
        let first = cache.analysis_for(&code);
        let second = cache.analysis_for(&code);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_code_gets_distinct_entries() {
        let cache = SharedCache::default();
        cache.analysis_for(&hex_literal::hex!("00"));
        cache.analysis_for(&hex_literal::hex!("01"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicts_oldest_once_over_capacity() {
        let cache = SharedCache::new(1);
        cache.analysis_for(&hex_literal::hex!("00"));
        cache.analysis_for(&hex_literal::hex!("01"));
        assert_eq!(cache.len(), 1);
    }
}
